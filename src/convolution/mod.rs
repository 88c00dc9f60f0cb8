//! Convolution Module
//!
//! Cabinet simulation by partitioned FFT convolution:
//! - IR preparation (mixdown, resample, trim, cap, normalise, partition)
//! - Uniform partitioned convolver with equal-power IR crossfades
//! - Wet/dry mixing against a latency-aligned dry copy
//! - IR file decoding

pub mod decoder;
pub mod ir;
mod partitioned;

use std::path::Path;
use std::sync::Arc;

pub use decoder::{
    decoder_for, default_decoders, DecodedAudio, IrDecoder, SymphoniaIrDecoder, WavIrDecoder,
};
pub use ir::{prepare_ir, IrBuffer, IrPrepareOptions, PreparedIr};

use crate::config::EngineConfig;
use crate::error::{DoomError, IrLoadError, Result};
use partitioned::PartitionedConvolver;

/// Default wet level when an IR is first loaded
pub const DEFAULT_WET_LEVEL: f32 = 1.0;

/// Mono cabinet stage
///
/// Standalone use goes through [`ConvolutionEngine::load_ir`] and
/// [`ConvolutionEngine::process_block`]. Inside the signal chain the active
/// IR comes from the published snapshot instead, so the engine never owns
/// or frees it on the audio thread.
pub struct ConvolutionEngine {
    options: IrPrepareOptions,
    core: PartitionedConvolver,
    ir: Option<Arc<PreparedIr>>,
    /// IR still rendered while a switch to `ir` is pending
    outgoing: Option<Arc<PreparedIr>>,
}

impl std::fmt::Debug for ConvolutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvolutionEngine")
            .field("block_size", &self.core.block_size())
            .field("max_partitions", &self.core.max_partitions())
            .field("ir", &self.ir.as_ref().map(|ir| ir.id()))
            .field("wet_level", &self.core.wet_level())
            .finish()
    }
}

impl ConvolutionEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            options: IrPrepareOptions::from_config(config),
            core: PartitionedConvolver::new(
                config.block_size,
                config.max_partitions(),
                DEFAULT_WET_LEVEL,
                config.smoothing_samples(),
            ),
            ir: None,
            outgoing: None,
        }
    }

    /// Preparation options matching this engine's geometry
    pub fn prepare_options(&self) -> IrPrepareOptions {
        self.options
    }

    /// Prepare mono `samples` and make them the active IR
    ///
    /// The prepared length is capped at `max_length` and at the engine's
    /// configured maximum, whichever is smaller.
    pub fn load_ir(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        max_length: usize,
    ) -> std::result::Result<(), IrLoadError> {
        let ir = IrBuffer::from_mono(samples.to_vec(), sample_rate);
        let options = self
            .options
            .with_max_length(max_length.min(self.options.max_length));
        let prepared = prepare_ir(&ir, &options)?;
        self.set_prepared(Some(Arc::new(prepared)))
    }

    /// Decode an IR file and make it the active IR
    pub fn load_ir_file(&mut self, path: &Path, decoder: &dyn IrDecoder) -> Result<()> {
        let ir = decoder.decode(path)?.into_ir_buffer();
        let prepared = prepare_ir(&ir, &self.options).map_err(|source| DoomError::ImpulseResponse {
            path: path.to_path_buf(),
            source,
        })?;
        self.set_prepared(Some(Arc::new(prepared)))
            .map_err(|source| DoomError::ImpulseResponse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Swap in an already prepared IR, or `None` to bypass
    pub fn set_prepared(
        &mut self,
        ir: Option<Arc<PreparedIr>>,
    ) -> std::result::Result<(), IrLoadError> {
        if let Some(ir) = &ir {
            self.check(ir)?;
        }
        // Keep whatever is still audible so the crossfade can start from it
        if self.core.rendered() == self.ir.as_ref().map(|ir| ir.id()) {
            self.outgoing = self.ir.take();
        }
        self.ir = ir;
        Ok(())
    }

    pub fn clear_ir(&mut self) {
        // Bypass is always a valid target
        let _ = self.set_prepared(None);
    }

    /// Reject an IR built for another geometry
    pub fn check(&self, ir: &PreparedIr) -> std::result::Result<(), IrLoadError> {
        if ir.partition_size() != self.core.block_size() {
            return Err(IrLoadError::PartitionMismatch {
                expected: self.core.block_size(),
                found: ir.partition_size(),
            });
        }
        if ir.num_partitions() > self.core.max_partitions() {
            return Err(IrLoadError::TooLong {
                partitions: ir.num_partitions(),
                max_partitions: self.core.max_partitions(),
            });
        }
        Ok(())
    }

    /// Wet level in [0, 1]; ramped over the smoothing window
    pub fn set_wet_level(&mut self, level: f32) {
        let level = if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) };
        self.core.set_wet_level(level);
    }

    pub fn wet_level(&self) -> f32 {
        self.core.wet_level()
    }

    /// Process a mono block with the engine's own IR
    pub fn process_block(&mut self, block: &mut [f32]) {
        self.core
            .process(block, self.ir.as_deref(), self.outgoing.as_deref());
    }

    /// Process with an IR owned by someone else (the snapshot)
    ///
    /// IRs built for another geometry are treated as absent.
    pub(crate) fn process_with(
        &mut self,
        block: &mut [f32],
        ir: Option<&PreparedIr>,
        outgoing: Option<&PreparedIr>,
    ) {
        let target = ir.filter(|ir| self.core.accepts(ir));
        let outgoing = outgoing.filter(|ir| self.core.accepts(ir));
        self.core.process(block, target, outgoing);
    }

    /// Id of the IR currently producing output
    pub(crate) fn rendered_ir(&self) -> Option<u64> {
        self.core.rendered()
    }

    /// No crossfade running or pending
    pub fn is_settled(&self) -> bool {
        self.core.is_settled()
    }

    /// Clear the convolution tail and the dry delay
    pub fn reset(&mut self) {
        self.core.reset();
    }

    /// True when an IR is loaded
    pub fn is_ready(&self) -> bool {
        self.ir.is_some()
    }

    /// Processing latency in samples: one partition while an IR is active
    pub fn latency_samples(&self) -> usize {
        self.core.latency_samples()
    }

    /// Effective length of the loaded IR after trim and cap
    pub fn effective_length(&self) -> usize {
        self.ir.as_ref().map(|ir| ir.len()).unwrap_or(0)
    }

    pub fn fft_size(&self) -> usize {
        self.core.fft_size()
    }

    pub fn impulse_response(&self) -> Option<&Arc<PreparedIr>> {
        self.ir.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ConvolutionEngine {
        ConvolutionEngine::new(&EngineConfig::default())
    }

    fn noise(len: usize) -> Vec<f32> {
        let mut state = 0x1234_5678u32;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5
            })
            .collect()
    }

    #[test]
    fn test_long_ir_capped() {
        let mut conv = engine();
        conv.load_ir(&noise(96000), 48000, 8192).unwrap();
        assert!(conv.is_ready());
        assert_eq!(conv.effective_length(), 8192);
    }

    #[test]
    fn test_max_length_never_exceeds_engine_limit() {
        let mut conv = engine();
        conv.load_ir(&noise(20000), 48000, 1 << 20).unwrap();
        assert_eq!(conv.effective_length(), 8192);
    }

    #[test]
    fn test_failed_load_keeps_previous_ir() {
        let mut conv = engine();
        conv.load_ir(&[1.0, 0.5], 48000, 8192).unwrap();
        assert!(matches!(
            conv.load_ir(&[], 48000, 8192),
            Err(IrLoadError::Empty)
        ));
        assert!(conv.is_ready());
        assert_eq!(conv.effective_length(), 2);
    }

    #[test]
    fn test_no_ir_is_passthrough() {
        let mut conv = engine();
        let input = noise(1000);
        let mut block = input.clone();
        conv.process_block(&mut block);
        assert_eq!(block, input);
        assert_eq!(conv.latency_samples(), 0);
    }

    #[test]
    fn test_dry_mix_is_delayed_input() {
        let mut conv = engine();
        conv.load_ir(&noise(500), 48000, 8192).unwrap();
        conv.set_wet_level(0.0);
        conv.reset();

        let input = noise(128 * 8);
        let mut output = input.clone();
        for chunk in output.chunks_mut(128) {
            conv.process_block(chunk);
        }
        assert_eq!(conv.latency_samples(), 128);
        // After the bypass-to-IR fade: pure dry, one partition late
        for n in 256..input.len() {
            assert!((output[n] - input[n - 128]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_half_wet_mixes_delayed_dry_and_convolved() {
        let mut conv = engine();
        let taps: Vec<f32> = noise(300)
            .iter()
            .enumerate()
            .map(|(i, s)| s * (-(i as f32) / 60.0).exp())
            .collect();
        conv.load_ir(&taps, 48000, 8192).unwrap();
        conv.set_wet_level(0.5);
        let h = conv.impulse_response().unwrap().samples().to_vec();

        let block = 128;
        let input: Vec<f32> = noise(block * 24).iter().map(|s| s * 0.5).collect();
        let mut output = input.clone();
        for chunk in output.chunks_mut(block) {
            conv.process_block(chunk);
        }

        let convolved = |m: usize| -> f32 {
            h.iter()
                .enumerate()
                .take(m + 1)
                .map(|(k, &hk)| hk * input[m - k])
                .sum()
        };
        // Past the fade-in and the wet ramp
        for n in block * 8..input.len() {
            let m = n - block;
            let expected = 0.5 * input[m] + 0.5 * convolved(m);
            assert!(
                (output[n] - expected).abs() < 1e-3,
                "n={} got {} expected {}",
                n,
                output[n],
                expected
            );
        }
    }

    #[test]
    fn test_geometry_checked() {
        let conv = engine();
        let other = prepare_ir(
            &IrBuffer::from_mono(vec![1.0; 64], 48000),
            &IrPrepareOptions {
                partition_size: 64,
                ..conv.prepare_options()
            },
        )
        .unwrap();
        assert!(matches!(
            conv.check(&other),
            Err(IrLoadError::PartitionMismatch {
                expected: 128,
                found: 64
            })
        ));
    }

    #[test]
    fn test_wet_level_clamped() {
        let mut conv = engine();
        conv.set_wet_level(3.0);
        assert_eq!(conv.wet_level(), 1.0);
        conv.set_wet_level(f32::NAN);
        assert_eq!(conv.wet_level(), 0.0);
    }
}
