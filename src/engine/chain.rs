//! Signal chain
//!
//! Fixed stage order, once per audio block:
//! 1. Input gain
//! 2. Amp model (mono, channel 0)
//! 3. Cabinet convolution (mono, channel 0), then copied to every channel
//! 4. Dynamics: gate, then compressor
//! 5. Modulation: chorus, delay, reverb
//! 6. Output gain
//!
//! The chain reads the published [`Snapshot`] once at the top of each block
//! and uses it unmodified for the whole block. It never allocates, locks,
//! logs or frees a snapshot resource while processing; a stage that is not
//! ready passes audio through.
//!
//! There is one chain per engine. Model state lives behind the snapshot's
//! [`ModelHandle`], which the chain only `try_lock`s: if anything else holds
//! the model, the amp stage passes the block through.

use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

use crate::amp::ModelHandle;
use crate::config::EngineConfig;
use crate::convolution::ConvolutionEngine;
use crate::dsp::{Chorus, Compressor, Delay, Effect, Gain, Gate, Reverb, DEFAULT_DELAY_MS};
use crate::engine::AudioBuffer;
use crate::state::snapshot::{Snapshot, SnapshotReader};

/// Per-block audio processor driven by published snapshots
pub struct SignalChain {
    config: EngineConfig,
    reader: SnapshotReader,
    /// Snapshot every stage is configured from
    active: Arc<Snapshot>,
    /// Snapshot active before `active`; supplies the outgoing model and IR
    /// for crossfades
    previous: Option<Arc<Snapshot>>,
    /// Id of the newest snapshot seen, adopted or not
    last_seen: u64,
    /// The next amp block crossfades from the previous snapshot's model
    model_fade: bool,
    input_gain: Gain,
    convolution: ConvolutionEngine,
    gate: Gate,
    compressor: Compressor,
    chorus: Chorus,
    delay: Delay,
    reverb: Reverb,
    output_gain: Gain,
    /// Outgoing model output during a model crossfade
    scratch: Vec<f32>,
}

impl std::fmt::Debug for SignalChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalChain")
            .field("sample_rate", &self.config.sample_rate)
            .field("block_size", &self.config.block_size)
            .field("active", &self.active.id())
            .field("last_seen", &self.last_seen)
            .finish()
    }
}

impl SignalChain {
    /// Chain for `config`, following the snapshots `reader` sees
    pub fn new(config: &EngineConfig, reader: SnapshotReader) -> Self {
        let mut chain = Self {
            config: config.clone(),
            active: Arc::new(Snapshot::default()),
            previous: None,
            last_seen: 0,
            model_fade: false,
            input_gain: Gain::new(0.0),
            convolution: ConvolutionEngine::new(config),
            gate: Gate::new(),
            compressor: Compressor::new(),
            chorus: Chorus::new(),
            delay: Delay::new(DEFAULT_DELAY_MS),
            reverb: Reverb::new(),
            output_gain: Gain::new(0.0),
            scratch: Vec::new(),
            reader,
        };
        chain.prepare_stages();
        chain.adopt_current();
        chain
    }

    fn prepare_stages(&mut self) {
        let config = &self.config;
        let stages: [&mut dyn Effect; 7] = [
            &mut self.input_gain,
            &mut self.gate,
            &mut self.compressor,
            &mut self.chorus,
            &mut self.delay,
            &mut self.reverb,
            &mut self.output_gain,
        ];
        for stage in stages {
            stage.prepare(config.sample_rate, config.block_size, config.channels);
            stage.reset();
        }

        let smoothing = config.smoothing_samples();
        self.input_gain.set_smoothing_samples(smoothing);
        self.output_gain.set_smoothing_samples(smoothing);
        self.chorus.set_smoothing_samples(smoothing);
        self.delay.set_smoothing_samples(smoothing);
        self.reverb.set_smoothing_samples(smoothing);
        self.scratch = vec![0.0; config.block_size];
    }

    /// Take the published snapshot as-is, without crossfades
    fn adopt_current(&mut self) {
        let current = Arc::clone(&*self.reader.load());
        self.last_seen = current.id();
        self.previous = None;
        self.model_fade = false;
        self.active = current;
        self.apply_active(true);
        self.reader.acknowledge(self.last_seen);
    }

    /// Push the active snapshot's settings into the stages
    fn apply_active(&mut self, immediate: bool) {
        let snap = &self.active;
        let fx = &snap.effects;

        self.input_gain.set_gain_db(fx.input_gain_db);
        self.output_gain.set_gain_db(fx.output_gain_db);
        self.convolution.set_wet_level(snap.ir_wet_level);
        self.gate.set_threshold_db(fx.gate_threshold_db());
        self.compressor.set_threshold_db(fx.compressor_threshold_db());
        self.compressor.set_ratio(fx.compressor_ratio);
        self.chorus.set_level(fx.chorus_level);
        self.delay.set_level(fx.delay_level);
        self.reverb.set_level(fx.reverb_level);

        if let Some(mut model) = snap.model.as_ref().and_then(|m| m.try_lock()) {
            model.set_parameters(&snap.amp);
        }
        if immediate {
            for stage in [&mut self.input_gain, &mut self.output_gain] {
                stage.reset();
            }
        }
    }

    /// Adopt the latest snapshot once in-flight crossfades have finished
    fn sync_snapshot(&mut self) {
        let latest = self.reader.load();
        self.last_seen = latest.id();
        if latest.id() == self.active.id() || !self.convolution.is_settled() {
            return;
        }

        let next = Arc::clone(&*latest);
        drop(latest);
        let model_changed = !same_model(self.active.model.as_ref(), next.model.as_ref());
        // The retire list still holds the dropped snapshot, so this never frees
        self.previous = Some(std::mem::replace(&mut self.active, next));
        self.model_fade = model_changed;
        self.apply_active(false);
    }

    /// Process the first `frames` samples of every channel in place
    pub fn process_block(&mut self, buffer: &mut AudioBuffer, frames: usize) {
        let frames = frames.min(buffer.len());
        if frames == 0 || buffer.num_channels() == 0 {
            return;
        }
        self.sync_snapshot();

        if !self.input_gain.is_bypassed() {
            self.input_gain.process(buffer, frames);
        }

        let mono = &mut buffer.channel_mut(0)[..frames];
        let amp_active = self.run_amp(mono);
        let outgoing_ir = self.previous.as_ref().and_then(|p| p.ir.as_deref());
        self.convolution
            .process_with(mono, self.active.ir.as_deref(), outgoing_ir);
        let cab_active =
            self.convolution.rendered_ir().is_some() || !self.convolution.is_settled();
        if amp_active || cab_active {
            buffer.copy_first_to_rest(frames);
        }

        let stages: [&mut dyn Effect; 6] = [
            &mut self.gate,
            &mut self.compressor,
            &mut self.chorus,
            &mut self.delay,
            &mut self.reverb,
            &mut self.output_gain,
        ];
        for stage in stages {
            if !stage.is_bypassed() {
                stage.process(buffer, frames);
            }
        }

        self.reader.acknowledge(self.last_seen);
    }

    /// Amp stage; returns whether any model touched the block
    fn run_amp(&mut self, block: &mut [f32]) -> bool {
        let incoming = self.active.model.as_ref();
        if !self.model_fade {
            return match incoming.and_then(|m| m.try_lock()) {
                Some(mut model) => {
                    model.process_block(block);
                    true
                }
                None => false,
            };
        }

        // Equal-power crossfade from the previous model over this block
        self.model_fade = false;
        let outgoing = self.previous.as_ref().and_then(|p| p.model.as_ref());
        let mut old = outgoing.and_then(|m| m.try_lock());
        let mut new = incoming.and_then(|m| m.try_lock());
        if old.is_none() && new.is_none() {
            return false;
        }

        let total = block.len() as f32;
        let span = self.scratch.len().max(1);
        for (c, chunk) in block.chunks_mut(span).enumerate() {
            let scratch = &mut self.scratch[..chunk.len()];
            scratch.copy_from_slice(chunk);
            if let Some(model) = old.as_mut() {
                model.process_block(scratch);
            }
            if let Some(model) = new.as_mut() {
                model.process_block(chunk);
            }
            for (j, (y, &faded)) in chunk.iter_mut().zip(scratch.iter()).enumerate() {
                let pos = (c * span + j + 1) as f32;
                let theta = FRAC_PI_2 * pos / total;
                *y = faded * theta.cos() + *y * theta.sin();
            }
        }
        true
    }

    /// Clear every stage's history (filter state, convolution tail, delay
    /// lines) and re-adopt the published snapshot without crossfades
    ///
    /// For discontinuities such as transport jumps. Not called on snapshot
    /// swaps, which crossfade instead.
    pub fn reset(&mut self) {
        let stages: [&mut dyn Effect; 7] = [
            &mut self.input_gain,
            &mut self.gate,
            &mut self.compressor,
            &mut self.chorus,
            &mut self.delay,
            &mut self.reverb,
            &mut self.output_gain,
        ];
        for stage in stages {
            stage.reset();
        }
        self.convolution.reset();
        if let Some(mut model) = self.active.model.as_ref().and_then(|m| m.try_lock()) {
            model.reset();
        }
        self.adopt_current();
    }

    /// Rebuild every stage for a new sample rate or block size
    ///
    /// Not real-time safe. The controller must be reconfigured with the same
    /// configuration so published resources match.
    pub fn reinitialize(&mut self, config: &EngineConfig) {
        self.config = config.clone();
        self.convolution = ConvolutionEngine::new(config);
        self.prepare_stages();
        if let Some(model) = self.active.model.as_ref() {
            model.lock().reset();
        }
        self.adopt_current();
        log::info!(
            "Signal chain reinitialised: {} Hz, {} frames, {} channels",
            config.sample_rate,
            config.block_size,
            config.channels
        );
    }

    /// Latency added by the chain in samples
    pub fn latency_samples(&self) -> usize {
        self.convolution.latency_samples()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Snapshot the last block was processed with
    pub fn active_snapshot(&self) -> &Arc<Snapshot> {
        &self.active
    }

    /// Id of the newest published snapshot the chain has seen
    pub fn last_snapshot_id(&self) -> u64 {
        self.last_seen
    }

    /// True while a model or IR crossfade is in flight
    pub fn is_transitioning(&self) -> bool {
        self.model_fade || !self.convolution.is_settled()
    }
}

fn same_model(a: Option<&ModelHandle>, b: Option<&ModelHandle>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.ptr_eq(b),
        (None, None) => true,
        _ => false,
    }
}
