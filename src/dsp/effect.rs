//! Effect trait definition
//!
//! Base trait for the dynamics and modulation stages of the signal chain.

use crate::engine::AudioBuffer;

/// Base trait for all DSP effects
///
/// Effects process the first `frames` samples of each channel in place.
/// `process` runs on the audio thread: it must not allocate, block, or log.
pub trait Effect: Send {
    /// Process the first `frames` samples of each channel in place
    fn process(&mut self, buffer: &mut AudioBuffer, frames: usize);

    /// Prepare the effect for processing
    ///
    /// Called from the control path when the sample rate, block size, or
    /// channel count changes. May allocate.
    fn prepare(&mut self, sample_rate: u32, max_block_size: usize, channels: usize);

    /// Reset effect state
    ///
    /// Clears any internal buffers/state (filter history, delay lines).
    fn reset(&mut self);

    /// Get the effect type identifier
    fn effect_type(&self) -> &'static str;

    /// True when processing would leave the signal untouched
    fn is_bypassed(&self) -> bool;
}
