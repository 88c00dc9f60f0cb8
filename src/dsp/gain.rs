//! Gain Effect
//!
//! Input and output trim stages of the signal chain. Changes ramp linearly
//! over the smoothing window; unity gain is an exact bypass.

use crate::dsp::effect::Effect;
use crate::dsp::smoothing::SmoothedValue;
use crate::engine::{db_to_linear, AudioBuffer};

// ============================================================================
// Constants
// ============================================================================

/// Minimum gain in dB (-96 dB = effectively silent)
pub const MIN_GAIN_DB: f32 = -96.0;

/// Maximum gain in dB (+24 dB)
pub const MAX_GAIN_DB: f32 = 24.0;

// ============================================================================
// Gain Effect
// ============================================================================

/// Smoothed gain stage
///
/// # Parameters
/// - `gain_db`: Gain in decibels (-96 to +24 dB)
#[derive(Debug, Clone)]
pub struct Gain {
    gain_db: f32,
    gain: SmoothedValue,
}

impl Gain {
    /// Create a new gain stage, clamped to the valid range
    pub fn new(gain_db: f32) -> Self {
        let clamped = clamp_gain_db(gain_db);
        Self {
            gain_db: clamped,
            gain: SmoothedValue::new(db_to_linear(clamped), 480),
        }
    }

    /// Set the ramp length used for gain changes
    pub fn set_smoothing_samples(&mut self, samples: usize) {
        self.gain.set_ramp_length(samples);
    }

    /// Set the gain in decibels; the change ramps in
    pub fn set_gain_db(&mut self, db: f32) {
        let clamped = clamp_gain_db(db);
        if clamped == self.gain_db {
            return;
        }
        self.gain_db = clamped;
        self.gain.set_target(db_to_linear(clamped));
    }

    /// Get the target gain in decibels
    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }
}

impl Default for Gain {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Effect for Gain {
    fn process(&mut self, buffer: &mut AudioBuffer, frames: usize) {
        if self.is_bypassed() {
            return;
        }

        if !self.gain.is_smoothing() {
            let g = self.gain.current();
            for channel in buffer.samples.iter_mut() {
                let n = frames.min(channel.len());
                for sample in channel[..n].iter_mut() {
                    *sample *= g;
                }
            }
            return;
        }

        // Ramp shared by every channel: step the ramp once per frame.
        for i in 0..frames {
            let g = self.gain.next_value();
            for channel in buffer.samples.iter_mut() {
                if let Some(sample) = channel.get_mut(i) {
                    *sample *= g;
                }
            }
        }
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize, _channels: usize) {
        let samples = (sample_rate as f32 * 0.01) as usize;
        self.gain.set_ramp_length(samples);
    }

    fn reset(&mut self) {
        self.gain.set_immediate(db_to_linear(self.gain_db));
    }

    fn effect_type(&self) -> &'static str {
        "gain"
    }

    fn is_bypassed(&self) -> bool {
        !self.gain.is_smoothing() && self.gain.current() == 1.0
    }
}

fn clamp_gain_db(db: f32) -> f32 {
    if db.is_finite() {
        db.clamp(MIN_GAIN_DB, MAX_GAIN_DB)
    } else {
        0.0
    }
}

// ============================================================================
// Tests
// ============================================================================
