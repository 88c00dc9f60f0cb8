//! Compressor effect
//!
//! Feed-forward compressor with linked peak detection, hard or soft knee, and
//! one-pole attack/release smoothing of the gain reduction. A ratio of 1:1 is
//! an exact bypass once any gain reduction has released back to unity.

use super::effect::Effect;
use crate::engine::{db_to_linear, linear_to_db, AudioBuffer};

/// Gain reduction this close to unity snaps to exactly 1.0
const UNITY_EPSILON: f32 = 1e-4;

/// Compressor parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CompressorParams {
    /// Threshold level in dB (-60 to 0 dB)
    pub threshold_db: f32,
    /// Compression ratio (1.0 to 20.0, representing 1:1 to 20:1)
    pub ratio: f32,
    /// Attack time in milliseconds (0.1 to 100 ms)
    pub attack_ms: f32,
    /// Release time in milliseconds (10 to 1000 ms)
    pub release_ms: f32,
    /// Knee width in dB (0 = hard knee, up to 12 dB for soft knee)
    pub knee_db: f32,
}

impl Default for CompressorParams {
    fn default() -> Self {
        Self {
            threshold_db: 0.0,
            ratio: 1.0,
            attack_ms: 10.0,
            release_ms: 100.0,
            knee_db: 6.0,
        }
    }
}

impl CompressorParams {
    /// Clamp parameters to valid ranges
    pub fn clamp(&mut self) {
        self.threshold_db = self.threshold_db.clamp(-60.0, 0.0);
        self.ratio = self.ratio.clamp(1.0, 20.0);
        self.attack_ms = self.attack_ms.clamp(0.1, 100.0);
        self.release_ms = self.release_ms.clamp(10.0, 1000.0);
        self.knee_db = self.knee_db.clamp(0.0, 12.0);
    }
}

/// Compressor dynamics processor
#[derive(Debug, Clone)]
pub struct Compressor {
    params: CompressorParams,
    sample_rate: f64,
    attack_coeff: f32,
    release_coeff: f32,
    /// Current gain reduction (linear), shared by linked channels
    gain_reduction: f32,
}

impl Compressor {
    /// Create a new compressor with default (bypassed) parameters
    pub fn new() -> Self {
        let mut comp = Self {
            params: CompressorParams::default(),
            sample_rate: 48000.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            gain_reduction: 1.0,
        };
        comp.update_coefficients();
        comp
    }

    /// Create a new compressor with custom parameters
    pub fn with_params(params: CompressorParams) -> Self {
        let mut comp = Self::new();
        comp.set_params(params);
        comp
    }

    pub fn params(&self) -> &CompressorParams {
        &self.params
    }

    /// Set the parameters (clamps)
    pub fn set_params(&mut self, params: CompressorParams) {
        self.params = params;
        self.params.clamp();
        self.update_coefficients();
    }

    /// Set threshold in dB
    pub fn set_threshold_db(&mut self, threshold_db: f32) {
        self.params.threshold_db = threshold_db.clamp(-60.0, 0.0);
    }

    /// Set compression ratio (1:1 to 20:1)
    pub fn set_ratio(&mut self, ratio: f32) {
        self.params.ratio = ratio.clamp(1.0, 20.0);
    }

    /// Current gain reduction in dB for metering
    pub fn gain_reduction_db(&self) -> f32 {
        if self.gain_reduction > 0.0 {
            20.0 * self.gain_reduction.log10()
        } else {
            -96.0
        }
    }

    /// coeff = exp(-1 / time_in_samples)
    fn update_coefficients(&mut self) {
        let attack_samples = (self.params.attack_ms / 1000.0) * self.sample_rate as f32;
        let release_samples = (self.params.release_ms / 1000.0) * self.sample_rate as f32;

        self.attack_coeff = if attack_samples > 0.0 {
            (-1.0 / attack_samples).exp()
        } else {
            0.0
        };
        self.release_coeff = if release_samples > 0.0 {
            (-1.0 / release_samples).exp()
        } else {
            0.0
        };
    }

    /// Gain reduction in dB (zero or negative) for an input level in dB
    fn compute_gain_reduction_db(&self, input_db: f32) -> f32 {
        let threshold = self.params.threshold_db;
        let ratio = self.params.ratio;
        let knee = self.params.knee_db;

        if knee > 0.0 {
            let knee_start = threshold - knee / 2.0;
            let knee_end = threshold + knee / 2.0;

            if input_db <= knee_start {
                0.0
            } else if input_db >= knee_end {
                (threshold + (input_db - threshold) / ratio) - input_db
            } else {
                // Quadratic interpolation of the ratio across the knee
                let knee_factor = (input_db - knee_start) / knee;
                let effective_ratio = 1.0 + (ratio - 1.0) * knee_factor * knee_factor;
                let over_threshold = input_db - knee_start;
                (knee_start + over_threshold / effective_ratio) - input_db
            }
        } else if input_db <= threshold {
            0.0
        } else {
            (threshold + (input_db - threshold) / ratio) - input_db
        }
    }

}

impl Default for Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for Compressor {
    fn process(&mut self, buffer: &mut AudioBuffer, frames: usize) {
        if self.is_bypassed() {
            return;
        }
        let releasing = self.params.ratio <= 1.0;

        let frames = frames.min(buffer.len());
        for frame in 0..frames {
            // Linked detection: loudest channel drives every channel
            let max_input_level = buffer
                .samples
                .iter()
                .map(|ch| ch[frame].abs())
                .fold(0.0_f32, f32::max);

            let input_db = linear_to_db(max_input_level).max(-96.0);
            let target_gr = if releasing {
                1.0
            } else {
                db_to_linear(self.compute_gain_reduction_db(input_db))
            };

            let current_gr = self.gain_reduction;
            self.gain_reduction = if target_gr < current_gr {
                self.attack_coeff * current_gr + (1.0 - self.attack_coeff) * target_gr
            } else {
                self.release_coeff * current_gr + (1.0 - self.release_coeff) * target_gr
            };
            if releasing && self.gain_reduction >= 1.0 - UNITY_EPSILON {
                self.gain_reduction = 1.0;
            }

            for channel in buffer.samples.iter_mut() {
                channel[frame] *= self.gain_reduction;
            }
        }
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize, _channels: usize) {
        self.sample_rate = sample_rate as f64;
        self.update_coefficients();
    }

    fn reset(&mut self) {
        self.gain_reduction = 1.0;
    }

    fn effect_type(&self) -> &'static str {
        "compressor"
    }

    /// Bypassed at 1:1, but only after the gain reduction is back at unity
    fn is_bypassed(&self) -> bool {
        self.params.ratio <= 1.0 && self.gain_reduction >= 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_buffer(value: f32, num_samples: usize) -> AudioBuffer {
        AudioBuffer::from_channels(vec![vec![value; num_samples]; 2], 48000)
    }

    #[test]
    fn test_unity_ratio_is_exact_bypass() {
        let mut comp = Compressor::new();
        comp.set_threshold_db(-40.0);
        let mut buffer = create_test_buffer(0.9, 256);
        comp.process(&mut buffer, 256);
        assert!(comp.is_bypassed());
        assert!(buffer.channel(0).iter().all(|&s| s == 0.9));
    }

    #[test]
    fn test_hard_knee_gain_computer() {
        let comp = Compressor::with_params(CompressorParams {
            threshold_db: -20.0,
            ratio: 4.0,
            knee_db: 0.0,
            ..Default::default()
        });
        assert_eq!(comp.compute_gain_reduction_db(-30.0), 0.0);
        // 20 dB over threshold at 4:1 leaves 5 dB over: 15 dB reduction
        assert!((comp.compute_gain_reduction_db(0.0) + 15.0).abs() < 1e-4);
    }

    #[test]
    fn test_soft_knee_is_continuous() {
        let comp = Compressor::with_params(CompressorParams {
            threshold_db: -20.0,
            ratio: 8.0,
            knee_db: 6.0,
            ..Default::default()
        });
        let below = comp.compute_gain_reduction_db(-23.0 - 1e-3);
        let at_start = comp.compute_gain_reduction_db(-23.0 + 1e-3);
        assert!((below - at_start).abs() < 0.01);
    }

    #[test]
    fn test_loud_signal_is_reduced() {
        let mut comp = Compressor::with_params(CompressorParams {
            threshold_db: -30.0,
            ratio: 10.0,
            attack_ms: 0.1,
            ..Default::default()
        });
        comp.prepare(48000, 512, 2);
        let mut buffer = create_test_buffer(1.0, 4800);
        comp.process(&mut buffer, 4800);
        assert!(buffer.channel(0)[4799] < 0.2);
        assert!(comp.gain_reduction_db() < -10.0);
        assert_eq!(buffer.channel(0)[4799], buffer.channel(1)[4799]);
    }

    #[test]
    fn test_unity_ratio_releases_before_bypass() {
        let mut comp = Compressor::with_params(CompressorParams {
            threshold_db: -60.0,
            ratio: 20.0,
            attack_ms: 0.1,
            ..Default::default()
        });
        comp.prepare(48000, 512, 1);
        let mut buffer = AudioBuffer::from_channels(vec![vec![0.8; 4800]], 48000);
        comp.process(&mut buffer, 4800);
        let squashed = buffer.channel(0)[4799];
        assert!(squashed < 0.05);

        comp.set_ratio(1.0);
        assert!(!comp.is_bypassed());

        let mut last = squashed;
        let mut max_step = 0.0_f32;
        for _ in 0..200 {
            let mut buffer = AudioBuffer::from_channels(vec![vec![0.8; 480]], 48000);
            comp.process(&mut buffer, 480);
            for &s in buffer.channel(0) {
                max_step = max_step.max((s - last).abs());
                last = s;
            }
        }
        assert!(max_step < 0.01, "step {}", max_step);
        assert!(comp.is_bypassed());
        assert_eq!(last, 0.8);
    }

    #[test]
    fn test_params_are_clamped() {
        let comp = Compressor::with_params(CompressorParams {
            threshold_db: -100.0,
            ratio: 50.0,
            ..Default::default()
        });
        assert_eq!(comp.params().threshold_db, -60.0);
        assert_eq!(comp.params().ratio, 20.0);
    }
}
