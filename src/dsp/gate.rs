//! Noise Gate effect
//!
//! Attenuates audio below a threshold. Envelope follower with hysteresis and
//! a hold timer to prevent chattering. A threshold of "off" is an exact bypass
//! once the gate has reopened to unity gain.

use super::effect::Effect;
use crate::engine::{db_to_linear, AudioBuffer};

/// Gain this close to unity snaps to exactly 1.0 while disabled
const UNITY_EPSILON: f32 = 1e-4;

/// Gate state for the envelope follower
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    /// Gate is closed (attenuating)
    Closed,
    /// Gate is opening
    Attack,
    /// Gate is open (passing signal)
    Open,
    /// Waiting before release
    Hold,
    /// Gate is closing
    Release,
}

/// Gate parameters
#[derive(Debug, Clone, PartialEq)]
pub struct GateParams {
    /// Threshold in dB (-80 to 0); `None` disables the gate
    pub threshold_db: Option<f32>,
    /// Attack time in ms (0.1 to 50)
    pub attack_ms: f32,
    /// Release time in ms (10 to 500)
    pub release_ms: f32,
    /// Hold time in ms (0 to 100)
    pub hold_ms: f32,
    /// Range/attenuation in dB (-80 = full gate, 0 = no effect)
    pub range_db: f32,
}

impl Default for GateParams {
    fn default() -> Self {
        Self {
            threshold_db: None,
            attack_ms: 1.0,
            release_ms: 50.0,
            hold_ms: 10.0,
            range_db: -80.0,
        }
    }
}

impl GateParams {
    /// Clamp parameters to valid ranges
    pub fn clamp(&mut self) {
        self.threshold_db = self.threshold_db.map(|t| t.clamp(-80.0, 0.0));
        self.attack_ms = self.attack_ms.clamp(0.1, 50.0);
        self.release_ms = self.release_ms.clamp(10.0, 500.0);
        self.hold_ms = self.hold_ms.clamp(0.0, 100.0);
        self.range_db = self.range_db.clamp(-80.0, 0.0);
    }
}

/// Noise Gate effect
#[derive(Debug, Clone)]
pub struct Gate {
    params: GateParams,
    sample_rate: f64,
    state: GateState,
    /// Envelope follower value (linear)
    envelope: f32,
    /// Current gain (linear, range to 1)
    current_gain: f32,
    hold_counter: usize,
    hysteresis_db: f32,
    attack_coeff: f32,
    release_coeff: f32,
    gate_attack_coeff: f32,
    gate_release_coeff: f32,
    hold_samples: usize,
    range_linear: f32,
    threshold_linear: f32,
    threshold_low_linear: f32,
}

impl Gate {
    /// Create a new, disabled gate
    pub fn new() -> Self {
        Self::with_params(GateParams::default())
    }

    pub fn with_params(mut params: GateParams) -> Self {
        params.clamp();
        let mut gate = Self {
            params,
            sample_rate: 48000.0,
            state: GateState::Open,
            envelope: 0.0,
            current_gain: 1.0,
            hold_counter: 0,
            hysteresis_db: 2.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            gate_attack_coeff: 0.0,
            gate_release_coeff: 0.0,
            hold_samples: 0,
            range_linear: 0.0,
            threshold_linear: 0.0,
            threshold_low_linear: 0.0,
        };
        gate.update_coefficients();
        gate
    }

    pub fn params(&self) -> &GateParams {
        &self.params
    }

    /// Set threshold in dB, or `None` to disable the gate
    pub fn set_threshold_db(&mut self, threshold_db: Option<f32>) {
        let threshold_db = threshold_db.map(|t| t.clamp(-80.0, 0.0));
        if threshold_db == self.params.threshold_db {
            return;
        }
        if self.params.threshold_db.is_none() {
            // Re-enabled: start open so existing signal is not chopped
            self.state = GateState::Open;
            self.hold_counter = 0;
        }
        self.params.threshold_db = threshold_db;
        self.update_coefficients();
    }

    fn update_coefficients(&mut self) {
        let threshold_db = self.params.threshold_db.unwrap_or(-80.0);
        self.threshold_linear = db_to_linear(threshold_db);
        self.threshold_low_linear = db_to_linear(threshold_db - self.hysteresis_db);
        self.range_linear = db_to_linear(self.params.range_db);

        // Envelope detection: fast attack, slower release
        self.attack_coeff = calculate_coefficient(0.1, self.sample_rate);
        self.release_coeff = calculate_coefficient(50.0, self.sample_rate);

        self.gate_attack_coeff = calculate_coefficient(self.params.attack_ms, self.sample_rate);
        self.gate_release_coeff = calculate_coefficient(self.params.release_ms, self.sample_rate);

        self.hold_samples = (self.params.hold_ms * self.sample_rate as f32 / 1000.0) as usize;
    }

    /// Ramp back to unity after the gate was switched off
    fn reopen_sample(&mut self) -> f32 {
        let coeff = self.gate_attack_coeff;
        self.current_gain = coeff * self.current_gain + (1.0 - coeff);
        if self.current_gain >= 1.0 - UNITY_EPSILON {
            self.current_gain = 1.0;
            self.state = GateState::Open;
        }
        self.current_gain
    }

    /// Process a single detector sample and return the gain to apply
    fn process_sample(&mut self, input_level: f32) -> f32 {
        if input_level > self.envelope {
            self.envelope =
                self.attack_coeff * self.envelope + (1.0 - self.attack_coeff) * input_level;
        } else {
            self.envelope =
                self.release_coeff * self.envelope + (1.0 - self.release_coeff) * input_level;
        }

        let target_gain = match self.state {
            GateState::Closed => {
                if self.envelope > self.threshold_linear {
                    self.state = GateState::Attack;
                }
                self.range_linear
            }
            GateState::Attack => {
                if self.current_gain >= 0.99 {
                    self.state = GateState::Open;
                }
                1.0
            }
            GateState::Open => {
                if self.envelope < self.threshold_low_linear {
                    self.state = GateState::Hold;
                    self.hold_counter = self.hold_samples;
                }
                1.0
            }
            GateState::Hold => {
                if self.envelope > self.threshold_linear {
                    self.state = GateState::Open;
                } else if self.hold_counter > 0 {
                    self.hold_counter -= 1;
                } else {
                    self.state = GateState::Release;
                }
                1.0
            }
            GateState::Release => {
                if self.envelope > self.threshold_linear {
                    self.state = GateState::Attack;
                    1.0
                } else {
                    if self.current_gain <= self.range_linear + 0.001 {
                        self.state = GateState::Closed;
                    }
                    self.range_linear
                }
            }
        };

        let coeff = if target_gain > self.current_gain {
            self.gate_attack_coeff
        } else {
            self.gate_release_coeff
        };
        self.current_gain = coeff * self.current_gain + (1.0 - coeff) * target_gain;
        self.current_gain
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for Gate {
    fn process(&mut self, buffer: &mut AudioBuffer, frames: usize) {
        if self.is_bypassed() {
            return;
        }

        let disabled = self.params.threshold_db.is_none();
        let frames = frames.min(buffer.len());
        for frame in 0..frames {
            let gain = if disabled {
                self.reopen_sample()
            } else {
                let peak = buffer
                    .samples
                    .iter()
                    .map(|ch| ch[frame].abs())
                    .fold(0.0_f32, f32::max);
                self.process_sample(peak)
            };
            for channel in buffer.samples.iter_mut() {
                channel[frame] *= gain;
            }
        }
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize, _channels: usize) {
        self.sample_rate = sample_rate as f64;
        self.update_coefficients();
    }

    fn reset(&mut self) {
        self.state = GateState::Open;
        self.envelope = 0.0;
        self.current_gain = 1.0;
        self.hold_counter = 0;
    }

    fn effect_type(&self) -> &'static str {
        "gate"
    }

    fn is_bypassed(&self) -> bool {
        self.params.threshold_db.is_none() && self.current_gain >= 1.0
    }
}

/// One-pole smoothing coefficient for a time constant in ms
fn calculate_coefficient(time_ms: f32, sample_rate: f64) -> f32 {
    let samples = time_ms / 1000.0 * sample_rate as f32;
    if samples > 0.0 {
        (-1.0 / samples).exp()
    } else {
        0.0
    }
}
