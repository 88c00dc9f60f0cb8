//! Reverb effect
//!
//! Freeverb topology:
//! - 8 parallel comb filters
//! - 4 series allpass filters for diffusion
//! - Stereo width control
//!
//! The chain drives it with a single `level`: wet = level, dry = 1 - level.
//! Level 0 is an exact bypass.

use super::effect::Effect;
use super::smoothing::SmoothedValue;
use crate::engine::AudioBuffer;

// ============================================================================
// Freeverb Constants
// ============================================================================

/// Reference sample rate for Freeverb delays
const REFERENCE_SAMPLE_RATE: f64 = 44100.0;

/// Comb filter delays at 44100 Hz (8 filters)
const COMB_DELAYS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];

/// Allpass filter delays at 44100 Hz (4 filters)
const ALLPASS_DELAYS: [usize; 4] = [556, 441, 341, 225];

/// Stereo spread offset in samples (for right channel)
const STEREO_SPREAD: usize = 23;

/// Fixed gain for allpass filters (standard Freeverb value)
const ALLPASS_GAIN: f32 = 0.5;

/// Input attenuation ahead of the comb bank (standard Freeverb value)
const FIXED_GAIN: f32 = 0.015;

/// Wet output scale (standard Freeverb value)
const WET_SCALE: f32 = 3.0;

const ROOM_SCALE: f32 = 0.28;
const ROOM_OFFSET: f32 = 0.7;
const DAMP_SCALE: f32 = 0.4;

// ============================================================================
// Parameter Structs
// ============================================================================

/// Reverb voicing
#[derive(Debug, Clone, PartialEq)]
pub struct ReverbParams {
    /// Room size: 0 (tiny) to 1 (huge hall)
    pub room_size: f32,
    /// Damping: 0 (bright) to 1 (dark)
    pub damping: f32,
    /// Stereo width: 0 (mono) to 1 (full stereo)
    pub width: f32,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            room_size: 0.5,
            damping: 0.5,
            width: 1.0,
        }
    }
}

// ============================================================================
// Filter Building Blocks
// ============================================================================

/// Low-pass comb filter for Freeverb
#[derive(Debug, Clone)]
struct CombFilter {
    buffer: Vec<f32>,
    write_pos: usize,
    delay: usize,
    filter_state: f32,
    feedback: f32,
    damp1: f32,
    damp2: f32,
}

impl CombFilter {
    fn new(delay: usize) -> Self {
        let delay = delay.max(1);
        Self {
            buffer: vec![0.0; delay],
            write_pos: 0,
            delay,
            filter_state: 0.0,
            feedback: 0.5,
            damp1: 0.5,
            damp2: 0.5,
        }
    }

    fn set_coefficients(&mut self, feedback: f32, damp1: f32, damp2: f32) {
        self.feedback = feedback;
        self.damp1 = damp1;
        self.damp2 = damp2;
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.write_pos];
        // One-pole low-pass in the feedback path
        self.filter_state = output * self.damp1 + self.filter_state * self.damp2;
        self.buffer[self.write_pos] = input + self.filter_state * self.feedback;
        self.write_pos += 1;
        if self.write_pos >= self.delay {
            self.write_pos = 0;
        }
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.filter_state = 0.0;
        self.write_pos = 0;
    }
}

/// Allpass filter for Freeverb diffusion
#[derive(Debug, Clone)]
struct AllpassFilter {
    buffer: Vec<f32>,
    write_pos: usize,
    delay: usize,
}

impl AllpassFilter {
    fn new(delay: usize) -> Self {
        let delay = delay.max(1);
        Self {
            buffer: vec![0.0; delay],
            write_pos: 0,
            delay,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.write_pos];
        let output = delayed - input;
        self.buffer[self.write_pos] = input + delayed * ALLPASS_GAIN;
        self.write_pos += 1;
        if self.write_pos >= self.delay {
            self.write_pos = 0;
        }
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

/// One reverb channel: comb bank into allpass chain
#[derive(Debug, Clone)]
struct ReverbChannel {
    combs: [CombFilter; 8],
    allpasses: [AllpassFilter; 4],
}

impl ReverbChannel {
    fn new(sample_rate: f64, spread: usize) -> Self {
        let scale = sample_rate / REFERENCE_SAMPLE_RATE;
        Self {
            combs: std::array::from_fn(|i| {
                CombFilter::new(((COMB_DELAYS[i] + spread) as f64 * scale) as usize)
            }),
            allpasses: std::array::from_fn(|i| {
                AllpassFilter::new(((ALLPASS_DELAYS[i] + spread) as f64 * scale) as usize)
            }),
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let mut out = 0.0;
        for comb in &mut self.combs {
            out += comb.process(input);
        }
        for allpass in &mut self.allpasses {
            out = allpass.process(out);
        }
        out
    }

    fn set_coefficients(&mut self, feedback: f32, damp1: f32, damp2: f32) {
        for comb in &mut self.combs {
            comb.set_coefficients(feedback, damp1, damp2);
        }
    }

    fn clear(&mut self) {
        self.combs.iter_mut().for_each(CombFilter::clear);
        self.allpasses.iter_mut().for_each(AllpassFilter::clear);
    }
}

// ============================================================================
// Main Reverb Effect
// ============================================================================

/// Freeverb-style reverb driven by a single mix level
#[derive(Debug, Clone)]
pub struct Reverb {
    params: ReverbParams,
    sample_rate: f64,
    left: ReverbChannel,
    right: ReverbChannel,
    level: SmoothedValue,
    /// Set while bypassed so stale tails are cleared on reactivation
    idle: bool,
}

impl Reverb {
    pub fn new() -> Self {
        Self::with_params(ReverbParams::default())
    }

    pub fn with_params(params: ReverbParams) -> Self {
        let sample_rate = 48000.0;
        let mut reverb = Self {
            params,
            sample_rate,
            left: ReverbChannel::new(sample_rate, 0),
            right: ReverbChannel::new(sample_rate, STEREO_SPREAD),
            level: SmoothedValue::new(0.0, 480),
            idle: true,
        };
        reverb.update_coefficients();
        reverb
    }

    pub fn params(&self) -> &ReverbParams {
        &self.params
    }

    /// Set the mix level (0 to 1); the change ramps in
    pub fn set_level(&mut self, level: f32) {
        self.level.set_target(level.clamp(0.0, 1.0));
    }

    /// Target mix level
    pub fn level(&self) -> f32 {
        self.level.target()
    }

    pub fn set_smoothing_samples(&mut self, samples: usize) {
        self.level.set_ramp_length(samples);
    }

    fn update_coefficients(&mut self) {
        let feedback = self.params.room_size.clamp(0.0, 1.0) * ROOM_SCALE + ROOM_OFFSET;
        let damp = self.params.damping.clamp(0.0, 1.0) * DAMP_SCALE;
        self.left.set_coefficients(feedback, 1.0 - damp, damp);
        self.right.set_coefficients(feedback, 1.0 - damp, damp);
    }
}

impl Default for Reverb {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for Reverb {
    fn process(&mut self, buffer: &mut AudioBuffer, frames: usize) {
        if self.is_bypassed() {
            self.idle = true;
            return;
        }
        if self.idle {
            self.left.clear();
            self.right.clear();
            self.idle = false;
        }

        let frames = frames.min(buffer.len());
        let width = self.params.width.clamp(0.0, 1.0);
        let wet1 = (1.0 + width) / 2.0;
        let wet2 = (1.0 - width) / 2.0;

        match buffer.samples.as_mut_slice() {
            [] => {}
            [mono] => {
                for sample in mono[..frames].iter_mut() {
                    let level = self.level.next_value();
                    let wet = self.left.process(*sample * FIXED_GAIN) * WET_SCALE;
                    *sample = *sample * (1.0 - level) + wet * level;
                }
            }
            [left, right, ..] => {
                for i in 0..frames {
                    let level = self.level.next_value();
                    let input = (left[i] + right[i]) * FIXED_GAIN;
                    let out_l = self.left.process(input) * WET_SCALE;
                    let out_r = self.right.process(input) * WET_SCALE;
                    let wet_l = out_l * wet1 + out_r * wet2;
                    let wet_r = out_r * wet1 + out_l * wet2;
                    left[i] = left[i] * (1.0 - level) + wet_l * level;
                    right[i] = right[i] * (1.0 - level) + wet_r * level;
                }
            }
        }
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize, _channels: usize) {
        self.sample_rate = sample_rate as f64;
        self.left = ReverbChannel::new(self.sample_rate, 0);
        self.right = ReverbChannel::new(self.sample_rate, STEREO_SPREAD);
        self.level
            .set_ramp_length((self.sample_rate * 0.01) as usize);
        self.update_coefficients();
        self.idle = true;
    }

    fn reset(&mut self) {
        self.left.clear();
        self.right.clear();
        self.level.set_immediate(self.level.target());
    }

    fn effect_type(&self) -> &'static str {
        "reverb"
    }

    fn is_bypassed(&self) -> bool {
        !self.level.is_smoothing() && self.level.current() <= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse_buffer(channels: usize, len: usize) -> AudioBuffer {
        let mut buffer = AudioBuffer::new(channels, len, 48000);
        for ch in buffer.samples.iter_mut() {
            ch[0] = 1.0;
        }
        buffer
    }

    #[test]
    fn test_zero_level_is_exact_bypass() {
        let mut reverb = Reverb::new();
        let mut buffer = impulse_buffer(2, 4096);
        let original = buffer.clone();
        reverb.process(&mut buffer, 4096);
        assert_eq!(buffer.samples, original.samples);
    }

    #[test]
    fn test_full_level_produces_tail() {
        let mut reverb = Reverb::new();
        reverb.prepare(48000, 128, 2);
        reverb.set_level(1.0);
        reverb.reset();

        let mut buffer = impulse_buffer(2, 8192);
        reverb.process(&mut buffer, 8192);

        // Dry impulse removed, wet tail present after the shortest comb delay
        assert!(buffer.channel(0)[0].abs() < 0.5);
        let tail_energy: f32 = buffer.channel(0)[2000..].iter().map(|s| s * s).sum();
        assert!(tail_energy > 0.0);
        assert!(buffer.is_finite());
    }

    #[test]
    fn test_mono_processing() {
        let mut reverb = Reverb::new();
        reverb.set_level(0.5);
        reverb.reset();
        let mut buffer = impulse_buffer(1, 4096);
        reverb.process(&mut buffer, 4096);
        assert!((buffer.channel(0)[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_room_size_affects_decay() {
        let decay = |room_size: f32| {
            let mut reverb = Reverb::with_params(ReverbParams {
                room_size,
                ..Default::default()
            });
            reverb.set_level(1.0);
            reverb.reset();
            let mut buffer = impulse_buffer(1, 48000);
            reverb.process(&mut buffer, 48000);
            buffer.channel(0)[24000..].iter().map(|s| s * s).sum::<f32>()
        };
        assert!(decay(0.9) > decay(0.1));
    }
}
