//! Chorus effect
//!
//! LFO-modulated short delay mixed against the dry signal: dry * (1 - level)
//! + wet * level. Channels after the first get a quarter-cycle LFO offset for
//! width. Level 0 is an exact bypass.

use crate::dsp::effect::Effect;
use crate::dsp::smoothing::SmoothedValue;
use crate::engine::AudioBuffer;
use std::f32::consts::TAU;

/// LFO rate in Hz
const RATE_HZ: f32 = 1.0;

/// Centre delay in milliseconds
const CENTRE_DELAY_MS: f32 = 7.0;

/// Modulation depth in milliseconds (peak deviation from centre)
const DEPTH_MS: f32 = 3.0;

#[derive(Debug, Clone, Default)]
struct ChorusLine {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl ChorusLine {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(4)],
            write_pos: 0,
        }
    }

    /// Write `input` and read back with a fractional delay (linear interpolation)
    #[inline]
    fn tick(&mut self, input: f32, delay_samples: f32) -> f32 {
        let size = self.buffer.len();
        self.buffer[self.write_pos] = input;

        let delay = delay_samples.clamp(1.0, (size - 2) as f32);
        let whole = delay.floor() as usize;
        let frac = delay - whole as f32;
        let a = self.buffer[(self.write_pos + size - whole) % size];
        let b = self.buffer[(self.write_pos + size - whole - 1) % size];

        self.write_pos = (self.write_pos + 1) % size;
        a + (b - a) * frac
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

/// Single-voice chorus
#[derive(Debug, Clone)]
pub struct Chorus {
    sample_rate: f32,
    lines: Vec<ChorusLine>,
    /// LFO phase in cycles [0, 1)
    phase: f32,
    level: SmoothedValue,
    idle: bool,
}

impl Chorus {
    pub fn new() -> Self {
        let mut chorus = Self {
            sample_rate: 48000.0,
            lines: Vec::new(),
            phase: 0.0,
            level: SmoothedValue::new(0.0, 480),
            idle: true,
        };
        chorus.allocate_lines(2);
        chorus
    }

    /// Set the mix level (0 to 1); the change ramps in
    pub fn set_level(&mut self, level: f32) {
        self.level.set_target(level.clamp(0.0, 1.0));
    }

    pub fn level(&self) -> f32 {
        self.level.target()
    }

    pub fn set_smoothing_samples(&mut self, samples: usize) {
        self.level.set_ramp_length(samples);
    }

    fn allocate_lines(&mut self, channels: usize) {
        let max_delay_ms = CENTRE_DELAY_MS + DEPTH_MS + 1.0;
        let size = (max_delay_ms * self.sample_rate / 1000.0) as usize + 2;
        self.lines = (0..channels.max(1)).map(|_| ChorusLine::new(size)).collect();
    }
}

impl Default for Chorus {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for Chorus {
    fn process(&mut self, buffer: &mut AudioBuffer, frames: usize) {
        if self.is_bypassed() {
            self.idle = true;
            return;
        }
        if self.idle {
            self.lines.iter_mut().for_each(ChorusLine::clear);
            self.idle = false;
        }

        let frames = frames.min(buffer.len());
        let ms_to_samples = self.sample_rate / 1000.0;
        let phase_inc = RATE_HZ / self.sample_rate;
        let start_level = self.level;
        let start_phase = self.phase;

        for (ch, (channel, line)) in buffer
            .samples
            .iter_mut()
            .zip(self.lines.iter_mut())
            .enumerate()
        {
            let mut level = start_level;
            let mut phase = start_phase + if ch == 0 { 0.0 } else { 0.25 };
            for sample in channel[..frames].iter_mut() {
                let l = level.next_value();
                let delay_ms = CENTRE_DELAY_MS + DEPTH_MS * (TAU * phase).sin();
                let wet = line.tick(*sample, delay_ms * ms_to_samples);
                *sample = *sample * (1.0 - l) + wet * l;
                phase += phase_inc;
                if phase >= 1.0 {
                    phase -= 1.0;
                }
            }
        }

        self.phase = (start_phase + phase_inc * frames as f32).fract();
        self.level.skip(frames);
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize, channels: usize) {
        self.sample_rate = sample_rate as f32;
        self.allocate_lines(channels);
        self.level.set_ramp_length((self.sample_rate * 0.01) as usize);
        self.phase = 0.0;
        self.idle = true;
    }

    fn reset(&mut self) {
        self.lines.iter_mut().for_each(ChorusLine::clear);
        self.phase = 0.0;
        self.level.set_immediate(self.level.target());
    }

    fn effect_type(&self) -> &'static str {
        "chorus"
    }

    fn is_bypassed(&self) -> bool {
        !self.level.is_smoothing() && self.level.current() <= 0.0
    }
}
