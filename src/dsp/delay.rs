//! Delay Effect
//!
//! Per-channel feedback echo with a low-passed feedback path. The chain
//! drives it with a single `level` that sets the echo volume on top of the
//! unchanged dry signal. Level 0 is an exact bypass.

use crate::dsp::effect::Effect;
use crate::dsp::smoothing::SmoothedValue;
use crate::engine::AudioBuffer;
use std::f32::consts::PI;

/// Default echo time in milliseconds
pub const DEFAULT_DELAY_MS: f32 = 350.0;

/// Default feedback amount
pub const DEFAULT_FEEDBACK: f32 = 0.35;

/// Default feedback low-pass corner in Hz
const DEFAULT_FILTER_FREQ: f32 = 6000.0;

/// Longest supported echo time in milliseconds
const MAX_DELAY_MS: f32 = 2000.0;

/// One channel's circular buffer and feedback filter state
#[derive(Debug, Clone, Default)]
struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
    filter_state: f32,
}

impl DelayLine {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            write_pos: 0,
            filter_state: 0.0,
        }
    }

    #[inline]
    fn read(&self, delay_samples: usize) -> f32 {
        let size = self.buffer.len();
        let read_pos = (self.write_pos + size - delay_samples % size) % size;
        self.buffer[read_pos]
    }

    /// Read the echo, feed the line, and return the echo
    #[inline]
    fn tick(&mut self, input: f32, delay_samples: usize, feedback: f32, coeff: f32) -> f32 {
        let delayed = self.read(delay_samples);
        // One-pole lowpass: y[n] = y[n-1] + coeff * (x[n] - y[n-1])
        self.filter_state += coeff * (delayed * feedback - self.filter_state);
        self.buffer[self.write_pos] = input + self.filter_state;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        delayed
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
        self.filter_state = 0.0;
    }
}

/// Feedback delay effect
#[derive(Debug, Clone)]
pub struct Delay {
    /// Delay time in milliseconds (1-2000)
    delay_time_ms: f32,
    /// Feedback amount (0-0.95, NOT 1.0 to prevent infinite feedback)
    feedback: f32,
    /// Low-pass filter frequency on feedback path
    filter_freq: f32,
    sample_rate: f32,
    lines: Vec<DelayLine>,
    level: SmoothedValue,
    idle: bool,
}

impl Delay {
    /// Create a new delay effect with specified delay time (clamped to 1-2000 ms)
    pub fn new(delay_time_ms: f32) -> Self {
        let mut delay = Self {
            delay_time_ms: delay_time_ms.clamp(1.0, MAX_DELAY_MS),
            feedback: DEFAULT_FEEDBACK,
            filter_freq: DEFAULT_FILTER_FREQ,
            sample_rate: 48000.0,
            lines: Vec::new(),
            level: SmoothedValue::new(0.0, 480),
            idle: true,
        };
        delay.allocate_lines(2);
        delay
    }

    /// Set feedback amount (clamped to 0-0.95)
    pub fn set_feedback(&mut self, fb: f32) {
        self.feedback = fb.clamp(0.0, 0.95);
    }

    pub fn feedback(&self) -> f32 {
        self.feedback
    }

    pub fn delay_time_ms(&self) -> f32 {
        self.delay_time_ms
    }

    /// Set the echo level (0 to 1); the change ramps in
    pub fn set_level(&mut self, level: f32) {
        self.level.set_target(level.clamp(0.0, 1.0));
    }

    pub fn level(&self) -> f32 {
        self.level.target()
    }

    pub fn set_smoothing_samples(&mut self, samples: usize) {
        self.level.set_ramp_length(samples);
    }

    fn delay_samples(&self) -> usize {
        ((self.delay_time_ms * self.sample_rate / 1000.0) as usize).max(1)
    }

    fn allocate_lines(&mut self, channels: usize) {
        // Sized for the maximum time so time changes never reallocate
        let size = ((MAX_DELAY_MS + 10.0) * self.sample_rate / 1000.0) as usize;
        self.lines = (0..channels.max(1)).map(|_| DelayLine::new(size)).collect();
    }

    fn filter_coeff(&self) -> f32 {
        1.0 - (-2.0 * PI * self.filter_freq / self.sample_rate).exp()
    }
}

impl Default for Delay {
    fn default() -> Self {
        Self::new(DEFAULT_DELAY_MS)
    }
}

impl Effect for Delay {
    fn process(&mut self, buffer: &mut AudioBuffer, frames: usize) {
        if self.is_bypassed() {
            self.idle = true;
            return;
        }
        if self.idle {
            self.lines.iter_mut().for_each(DelayLine::clear);
            self.idle = false;
        }

        let frames = frames.min(buffer.len());
        let delay_samples = self.delay_samples();
        let coeff = self.filter_coeff();
        let feedback = self.feedback;

        let start_level = self.level;
        for (channel, line) in buffer.samples.iter_mut().zip(self.lines.iter_mut()) {
            // Every channel replays the same level ramp
            let mut level = start_level;
            for sample in channel[..frames].iter_mut() {
                let l = level.next_value();
                let echo = line.tick(*sample, delay_samples, feedback, coeff);
                *sample += echo * l;
            }
        }
        self.level.skip(frames);
    }

    fn prepare(&mut self, sample_rate: u32, _max_block_size: usize, channels: usize) {
        self.sample_rate = sample_rate as f32;
        self.allocate_lines(channels);
        self.level.set_ramp_length((self.sample_rate * 0.01) as usize);
        self.idle = true;
    }

    fn reset(&mut self) {
        self.lines.iter_mut().for_each(DelayLine::clear);
        self.level.set_immediate(self.level.target());
    }

    fn effect_type(&self) -> &'static str {
        "delay"
    }

    fn is_bypassed(&self) -> bool {
        !self.level.is_smoothing() && self.level.current() <= 0.0
    }
}
