//! Linear parameter ramps
//!
//! Every control value that reaches the audio path moves to its new target
//! over a fixed number of samples instead of jumping.

/// A value that ramps linearly towards its target
#[derive(Debug, Clone, Copy)]
pub struct SmoothedValue {
    current: f32,
    target: f32,
    step: f32,
    remaining: usize,
    ramp_length: usize,
}

impl SmoothedValue {
    /// Create a value resting at `initial`
    pub fn new(initial: f32, ramp_length: usize) -> Self {
        Self {
            current: initial,
            target: initial,
            step: 0.0,
            remaining: 0,
            ramp_length: ramp_length.max(1),
        }
    }

    /// Change the ramp length used by subsequent targets
    pub fn set_ramp_length(&mut self, ramp_length: usize) {
        self.ramp_length = ramp_length.max(1);
    }

    /// Start a ramp from the current value to `target`
    pub fn set_target(&mut self, target: f32) {
        // Same target: keep the ramp already in flight
        if target == self.target {
            return;
        }
        self.target = target;
        self.remaining = self.ramp_length;
        self.step = (target - self.current) / self.ramp_length as f32;
    }

    /// Jump to `value` with no ramp
    pub fn set_immediate(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.step = 0.0;
        self.remaining = 0;
    }

    /// Advance one sample and return the new value
    #[inline]
    pub fn next_value(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            if self.remaining == 0 {
                self.current = self.target;
            } else {
                self.current += self.step;
            }
        }
        self.current
    }

    /// Advance `samples` samples at once
    pub fn skip(&mut self, samples: usize) -> f32 {
        if samples >= self.remaining {
            self.current = self.target;
            self.remaining = 0;
        } else {
            self.remaining -= samples;
            self.current += self.step * samples as f32;
        }
        self.current
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    /// True while a ramp is in progress
    #[inline]
    pub fn is_smoothing(&self) -> bool {
        self.remaining > 0
    }
}
