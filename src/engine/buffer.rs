//! Audio Buffer Management
//!
//! Provides the planar block buffer handed across the audio boundary and the
//! dB conversions shared by the DSP stages.

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// Returns `-f32::INFINITY` for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// Planar block buffer for the audio boundary
///
/// Each channel is a separate `Vec<f32>`. The host allocates it once at the
/// configured block size and reuses it for every callback; the signal chain
/// only ever writes into the first `frames` samples of each channel.
///
/// # Example
/// ```
/// use doomloader::engine::AudioBuffer;
///
/// let buffer = AudioBuffer::new(2, 128, 48000);
/// assert_eq!(buffer.num_channels(), 2);
/// assert_eq!(buffer.len(), 128);
/// ```
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Sample data: outer Vec is channels, inner Vec is samples
    pub samples: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a silent buffer
    pub fn new(num_channels: usize, num_samples: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![vec![0.0_f32; num_samples]; num_channels],
            sample_rate,
        }
    }

    /// Create a buffer from planar channel data
    pub fn from_channels(samples: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Get the number of channels
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of samples per channel (shortest channel)
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.iter().map(|ch| ch.len()).min().unwrap_or(0)
    }

    /// Check if the buffer holds no samples
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get immutable access to a channel's samples
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// Get mutable access to a channel's samples
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.samples[index]
    }

    /// Copy the first `frames` samples of channel 0 into every other channel
    pub fn copy_first_to_rest(&mut self, frames: usize) {
        if let Some((first, rest)) = self.samples.split_first_mut() {
            let frames = frames.min(first.len());
            for channel in rest {
                let n = frames.min(channel.len());
                channel[..n].copy_from_slice(&first[..n]);
            }
        }
    }

    /// Check if all samples are finite (not NaN or Infinity)
    pub fn is_finite(&self) -> bool {
        self.samples
            .iter()
            .flat_map(|ch| ch.iter())
            .all(|s| s.is_finite())
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new(2, 0, 48000)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_to_linear() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_linear(-6.0206) - 0.5).abs() < 1e-4);
        assert!((db_to_linear(-20.0) - 0.1).abs() < 1e-6);
        assert!(db_to_linear(-120.0) < 1e-5);
    }

    #[test]
    fn test_linear_to_db() {
        assert!((linear_to_db(1.0) - 0.0).abs() < 1e-6);
        assert!((linear_to_db(0.1) - (-20.0)).abs() < 1e-4);
        assert!(linear_to_db(0.0).is_infinite() && linear_to_db(0.0).is_sign_negative());
    }

    #[test]
    fn test_copy_first_to_rest() {
        let mut buffer =
            AudioBuffer::from_channels(vec![vec![1.0, 2.0, 3.0], vec![0.0, 0.0, 9.0]], 48000);
        buffer.copy_first_to_rest(2);
        assert_eq!(buffer.channel(1), &[1.0, 2.0, 9.0]);
    }
}
