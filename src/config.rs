//! Engine configuration
//!
//! Fixed at initialisation; changing the sample rate or block size is a full
//! non-real-time reinitialisation of every stage.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DoomError, Result};

/// Default engine sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default block size in frames
pub const DEFAULT_BLOCK_SIZE: usize = 128;

/// Default cap on the prepared impulse response length in samples
pub const DEFAULT_MAX_IR_LENGTH: usize = 8192;

/// Limits enforced by the resource cache
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheLimits {
    /// Maximum number of loaded amp models held at once
    pub max_models: usize,
    /// Maximum total prepared impulse response samples held at once
    pub max_ir_samples: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_models: 8,
            max_ir_samples: 4_194_304,
        }
    }
}

/// Engine-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Frames per audio block (power of two)
    pub block_size: usize,
    /// Channels per audio block
    pub channels: usize,
    /// Cap on the prepared impulse response length in samples
    pub max_ir_length: usize,
    /// Tail energy threshold for impulse response auto-trim, in dB relative to total energy
    pub ir_trim_threshold_db: f32,
    /// Normalise prepared impulse responses to unit energy
    pub normalize_ir: bool,
    /// Parameter smoothing window in milliseconds
    pub smoothing_ms: f32,
    /// Resource cache limits
    pub cache: CacheLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            channels: 2,
            max_ir_length: DEFAULT_MAX_IR_LENGTH,
            ir_trim_threshold_db: -60.0,
            normalize_ir: true,
            smoothing_ms: 10.0,
            cache: CacheLimits::default(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| DoomError::io(path, e))?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field ranges
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(invalid("sample_rate must be positive"));
        }
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(invalid(format!(
                "block_size must be a non-zero power of two, got {}",
                self.block_size
            )));
        }
        if self.channels == 0 {
            return Err(invalid("channels must be at least 1"));
        }
        if self.max_ir_length == 0 {
            return Err(invalid("max_ir_length must be positive"));
        }
        if !self.ir_trim_threshold_db.is_finite() || self.ir_trim_threshold_db >= 0.0 {
            return Err(invalid(format!(
                "ir_trim_threshold_db must be negative, got {}",
                self.ir_trim_threshold_db
            )));
        }
        if !(5.0..=20.0).contains(&self.smoothing_ms) {
            return Err(invalid(format!(
                "smoothing_ms must be within 5 to 20 ms, got {}",
                self.smoothing_ms
            )));
        }
        Ok(())
    }

    /// Smoothing window length in samples
    pub fn smoothing_samples(&self) -> usize {
        ((self.smoothing_ms / 1000.0) * self.sample_rate as f32).round().max(1.0) as usize
    }

    /// Number of convolution partitions needed to hold `max_ir_length`
    pub fn max_partitions(&self) -> usize {
        self.max_ir_length.div_ceil(self.block_size)
    }
}

fn invalid(reason: impl Into<String>) -> DoomError {
    DoomError::InvalidConfig {
        reason: reason.into(),
    }
}
