//! Amp parameter block
//!
//! Every field is a normalised control in [0, 1]. Setters and [`AmpParameters::clamped`]
//! coerce out-of-range input instead of rejecting it; [`AmpParameters::validate`]
//! is the strict check used when reading presets.

use serde::{Deserialize, Serialize};

use crate::error::{DoomError, Result};

/// Clamp a control value into [0, 1]; NaN becomes 0
#[inline]
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Normalised amp controls
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmpParameters {
    /// Input drive
    pub gain: f32,
    /// Low shelf
    pub bass: f32,
    /// Mid peak
    pub mid: f32,
    /// High shelf
    pub treble: f32,
    /// Upper high shelf
    pub presence: f32,
    /// Output level
    pub volume: f32,
    /// Extra soft clipping
    pub saturation: f32,
    /// Even-harmonic bias ahead of the clipper
    pub asymmetry: f32,
    /// Power supply sag
    pub sag: f32,
}

impl Default for AmpParameters {
    fn default() -> Self {
        Self {
            gain: 0.5,
            bass: 0.5,
            mid: 0.5,
            treble: 0.5,
            presence: 0.5,
            volume: 0.5,
            saturation: 0.0,
            asymmetry: 0.0,
            sag: 0.0,
        }
    }
}

impl AmpParameters {
    /// Field names in declaration order
    pub const FIELDS: [&'static str; 9] = [
        "gain",
        "bass",
        "mid",
        "treble",
        "presence",
        "volume",
        "saturation",
        "asymmetry",
        "sag",
    ];

    fn values(&self) -> [f32; 9] {
        [
            self.gain,
            self.bass,
            self.mid,
            self.treble,
            self.presence,
            self.volume,
            self.saturation,
            self.asymmetry,
            self.sag,
        ]
    }

    /// Copy with every field clamped into [0, 1]
    pub fn clamped(mut self) -> Self {
        self.clamp();
        self
    }

    /// Clamp every field into [0, 1]
    pub fn clamp(&mut self) {
        for field in [
            &mut self.gain,
            &mut self.bass,
            &mut self.mid,
            &mut self.treble,
            &mut self.presence,
            &mut self.volume,
            &mut self.saturation,
            &mut self.asymmetry,
            &mut self.sag,
        ] {
            *field = clamp_unit(*field);
        }
    }

    /// Reject any field outside [0, 1] or not finite
    pub fn validate(&self) -> Result<()> {
        for (name, value) in Self::FIELDS.iter().zip(self.values()) {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(DoomError::validation(
                    &format!("amp.{}", name),
                    format!("{} is outside 0.0 to 1.0", value),
                ));
            }
        }
        Ok(())
    }

    pub fn set_gain(&mut self, value: f32) {
        self.gain = clamp_unit(value);
    }

    pub fn set_bass(&mut self, value: f32) {
        self.bass = clamp_unit(value);
    }

    pub fn set_mid(&mut self, value: f32) {
        self.mid = clamp_unit(value);
    }

    pub fn set_treble(&mut self, value: f32) {
        self.treble = clamp_unit(value);
    }

    pub fn set_presence(&mut self, value: f32) {
        self.presence = clamp_unit(value);
    }

    pub fn set_volume(&mut self, value: f32) {
        self.volume = clamp_unit(value);
    }

    pub fn set_saturation(&mut self, value: f32) {
        self.saturation = clamp_unit(value);
    }

    pub fn set_asymmetry(&mut self, value: f32) {
        self.asymmetry = clamp_unit(value);
    }

    pub fn set_sag(&mut self, value: f32) {
        self.sag = clamp_unit(value);
    }

    /// Largest absolute per-field difference
    pub fn max_difference(&self, other: &AmpParameters) -> f32 {
        self.values()
            .iter()
            .zip(other.values())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max)
    }
}
