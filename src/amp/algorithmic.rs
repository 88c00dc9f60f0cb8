//! Built-in algorithmic amp models
//!
//! Closed-form voicings addressed as `builtin:<name>`. Each one is a tighten
//! high-pass, a waveshaper, and a fizz low-pass, wrapped in the shared
//! [`AmpVoicing`].

use crate::amp::params::AmpParameters;
use crate::amp::voicing::AmpVoicing;
use crate::amp::{AmpModel, ModelInfo, ModelKind};
use crate::dsp::{BiquadCoeffs, BiquadState, FilterType};

/// Prefix that selects a built-in model
pub const BUILTIN_PREFIX: &str = "builtin:";

// ============================================================================
// Waveshaping Functions
// ============================================================================

/// Types of waveshaping used by the built-in voices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaperType {
    /// Soft saturation with slight asymmetry
    Tape,
    /// Soft knee, even harmonics
    Tube,
    /// Harder knee, odd harmonics
    Transistor,
    /// Digital clipping
    HardClip,
}

impl ShaperType {
    #[inline]
    fn shape(self, x: f32, drive: f32) -> f32 {
        match self {
            ShaperType::Tape => {
                let shaped = (x * (1.0 + drive * 4.0)).tanh();
                shaped + 0.1 * drive * shaped * shaped
            }
            ShaperType::Tube => x / (1.0 + x.abs().powf(1.0 + drive)),
            ShaperType::Transistor => {
                let driven = x * (1.0 + drive * 3.0);
                driven / (1.0 + driven.abs())
            }
            ShaperType::HardClip => (x * (1.0 + drive * 10.0)).clamp(-1.0, 1.0),
        }
    }
}

// ============================================================================
// Built-in voices
// ============================================================================

/// The built-in amp voicings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinVoice {
    Clean,
    Crunch,
    Lead,
    Metal,
}

impl BuiltinVoice {
    pub const ALL: [BuiltinVoice; 4] = [
        BuiltinVoice::Clean,
        BuiltinVoice::Crunch,
        BuiltinVoice::Lead,
        BuiltinVoice::Metal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinVoice::Clean => "clean",
            BuiltinVoice::Crunch => "crunch",
            BuiltinVoice::Lead => "lead",
            BuiltinVoice::Metal => "metal",
        }
    }

    /// Full identifier including the `builtin:` prefix
    pub fn identifier(self) -> String {
        format!("{}{}", BUILTIN_PREFIX, self.name())
    }

    pub fn description(self) -> &'static str {
        match self {
            BuiltinVoice::Clean => "Glassy clean with gentle tube compression",
            BuiltinVoice::Crunch => "Edge-of-breakup rhythm crunch",
            BuiltinVoice::Lead => "Saturated singing lead",
            BuiltinVoice::Metal => "Tight high-gain rhythm",
        }
    }

    /// Parse `clean` or `builtin:clean` (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        let bare = lower.strip_prefix(BUILTIN_PREFIX).unwrap_or(&lower);
        Self::ALL.into_iter().find(|v| v.name() == bare)
    }

    fn shaper(self) -> ShaperType {
        match self {
            BuiltinVoice::Clean => ShaperType::Tube,
            BuiltinVoice::Crunch => ShaperType::Tape,
            BuiltinVoice::Lead => ShaperType::Transistor,
            BuiltinVoice::Metal => ShaperType::HardClip,
        }
    }

    fn shaper_drive(self) -> f32 {
        match self {
            BuiltinVoice::Clean => 0.2,
            BuiltinVoice::Crunch => 0.5,
            BuiltinVoice::Lead => 0.8,
            BuiltinVoice::Metal => 0.6,
        }
    }

    /// Drive range in dB mapped from `gain`
    fn drive_range_db(self) -> (f32, f32) {
        match self {
            BuiltinVoice::Clean => (-12.0, 6.0),
            BuiltinVoice::Crunch => (-6.0, 18.0),
            BuiltinVoice::Lead => (0.0, 30.0),
            BuiltinVoice::Metal => (0.0, 36.0),
        }
    }

    /// Pre-shaper high-pass corner in Hz
    fn tighten_hz(self) -> f64 {
        match self {
            BuiltinVoice::Clean => 40.0,
            BuiltinVoice::Crunch => 80.0,
            BuiltinVoice::Lead => 100.0,
            BuiltinVoice::Metal => 160.0,
        }
    }

    /// Post-shaper low-pass corner in Hz
    fn fizz_hz(self) -> f64 {
        match self {
            BuiltinVoice::Clean => 12000.0,
            BuiltinVoice::Crunch => 9000.0,
            BuiltinVoice::Lead => 7500.0,
            BuiltinVoice::Metal => 7000.0,
        }
    }

    /// Output trim compensating for the shaper's level
    fn makeup(self) -> f32 {
        match self {
            BuiltinVoice::Clean => 1.0,
            BuiltinVoice::Crunch => 0.7,
            BuiltinVoice::Lead => 0.6,
            BuiltinVoice::Metal => 0.5,
        }
    }
}

// ============================================================================
// Algorithmic model
// ============================================================================

/// Closed-form amp model for one built-in voice
#[derive(Debug, Clone)]
pub struct AlgorithmicModel {
    voice: BuiltinVoice,
    info: ModelInfo,
    params: AmpParameters,
    voicing: AmpVoicing,
    tighten: BiquadCoeffs,
    fizz: BiquadCoeffs,
    tighten_state: BiquadState,
    fizz_state: BiquadState,
}

impl AlgorithmicModel {
    pub fn new(voice: BuiltinVoice, sample_rate: f64, smoothing_samples: usize) -> Self {
        let params = AmpParameters::default();
        let mut info = ModelInfo::new(voice.name(), ModelKind::Algorithmic, "algorithmic", sample_rate);
        info.description = voice.description().to_string();
        info.author = "Doomloader".to_string();
        info.version = env!("CARGO_PKG_VERSION").to_string();

        Self {
            voice,
            info,
            params,
            voicing: AmpVoicing::new(
                sample_rate,
                smoothing_samples,
                voice.drive_range_db(),
                &params,
            ),
            tighten: BiquadCoeffs::calculate(
                FilterType::HighPass,
                sample_rate,
                voice.tighten_hz(),
                0.0,
                0.707,
            ),
            fizz: BiquadCoeffs::calculate(
                FilterType::LowPass,
                sample_rate,
                voice.fizz_hz(),
                0.0,
                0.707,
            ),
            tighten_state: BiquadState::default(),
            fizz_state: BiquadState::default(),
        }
    }

    pub fn voice(&self) -> BuiltinVoice {
        self.voice
    }
}

impl AmpModel for AlgorithmicModel {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn set_parameters(&mut self, params: &AmpParameters) {
        self.params = params.clamped();
        self.voicing.set_parameters(&self.params);
    }

    fn parameters(&self) -> AmpParameters {
        self.params
    }

    fn process_block(&mut self, block: &mut [f32]) {
        self.voicing.apply_drive(block);

        let shaper = self.voice.shaper();
        let drive = self.voice.shaper_drive();
        let makeup = self.voice.makeup();
        for sample in block.iter_mut() {
            let tight = self.tighten_state.process(*sample as f64, &self.tighten) as f32;
            let shaped = shaper.shape(tight, drive);
            *sample = self.fizz_state.process(shaped as f64, &self.fizz) as f32 * makeup;
        }

        self.voicing.apply_output(block);
    }

    fn reset(&mut self) {
        self.tighten_state.reset();
        self.fizz_state.reset();
        self.voicing.reset();
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize, amp: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amp * (std::f32::consts::TAU * 220.0 * i as f32 / 48000.0).sin())
            .collect()
    }

    #[test]
    fn test_builtin_names_round_trip() {
        for voice in BuiltinVoice::ALL {
            assert_eq!(BuiltinVoice::from_name(&voice.identifier()), Some(voice));
            assert_eq!(BuiltinVoice::from_name(voice.name()), Some(voice));
        }
        assert_eq!(BuiltinVoice::from_name("BUILTIN:Metal"), Some(BuiltinVoice::Metal));
        assert_eq!(BuiltinVoice::from_name("builtin:jazz"), None);
    }

    #[test]
    fn test_shapers_are_bounded_and_odd_enough() {
        for shaper in [
            ShaperType::Tape,
            ShaperType::Tube,
            ShaperType::Transistor,
            ShaperType::HardClip,
        ] {
            for x in [-10.0f32, -1.0, 0.0, 0.5, 10.0] {
                let y = shaper.shape(x, 1.0);
                assert!(y.is_finite() && y.abs() <= 1.5, "{:?}({}) = {}", shaper, x, y);
            }
            assert_eq!(shaper.shape(0.0, 0.5), 0.0);
        }
    }

    #[test]
    fn test_metal_drives_harder_than_clean() {
        let crest = |voice: BuiltinVoice| {
            let mut model = AlgorithmicModel::new(voice, 48000.0, 480);
            model.set_parameters(&AmpParameters {
                gain: 1.0,
                ..Default::default()
            });
            model.reset();
            let mut block = sine(9600, 0.1);
            model.process_block(&mut block);
            let tail = &block[4800..];
            let peak = tail.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            let rms = (tail.iter().map(|s| s * s).sum::<f32>() / tail.len() as f32).sqrt();
            peak / rms
        };
        // Heavier clipping squares the wave: lower crest factor
        assert!(crest(BuiltinVoice::Metal) < crest(BuiltinVoice::Clean));
    }

    #[test]
    fn test_parameters_clamped_on_set() {
        let mut model = AlgorithmicModel::new(BuiltinVoice::Crunch, 48000.0, 480);
        model.set_parameters(&AmpParameters {
            gain: 2.0,
            bass: -1.0,
            ..Default::default()
        });
        assert_eq!(model.parameters().gain, 1.0);
        assert_eq!(model.parameters().bass, 0.0);
        assert_eq!(model.info().kind, ModelKind::Algorithmic);
    }
}
