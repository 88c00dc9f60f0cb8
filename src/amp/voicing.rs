//! Amp voicing shared by every model kind
//!
//! Wraps a model core: input drive before it; asymmetry, saturation, tone
//! stack, sag and volume after it. All controls ramp over the smoothing
//! window, and the tone stack coefficients are refreshed every
//! [`COEFF_UPDATE_INTERVAL`] samples while a tone control is moving.

use crate::amp::params::AmpParameters;
use crate::dsp::{BiquadCoeffs, BiquadState, FilterType, SmoothedValue};
use crate::engine::db_to_linear;

/// Samples between tone stack coefficient refreshes during a ramp
pub const COEFF_UPDATE_INTERVAL: usize = 32;

// Tone stack corner frequencies
const BASS_HZ: f64 = 100.0;
const MID_HZ: f64 = 650.0;
const TREBLE_HZ: f64 = 3200.0;
const PRESENCE_HZ: f64 = 5000.0;

/// Full boost/cut range of bass, mid and treble in dB
const TONE_RANGE_DB: f32 = 24.0;
/// Full boost/cut range of presence in dB
const PRESENCE_RANGE_DB: f32 = 12.0;

/// DC blocker pole (about 10 Hz at 48 kHz)
const DC_BLOCK_POLE: f32 = 0.9987;

/// Tone stack band
#[derive(Debug, Clone, Copy)]
enum Band {
    Bass,
    Mid,
    Treble,
    Presence,
}

impl Band {
    const ALL: [Band; 4] = [Band::Bass, Band::Mid, Band::Treble, Band::Presence];

    fn coeffs(self, sample_rate: f64, control: f32) -> BiquadCoeffs {
        let offset = (control - 0.5) as f64;
        match self {
            Band::Bass => BiquadCoeffs::calculate(
                FilterType::LowShelf,
                sample_rate,
                BASS_HZ,
                offset * TONE_RANGE_DB as f64,
                0.707,
            ),
            Band::Mid => BiquadCoeffs::calculate(
                FilterType::Peak,
                sample_rate,
                MID_HZ,
                offset * TONE_RANGE_DB as f64,
                0.7,
            ),
            Band::Treble => BiquadCoeffs::calculate(
                FilterType::HighShelf,
                sample_rate,
                TREBLE_HZ,
                offset * TONE_RANGE_DB as f64,
                0.707,
            ),
            Band::Presence => BiquadCoeffs::calculate(
                FilterType::HighShelf,
                sample_rate,
                PRESENCE_HZ,
                offset * PRESENCE_RANGE_DB as f64,
                0.707,
            ),
        }
    }
}

/// Smoothed amp controls wrapped around a model core
#[derive(Debug, Clone)]
pub struct AmpVoicing {
    sample_rate: f64,
    /// Drive range in dB mapped from `gain` 0..1
    drive_range_db: (f32, f32),
    drive: SmoothedValue,
    tone: [SmoothedValue; 4],
    volume: SmoothedValue,
    saturation: SmoothedValue,
    asymmetry: SmoothedValue,
    sag: SmoothedValue,
    tone_coeffs: [BiquadCoeffs; 4],
    tone_state: [BiquadState; 4],
    dc_x1: f32,
    dc_y1: f32,
    sag_env: f32,
    sag_attack: f32,
    sag_release: f32,
}

impl AmpVoicing {
    /// Create a voicing resting at `params`
    pub fn new(
        sample_rate: f64,
        ramp_samples: usize,
        drive_range_db: (f32, f32),
        params: &AmpParameters,
    ) -> Self {
        let mut voicing = Self {
            sample_rate,
            drive_range_db,
            drive: SmoothedValue::new(1.0, ramp_samples),
            tone: [SmoothedValue::new(0.5, ramp_samples); 4],
            volume: SmoothedValue::new(1.0, ramp_samples),
            saturation: SmoothedValue::new(0.0, ramp_samples),
            asymmetry: SmoothedValue::new(0.0, ramp_samples),
            sag: SmoothedValue::new(0.0, ramp_samples),
            tone_coeffs: [BiquadCoeffs::identity(); 4],
            tone_state: [BiquadState::default(); 4],
            dc_x1: 0.0,
            dc_y1: 0.0,
            sag_env: 0.0,
            sag_attack: one_pole(5.0, sample_rate),
            sag_release: one_pole(120.0, sample_rate),
        };
        voicing.set_parameters(params);
        voicing.snap_to_targets();
        voicing
    }

    fn drive_linear(&self, gain: f32) -> f32 {
        let (lo, hi) = self.drive_range_db;
        db_to_linear(lo + gain * (hi - lo))
    }

    /// Retarget every control; values are expected to be clamped already
    pub fn set_parameters(&mut self, params: &AmpParameters) {
        self.drive.set_target(self.drive_linear(params.gain));
        self.tone[0].set_target(params.bass);
        self.tone[1].set_target(params.mid);
        self.tone[2].set_target(params.treble);
        self.tone[3].set_target(params.presence);
        let v = 2.0 * params.volume;
        self.volume.set_target(v * v);
        self.saturation.set_target(params.saturation);
        self.asymmetry.set_target(params.asymmetry);
        self.sag.set_target(params.sag);
    }

    /// Finish every ramp immediately
    pub fn snap_to_targets(&mut self) {
        for value in self
            .tone
            .iter_mut()
            .chain([
                &mut self.drive,
                &mut self.volume,
                &mut self.saturation,
                &mut self.asymmetry,
                &mut self.sag,
            ])
        {
            value.set_immediate(value.target());
        }
        self.refresh_tone_coeffs();
    }

    fn refresh_tone_coeffs(&mut self) {
        for (i, band) in Band::ALL.iter().enumerate() {
            self.tone_coeffs[i] = band.coeffs(self.sample_rate, self.tone[i].current());
        }
    }

    /// Clear filter and envelope history
    pub fn reset(&mut self) {
        self.tone_state.iter_mut().for_each(BiquadState::reset);
        self.dc_x1 = 0.0;
        self.dc_y1 = 0.0;
        self.sag_env = 0.0;
        self.snap_to_targets();
    }

    /// Apply the smoothed input drive
    pub fn apply_drive(&mut self, block: &mut [f32]) {
        for sample in block.iter_mut() {
            *sample *= self.drive.next_value();
        }
    }

    /// Apply asymmetry, saturation, tone stack, sag and volume
    pub fn apply_output(&mut self, block: &mut [f32]) {
        for chunk in block.chunks_mut(COEFF_UPDATE_INTERVAL) {
            if self.tone.iter().any(SmoothedValue::is_smoothing) {
                for value in self.tone.iter_mut() {
                    value.skip(chunk.len());
                }
                self.refresh_tone_coeffs();
            }

            for sample in chunk.iter_mut() {
                let asym = self.asymmetry.next_value();
                let sat = self.saturation.next_value();
                let sag = self.sag.next_value();
                let volume = self.volume.next_value();

                let mut x = *sample;

                // Compress positive half-waves only: even harmonics
                if asym > 0.0 && x > 0.0 {
                    x /= 1.0 + asym * x;
                }
                if sat > 0.0 {
                    x = (1.0 - sat) * x + sat * (x * (1.0 + 3.0 * sat)).tanh();
                }

                // DC blocker removes the offset left by the asymmetric stage
                let y = x - self.dc_x1 + DC_BLOCK_POLE * self.dc_y1;
                self.dc_x1 = x;
                self.dc_y1 = y;

                let mut t = y as f64;
                for (state, coeffs) in self.tone_state.iter_mut().zip(self.tone_coeffs.iter()) {
                    t = state.process(t, coeffs);
                }
                let mut out = t as f32;

                if sag > 0.0 {
                    let level = out.abs();
                    let coeff = if level > self.sag_env {
                        self.sag_attack
                    } else {
                        self.sag_release
                    };
                    self.sag_env = coeff * self.sag_env + (1.0 - coeff) * level;
                    out /= 1.0 + 2.0 * sag * self.sag_env;
                }

                *sample = out * volume;
            }
        }
    }
}

fn one_pole(time_ms: f32, sample_rate: f64) -> f32 {
    let samples = time_ms / 1000.0 * sample_rate as f32;
    if samples > 0.0 {
        (-1.0 / samples).exp()
    } else {
        0.0
    }
}
