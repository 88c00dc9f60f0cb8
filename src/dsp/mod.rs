//! DSP building blocks
//!
//! Per-stage processors used by the signal chain. Everything that implements
//! [`Effect`] processes in place without allocating.

pub mod biquad;
mod chorus;
mod compressor;
mod delay;
mod effect;
mod gain;
mod gate;
pub mod resample;
mod reverb;
mod smoothing;

pub use biquad::{BiquadCoeffs, BiquadState, FilterType};
pub use chorus::Chorus;
pub use compressor::{Compressor, CompressorParams};
pub use delay::{Delay, DEFAULT_DELAY_MS, DEFAULT_FEEDBACK};
pub use effect::Effect;
pub use gain::{Gain, MAX_GAIN_DB, MIN_GAIN_DB};
pub use gate::{Gate, GateParams};
pub use reverb::{Reverb, ReverbParams};
pub use smoothing::SmoothedValue;
