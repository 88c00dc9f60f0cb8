//! Doomloader - Real-Time Guitar Signal Chain
//!
//! A guitar signal runs through a replaceable amp model, a convolution
//! cabinet and a dynamics/modulation chain, while a control path loads
//! models, impulse responses and presets without disturbing the audio.
//!
//! # Architecture
//!
//! Two execution contexts share exactly one thing, the published snapshot:
//! - Control path: [`ConfigurationController`] loads and validates
//!   resources, builds a complete [`Snapshot`] and publishes it atomically.
//! - Audio path: [`SignalChain`] reads the latest snapshot once per block
//!   and processes the block with it, never blocking or allocating.

pub mod amp;
pub mod config;
pub mod convolution;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod state;

pub use amp::{AmpModel, AmpModeler, AmpParameters, ModelHandle, ModelInfo, ModelKind, ModelLoader};
pub use config::{CacheLimits, EngineConfig};
pub use convolution::{
    ConvolutionEngine, IrBuffer, IrDecoder, PreparedIr, SymphoniaIrDecoder, WavIrDecoder,
};
pub use engine::{AudioBuffer, SignalChain};
pub use error::{DoomError, ErrorKind, IrLoadError, ModelLoadError, Result};
pub use state::{
    ConfigurationController, EffectParameters, FsPresetStore, Preset, PresetStore, RequestState,
    Snapshot,
};
