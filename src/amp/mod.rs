//! Amp Model Module
//!
//! The replaceable amplifier stage of the signal chain:
//! - [`AmpModel`]: the capability every model kind implements
//! - Neural models loaded from `.nam` documents
//! - Built-in algorithmic models addressed as `builtin:<name>`
//! - [`ModelLoader`] format detection and [`ModelHandle`] sharing
//! - [`AmpModeler`], a standalone stage for use outside the chain

pub mod algorithmic;
pub mod loader;
pub mod nam;
pub mod params;
pub mod voicing;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use algorithmic::{AlgorithmicModel, BuiltinVoice, BUILTIN_PREFIX};
pub use loader::{AmpModeler, LoadedModel, ModelFormat, ModelHandle, ModelLoader};
pub use nam::{BackendRegistry, InferenceBackend, InferenceKernel, LinearBackend, NeuralModel};
pub use params::{clamp_unit, AmpParameters};

/// Kind of amp model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Learned transfer function from a `.nam` document
    Neural,
    /// Closed-form built-in voicing
    Algorithmic,
}

/// Metadata describing a loaded model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub kind: ModelKind,
    /// Architecture descriptor (`Linear`, `WaveNet`, `algorithmic`, ...)
    pub architecture: String,
    /// Declared sample rate in Hz
    pub sample_rate: f64,
    pub version: String,
    pub author: String,
    pub description: String,
    /// Source file, `None` for built-ins
    pub path: Option<PathBuf>,
    pub file_size: u64,
    /// Hex SHA-256 of the source file
    pub checksum: Option<String>,
}

impl ModelInfo {
    pub fn new(
        name: impl Into<String>,
        kind: ModelKind,
        architecture: impl Into<String>,
        sample_rate: f64,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            architecture: architecture.into(),
            sample_rate,
            version: String::new(),
            author: String::new(),
            description: String::new(),
            path: None,
            file_size: 0,
            checksum: None,
        }
    }
}

/// Capability shared by every amp model kind
///
/// `process_block` runs on the audio thread and must not allocate or block.
/// Parameter changes are ramped internally, so calling `set_parameters`
/// between blocks never produces a step in the output.
pub trait AmpModel: Send {
    fn info(&self) -> &ModelInfo;

    /// Retarget the smoothed controls; out-of-range values are clamped
    fn set_parameters(&mut self, params: &AmpParameters);

    /// Current (clamped) parameter targets
    fn parameters(&self) -> AmpParameters;

    /// Transform a mono block in place
    fn process_block(&mut self, block: &mut [f32]);

    /// Clear filter, envelope and inference history
    fn reset(&mut self);

    fn is_ready(&self) -> bool;
}
