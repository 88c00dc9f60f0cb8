//! Neural amp models (`.nam` documents)
//!
//! The document is JSON with `architecture`, `config`, `weights` and an
//! optional declared sample rate. Parsing and validation happen here; the
//! inference itself sits behind [`InferenceKernel`], built by the
//! [`InferenceBackend`] registered for the architecture.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::amp::params::AmpParameters;
use crate::amp::voicing::AmpVoicing;
use crate::amp::{AmpModel, ModelInfo};
use crate::error::ModelLoadError;

/// Sample rate assumed when a document declares none
pub const DEFAULT_NAM_SAMPLE_RATE: f64 = 48000.0;

/// Input drive range of neural models in dB
const NEURAL_DRIVE_RANGE_DB: (f32, f32) = (-12.0, 12.0);

// ============================================================================
// Document parsing
// ============================================================================

/// Parsed `.nam` document
#[derive(Debug, Clone)]
pub struct NamFile {
    pub version: Option<String>,
    pub architecture: String,
    pub config: Value,
    pub weights: Vec<f64>,
    pub sample_rate: f64,
    pub name: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize)]
struct RawNamFile {
    version: Option<String>,
    architecture: String,
    #[serde(default)]
    config: Value,
    weights: Vec<f64>,
    sample_rate: Option<f64>,
    metadata: Option<RawMetadata>,
}

#[derive(Deserialize)]
struct RawMetadata {
    sample_rate: Option<f64>,
    name: Option<String>,
    modeled_by: Option<String>,
    description: Option<String>,
}

/// True when the bytes look like a `.nam` document
pub fn is_nam_document(bytes: &[u8]) -> bool {
    let trimmed = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|start| &bytes[start..])
        .unwrap_or(&[]);
    if trimmed.first() != Some(&b'{') {
        return false;
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => map.contains_key("architecture") && map.contains_key("weights"),
        _ => false,
    }
}

/// Parse a `.nam` JSON string
pub fn parse_nam_json(json_str: &str) -> Result<NamFile, ModelLoadError> {
    let raw: RawNamFile =
        serde_json::from_str(json_str).map_err(|e| ModelLoadError::InvalidFormat {
            reason: format!("malformed model document: {}", e),
        })?;

    if let Some(ref ver) = raw.version {
        if !ver.starts_with("0.5") && !ver.starts_with("0.6") && !ver.starts_with("0.7") {
            log::warn!(
                "Model format version '{}' may not be fully supported (expected 0.5.x-0.7.x)",
                ver
            );
        }
    }

    // Sample rate: top-level > metadata > default
    let sample_rate = raw
        .sample_rate
        .or_else(|| raw.metadata.as_ref().and_then(|m| m.sample_rate))
        .unwrap_or(DEFAULT_NAM_SAMPLE_RATE);

    if !sample_rate.is_finite() || sample_rate <= 0.0 {
        return Err(ModelLoadError::InvalidFormat {
            reason: format!("invalid declared sample rate {}", sample_rate),
        });
    }
    if raw.weights.is_empty() {
        return Err(ModelLoadError::InvalidFormat {
            reason: "model contains no weights".to_string(),
        });
    }
    if raw.weights.iter().any(|w| !w.is_finite()) {
        return Err(ModelLoadError::InvalidFormat {
            reason: "model weights contain non-finite values".to_string(),
        });
    }

    let (name, author, description) = match raw.metadata {
        Some(meta) => (meta.name, meta.modeled_by, meta.description),
        None => (None, None, None),
    };

    Ok(NamFile {
        version: raw.version,
        architecture: raw.architecture,
        config: raw.config,
        weights: raw.weights,
        sample_rate,
        name,
        author,
        description,
    })
}

// ============================================================================
// Inference seam
// ============================================================================

/// Block-level inference for one loaded network
pub trait InferenceKernel: Send {
    /// Transform a mono block in place; must not allocate
    fn process(&mut self, block: &mut [f32]);

    /// Clear internal history
    fn reset(&mut self);
}

/// Builds kernels for one architecture
pub trait InferenceBackend: Send + Sync {
    /// Architecture string this backend accepts (case-insensitive)
    fn architecture(&self) -> &str;

    /// Build a kernel sized for `max_block_size`
    fn build(
        &self,
        config: &Value,
        weights: &[f64],
        max_block_size: usize,
    ) -> Result<Box<dyn InferenceKernel>, ModelLoadError>;
}

/// Backends keyed by lower-cased architecture name
#[derive(Clone)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn InferenceBackend>>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("architectures", &self.architectures())
            .finish()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(LinearBackend));
        registry
    }
}

impl BackendRegistry {
    /// Registry with no backends
    pub fn empty() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Register a backend, replacing any with the same architecture
    pub fn register(&mut self, backend: Arc<dyn InferenceBackend>) {
        self.backends
            .insert(backend.architecture().to_ascii_lowercase(), backend);
    }

    pub fn get(&self, architecture: &str) -> Option<&Arc<dyn InferenceBackend>> {
        self.backends.get(&architecture.to_ascii_lowercase())
    }

    /// Registered architectures, sorted
    pub fn architectures(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}

// ============================================================================
// Linear backend
// ============================================================================

/// FIR network: `receptive_field` taps followed by an optional bias weight
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearBackend;

impl InferenceBackend for LinearBackend {
    fn architecture(&self) -> &str {
        "Linear"
    }

    fn build(
        &self,
        config: &Value,
        weights: &[f64],
        _max_block_size: usize,
    ) -> Result<Box<dyn InferenceKernel>, ModelLoadError> {
        let receptive_field = config
            .get("receptive_field")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ModelLoadError::InvalidFormat {
                reason: "Linear config missing 'receptive_field'".to_string(),
            })? as usize;
        let bias = config.get("bias").and_then(|v| v.as_bool()).unwrap_or(false);

        if receptive_field == 0 {
            return Err(ModelLoadError::InvalidFormat {
                reason: "Linear config has receptive_field=0".to_string(),
            });
        }
        let expected = receptive_field + usize::from(bias);
        if weights.len() != expected {
            return Err(ModelLoadError::InvalidFormat {
                reason: format!(
                    "Linear model expects {} weights, found {}",
                    expected,
                    weights.len()
                ),
            });
        }

        // Weights are stored oldest-first; flip so taps[0] multiplies the newest input
        let taps: Vec<f32> = weights[..receptive_field]
            .iter()
            .rev()
            .map(|&w| w as f32)
            .collect();
        let bias = if bias {
            weights[receptive_field] as f32
        } else {
            0.0
        };

        Ok(Box::new(LinearKernel {
            history: vec![0.0; taps.len()],
            taps,
            bias,
            pos: 0,
        }))
    }
}

struct LinearKernel {
    taps: Vec<f32>,
    bias: f32,
    /// Ring of past inputs, newest at `pos`
    history: Vec<f32>,
    pos: usize,
}

impl InferenceKernel for LinearKernel {
    fn process(&mut self, block: &mut [f32]) {
        let n = self.history.len();
        for sample in block.iter_mut() {
            self.pos = (self.pos + 1) % n;
            self.history[self.pos] = *sample;

            let mut acc = self.bias;
            let mut idx = self.pos;
            for &tap in &self.taps {
                acc += tap * self.history[idx];
                idx = if idx == 0 { n - 1 } else { idx - 1 };
            }
            *sample = acc;
        }
    }

    fn reset(&mut self) {
        self.history.fill(0.0);
        self.pos = 0;
    }
}

// ============================================================================
// Neural model
// ============================================================================

/// Neural amp model: voicing wrapped around an inference kernel
pub struct NeuralModel {
    info: ModelInfo,
    kernel: Box<dyn InferenceKernel>,
    voicing: AmpVoicing,
    params: AmpParameters,
}

impl fmt::Debug for NeuralModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NeuralModel")
            .field("info", &self.info)
            .field("params", &self.params)
            .finish()
    }
}

impl NeuralModel {
    /// Build a model from a parsed document
    ///
    /// Rejects documents whose declared rate differs from `engine_rate`.
    pub fn from_document(
        doc: &NamFile,
        info: ModelInfo,
        registry: &BackendRegistry,
        engine_rate: f64,
        max_block_size: usize,
        smoothing_samples: usize,
    ) -> Result<Self, ModelLoadError> {
        if (doc.sample_rate - engine_rate).abs() > 0.5 {
            return Err(ModelLoadError::SampleRateMismatch {
                model_rate: doc.sample_rate,
                engine_rate,
            });
        }

        let backend =
            registry
                .get(&doc.architecture)
                .ok_or_else(|| ModelLoadError::UnsupportedArchitecture {
                    architecture: doc.architecture.clone(),
                })?;
        let kernel = backend.build(&doc.config, &doc.weights, max_block_size)?;

        let params = AmpParameters::default();
        Ok(Self {
            info,
            kernel,
            voicing: AmpVoicing::new(
                engine_rate,
                smoothing_samples,
                NEURAL_DRIVE_RANGE_DB,
                &params,
            ),
            params,
        })
    }
}

impl AmpModel for NeuralModel {
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
        self.kernel.process(block);
        self.voicing.apply_output(block);
    }

    fn reset(&mut self) {
        self.kernel.reset();
        self.voicing.reset();
    }

    fn is_ready(&self) -> bool {
        true
    }
}
