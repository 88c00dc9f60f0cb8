//! Model loading and sharing
//!
//! [`ModelLoader`] turns a source string into a ready [`AmpModel`]: sources
//! starting with `builtin:` select an algorithmic voice, files are sniffed
//! for the `.nam` document signature. Loaded models are wrapped in a
//! [`ModelHandle`] so snapshots can share them with the audio path.

use std::fmt;
use std::fs;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use sha2::{Digest, Sha256};

use crate::amp::algorithmic::{AlgorithmicModel, BuiltinVoice, BUILTIN_PREFIX};
use crate::amp::nam::{is_nam_document, parse_nam_json, BackendRegistry, NeuralModel};
use crate::amp::params::AmpParameters;
use crate::amp::{AmpModel, ModelInfo, ModelKind};
use crate::config::EngineConfig;
use crate::error::ModelLoadError;

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Format detection
// ============================================================================

/// Model container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// `builtin:<name>` source
    Builtin,
    /// `.nam` JSON document
    Nam,
}

impl ModelFormat {
    /// Formats identified by the source string alone
    pub fn from_source(source: &str) -> Option<Self> {
        let prefix = source.get(..BUILTIN_PREFIX.len())?;
        prefix
            .eq_ignore_ascii_case(BUILTIN_PREFIX)
            .then_some(ModelFormat::Builtin)
    }

    /// Formats identified by file contents
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        is_nam_document(bytes).then_some(ModelFormat::Nam)
    }
}

// ============================================================================
// Loader
// ============================================================================

/// Builds models sized for one engine configuration
#[derive(Debug, Clone)]
pub struct ModelLoader {
    sample_rate: f64,
    max_block_size: usize,
    smoothing_samples: usize,
    registry: BackendRegistry,
}

impl ModelLoader {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_registry(config, BackendRegistry::default())
    }

    /// Loader with a custom set of inference backends
    pub fn with_registry(config: &EngineConfig, registry: BackendRegistry) -> Self {
        Self {
            sample_rate: config.sample_rate as f64,
            max_block_size: config.block_size,
            smoothing_samples: config.smoothing_samples(),
            registry,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Load a model from a `builtin:` name or a file path
    pub fn load(&self, source: &str) -> Result<Box<dyn AmpModel>, ModelLoadError> {
        if ModelFormat::from_source(source) == Some(ModelFormat::Builtin) {
            let voice =
                BuiltinVoice::from_name(source).ok_or_else(|| ModelLoadError::InvalidFormat {
                    reason: format!("unknown built-in model '{}'", source),
                })?;
            return Ok(Box::new(AlgorithmicModel::new(
                voice,
                self.sample_rate,
                self.smoothing_samples,
            )));
        }
        self.load_file(Path::new(source))
    }

    fn load_file(&self, path: &Path) -> Result<Box<dyn AmpModel>, ModelLoadError> {
        let bytes = fs::read(path).map_err(|e| ModelLoadError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        match ModelFormat::sniff(&bytes) {
            Some(ModelFormat::Nam) => {}
            _ => {
                return Err(ModelLoadError::InvalidFormat {
                    reason: format!("{} is not a recognised model file", path.display()),
                })
            }
        }

        let text = std::str::from_utf8(&bytes).map_err(|e| ModelLoadError::InvalidFormat {
            reason: format!("model document is not UTF-8: {}", e),
        })?;
        let doc = parse_nam_json(text)?;

        let name = doc.name.clone().unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "Untitled".to_string())
        });
        let mut info = ModelInfo::new(name, ModelKind::Neural, &doc.architecture, doc.sample_rate);
        info.version = doc.version.clone().unwrap_or_default();
        info.author = doc.author.clone().unwrap_or_default();
        info.description = doc.description.clone().unwrap_or_default();
        info.path = Some(path.to_path_buf());
        info.file_size = bytes.len() as u64;
        info.checksum = Some(format!("{:x}", Sha256::digest(&bytes)));

        let model = NeuralModel::from_document(
            &doc,
            info,
            &self.registry,
            self.sample_rate,
            self.max_block_size,
            self.smoothing_samples,
        )?;
        Ok(Box::new(model))
    }

    /// Load and wrap in a shareable handle
    pub fn load_handle(&self, source: &str) -> Result<ModelHandle, ModelLoadError> {
        let model = self.load(source)?;
        Ok(ModelHandle::new(source, model))
    }

    /// Metadata for every built-in voice at this loader's rate
    pub fn builtin_models(&self) -> Vec<ModelInfo> {
        BuiltinVoice::ALL
            .iter()
            .map(|&voice| {
                let mut info = AlgorithmicModel::new(voice, self.sample_rate, 1)
                    .info()
                    .clone();
                info.name = voice.identifier();
                info
            })
            .collect()
    }
}

// ============================================================================
// Shared handle
// ============================================================================

/// A loaded model plus the identity snapshots refer to it by
pub struct LoadedModel {
    id: u64,
    source: String,
    info: ModelInfo,
    model: Mutex<Box<dyn AmpModel>>,
}

impl LoadedModel {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Source string the model was loaded from
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    /// Non-blocking access for the audio path
    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, Box<dyn AmpModel>>> {
        self.model.try_lock()
    }

    /// Blocking access; control path only, before the model is published
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn AmpModel>> {
        self.model.lock()
    }
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("info", &self.info)
            .finish()
    }
}

/// Reference-counted handle to a [`LoadedModel`]
///
/// Snapshots hold these; the model is freed when the last snapshot and the
/// resource cache drop theirs.
#[derive(Clone)]
pub struct ModelHandle(Arc<LoadedModel>);

impl ModelHandle {
    pub fn new(source: impl Into<String>, model: Box<dyn AmpModel>) -> Self {
        let info = model.info().clone();
        Self(Arc::new(LoadedModel {
            id: NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed),
            source: source.into(),
            info,
            model: Mutex::new(model),
        }))
    }

    /// True when both handles refer to the same loaded model
    pub fn ptr_eq(&self, other: &ModelHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live handles
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl Deref for ModelHandle {
    type Target = LoadedModel;

    fn deref(&self) -> &LoadedModel {
        &self.0
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModelHandle").field(&self.0).finish()
    }
}

// ============================================================================
// Standalone amp stage
// ============================================================================

/// Amp stage usable on its own, outside the snapshot-driven chain
///
/// Holds at most one model. A failed load keeps the previous model and the
/// previous readiness.
#[derive(Debug)]
pub struct AmpModeler {
    loader: ModelLoader,
    model: Option<ModelHandle>,
    params: AmpParameters,
}

impl AmpModeler {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_loader(ModelLoader::new(config))
    }

    pub fn with_loader(loader: ModelLoader) -> Self {
        Self {
            loader,
            model: None,
            params: AmpParameters::default(),
        }
    }

    /// Load a model and make it current
    pub fn load_model(&mut self, source: &str) -> Result<ModelHandle, ModelLoadError> {
        let handle = match self.loader.load_handle(source) {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!("Model load failed for {}: {}", source, e);
                return Err(e);
            }
        };
        {
            let mut model = handle.lock();
            model.set_parameters(&self.params);
            model.reset();
        }
        log::info!("Loaded amp model '{}' from {}", handle.info().name, source);
        self.model = Some(handle.clone());
        Ok(handle)
    }

    /// Drop the current model; the stage passes audio through
    pub fn unload_model(&mut self) {
        self.model = None;
    }

    /// Store clamped parameters and retarget the model
    pub fn set_parameters(&mut self, params: &AmpParameters) {
        self.params = params.clamped();
        if let Some(handle) = &self.model {
            handle.lock().set_parameters(&self.params);
        }
    }

    pub fn parameters(&self) -> AmpParameters {
        self.params
    }

    /// Process a mono block; passes through while no model is ready
    pub fn process_block(&mut self, block: &mut [f32]) {
        let Some(handle) = &self.model else {
            return;
        };
        if let Some(mut model) = handle.try_lock() {
            if model.is_ready() {
                model.process_block(block);
            }
        }
    }

    pub fn reset(&mut self) {
        if let Some(handle) = &self.model {
            handle.lock().reset();
        }
    }

    pub fn is_ready(&self) -> bool {
        self.model
            .as_ref()
            .map(|handle| handle.lock().is_ready())
            .unwrap_or(false)
    }

    pub fn model_info(&self) -> Option<&ModelInfo> {
        self.model.as_ref().map(|handle| handle.info())
    }

    pub fn builtin_models(&self) -> Vec<ModelInfo> {
        self.loader.builtin_models()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const IDENTITY_NAM: &str = r#"{
        "version": "0.5.2",
        "architecture": "Linear",
        "config": { "receptive_field": 2, "bias": false },
        "weights": [0.0, 1.0],
        "sample_rate": 48000,
        "metadata": { "name": "Wire" }
    }"#;

    fn write_temp(contents: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    fn modeler() -> AmpModeler {
        AmpModeler::new(&EngineConfig::default())
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            ModelFormat::from_source("builtin:clean"),
            Some(ModelFormat::Builtin)
        );
        assert_eq!(
            ModelFormat::from_source("BUILTIN:lead"),
            Some(ModelFormat::Builtin)
        );
        assert_eq!(ModelFormat::from_source("/tmp/amp.nam"), None);
        assert_eq!(
            ModelFormat::sniff(IDENTITY_NAM.as_bytes()),
            Some(ModelFormat::Nam)
        );
        assert_eq!(ModelFormat::sniff(b"\x00\x01garbage"), None);
    }

    #[test]
    fn test_load_nam_file_fills_metadata() {
        let file = write_temp(IDENTITY_NAM.as_bytes());
        let loader = ModelLoader::new(&EngineConfig::default());
        let handle = loader
            .load_handle(file.path().to_str().unwrap())
            .unwrap();

        let info = handle.info();
        assert_eq!(info.name, "Wire");
        assert_eq!(info.kind, ModelKind::Neural);
        assert_eq!(info.architecture, "Linear");
        assert_eq!(info.file_size, IDENTITY_NAM.len() as u64);
        assert_eq!(info.checksum.as_ref().map(|c| c.len()), Some(64));
    }

    #[test]
    fn test_load_builtin() {
        let loader = ModelLoader::new(&EngineConfig::default());
        let model = loader.load("builtin:metal").unwrap();
        assert_eq!(model.info().kind, ModelKind::Algorithmic);
        assert!(matches!(
            loader.load("builtin:kazoo"),
            Err(ModelLoadError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let loader = ModelLoader::new(&EngineConfig::default());
        assert!(matches!(
            loader.load("/definitely/not/here.nam"),
            Err(ModelLoadError::Io { .. })
        ));
    }

    #[test]
    fn test_failed_load_keeps_readiness() {
        let mut amp = modeler();
        assert!(!amp.is_ready());
        let corrupt = write_temp(b"RIFF\x00\x00\x00\x00WAVE");
        assert!(amp.load_model(corrupt.path().to_str().unwrap()).is_err());
        assert!(!amp.is_ready());

        amp.load_model("builtin:crunch").unwrap();
        assert!(amp.is_ready());
        assert!(amp.load_model(corrupt.path().to_str().unwrap()).is_err());
        assert!(amp.is_ready());
        assert_eq!(amp.model_info().map(|i| i.name.as_str()), Some("crunch"));
    }

    #[test]
    fn test_parameters_clamped() {
        let mut amp = modeler();
        amp.load_model("builtin:clean").unwrap();
        amp.set_parameters(&AmpParameters {
            gain: 2.0,
            treble: -3.0,
            ..Default::default()
        });
        assert_eq!(amp.parameters().gain, 1.0);
        assert_eq!(amp.parameters().treble, 0.0);
    }

    #[test]
    fn test_passthrough_without_model() {
        let mut amp = modeler();
        let mut block = [0.1, -0.2, 0.3];
        amp.process_block(&mut block);
        assert_eq!(block, [0.1, -0.2, 0.3]);
    }

    #[test]
    fn test_builtin_listing() {
        let names: Vec<String> = modeler()
            .builtin_models()
            .into_iter()
            .map(|info| info.name)
            .collect();
        assert_eq!(
            names,
            vec!["builtin:clean", "builtin:crunch", "builtin:lead", "builtin:metal"]
        );
    }

    #[test]
    fn test_handle_identity() {
        let loader = ModelLoader::new(&EngineConfig::default());
        let a = loader.load_handle("builtin:lead").unwrap();
        let b = loader.load_handle("builtin:lead").unwrap();
        assert!(!a.ptr_eq(&b));
        assert_ne!(a.id(), b.id());
        let a2 = a.clone();
        assert!(a.ptr_eq(&a2));
        assert_eq!(a.strong_count(), 2);
    }
}
