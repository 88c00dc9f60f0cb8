//! Configuration controller
//!
//! Every change to what the audio path hears goes through here. Resource
//! loads run on the calling thread, off the audio path, and only a complete
//! snapshot is ever published. Loads are transactional: if any resource a
//! request needs fails, the published snapshot stays as it was.
//!
//! Each load request takes a ticket. When two loads race, the newer ticket
//! wins: an older request that finishes after a newer one has published is
//! discarded with [`DoomError::Superseded`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::amp::{AmpParameters, BackendRegistry, ModelHandle, ModelLoader};
use crate::config::EngineConfig;
use crate::convolution::{
    decoder_for, default_decoders, prepare_ir, DecodedAudio, IrBuffer, IrDecoder, IrPrepareOptions,
    PreparedIr,
};
use crate::engine::SignalChain;
use crate::error::{DoomError, Result};
use crate::state::cache::ResourceCache;
use crate::state::preset::{self, Category, Preset, PresetStore, PresetSummary, DEFAULT_CATEGORIES};
use crate::state::snapshot::{EffectParameters, Snapshot, SnapshotPublisher, SnapshotReader};

/// Where the most recent load request is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Loading,
    Ready,
    Failed,
    Publishing,
    Published,
    /// Discarded because a newer request published first or it was cancelled
    Superseded,
}

#[derive(Debug)]
struct RequestTracker {
    state: RequestState,
    /// Ticket of the last load that published
    last_published: u64,
    /// Tickets at or below this were cancelled
    cancelled_through: u64,
}

impl RequestTracker {
    fn transition(&mut self, ticket: u64, next: RequestState) {
        log::debug!("Request #{}: {:?} -> {:?}", ticket, self.state, next);
        self.state = next;
    }
}

/// Resources a preset needs, loaded but not yet published
struct ResolvedPreset {
    preset: Preset,
    model: Option<ModelHandle>,
    ir: Option<Arc<PreparedIr>>,
}

/// Builds and publishes snapshots for one engine
pub struct ConfigurationController {
    config: EngineConfig,
    loader: ModelLoader,
    ir_options: IrPrepareOptions,
    /// Tried in order; the first that supports a file's extension decodes it
    decoders: Vec<Box<dyn IrDecoder>>,
    store: Box<dyn PresetStore>,
    cache: Mutex<ResourceCache>,
    publisher: SnapshotPublisher,
    requests: Mutex<RequestTracker>,
    next_ticket: AtomicU64,
}

impl std::fmt::Debug for ConfigurationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationController")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("published", &self.publisher.current().id())
            .finish()
    }
}

impl ConfigurationController {
    /// Controller with the shipped IR decoders and the default inference backends
    pub fn new(config: EngineConfig, store: Box<dyn PresetStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            loader: ModelLoader::new(&config),
            ir_options: IrPrepareOptions::from_config(&config),
            decoders: default_decoders(),
            store,
            cache: Mutex::new(ResourceCache::new(config.cache)),
            publisher: SnapshotPublisher::new(Snapshot::default()),
            requests: Mutex::new(RequestTracker {
                state: RequestState::Idle,
                last_published: 0,
                cancelled_through: 0,
            }),
            next_ticket: AtomicU64::new(0),
            config,
        })
    }

    /// Add an IR decoder that takes precedence over the shipped ones
    pub fn with_decoder(mut self, decoder: Box<dyn IrDecoder>) -> Self {
        self.decoders.insert(0, decoder);
        self
    }

    pub fn with_backends(mut self, registry: BackendRegistry) -> Self {
        self.loader = ModelLoader::with_registry(&self.config, registry);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> RequestState {
        self.requests.lock().state
    }

    /// The published snapshot
    pub fn current(&self) -> Arc<Snapshot> {
        self.publisher.current()
    }

    pub fn reader(&self) -> SnapshotReader {
        self.publisher.reader()
    }

    /// Signal chain wired to this controller's snapshots
    ///
    /// An engine has a single audio path. Model instances belong to the
    /// published snapshots, so a second chain processing at the same time
    /// contends for them and its amp stage passes audio through.
    pub fn create_signal_chain(&self) -> SignalChain {
        SignalChain::new(&self.config, self.reader())
    }

    /// Free retired snapshots the audio path has moved past
    pub fn collect_garbage(&self) -> usize {
        self.publisher.collect_garbage()
    }

    pub fn retired_snapshots(&self) -> usize {
        self.publisher.retired_count()
    }

    // ------------------------------------------------------------------------
    // Request bookkeeping
    // ------------------------------------------------------------------------

    fn begin(&self) -> u64 {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().transition(ticket, RequestState::Loading);
        ticket
    }

    fn fail(&self, ticket: u64, error: DoomError) -> DoomError {
        log::warn!("Request #{} failed: {}", ticket, error);
        self.requests.lock().transition(ticket, RequestState::Failed);
        error
    }

    /// Discard every load request issued so far that has not yet published
    pub fn cancel_pending(&self) {
        let issued = self.next_ticket.load(Ordering::SeqCst);
        let mut requests = self.requests.lock();
        requests.cancelled_through = requests.cancelled_through.max(issued);
        log::debug!("Cancelled pending requests through #{}", issued);
    }

    /// Publish the snapshot `build` makes from the current one, unless a
    /// newer request already published or this one was cancelled
    fn commit(&self, ticket: u64, build: impl FnOnce(&Snapshot) -> Snapshot) -> Result<u64> {
        let mut requests = self.requests.lock();
        requests.transition(ticket, RequestState::Ready);
        if ticket < requests.last_published || ticket <= requests.cancelled_through {
            requests.transition(ticket, RequestState::Superseded);
            log::info!("Request #{} superseded, not published", ticket);
            return Err(DoomError::Superseded);
        }

        requests.transition(ticket, RequestState::Publishing);
        let next = build(&self.publisher.current());
        let published = self.publisher.publish(next);
        requests.last_published = ticket;
        requests.transition(ticket, RequestState::Published);
        drop(requests);

        log::info!(
            "Published snapshot {} (model: {}, ir: {})",
            published.id(),
            published.model_source().unwrap_or("none"),
            published
                .ir_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| if published.ir.is_some() { "samples".into() } else { "none".into() })
        );
        self.collect_garbage();
        Ok(published.id())
    }

    /// Read-modify-write of the published snapshot
    fn update(&self, apply: impl FnOnce(&mut Snapshot)) -> u64 {
        let requests = self.requests.lock();
        let mut next = (*self.publisher.current()).clone();
        apply(&mut next);
        let published = self.publisher.publish(next);
        drop(requests);
        log::debug!("Published snapshot {}", published.id());
        self.collect_garbage();
        published.id()
    }

    // ------------------------------------------------------------------------
    // Resource loading
    // ------------------------------------------------------------------------

    /// Load (or reuse) a model; fresh models start at `amp`
    fn acquire_model(&self, source: &str, amp: &AmpParameters) -> Result<ModelHandle> {
        if let Some(handle) = self.cache.lock().model(source) {
            log::debug!("Model cache hit for {}", source);
            return Ok(handle);
        }

        let handle = self
            .loader
            .load_handle(source)
            .map_err(|e| DoomError::Model {
                path: PathBuf::from(source),
                source: e,
            })?;
        {
            // Not yet shared with anyone
            let mut model = handle.lock();
            model.set_parameters(amp);
            model.reset();
        }
        self.cache.lock().insert_model(source, handle.clone())?;
        Ok(handle)
    }

    fn decode_ir(&self, path: &Path) -> Result<DecodedAudio> {
        decoder_for(&self.decoders, path)?.decode(path)
    }

    /// Decode and prepare (or reuse) an IR file
    fn acquire_ir(&self, path: &Path) -> Result<Arc<PreparedIr>> {
        if let Some(ir) = self.cache.lock().ir(path) {
            log::debug!("IR cache hit for {}", path.display());
            return Ok(ir);
        }

        let decoded = self.decode_ir(path)?;
        let prepared = prepare_ir(&decoded.into_ir_buffer(), &self.ir_options).map_err(|e| {
            DoomError::ImpulseResponse {
                path: path.to_path_buf(),
                source: e,
            }
        })?;
        if prepared.len() < prepared.source_length() {
            log::info!(
                "Trimmed IR {} from {} to {} samples",
                path.display(),
                prepared.source_length(),
                prepared.len()
            );
        }

        let prepared = Arc::new(prepared);
        self.cache.lock().insert_ir(path, Arc::clone(&prepared))?;
        Ok(prepared)
    }

    /// Load a model and publish it with the current parameters
    pub fn load_model(&self, source: &str) -> Result<u64> {
        let ticket = self.begin();
        let amp = self.current().amp;
        let handle = self
            .acquire_model(source, &amp)
            .map_err(|e| self.fail(ticket, e))?;
        self.commit(ticket, |current| {
            let mut next = current.clone();
            next.model = Some(handle);
            next
        })
    }

    /// Decode, prepare and publish an IR file
    pub fn load_impulse_response(&self, path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref();
        let ticket = self.begin();
        let ir = self.acquire_ir(path).map_err(|e| self.fail(ticket, e))?;
        self.commit(ticket, |current| {
            let mut next = current.clone();
            next.ir = Some(ir);
            next.ir_path = Some(path.to_path_buf());
            next
        })
    }

    /// Prepare and publish an IR from raw mono samples
    ///
    /// The result has no file path, so presets saved while it is active do
    /// not reference an IR.
    pub fn load_impulse_response_samples(
        &self,
        samples: &[f32],
        sample_rate: u32,
        max_length: usize,
    ) -> Result<u64> {
        let ticket = self.begin();
        let options = self
            .ir_options
            .with_max_length(max_length.min(self.ir_options.max_length));
        let ir = prepare_ir(&IrBuffer::from_mono(samples.to_vec(), sample_rate), &options)
            .map_err(|e| {
                self.fail(
                    ticket,
                    DoomError::ImpulseResponse {
                        path: PathBuf::new(),
                        source: e,
                    },
                )
            })?;
        let ir = Arc::new(ir);
        self.commit(ticket, |current| {
            let mut next = current.clone();
            next.ir = Some(ir);
            next.ir_path = None;
            next
        })
    }

    fn resolve_preset(&self, path: &Path) -> Result<ResolvedPreset> {
        let preset = self.store.read(path)?;
        let model = preset
            .model_path
            .as_deref()
            .map(|source| self.acquire_model(source, &preset.amp))
            .transpose()?;
        let ir = preset
            .ir_path
            .as_deref()
            .map(|ir_path| self.acquire_ir(ir_path))
            .transpose()?;
        Ok(ResolvedPreset { preset, model, ir })
    }

    /// Load every resource a preset references and publish it as a whole
    pub fn load_preset(&self, path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref();
        let ticket = self.begin();
        let ResolvedPreset { preset, model, ir } =
            self.resolve_preset(path).map_err(|e| self.fail(ticket, e))?;

        log::info!("Applying preset '{}' from {}", preset.name, path.display());
        self.commit(ticket, |_| {
            let mut next = Snapshot::default();
            next.amp = preset.amp.clamped();
            next.model = model;
            next.ir = ir;
            next.ir_path = preset.ir_path.clone();
            next.ir_wet_level = preset.ir_wet_level;
            next.effects = preset.effects.clamped();
            next
        })
    }

    /// Save the published snapshot, keeping an existing preset's metadata
    pub fn save_preset(&self, path: impl AsRef<Path>) -> Result<Preset> {
        let path = path.as_ref();
        let mut preset = if self.store.exists(path) {
            self.store.read(path)?
        } else {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "Untitled".to_string());
            Preset::default_named(name, "User")
        };
        preset.capture(&self.current());
        self.store.write(path, &preset)?;
        log::info!("Saved preset '{}' to {}", preset.name, path.display());
        Ok(preset)
    }

    /// Save the published snapshot under explicit metadata
    pub fn save_preset_as(&self, path: impl AsRef<Path>, template: &Preset) -> Result<Preset> {
        let mut preset = template.clone();
        preset.capture(&self.current());
        preset.validate()?;
        self.store.write(path.as_ref(), &preset)?;
        Ok(preset)
    }

    /// Read and validate a preset without applying it
    pub fn validate_preset(&self, path: impl AsRef<Path>) -> Result<Preset> {
        self.store.read(path.as_ref())
    }

    pub fn available_presets(&self) -> Result<Vec<PresetSummary>> {
        self.store.summaries()
    }

    pub fn presets_by_category(&self, category: &str) -> Result<Vec<PresetSummary>> {
        Ok(self
            .store
            .summaries()?
            .into_iter()
            .filter(|s| s.category.eq_ignore_ascii_case(category))
            .collect())
    }

    /// Presets whose name, tags or description contain `query`
    pub fn search_presets(&self, query: &str) -> Result<Vec<PresetSummary>> {
        Ok(self
            .store
            .summaries()?
            .into_iter()
            .filter(|s| s.matches(query))
            .collect())
    }

    pub fn categories(&self) -> &'static [Category] {
        &DEFAULT_CATEGORIES
    }

    pub fn category_description(&self, category: &str) -> Option<&'static str> {
        preset::category(category).map(|c| c.description)
    }

    /// Suggested tags for a category; empty for unknown categories
    pub fn category_tags(&self, category: &str) -> &'static [&'static str] {
        preset::category(category).map(|c| c.tags).unwrap_or(&[])
    }

    pub fn is_valid_category(&self, category: &str) -> bool {
        preset::is_valid_category(category)
    }

    /// Copy a preset document from disk into the library at `dest`
    ///
    /// The document is migrated and validated first; nothing is written if
    /// either fails.
    pub fn import_preset(&self, source: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<Preset> {
        let (source, dest) = (source.as_ref(), dest.as_ref());
        let preset = Preset::read_file(source)?;
        self.store.write(dest, &preset)?;
        log::info!(
            "Imported preset '{}' from {} as {}",
            preset.name,
            source.display(),
            dest.display()
        );
        Ok(preset)
    }

    /// Write a library preset to a JSON file outside the library
    pub fn export_preset(&self, path: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<Preset> {
        let (path, output) = (path.as_ref(), output.as_ref());
        let preset = self.store.read(path)?;
        preset.write_file(output)?;
        log::info!("Exported preset '{}' to {}", preset.name, output.display());
        Ok(preset)
    }

    // ------------------------------------------------------------------------
    // Parameter setters
    // ------------------------------------------------------------------------

    pub fn amp_parameters(&self) -> AmpParameters {
        self.current().amp
    }

    pub fn set_amp_parameters(&self, params: AmpParameters) -> u64 {
        self.update(|snap| snap.amp = params.clamped())
    }

    pub fn set_amp_gain(&self, gain: f32) -> u64 {
        self.update(|snap| snap.amp.set_gain(gain))
    }

    pub fn set_amp_tone(&self, bass: f32, mid: f32, treble: f32) -> u64 {
        self.update(|snap| {
            snap.amp.set_bass(bass);
            snap.amp.set_mid(mid);
            snap.amp.set_treble(treble);
        })
    }

    /// Convolution wet level, clamped to [0, 1]
    pub fn set_ir_mix(&self, wet: f32) -> u64 {
        let wet = if wet.is_nan() { 0.0 } else { wet.clamp(0.0, 1.0) };
        self.update(|snap| snap.ir_wet_level = wet)
    }

    pub fn effect_parameters(&self) -> EffectParameters {
        self.current().effects
    }

    pub fn set_effect_parameters(&self, effects: EffectParameters) -> u64 {
        self.update(|snap| snap.effects = effects.clamped())
    }

    pub fn set_reverb_level(&self, level: f32) -> u64 {
        self.update(|snap| {
            snap.effects.reverb_level = level;
            snap.effects = snap.effects.clamped();
        })
    }

    pub fn set_delay_level(&self, level: f32) -> u64 {
        self.update(|snap| {
            snap.effects.delay_level = level;
            snap.effects = snap.effects.clamped();
        })
    }

    pub fn set_chorus_level(&self, level: f32) -> u64 {
        self.update(|snap| {
            snap.effects.chorus_level = level;
            snap.effects = snap.effects.clamped();
        })
    }

    /// Remove the model; the amp stage passes audio through
    pub fn clear_model(&self) -> u64 {
        self.update(|snap| snap.model = None)
    }

    /// Remove the IR; the cabinet stage becomes a bypass
    pub fn clear_impulse_response(&self) -> u64 {
        self.update(|snap| {
            snap.ir = None;
            snap.ir_path = None;
        })
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Switch to a new sample rate or block size
    ///
    /// Reloads the active model and IR for the new geometry and publishes
    /// them; on failure nothing changes. Signal chains must be reinitialised
    /// with the same configuration by their owner.
    pub fn reconfigure(&mut self, config: EngineConfig) -> Result<u64> {
        config.validate()?;
        let loader = ModelLoader::with_registry(&config, self.loader.registry().clone());
        let ir_options = IrPrepareOptions::from_config(&config);
        let current = self.current();

        let model = match current.model_source() {
            Some(source) => {
                let handle = loader.load_handle(source).map_err(|e| DoomError::Model {
                    path: PathBuf::from(source),
                    source: e,
                })?;
                {
                    let mut model = handle.lock();
                    model.set_parameters(&current.amp);
                    model.reset();
                }
                Some(handle)
            }
            None => None,
        };
        let ir = match (&current.ir_path, &current.ir) {
            (Some(path), _) => {
                let decoded = self.decode_ir(path)?;
                let prepared = prepare_ir(&decoded.into_ir_buffer(), &ir_options).map_err(|e| {
                    DoomError::ImpulseResponse {
                        path: path.clone(),
                        source: e,
                    }
                })?;
                Some(Arc::new(prepared))
            }
            // Loaded from samples: rebuild from the response the old geometry kept
            (None, Some(old)) => {
                let buffer = IrBuffer::from_mono(old.samples().to_vec(), old.sample_rate());
                let prepared = prepare_ir(&buffer, &ir_options).map_err(|e| {
                    DoomError::ImpulseResponse {
                        path: PathBuf::new(),
                        source: e,
                    }
                })?;
                Some(Arc::new(prepared))
            }
            (None, None) => None,
        };

        log::info!(
            "Reconfigured engine: {} Hz, {} frames",
            config.sample_rate,
            config.block_size
        );
        let mut cache = ResourceCache::new(config.cache);
        if let (Some(source), Some(handle)) = (current.model_source(), &model) {
            cache.insert_model(source, handle.clone())?;
        }
        if let (Some(path), Some(ir)) = (&current.ir_path, &ir) {
            cache.insert_ir(path, Arc::clone(ir))?;
        }

        *self.cache.lock() = cache;
        self.loader = loader;
        self.ir_options = ir_options;
        self.config = config;

        Ok(self.update(|snap| {
            snap.model = model;
            snap.ir = ir;
        }))
    }

    /// Drop cached resources and free whatever the audio path has released
    pub fn shutdown(&self) {
        self.cache.lock().clear();
        let freed = self.collect_garbage();
        log::info!("Controller shut down, freed {} snapshots", freed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::state::preset::FsPresetStore;
    use tempfile::{tempdir, TempDir};

    fn controller() -> (ConfigurationController, TempDir) {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempdir().unwrap();
        let store = FsPresetStore::new(dir.path());
        let controller =
            ConfigurationController::new(EngineConfig::default(), Box::new(store)).unwrap();
        (controller, dir)
    }

    #[test]
    fn test_setters_clamp_and_publish() {
        let (ctl, _dir) = controller();
        let first = ctl.set_amp_gain(2.0);
        assert_eq!(ctl.amp_parameters().gain, 1.0);
        let second = ctl.set_amp_tone(-1.0, 0.3, 7.0);
        assert!(second > first);
        let amp = ctl.amp_parameters();
        assert_eq!((amp.bass, amp.mid, amp.treble), (0.0, 0.3, 1.0));

        ctl.set_ir_mix(1.5);
        ctl.set_reverb_level(0.4);
        assert_eq!(ctl.current().ir_wet_level, 1.0);
        assert_eq!(ctl.effect_parameters().reverb_level, 0.4);
    }

    #[test]
    fn test_failed_model_load_keeps_snapshot() {
        let (ctl, _dir) = controller();
        ctl.load_model("builtin:crunch").unwrap();
        let before = ctl.current();

        let err = ctl.load_model("/no/such/model.nam").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
        assert_eq!(ctl.state(), RequestState::Failed);
        assert_eq!(ctl.current().id(), before.id());
        assert_eq!(ctl.current().model_source(), Some("builtin:crunch"));
    }

    #[test]
    fn test_cancelled_request_is_superseded() {
        let (ctl, _dir) = controller();
        let ticket = ctl.begin();
        ctl.cancel_pending();
        let result = ctl.commit(ticket, |current| current.clone());
        assert!(matches!(result, Err(DoomError::Superseded)));
        assert_eq!(ctl.state(), RequestState::Superseded);
    }

    #[test]
    fn test_older_ticket_loses_to_newer() {
        let (ctl, _dir) = controller();
        let older = ctl.begin();
        let newer = ctl.begin();
        ctl.commit(newer, |current| current.clone()).unwrap();
        assert!(matches!(
            ctl.commit(older, |current| current.clone()),
            Err(DoomError::Superseded)
        ));
    }

    #[test]
    fn test_model_cache_reused() {
        let (ctl, _dir) = controller();
        ctl.load_model("builtin:lead").unwrap();
        let first = ctl.current().model_id();
        ctl.clear_model();
        ctl.load_model("builtin:lead").unwrap();
        assert_eq!(ctl.current().model_id(), first);
    }

    #[test]
    fn test_save_keeps_existing_metadata() {
        let (ctl, _dir) = controller();
        let mut template = Preset::default_named("Keeper", "Lead");
        template.tags = vec!["solo".to_string()];
        ctl.save_preset_as("keeper", &template).unwrap();

        ctl.set_amp_gain(0.9);
        let saved = ctl.save_preset("keeper").unwrap();
        assert_eq!(saved.id, template.id);
        assert_eq!(saved.tags, vec!["solo"]);
        assert_eq!(saved.amp.gain, 0.9);
    }

    #[test]
    fn test_library_queries() {
        let (ctl, _dir) = controller();
        let mut a = Preset::default_named("Twin Clean", "Clean");
        a.tags = vec!["sparkle".to_string()];
        ctl.save_preset_as("twin", &a).unwrap();
        ctl.save_preset_as("wall", &Preset::default_named("Wall", "Metal"))
            .unwrap();

        assert_eq!(ctl.available_presets().unwrap().len(), 2);
        assert_eq!(ctl.presets_by_category("metal").unwrap().len(), 1);
        let found = ctl.search_presets("SPARK").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Twin Clean");
        assert!(ctl.categories().iter().any(|c| c.name == "Ambient"));
    }

    #[test]
    fn test_samples_ir_published_without_path() {
        let (ctl, _dir) = controller();
        ctl.load_impulse_response_samples(&[1.0, 0.5, 0.25], 48000, 8192)
            .unwrap();
        let snap = ctl.current();
        assert!(snap.ir.is_some());
        assert!(snap.ir_path.is_none());

        assert!(ctl.load_impulse_response_samples(&[], 48000, 8192).is_err());
        assert_eq!(ctl.current().id(), snap.id());
        ctl.clear_impulse_response();
        assert!(ctl.current().ir.is_none());
    }

    #[test]
    fn test_reconfigure_reloads_model() {
        let (mut ctl, _dir) = controller();
        ctl.load_model("builtin:metal").unwrap();
        let old = ctl.current().model_id();
        let config = EngineConfig {
            sample_rate: 44100,
            block_size: 256,
            ..Default::default()
        };
        ctl.reconfigure(config).unwrap();
        assert_eq!(ctl.config().block_size, 256);
        let snap = ctl.current();
        assert_eq!(snap.model_source(), Some("builtin:metal"));
        assert_ne!(snap.model_id(), old);
        assert_eq!(snap.model.as_ref().map(|m| m.info().sample_rate), Some(44100.0));
    }

    #[test]
    fn test_category_metadata() {
        let (ctl, _dir) = controller();
        assert!(ctl.is_valid_category("CLEAN"));
        assert!(!ctl.is_valid_category("Polka"));
        assert!(ctl.category_description("Lead").is_some());
        assert!(ctl.category_tags("Metal").contains(&"djent"));
        assert!(ctl.category_tags("Polka").is_empty());
    }

    #[test]
    fn test_import_migrates_into_library() {
        let (ctl, dir) = controller();
        let mut legacy: serde_json::Value =
            serde_json::from_str(&Preset::default_named("Old Friend", "Crunch").to_json().unwrap())
                .unwrap();
        legacy["schema_version"] = "1.0.0".into();
        legacy["tags"] = "plexi, cranked".into();
        let outside = tempdir().unwrap();
        let source = outside.path().join("old.json");
        std::fs::write(&source, legacy.to_string()).unwrap();

        let imported = ctl.import_preset(&source, "imported/old").unwrap();
        assert_eq!(imported.tags, vec!["plexi", "cranked"]);
        assert_eq!(ctl.validate_preset("imported/old").unwrap(), imported);
        assert!(dir.path().join("imported/old.json").is_file());
        assert_eq!(ctl.search_presets("plexi").unwrap().len(), 1);
    }

    #[test]
    fn test_import_rejects_invalid_document() {
        let (ctl, _dir) = controller();
        let mut bad = Preset::default_named("Loud", "Lead");
        bad.amp.gain = 3.0;
        let outside = tempdir().unwrap();
        let source = outside.path().join("loud.json");
        std::fs::write(&source, bad.to_json().unwrap()).unwrap();

        let err = ctl.import_preset(&source, "loud").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(ctl.available_presets().unwrap().is_empty());
    }

    #[test]
    fn test_export_round_trips() {
        let (ctl, _dir) = controller();
        ctl.set_amp_gain(0.7);
        let saved = ctl.save_preset("mine").unwrap();
        let outside = tempdir().unwrap();
        let output = outside.path().join("share.json");

        ctl.export_preset("mine", &output).unwrap();
        assert_eq!(Preset::read_file(&output).unwrap(), saved);
        assert!(ctl
            .export_preset("mine", outside.path().join("share.xml"))
            .is_err());
    }

    #[test]
    fn test_reconfigure_keeps_samples_ir() {
        let (mut ctl, _dir) = controller();
        ctl.load_impulse_response_samples(&[1.0, 0.5, 0.25], 48000, 8192)
            .unwrap();
        let config = EngineConfig {
            block_size: 256,
            ..Default::default()
        };
        ctl.reconfigure(config).unwrap();

        let snap = ctl.current();
        let ir = snap.ir.as_ref().expect("cabinet survives reconfigure");
        assert_eq!(ir.partition_size(), 256);
        assert_eq!(ir.len(), 3);
        assert!(snap.ir_path.is_none());
    }

    #[test]
    fn test_unsupported_ir_extension_is_format_error() {
        let (ctl, dir) = controller();
        let path = dir.path().join("cab.mp3");
        std::fs::write(&path, b"ID3").unwrap();
        let before = ctl.current().id();
        let err = ctl.load_impulse_response(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert_eq!(ctl.current().id(), before);
    }
}
