//! Shared cache of loaded models and prepared impulse responses
//!
//! Keyed by source path. An entry stays valid while the file's modification
//! time is unchanged. Entries that no snapshot references any more are
//! evicted when room is needed.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::amp::ModelHandle;
use crate::config::CacheLimits;
use crate::convolution::PreparedIr;
use crate::error::{DoomError, Result};

#[derive(Debug)]
struct Entry<T> {
    value: T,
    modified: Option<SystemTime>,
}

/// Modification time of a file, `None` for built-ins and unreadable paths
fn modified_time(source: &str) -> Option<SystemTime> {
    fs::metadata(source).and_then(|m| m.modified()).ok()
}

/// Cache of shared resources, owned by the controller
#[derive(Debug)]
pub struct ResourceCache {
    limits: CacheLimits,
    models: HashMap<String, Entry<ModelHandle>>,
    irs: HashMap<PathBuf, Entry<Arc<PreparedIr>>>,
}

impl ResourceCache {
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            limits,
            models: HashMap::new(),
            irs: HashMap::new(),
        }
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    /// Cached model for `source`, if still current
    pub fn model(&self, source: &str) -> Option<ModelHandle> {
        let entry = self.models.get(source)?;
        (entry.modified == modified_time(source)).then(|| entry.value.clone())
    }

    pub fn insert_model(&mut self, source: &str, handle: ModelHandle) -> Result<()> {
        self.models.remove(source);
        if self.models.len() >= self.limits.max_models {
            self.evict_unused();
        }
        if self.models.len() >= self.limits.max_models {
            return Err(DoomError::ResourceExhausted {
                resource: "model cache".to_string(),
                limit: self.limits.max_models,
            });
        }
        self.models.insert(
            source.to_string(),
            Entry {
                value: handle,
                modified: modified_time(source),
            },
        );
        Ok(())
    }

    /// Cached IR for `path`, if still current
    pub fn ir(&self, path: &Path) -> Option<Arc<PreparedIr>> {
        let entry = self.irs.get(path)?;
        let modified = fs::metadata(path).and_then(|m| m.modified()).ok();
        (entry.modified == modified).then(|| Arc::clone(&entry.value))
    }

    pub fn insert_ir(&mut self, path: &Path, ir: Arc<PreparedIr>) -> Result<()> {
        self.irs.remove(path);
        let needed = ir.footprint_samples();
        if self.ir_footprint() + needed > self.limits.max_ir_samples {
            self.evict_unused();
        }
        if self.ir_footprint() + needed > self.limits.max_ir_samples {
            return Err(DoomError::ResourceExhausted {
                resource: "impulse response cache".to_string(),
                limit: self.limits.max_ir_samples,
            });
        }
        self.irs.insert(
            path.to_path_buf(),
            Entry {
                value: ir,
                modified: fs::metadata(path).and_then(|m| m.modified()).ok(),
            },
        );
        Ok(())
    }

    /// Total IR footprint in samples
    pub fn ir_footprint(&self) -> usize {
        self.irs.values().map(|e| e.value.footprint_samples()).sum()
    }

    /// Drop entries only the cache still holds; returns how many went
    pub fn evict_unused(&mut self) -> usize {
        let before = self.models.len() + self.irs.len();
        self.models.retain(|_, e| e.value.strong_count() > 1);
        self.irs.retain(|_, e| Arc::strong_count(&e.value) > 1);
        let evicted = before - self.models.len() - self.irs.len();
        if evicted > 0 {
            log::debug!("Evicted {} unused cached resources", evicted);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.models.len() + self.irs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything; live snapshots keep their own references
    pub fn clear(&mut self) {
        self.models.clear();
        self.irs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amp::ModelLoader;
    use crate::config::EngineConfig;
    use crate::convolution::{prepare_ir, IrBuffer, IrPrepareOptions};

    fn handle(source: &str) -> ModelHandle {
        ModelLoader::new(&EngineConfig::default())
            .load_handle(source)
            .unwrap()
    }

    fn ir(len: usize) -> Arc<PreparedIr> {
        let options = IrPrepareOptions::from_config(&EngineConfig::default());
        Arc::new(prepare_ir(&IrBuffer::from_mono(vec![0.5; len], 48000), &options).unwrap())
    }

    #[test]
    fn test_model_hit_returns_same_handle() {
        let mut cache = ResourceCache::new(CacheLimits::default());
        let h = handle("builtin:clean");
        cache.insert_model("builtin:clean", h.clone()).unwrap();
        let hit = cache.model("builtin:clean").unwrap();
        assert!(hit.ptr_eq(&h));
        assert!(cache.model("builtin:lead").is_none());
    }

    #[test]
    fn test_full_cache_evicts_unused() {
        let limits = CacheLimits {
            max_models: 2,
            ..Default::default()
        };
        let mut cache = ResourceCache::new(limits);
        cache.insert_model("builtin:clean", handle("builtin:clean")).unwrap();
        cache.insert_model("builtin:crunch", handle("builtin:crunch")).unwrap();
        // Neither is referenced elsewhere, so both make room
        cache.insert_model("builtin:lead", handle("builtin:lead")).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_full_of_live_entries_is_exhausted() {
        let limits = CacheLimits {
            max_models: 1,
            ..Default::default()
        };
        let mut cache = ResourceCache::new(limits);
        let live = handle("builtin:clean");
        cache.insert_model("builtin:clean", live.clone()).unwrap();
        let err = cache
            .insert_model("builtin:metal", handle("builtin:metal"))
            .unwrap_err();
        assert!(matches!(err, DoomError::ResourceExhausted { limit: 1, .. }));
        drop(live);
        assert!(cache.insert_model("builtin:metal", handle("builtin:metal")).is_ok());
    }

    #[test]
    fn test_ir_budget() {
        let one = ir(256);
        let limits = CacheLimits {
            max_ir_samples: one.footprint_samples(),
            ..Default::default()
        };
        let mut cache = ResourceCache::new(limits);
        let held = Arc::clone(&one);
        cache.insert_ir(Path::new("/irs/a.wav"), one).unwrap();
        assert!(cache.insert_ir(Path::new("/irs/b.wav"), ir(256)).is_err());
        drop(held);
        assert!(cache.insert_ir(Path::new("/irs/b.wav"), ir(256)).is_ok());
        cache.clear();
        assert!(cache.is_empty());
    }
}
