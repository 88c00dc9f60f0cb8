//! Preset documents and their storage
//!
//! A preset is the durable form of a snapshot: parameter blocks plus the
//! paths of the model and IR it references, with library metadata. Documents
//! are JSON and pass through schema migration on every read.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::amp::AmpParameters;
use crate::error::{DoomError, Result};
use crate::state::migration::{migrate_preset, CURRENT_SCHEMA_VERSION};
use crate::state::snapshot::{EffectParameters, Snapshot};

/// File extension of preset documents
pub const PRESET_EXTENSION: &str = "json";

/// A library category with its description and suggested tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Category {
    pub name: &'static str,
    pub description: &'static str,
    pub tags: &'static [&'static str],
}

/// Categories offered by default
pub const DEFAULT_CATEGORIES: [Category; 6] = [
    Category {
        name: "Clean",
        description: "Little or no breakup, full dynamics",
        tags: &["clean", "jazz", "funk", "country"],
    },
    Category {
        name: "Crunch",
        description: "Edge-of-breakup to classic rock overdrive",
        tags: &["crunch", "blues", "rock", "vintage"],
    },
    Category {
        name: "Lead",
        description: "Saturated, sustaining tones for solos",
        tags: &["lead", "solo", "sustain", "smooth"],
    },
    Category {
        name: "Metal",
        description: "High gain, tight low end and scooped mids",
        tags: &["metal", "high gain", "djent", "chug"],
    },
    Category {
        name: "Ambient",
        description: "Washes of modulation, delay and reverb",
        tags: &["ambient", "pad", "shimmer", "post-rock"],
    },
    Category {
        name: "User",
        description: "Your own presets",
        tags: &["user", "custom"],
    },
];

/// Default category named `name`, compared case-insensitively
pub fn category(name: &str) -> Option<&'static Category> {
    let name = name.trim();
    DEFAULT_CATEGORIES
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
}

pub fn is_valid_category(name: &str) -> bool {
    category(name).is_some()
}

/// Case-insensitive match of `query` against name, description or any tag;
/// an empty query matches everything
fn matches_query(query: &str, name: &str, description: &str, tags: &[String]) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    name.to_lowercase().contains(&query)
        || description.to_lowercase().contains(&query)
        || tags.iter().any(|t| t.to_lowercase().contains(&query))
}

/// Write `content` beside `path`, then rename it over the target
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| DoomError::io(parent, e))?;
    }
    let tmp = path.with_extension(format!("{}.tmp", PRESET_EXTENSION));
    fs::write(&tmp, content).map_err(|e| DoomError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| DoomError::io(path, e))?;
    Ok(())
}

/// Durable, named representation of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// `builtin:<name>` or a model file path
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default)]
    pub ir_path: Option<PathBuf>,
    #[serde(default)]
    pub amp: AmpParameters,
    #[serde(default = "default_wet_level")]
    pub ir_wet_level: f32,
    #[serde(default)]
    pub effects: EffectParameters,
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

fn default_category() -> String {
    "User".to_string()
}

fn default_wet_level() -> f32 {
    1.0
}

impl Preset {
    /// Empty preset with default parameters
    pub fn default_named(name: impl Into<String>, category: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            author: String::new(),
            category: category.into(),
            tags: Vec::new(),
            model_path: None,
            ir_path: None,
            amp: AmpParameters::default(),
            ir_wet_level: default_wet_level(),
            effects: EffectParameters::default(),
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            created_at: now,
            modified_at: now,
        }
    }

    /// Copy the snapshot's parameters and resource paths into this preset
    pub fn capture(&mut self, snapshot: &Snapshot) {
        self.amp = snapshot.amp;
        self.effects = snapshot.effects;
        self.ir_wet_level = snapshot.ir_wet_level;
        self.model_path = snapshot.model_source().map(str::to_string);
        self.ir_path = snapshot.ir_path.clone();
        self.schema_version = CURRENT_SCHEMA_VERSION.to_string();
        self.modified_at = Utc::now();
    }

    /// Parse, migrate and validate a document
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        let value = migrate_preset(value)?;
        let preset: Preset = serde_json::from_value(value)?;
        preset.validate()?;
        Ok(preset)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read a document from anywhere on disk, outside any store
    pub fn read_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| DoomError::io(path, e))?;
        Self::from_json(&content)
    }

    /// Write the document to `path`; only JSON output is supported
    pub fn write_file(&self, path: &Path) -> Result<()> {
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case(PRESET_EXTENSION))
            .unwrap_or(false);
        if !is_json {
            return Err(DoomError::Format {
                reason: format!("{}: presets export as .{} only", path.display(), PRESET_EXTENSION),
            });
        }
        write_atomic(path, &self.to_json()?)
    }

    /// Check every field a snapshot would be built from
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DoomError::validation("name", "must not be empty"));
        }
        if self.category.trim().is_empty() {
            return Err(DoomError::validation("category", "must not be empty"));
        }
        if let Some(model) = &self.model_path {
            if model.trim().is_empty() {
                return Err(DoomError::validation("model_path", "must not be empty"));
            }
        }
        if !self.ir_wet_level.is_finite() || !(0.0..=1.0).contains(&self.ir_wet_level) {
            return Err(DoomError::validation(
                "ir_wet_level",
                format!("{} is outside 0.0 to 1.0", self.ir_wet_level),
            ));
        }
        self.amp.validate()?;
        self.effects.validate()?;
        Ok(())
    }

    /// Case-insensitive match on name, tags or description
    pub fn matches(&self, query: &str) -> bool {
        matches_query(query, &self.name, &self.description, &self.tags)
    }
}

/// Listing entry for the preset library
#[derive(Debug, Clone, PartialEq)]
pub struct PresetSummary {
    pub path: PathBuf,
    pub name: String,
    pub category: String,
    pub tags: Vec<String>,
    pub description: String,
}

impl PresetSummary {
    fn new(path: PathBuf, preset: &Preset) -> Self {
        Self {
            path,
            name: preset.name.clone(),
            category: preset.category.clone(),
            tags: preset.tags.clone(),
            description: preset.description.clone(),
        }
    }

    /// Same match as [`Preset::matches`]
    pub fn matches(&self, query: &str) -> bool {
        matches_query(query, &self.name, &self.description, &self.tags)
    }
}

/// Durable storage for preset documents
pub trait PresetStore: Send + Sync {
    fn read(&self, path: &Path) -> Result<Preset>;

    fn write(&self, path: &Path, preset: &Preset) -> Result<()>;

    fn exists(&self, path: &Path) -> bool;

    /// Every preset document the store knows about
    fn list(&self) -> Result<Vec<PathBuf>>;

    /// Read every listed preset, skipping unreadable ones
    fn summaries(&self) -> Result<Vec<PresetSummary>> {
        let mut summaries: Vec<PresetSummary> = self
            .list()?
            .into_iter()
            .filter_map(|path| match self.read(&path) {
                Ok(preset) => Some(PresetSummary::new(path, &preset)),
                Err(e) => {
                    log::warn!("Skipping preset {}: {}", path.display(), e);
                    None
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(summaries)
    }
}

/// Presets stored as JSON files under a root directory
#[derive(Debug, Clone)]
pub struct FsPresetStore {
    root: PathBuf,
}

impl FsPresetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative paths resolve under the root; a missing extension becomes `.json`
    pub fn resolve(&self, path: &Path) -> PathBuf {
        let mut full = self.root.join(path);
        if full.extension().is_none() {
            full.set_extension(PRESET_EXTENSION);
        }
        full
    }
}

impl PresetStore for FsPresetStore {
    fn read(&self, path: &Path) -> Result<Preset> {
        let full = self.resolve(path);
        let content = fs::read_to_string(&full).map_err(|e| DoomError::io(&full, e))?;
        Preset::from_json(&content)
    }

    fn write(&self, path: &Path, preset: &Preset) -> Result<()> {
        write_atomic(&self.resolve(path), &preset.to_json()?)
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).is_file()
    }

    fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut presets: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case(PRESET_EXTENSION))
                    .unwrap_or(false)
            })
            .map(|entry| entry.path().to_path_buf())
            .collect();
        presets.sort();
        Ok(presets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn test_json_round_trip() {
        let mut preset = Preset::default_named("Brown Sound", "Crunch");
        preset.tags = vec!["rock".to_string(), "80s".to_string()];
        preset.model_path = Some("builtin:crunch".to_string());
        preset.amp.set_gain(0.8);
        preset.effects.reverb_level = 0.2;

        let parsed = Preset::from_json(&preset.to_json().unwrap()).unwrap();
        assert_eq!(parsed, preset);
    }

    #[test]
    fn test_legacy_document_migrates() {
        let json = r#"{
            "id": "6f1c1f64-3a8e-4a36-9df4-2bf0b6c1a111",
            "name": "Legacy",
            "category": "Metal",
            "tags": "chug, tight",
            "schema_version": "1.0.0",
            "created_at": "2024-01-01T00:00:00Z",
            "modified_at": "2024-01-01T00:00:00Z"
        }"#;
        let preset = Preset::from_json(json).unwrap();
        assert_eq!(preset.tags, vec!["chug", "tight"]);
        assert_eq!(preset.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(preset.amp, AmpParameters::default());
        assert_eq!(preset.ir_wet_level, 1.0);
    }

    #[test]
    fn test_out_of_range_fields_rejected() {
        let mut preset = Preset::default_named("Hot", "Lead");
        preset.amp.gain = 1.5;
        let err = Preset::from_json(&preset.to_json().unwrap()).unwrap_err();
        assert!(matches!(err, DoomError::Validation { .. }));

        let mut preset = Preset::default_named("Wet", "Lead");
        preset.ir_wet_level = -0.1;
        assert!(preset.validate().is_err());
    }

    #[test]
    fn test_search_matches_name_tags_description() {
        let mut preset = Preset::default_named("Glass Cleaner", "Clean");
        preset.tags = vec!["Jazz".to_string()];
        preset.description = "Sparkly chime".to_string();
        assert!(preset.matches("glass"));
        assert!(preset.matches("JAZZ"));
        assert!(preset.matches("chime"));
        assert!(!preset.matches("djent"));
    }

    #[test]
    fn test_fs_store_write_read_list() {
        let dir = tempdir().unwrap();
        let store = FsPresetStore::new(dir.path());

        let a = Preset::default_named("Alpha", "Clean");
        let b = Preset::default_named("Beta", "Metal");
        store.write(Path::new("alpha"), &a).unwrap();
        store.write(Path::new("metal/beta.json"), &b).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        assert!(store.exists(Path::new("alpha")));
        assert_eq!(store.read(Path::new("alpha.json")).unwrap(), a);
        assert_eq!(store.list().unwrap().len(), 2);

        let summaries = store.summaries().unwrap();
        let names: Vec<&str> = summaries.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Beta"]);
        assert!(!dir.path().join("alpha.json.tmp").exists());
    }

    #[test]
    fn test_summary_matches_like_preset() {
        let mut preset = Preset::default_named("Glass Cleaner", "Clean");
        preset.tags = vec!["Jazz".to_string()];
        let summary = PresetSummary::new(PathBuf::from("glass.json"), &preset);
        for query in ["glass", "JAZZ", "", "djent"] {
            assert_eq!(summary.matches(query), preset.matches(query), "{}", query);
        }
    }

    #[test]
    fn test_category_lookup() {
        let metal = category("metal").unwrap();
        assert_eq!(metal.name, "Metal");
        assert!(metal.tags.contains(&"high gain"));
        assert!(!metal.description.is_empty());
        assert!(is_valid_category(" Ambient "));
        assert!(!is_valid_category("Polka"));
        assert!(DEFAULT_CATEGORIES.iter().all(|c| !c.tags.is_empty()));
    }

    #[test]
    fn test_file_export_json_only() {
        let dir = tempdir().unwrap();
        let preset = Preset::default_named("Out", "User");

        let path = dir.path().join("shared/out.json");
        preset.write_file(&path).unwrap();
        assert_eq!(Preset::read_file(&path).unwrap(), preset);
        assert!(!dir.path().join("shared/out.json.tmp").exists());

        let err = preset.write_file(&dir.path().join("out.xml")).unwrap_err();
        assert!(matches!(err, DoomError::Format { .. }));
    }

    #[test]
    fn test_missing_preset_is_io_error() {
        let dir = tempdir().unwrap();
        let store = FsPresetStore::new(dir.path());
        assert!(matches!(
            store.read(Path::new("nope")),
            Err(DoomError::Io { .. })
        ));
    }
}
