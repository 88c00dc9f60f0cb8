//! Schema migration support for preset documents.
//!
//! Presets written by older releases are upgraded to the current schema on
//! load. Migrations are applied sequentially, so a document can jump several
//! versions in one read.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{DoomError, Result};

/// Current schema version for preset documents.
pub const CURRENT_SCHEMA_VERSION: &str = "1.1.0";

/// Version assumed for documents without a `schema_version` field.
const LEGACY_SCHEMA_VERSION: &str = "1.0.0";

/// Takes a preset JSON value and returns the migrated value.
type MigrationFn = fn(Value) -> Result<Value>;

/// Maps (from_version, to_version) to the migration between them.
fn get_migration_registry() -> HashMap<(&'static str, &'static str), MigrationFn> {
    let mut registry: HashMap<(&'static str, &'static str), MigrationFn> = HashMap::new();
    registry.insert(("1.0.0", "1.1.0"), migrate_1_0_0_to_1_1_0);
    registry
}

/// All known schema versions in order.
fn get_version_order() -> &'static [&'static str] {
    &["1.0.0", "1.1.0"]
}

/// Upgrade a preset document to [`CURRENT_SCHEMA_VERSION`].
///
/// # Errors
/// `InvalidSchemaVersion` for versions this release has never heard of,
/// `Migration` for documents newer than this release or a failed step.
pub fn migrate_preset(mut data: Value) -> Result<Value> {
    let current_version = data
        .get("schema_version")
        .and_then(|v| v.as_str())
        .unwrap_or(LEGACY_SCHEMA_VERSION)
        .to_string();
    let target_version = CURRENT_SCHEMA_VERSION;

    if current_version == target_version {
        return Ok(data);
    }

    let known_versions = get_version_order();
    let Some(current_idx) = known_versions.iter().position(|&v| v == current_version) else {
        return Err(DoomError::InvalidSchemaVersion {
            version: current_version,
        });
    };
    let target_idx = known_versions
        .iter()
        .position(|&v| v == target_version)
        .unwrap_or(known_versions.len() - 1);

    if current_idx > target_idx {
        return Err(DoomError::Migration {
            from: current_version,
            to: target_version.to_string(),
            reason: "Cannot downgrade preset from newer schema version".to_string(),
        });
    }

    let path = find_migration_path(&current_version, target_version);
    if path.is_empty() {
        return Err(DoomError::Migration {
            from: current_version,
            to: target_version.to_string(),
            reason: "No migration path found".to_string(),
        });
    }

    let registry = get_migration_registry();
    for (from, to) in path {
        let migration_fn = registry.get(&(from, to)).ok_or_else(|| DoomError::Migration {
            from: from.to_string(),
            to: to.to_string(),
            reason: "Migration function not found in registry".to_string(),
        })?;

        data = migration_fn(data).map_err(|e| DoomError::Migration {
            from: from.to_string(),
            to: to.to_string(),
            reason: format!("Migration failed: {}", e),
        })?;

        if let Some(obj) = data.as_object_mut() {
            obj.insert("schema_version".to_string(), Value::String(to.to_string()));
        }
        log::debug!("Migrated preset schema {} -> {}", from, to);
    }

    Ok(data)
}

/// Sequence of registered migrations leading from `from` to `to`.
///
/// Empty when the versions are equal, unknown, or only reachable backwards.
pub fn find_migration_path(from: &str, to: &str) -> Vec<(&'static str, &'static str)> {
    let versions = get_version_order();
    let registry = get_migration_registry();

    let (Some(from_idx), Some(to_idx)) = (
        versions.iter().position(|&v| v == from),
        versions.iter().position(|&v| v == to),
    ) else {
        return Vec::new();
    };
    if from_idx >= to_idx {
        return Vec::new();
    }

    let mut path = Vec::new();
    let mut current_idx = from_idx;
    while current_idx < to_idx {
        let current = versions[current_idx];
        let next = ((current_idx + 1)..=to_idx)
            .find(|&next_idx| registry.contains_key(&(current, versions[next_idx])));
        match next {
            Some(next_idx) => {
                path.push((current, versions[next_idx]));
                current_idx = next_idx;
            }
            None => return Vec::new(),
        }
    }
    path
}

// ============================================================================
// Migration Functions
// ============================================================================

/// 1.0.0 stored tags as one comma-separated string; 1.1.0 stores a list.
fn migrate_1_0_0_to_1_1_0(mut data: Value) -> Result<Value> {
    let Some(obj) = data.as_object_mut() else {
        return Err(DoomError::Format {
            reason: "preset document is not an object".to_string(),
        });
    };

    let tags = match obj.remove("tags") {
        Some(Value::String(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| Value::String(t.to_string()))
            .collect(),
        Some(Value::Array(list)) => list,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(DoomError::Format {
                reason: format!("unexpected tags value: {}", other),
            })
        }
    };
    obj.insert("tags".to_string(), Value::Array(tags));
    Ok(data)
}
