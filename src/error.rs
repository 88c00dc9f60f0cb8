//! Error handling for Doomloader
//!
//! Control-path operations return these errors; the audio path never does.
//! Every error maps onto one of the five taxonomy kinds via [`DoomError::kind`].

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Doomloader control-path operations
pub type Result<T> = std::result::Result<T, DoomError>;

/// Coarse error taxonomy surfaced to callers for user-visible reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Resource missing or unreadable
    Io,
    /// Header or parse failure
    Format,
    /// Resource sample rate does not match the engine
    SampleRateMismatch,
    /// Cache or memory limits reached
    ResourceExhausted,
    /// Malformed preset or configuration fields
    Validation,
    /// Request discarded because a newer one took effect
    Superseded,
}

/// Failure while loading an amp model
#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("Invalid model format: {reason}")]
    InvalidFormat { reason: String },

    #[error("Model sample rate {model_rate} Hz does not match engine rate {engine_rate} Hz")]
    SampleRateMismatch { model_rate: f64, engine_rate: f64 },

    #[error("Failed to read model {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No inference backend for architecture '{architecture}'")]
    UnsupportedArchitecture { architecture: String },
}

/// Failure while preparing an impulse response
#[derive(Error, Debug)]
pub enum IrLoadError {
    #[error("Impulse response contains no samples")]
    Empty,

    #[error("Impulse response is silent after trimming")]
    Silent,

    #[error("Invalid impulse response sample rate: {sample_rate}")]
    InvalidSampleRate { sample_rate: f64 },

    #[error("Impulse response resampling failed: {reason}")]
    Resample { reason: String },

    #[error("Impulse response needs {partitions} partitions, engine supports {max_partitions}")]
    TooLong {
        partitions: usize,
        max_partitions: usize,
    },

    #[error("Impulse response partitioned for {found}-sample blocks, engine uses {expected}")]
    PartitionMismatch { expected: usize, found: usize },
}

/// Main error type for Doomloader control-path operations
#[derive(Error, Debug)]
pub enum DoomError {
    // File Errors
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Format error: {reason}")]
    Format { reason: String },

    #[error("Sample rate mismatch: resource {resource_rate} Hz, engine {engine_rate} Hz")]
    SampleRateMismatch {
        resource_rate: f64,
        engine_rate: f64,
    },

    // Resource Errors
    #[error("Resource exhausted: {resource} (limit {limit})")]
    ResourceExhausted { resource: String, limit: usize },

    // Validation Errors
    #[error("Invalid field '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("Invalid engine configuration: {reason}")]
    InvalidConfig { reason: String },

    // Resource load failures
    #[error("Failed to load model {path}: {source}")]
    Model {
        path: PathBuf,
        #[source]
        source: ModelLoadError,
    },

    #[error("Failed to load impulse response {path}: {source}")]
    ImpulseResponse {
        path: PathBuf,
        #[source]
        source: IrLoadError,
    },

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid preset schema version: {version}")]
    InvalidSchemaVersion { version: String },

    #[error("Migration failed from {from} to {to}: {reason}")]
    Migration {
        from: String,
        to: String,
        reason: String,
    },

    // Control flow
    #[error("Request superseded by a newer configuration")]
    Superseded,
}

impl DoomError {
    /// Map this error onto the coarse taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            DoomError::Io { .. } => ErrorKind::Io,
            DoomError::Format { .. }
            | DoomError::Serialization(_)
            | DoomError::InvalidSchemaVersion { .. }
            | DoomError::Migration { .. } => ErrorKind::Format,
            DoomError::SampleRateMismatch { .. } => ErrorKind::SampleRateMismatch,
            DoomError::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            DoomError::Validation { .. } | DoomError::InvalidConfig { .. } => {
                ErrorKind::Validation
            }
            DoomError::Model { source, .. } => match source {
                ModelLoadError::Io { .. } => ErrorKind::Io,
                ModelLoadError::SampleRateMismatch { .. } => ErrorKind::SampleRateMismatch,
                ModelLoadError::InvalidFormat { .. }
                | ModelLoadError::UnsupportedArchitecture { .. } => ErrorKind::Format,
            },
            DoomError::ImpulseResponse { source, .. } => match source {
                IrLoadError::TooLong { .. } => ErrorKind::ResourceExhausted,
                IrLoadError::InvalidSampleRate { .. } | IrLoadError::Resample { .. } => {
                    ErrorKind::SampleRateMismatch
                }
                IrLoadError::Empty | IrLoadError::Silent | IrLoadError::PartitionMismatch { .. } => {
                    ErrorKind::Format
                }
            },
            DoomError::Superseded => ErrorKind::Superseded,
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            DoomError::Io { .. } => "IO_ERROR",
            DoomError::Format { .. } => "FORMAT_ERROR",
            DoomError::SampleRateMismatch { .. } => "SAMPLE_RATE_MISMATCH",
            DoomError::ResourceExhausted { .. } => "RESOURCE_EXHAUSTED",
            DoomError::Validation { .. } => "VALIDATION_ERROR",
            DoomError::InvalidConfig { .. } => "INVALID_CONFIG",
            DoomError::Model { .. } => "MODEL_LOAD_FAILED",
            DoomError::ImpulseResponse { .. } => "IR_LOAD_FAILED",
            DoomError::Serialization(_) => "SERIALIZATION_ERROR",
            DoomError::InvalidSchemaVersion { .. } => "INVALID_SCHEMA_VERSION",
            DoomError::Migration { .. } => "MIGRATION_ERROR",
            DoomError::Superseded => "SUPERSEDED",
        }
    }

    /// Get a user-facing recovery suggestion, if one applies
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self.kind() {
            ErrorKind::Io => Some("Check that the file exists and is readable."),
            ErrorKind::Format => Some("The file may be corrupted or in an unsupported format."),
            ErrorKind::SampleRateMismatch => {
                Some("Use a model captured at the engine sample rate, or change the engine rate.")
            }
            ErrorKind::ResourceExhausted => {
                Some("Unload unused models or impulse responses, or raise the cache limits.")
            }
            ErrorKind::Validation => Some("Fix the reported field and try again."),
            ErrorKind::Superseded => None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DoomError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn validation(field: &str, reason: impl Into<String>) -> Self {
        DoomError::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = DoomError::Validation {
            field: "gain".to_string(),
            reason: "not finite".to_string(),
        };
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_model_errors_map_to_taxonomy() {
        let err = DoomError::Model {
            path: PathBuf::from("amp.nam"),
            source: ModelLoadError::SampleRateMismatch {
                model_rate: 44100.0,
                engine_rate: 48000.0,
            },
        };
        assert_eq!(err.kind(), ErrorKind::SampleRateMismatch);

        let err = DoomError::Model {
            path: PathBuf::from("amp.nam"),
            source: ModelLoadError::InvalidFormat {
                reason: "missing weights".to_string(),
            },
        };
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_recovery_suggestions() {
        let err = DoomError::ResourceExhausted {
            resource: "model cache".to_string(),
            limit: 8,
        };
        assert!(err.recovery_suggestion().is_some());
        assert!(DoomError::Superseded.recovery_suggestion().is_none());
    }
}
