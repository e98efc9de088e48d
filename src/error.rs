//! Error taxonomy for calibration, lifecycle and checkpoint I/O

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur anywhere in the detector core
#[derive(Error, Debug)]
pub enum AnoDetError {
    #[error("No threshold satisfies the {policy} policy (bound {bound})")]
    ThresholdNotFound { policy: &'static str, bound: f64 },

    #[error("Missing configuration: set params.{0}")]
    MissingConfiguration(&'static str),

    #[error("Failed to load model weights from {}: {reason}", path.display())]
    ModelLoadError { path: PathBuf, reason: String },

    #[error("Malformed ROC curve: {0}")]
    RocInvariant(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Lifecycle violation: expected {expected}, detector is {actual}")]
    Lifecycle {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Failed to write TOML: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, AnoDetError>;

impl AnoDetError {
    /// Shorthand for a weight-loading failure without an on-disk path
    pub fn model_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ModelLoadError {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
