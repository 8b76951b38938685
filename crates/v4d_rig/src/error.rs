//! Error types for rig procedures.

use thiserror::Error;

/// Result type alias for rig operations.
pub type RigResult<T> = Result<T, RigError>;

/// Errors that can occur while driving rig procedures.
#[derive(Error, Debug)]
pub enum RigError {
    #[error(transparent)]
    Core(#[from] v4d_core::CoreError),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("Unknown {kind}: {value}")]
    Unknown { kind: &'static str, value: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
