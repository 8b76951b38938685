//! Error types for the core module.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while driving a staged process.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Process already running: {0}")]
    AlreadyRunning(String),

    #[error("Invalid process state: {0}")]
    InvalidState(String),

    #[error("Stage execution failed: {stage} - {message}")]
    StageFailed { stage: String, message: String },

    #[error("Process was stopped")]
    Cancelled,

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Run task failed: {0}")]
    TaskFailed(String),
}

impl CoreError {
    /// Whether this error reports a stop request rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
