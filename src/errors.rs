//! Error types for engine operations

use thiserror::Error;

/// Errors that can occur in engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// A resource with the same name (or alternate name) already exists
    #[error("duplicate resource name: {0}")]
    DuplicateResource(String),

    /// A parent named by a resource could not be resolved
    #[error("unknown parent resource: {0}")]
    UnknownParent(String),

    /// A handler reported failure for an event
    #[error("handler failed for event '{event}': {reason}")]
    HandlerFailed { event: String, reason: String },

    /// A script-backed handler could not be executed
    #[error("script execution failed: {0}")]
    ScriptFailed(String),

    /// Scheduler error
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Resource descriptor could not be parsed
    #[error("descriptor error: {0}")]
    Descriptor(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::Descriptor(err.to_string())
    }
}
