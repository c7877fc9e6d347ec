use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the conversion pipeline.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Workspace error at {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Conversion failed for {file}: {reason}")]
    Conversion { file: String, reason: String },

    #[error("Capability '{capability}' is unavailable: {reason}")]
    CapabilityUnavailable {
        capability: &'static str,
        reason: String,
    },

    #[error("Artifact not found: {task_id}/{file_name}")]
    NotFound { task_id: String, file_name: String },
}

impl ConvertError {
    pub(crate) fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConvertError::Workspace {
            path: path.into(),
            source,
        }
    }

    /// Translate a capability failure into a request-level error naming `file`.
    pub(crate) fn from_capability(
        capability: &'static str,
        file: &str,
        err: CapabilityError,
    ) -> Self {
        match err {
            CapabilityError::Unavailable(reason) => {
                ConvertError::CapabilityUnavailable { capability, reason }
            }
            other => ConvertError::Conversion {
                file: file.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Request-level validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No file or operation selected")]
    MissingInput,

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Unsupported file format: {file}")]
    UnsupportedFormat { file: String },
}

/// Failure reported by a single conversion capability.
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),

    /// One input of a multi-input capability was rejected.
    #[error("input {index}: {reason}")]
    InvalidInput { index: usize, reason: String },

    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

impl From<std::io::Error> for CapabilityError {
    fn from(err: std::io::Error) -> Self {
        CapabilityError::Failed(err.to_string())
    }
}
