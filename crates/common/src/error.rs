//! Error types shared across Medley crates.

use std::path::PathBuf;

/// Top-level error type for Medley operations.
#[derive(Debug, thiserror::Error)]
pub enum MedleyError {
    /// Missing or invalid required field, parent, or input.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Tree, node, template, or media file absent.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// Filesystem failure while staging an asset into the engine input area.
    #[error("Staging failed for {}: {message}", path.display())]
    StagingIo { path: PathBuf, message: String },

    /// Render engine or media encoder non-success, or timeout.
    #[error("Upstream service error: {message}")]
    Upstream { message: String },

    /// Malformed response or payload from a collaborator.
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// SQLite storage failure.
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using MedleyError.
pub type MedleyResult<T> = Result<T, MedleyError>;

impl MedleyError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn staging(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::StagingIo {
            path: path.into(),
            message: msg.into(),
        }
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream {
            message: msg.into(),
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage {
            message: msg.into(),
        }
    }

    /// Whether this error is caller-facing (4xx-class) rather than an
    /// internal or upstream failure (5xx-class).
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::NotFound { .. })
    }
}
