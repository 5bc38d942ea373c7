//! Error types for convoy-gate.

use std::path::PathBuf;

use thiserror::Error;

/// Failures of the gate machinery itself. Problems found in a project's files
/// are issues, not errors.
#[derive(Debug, Error)]
pub enum GateError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("invalid forbidden term pattern '{term}': {source}")]
    Pattern {
        term: String,
        #[source]
        source: regex::Error,
    },
}

/// Convenience constructor for [`GateError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> GateError {
    GateError::Io {
        path: path.into(),
        source,
    }
}
