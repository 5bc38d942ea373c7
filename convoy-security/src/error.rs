//! Error types for convoy-security.

use std::path::PathBuf;

use thiserror::Error;

/// Document-level ingestion failures. A bad section or entry inside an
/// otherwise readable document is skipped, not an error.
#[derive(Debug, Error)]
pub enum AdvisoryError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse advisory JSON at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("advisory JSON at {path} is neither a findings object nor an array")]
    Shape { path: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> AdvisoryError {
    AdvisoryError::Io {
        path: path.into(),
        source,
    }
}
