//! Error types for convoy-core.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ProjectName, ProjectStatus};

/// Errors from scanning the project root.
///
/// Per-project manifest problems are not errors here; they become
/// [`DiscoveryError`] records on the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("project root not found at {path}")]
    RootNotFound { path: PathBuf },
}

/// Errors from loading the orchestration config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error, with line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Graph-scoped resolution failures. All of these are fatal for a run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("dependency cycle detected: {}", join_names(.cycle))]
    CycleDetected { cycle: Vec<ProjectName> },

    #[error("project '{project}' depends on unknown project '{missing}'")]
    UnknownDependency {
        project: ProjectName,
        missing: ProjectName,
    },

    #[error("deployment order violates dependency: '{dependency}' must precede '{project}'")]
    OrderViolation {
        project: ProjectName,
        dependency: ProjectName,
    },
}

/// Errors from persisting or loading a run report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("report serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Rejected lifecycle move.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("project '{project}' cannot move from {from} to {to}")]
pub struct TransitionError {
    pub project: ProjectName,
    pub from: ProjectStatus,
    pub to: ProjectStatus,
}

/// A project-scoped discovery failure. Recorded, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryError {
    pub project: ProjectName,
    pub manifest: PathBuf,
    pub message: String,
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.project, self.manifest.display(), self.message)
    }
}

fn join_names(names: &[ProjectName]) -> String {
    names.iter().map(|n| n.0.as_str()).collect::<Vec<_>>().join(" -> ")
}

pub(crate) fn registry_io(path: &Path, source: std::io::Error) -> RegistryError {
    RegistryError::Io { path: path.to_path_buf(), source }
}

pub(crate) fn config_io(path: &Path, source: std::io::Error) -> ConfigError {
    ConfigError::Io { path: path.to_path_buf(), source }
}

pub(crate) fn report_io(path: &Path, source: std::io::Error) -> ReportError {
    ReportError::Io { path: path.to_path_buf(), source }
}
