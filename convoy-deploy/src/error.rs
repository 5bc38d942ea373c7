use std::path::PathBuf;

use convoy_core::ProjectName;
use thiserror::Error;

use crate::driver::DeployReceipt;

/// Failures surfaced by a [`crate::DeploymentDriver`].
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}: {stderr}", exit_label(.status))]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("health check failed: {0}")]
    Unhealthy(String),

    #[error("no rollback action available for {project}")]
    NoRollback { project: ProjectName },

    /// The deployment got part of the way; `receipt` says how far.
    #[error("{source}")]
    Partial {
        receipt: Box<DeployReceipt>,
        #[source]
        source: Box<DriverError>,
    },
}

impl DriverError {
    pub fn partial(receipt: DeployReceipt, source: DriverError) -> Self {
        DriverError::Partial {
            receipt: Box::new(receipt),
            source: Box::new(source),
        }
    }

    /// The receipt of a half-finished deployment, if any.
    pub fn partial_receipt(&self) -> Option<&DeployReceipt> {
        match self {
            DriverError::Partial { receipt, .. } => Some(receipt),
            _ => None,
        }
    }
}

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// Errors raised while setting up a run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("discovery error: {0}")]
    Registry(#[from] convoy_core::RegistryError),

    #[error("discovery under {root} did not finish within {secs}s")]
    DiscoveryTimeout { root: PathBuf, secs: u64 },

    #[error("discovery task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("config error: {0}")]
    Config(#[from] convoy_core::ConfigError),

    #[error("compliance gate error: {0}")]
    Gate(#[from] convoy_gate::GateError),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> OrchestratorError {
    OrchestratorError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn driver_io(path: impl Into<PathBuf>, source: std::io::Error) -> DriverError {
    DriverError::Io {
        path: path.into(),
        source,
    }
}
