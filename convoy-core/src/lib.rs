//! Convoy core library: domain types, config, discovery, dependency
//! resolution and the run report.
//!
//! - [`types`]: newtypes, issues, descriptors, per-run state
//! - [`config`]: `convoy.yaml` loading and resolution
//! - [`registry`]: project discovery
//! - [`graph`]: dependency graph and deployment order
//! - [`report`]: run report assembly and atomic persistence

pub mod config;
pub mod error;
pub mod graph;
pub mod registry;
pub mod report;
pub mod types;

pub use config::OrchestrationConfig;
pub use error::{ConfigError, DiscoveryError, GraphError, RegistryError, ReportError, TransitionError};
pub use graph::{DependencyGraph, DeploymentOrder};
pub use registry::Registry;
pub use report::RunReport;
pub use types::{
    DeploySpec, Issue, IssueKind, Priority, ProjectDescriptor, ProjectName, ProjectState,
    ProjectStatus, RunMode, Severity, Stage, DEFAULT_PRIORITY,
};
