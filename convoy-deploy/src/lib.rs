//! # convoy-deploy
//!
//! Runs the pipeline over a discovered registry: dependency resolution,
//! concurrent compliance and build validation, security gating, then
//! deployment in dependency waves through a [`DeploymentDriver`].
//!
//! Deployments within a wave run concurrently up to the configured limit.
//! A failed project blocks every transitive dependent; a failed health check
//! rolls the project back.

pub mod driver;
pub mod error;
pub mod git;
pub mod orchestrator;
pub mod process;
pub mod runtime;
pub mod script;

pub use driver::{DeployProgress, DeployReceipt, DeploymentDriver, StandardDriver};
pub use error::{DriverError, OrchestratorError};
pub use git::GitDriver;
pub use orchestrator::Orchestrator;
pub use runtime::{discover, discover_blocking, init_tracing, run_until_interrupted, start_blocking};
pub use script::ScriptDriver;
