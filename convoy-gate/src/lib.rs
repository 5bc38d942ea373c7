//! # convoy-gate
//!
//! Per-project validation gates.
//!
//! [`ComplianceGate`] applies the configured rule set to a project's files and
//! owns the digest-guarded remediation write. [`BuildValidator`] checks
//! required files, structured manifests and entry points. Neither gate looks
//! at any project but the one it is given.

pub mod build;
pub mod diff;
pub mod digest;
pub mod error;
pub mod gate;
pub mod rules;
pub mod writer;

pub use build::{is_executable, BuildValidator};
pub use diff::FileDiff;
pub use error::GateError;
pub use gate::{ComplianceGate, ComplianceResult};
pub use rules::{ComplianceRule, FileContext, RuleOutcome};
pub use writer::{apply_remediations, Remediation, WriteResult};
