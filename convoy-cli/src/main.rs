//! Convoy — compliance-gated deployment across many projects.
//!
//! # Usage
//!
//! ```text
//! convoy run <root> [--mode discover|compliance|build|deploy|full] [--dry-run]
//!            [--config <file>] [--audit <file>]... [--report <path>] [--json] [--verbose] [--log-json]
//! convoy plan <root> [--config <file>] [--audit <file>]... [--json]
//! convoy audit <file>... [--threshold <severity>] [--check-blockers] [--json]
//! convoy diff <root> [--project <name>] [--config <file>]
//! ```

mod commands;

use std::fmt;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{audit::AuditArgs, diff::DiffArgs, plan::PlanArgs, run::RunArgs};
use convoy_core::{RunMode, Severity};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "convoy",
    version,
    about = "Discover, gate and deploy a tree of projects in dependency order",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pipeline over every project under a root directory.
    Run(RunArgs),

    /// Dry-run the full pipeline and print the deployment waves.
    Plan(PlanArgs),

    /// Parse advisory documents and list findings.
    Audit(AuditArgs),

    /// Show unified diffs of pending compliance remediations.
    Diff(DiffArgs),
}

// ---------------------------------------------------------------------------
// Shared argument wrappers
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `RunMode` from CLI args.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModeArg(pub RunMode);

impl FromStr for ModeArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "discover" => Ok(Self(RunMode::Discover)),
            "compliance" => Ok(Self(RunMode::Compliance)),
            "build" => Ok(Self(RunMode::Build)),
            "deploy" => Ok(Self(RunMode::Deploy)),
            "full" => Ok(Self(RunMode::Full)),
            other => Err(format!(
                "unknown mode '{other}'; expected: discover, compliance, build, deploy, full"
            )),
        }
    }
}

impl fmt::Display for ModeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Severity argument; accepts the same spellings as advisory documents.
#[derive(Debug, Clone, Copy)]
pub struct SeverityArg(pub Severity);

impl FromStr for SeverityArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl fmt::Display for SeverityArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Plan(args) => args.run(),
        Commands::Audit(args) => args.run(),
        Commands::Diff(args) => args.run(),
    }
}
