//! `convoy run <root>` — execute the pipeline.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;

use convoy_deploy::{init_tracing, start_blocking, Orchestrator};

use super::{finish, load_advisories, load_config};
use crate::ModeArg;

/// Arguments for `convoy run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Directory whose immediate subdirectories are projects.
    pub root: PathBuf,

    /// Stages to execute: discover | compliance | build | deploy | full.
    #[arg(long, default_value = "full")]
    pub mode: ModeArg,

    /// Plan remediations and deployments without writing or deploying anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Orchestration config (defaults to <root>/convoy.yaml, then the user config dir).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Security advisory document (markdown or JSON). Repeatable.
    #[arg(long = "audit", value_name = "FILE")]
    pub audit: Vec<PathBuf>,

    /// Write the JSON run report to this path.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Print the run report as JSON instead of the summary table.
    #[arg(long)]
    pub json: bool,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs on stderr as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

impl RunArgs {
    pub fn run(self) -> Result<ExitCode> {
        init_tracing(self.verbose, self.log_json);

        let config = load_config(&self.root, self.config.as_deref(), self.json)?;
        let advisories = load_advisories(&self.audit)?;
        let orchestrator =
            Orchestrator::with_standard_driver(config).context("failed to set up the run")?;

        let report = start_blocking(
            &orchestrator,
            &self.root,
            &advisories,
            self.mode.0,
            self.dry_run,
        )
        .context("run failed")?;

        finish(&report, self.report.as_deref(), self.json)
    }
}
