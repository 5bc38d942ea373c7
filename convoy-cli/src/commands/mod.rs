pub mod audit;
pub mod diff;
pub mod plan;
pub mod run;
pub mod summary;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use colored::Colorize;

use convoy_core::{config, OrchestrationConfig, RunReport};
use convoy_security::Advisories;

/// Resolve the orchestration config for a run rooted at `root`.
pub(crate) fn load_config(
    root: &Path,
    config_path: Option<&Path>,
    quiet: bool,
) -> Result<OrchestrationConfig> {
    let (config, source) =
        config::resolve(config_path, root).context("failed to load orchestration config")?;
    if !quiet {
        match &source {
            Some(path) => eprintln!("{} {}", "config:".bright_black(), path.display()),
            None => eprintln!("{} built-in defaults", "config:".bright_black()),
        }
    }
    Ok(config)
}

pub(crate) fn load_advisories(paths: &[PathBuf]) -> Result<Advisories> {
    Advisories::load(paths).context("failed to load advisory documents")
}

/// Persist and print a finished run, then map it to the process exit code.
pub(crate) fn finish(report: &RunReport, report_path: Option<&Path>, json: bool) -> Result<ExitCode> {
    if let Some(path) = report_path {
        report
            .save_at(path)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }
    if json {
        println!("{}", report.to_json().context("failed to serialize report")?);
    } else {
        summary::print_report(report);
        if let Some(path) = report_path {
            println!("Report written to {}", path.display());
        }
    }
    Ok(exit_code(report))
}

pub(crate) fn exit_code(report: &RunReport) -> ExitCode {
    if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
