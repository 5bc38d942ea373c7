//! `convoy plan <root>` — full dry run, printed as deployment waves.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use convoy_core::{RunMode, RunReport};
use convoy_deploy::{init_tracing, start_blocking, Orchestrator};

use super::{exit_code, load_advisories, load_config, summary};

/// Arguments for `convoy plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Directory whose immediate subdirectories are projects.
    pub root: PathBuf,

    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Security advisory document. Repeatable.
    #[arg(long = "audit", value_name = "FILE")]
    pub audit: Vec<PathBuf>,

    /// Print the dry-run report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl PlanArgs {
    pub fn run(self) -> Result<ExitCode> {
        init_tracing(false, false);

        let config = load_config(&self.root, self.config.as_deref(), self.json)?;
        let advisories = load_advisories(&self.audit)?;
        let orchestrator =
            Orchestrator::with_standard_driver(config).context("failed to set up the run")?;
        let report = start_blocking(&orchestrator, &self.root, &advisories, RunMode::Full, true)
            .context("plan failed")?;

        if self.json {
            println!("{}", report.to_json().context("failed to serialize report")?);
        } else {
            print_waves(&report);
        }
        Ok(exit_code(&report))
    }
}

fn print_waves(report: &RunReport) {
    if let Some(abort) = &report.abort {
        println!("{} {}", "✗ cannot plan:".red().bold(), abort.message);
        return;
    }

    let mut waves: BTreeMap<usize, Vec<(&str, &str)>> = BTreeMap::new();
    for action in &report.planned_actions {
        waves
            .entry(action.wave)
            .or_default()
            .push((action.project.as_str(), action.action.as_str()));
    }

    if waves.is_empty() {
        println!("Nothing to deploy.");
    }
    for (wave, actions) in &waves {
        println!("{}", format!("Wave {}", wave + 1).bold());
        for (project, action) in actions {
            println!("  {} {project}: {action}", "→".green());
        }
    }

    let held: Vec<_> = report
        .projects
        .iter()
        .filter(|(name, _)| !report.planned_actions.iter().any(|a| &a.project == *name))
        .collect();
    if !held.is_empty() {
        println!("{}", "Held back".yellow().bold());
        for (name, project) in held {
            let reason = project
                .first_blocking_issue()
                .map(|i| i.to_string())
                .unwrap_or_else(|| project.status.to_string());
            println!("  {} {name}: {reason}", "✗".red());
        }
    }
    summary::print_security(report);
}
