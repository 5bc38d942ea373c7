//! `convoy diff <root>` — show what compliance remediation would write.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Args;

use convoy_core::ProjectName;
use convoy_deploy::discover_blocking;
use convoy_gate::ComplianceGate;

use super::load_config;

/// Arguments for `convoy diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Directory whose immediate subdirectories are projects.
    pub root: PathBuf,

    /// Limit to one project.
    #[arg(long, short = 'p')]
    pub project: Option<String>,

    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl DiffArgs {
    pub fn run(self) -> Result<ExitCode> {
        let config = load_config(&self.root, self.config.as_deref(), true)?;
        let registry = discover_blocking(&self.root, &config)
            .with_context(|| format!("failed to discover projects under {}", self.root.display()))?;
        let gate =
            ComplianceGate::from_config(&config.compliance).context("invalid compliance rules")?;

        let projects: Vec<_> = match &self.project {
            Some(name) => {
                let name = ProjectName::from(name.as_str());
                match registry.get(&name) {
                    Some(p) => vec![p],
                    None => bail!("no project named '{name}' under {}", self.root.display()),
                }
            }
            None => registry.projects().collect(),
        };

        let mut printed = 0;
        for project in projects {
            let result = gate
                .check_project(project)
                .with_context(|| format!("compliance check failed for '{}'", project.name))?;
            for diff in result.diffs() {
                print!("{}", diff.unified_diff);
                if !diff.unified_diff.ends_with('\n') {
                    println!();
                }
                printed += 1;
            }
        }

        if printed == 0 {
            println!("No pending remediations.");
        }
        Ok(ExitCode::SUCCESS)
    }
}
