//! `convoy audit <file>...` — parse advisory documents on their own.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use convoy_security::{SecurityFinding, SkippedSection};

use super::load_advisories;
use crate::SeverityArg;

/// Arguments for `convoy audit`.
#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Markdown or JSON advisory documents.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Findings at or above this severity count as blockers.
    #[arg(long, default_value = "critical")]
    pub threshold: SeverityArg,

    /// Exit non-zero when any blocker is found.
    #[arg(long)]
    pub check_blockers: bool,

    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuditJson<'a> {
    threshold: String,
    blockers: usize,
    findings: &'a [SecurityFinding],
    skipped: &'a [SkippedSection],
}

#[derive(Tabled)]
struct FindingRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "project")]
    project: String,
    #[tabled(rename = "severity")]
    severity: String,
    #[tabled(rename = "title")]
    title: String,
    #[tabled(rename = "cwe")]
    cwe: String,
}

impl AuditArgs {
    pub fn run(self) -> Result<ExitCode> {
        let advisories = load_advisories(&self.files)?;
        let threshold = self.threshold.0;
        let blockers = advisories.blockers(threshold).count();

        if self.json {
            let payload = AuditJson {
                threshold: threshold.to_string(),
                blockers,
                findings: advisories.findings(),
                skipped: advisories.skipped(),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize audit JSON")?
            );
        } else if advisories.is_empty() {
            println!("No findings.");
        } else {
            let rows: Vec<FindingRow> = advisories
                .findings()
                .iter()
                .map(|f| FindingRow {
                    id: f.id.clone(),
                    project: f.project.to_string(),
                    severity: f.severity.to_string().to_uppercase(),
                    title: f.title.clone(),
                    cwe: f.cwe.clone().unwrap_or_else(|| "-".to_string()),
                })
                .collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }

        if !self.json {
            for skipped in advisories.skipped() {
                println!(
                    "{} {} section {}: {}",
                    "! skipped".yellow(),
                    skipped.source.display(),
                    skipped.index,
                    skipped.reason
                );
            }
            let line = format!("{blockers} blocker(s) at or above {threshold}");
            if blockers > 0 {
                println!("{}", line.red().bold());
            } else {
                println!("{}", line.green());
            }
        }

        if self.check_blockers && blockers > 0 {
            return Ok(ExitCode::FAILURE);
        }
        Ok(ExitCode::SUCCESS)
    }
}
