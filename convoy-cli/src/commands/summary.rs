//! Human-readable rendering of a run report.

use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use convoy_core::{ProjectStatus, RunReport};

#[derive(Tabled)]
struct ProjectRow {
    #[tabled(rename = "#")]
    position: String,
    #[tabled(rename = "project")]
    project: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "priority")]
    priority: i64,
    #[tabled(rename = "language")]
    language: String,
    #[tabled(rename = "compliant")]
    compliant: String,
    #[tabled(rename = "build")]
    build: String,
    #[tabled(rename = "issues")]
    issues: usize,
}

fn yes_no(value: Option<bool>) -> String {
    match value {
        Some(true) => "yes".to_string(),
        Some(false) => "NO".to_string(),
        None => "-".to_string(),
    }
}

fn status_label(status: ProjectStatus) -> &'static str {
    match status {
        ProjectStatus::Discovered => "DISCOVERED",
        ProjectStatus::ComplianceChecked => "COMPLIANT",
        ProjectStatus::BuildValidated => "VALIDATED",
        ProjectStatus::Deploying => "DEPLOYING",
        ProjectStatus::Deployed => "DEPLOYED",
        ProjectStatus::Failed => "FAILED",
        ProjectStatus::RolledBack => "ROLLED BACK",
    }
}

pub(crate) fn print_report(report: &RunReport) {
    let dry = if report.dry_run { " (dry run)" } else { "" };
    println!(
        "Convoy v{} | mode {}{dry} | {} projects",
        env!("CARGO_PKG_VERSION"),
        report.mode,
        report.summary.total,
    );

    if let Some(abort) = &report.abort {
        println!("{} {}", "✗ run aborted:".red().bold(), abort.message);
    }

    for err in &report.discovery_errors {
        println!("{} {err}", "! discovery:".yellow());
    }

    if report.projects.is_empty() {
        println!("No projects found.");
        return;
    }

    // Projects in deployment order first, then anything resolution never placed.
    let mut names: Vec<_> = report.deployment_order.iter().collect();
    for name in report.projects.keys() {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    let rows: Vec<ProjectRow> = names
        .iter()
        .filter_map(|name| report.projects.get(*name).map(|p| (name, p)))
        .map(|(name, p)| ProjectRow {
            position: report
                .deployment_order
                .position(name)
                .map(|i| (i + 1).to_string())
                .unwrap_or_else(|| "-".to_string()),
            project: name.to_string(),
            status: status_label(p.status).to_string(),
            priority: p.priority,
            language: p.language.clone(),
            compliant: yes_no(p.compliant),
            build: yes_no(p.build_valid),
            issues: p.issues.len(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    for name in &names {
        let Some(project) = report.projects.get(*name) else {
            continue;
        };
        let blocking: Vec<_> = project.issues.iter().filter(|i| i.blocking).collect();
        if blocking.is_empty() {
            continue;
        }
        println!("{}", name.as_str().bold());
        for issue in blocking {
            println!("  {} {issue}", "✗".red());
        }
    }

    if report.dry_run && !report.planned_actions.is_empty() {
        println!("{}", "Planned".bold());
        for action in &report.planned_actions {
            println!("  wave {} {}: {}", action.wave + 1, action.project, action.action);
        }
    }

    print_security(report);

    let s = &report.summary;
    let line = format!(
        "{} deployed, {} failed, {} rolled back, {} compliant, {} build-valid",
        s.deployed, s.failed, s.rolled_back, s.compliant, s.build_valid
    );
    if report.has_failures() {
        println!("{}", line.red());
    } else {
        println!("{}", line.green());
    }
}

pub(crate) fn print_security(report: &RunReport) {
    let sec = &report.security;
    if sec.findings == 0 && sec.skipped_sections == 0 {
        return;
    }
    let counts: Vec<String> = sec
        .by_severity
        .iter()
        .rev()
        .map(|(severity, n)| format!("{n} {severity}"))
        .collect();
    println!(
        "Security: {} findings ({}), {} blocking",
        sec.findings,
        counts.join(", "),
        sec.blocking
    );
    for f in &sec.unmatched_findings {
        println!(
            "  {} {} names unknown project '{}': {}",
            "?".yellow(),
            f.id,
            f.project,
            f.title
        );
    }
    if sec.skipped_sections > 0 {
        println!(
            "  {} {} advisory sections could not be parsed",
            "!".yellow(),
            sec.skipped_sections
        );
    }
}
