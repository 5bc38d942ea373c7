//! The run report: the only durable artifact of a run.
//!
//! Assembled while the run progresses, finalized once, then written atomically
//! (`.json.tmp` sibling → `chmod 0600` → `rename`).

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{report_io, DiscoveryError, ReportError};
use crate::graph::DeploymentOrder;
use crate::types::{
    Issue, Priority, ProjectDescriptor, ProjectName, ProjectState, ProjectStatus, RunMode,
    Severity,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: usize,
    pub compliant: usize,
    pub build_valid: usize,
    pub deployed: usize,
    pub failed: usize,
    pub rolled_back: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectReport {
    pub status: ProjectStatus,
    pub priority: Priority,
    pub language: String,
    pub dependencies: Vec<ProjectName>,
    /// `None` when the compliance gate did not run.
    pub compliant: Option<bool>,
    /// `None` when the build validator did not run.
    pub build_valid: Option<bool>,
    pub issues: Vec<Issue>,
}

impl ProjectReport {
    /// The first blocking issue, in pipeline order.
    pub fn first_blocking_issue(&self) -> Option<&Issue> {
        self.issues.iter().find(|i| i.blocking)
    }
}

/// A finding naming a project the registry does not know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmatchedFinding {
    pub id: String,
    pub project: ProjectName,
    pub severity: Severity,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySummary {
    pub findings: usize,
    pub blocking: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub unmatched_findings: Vec<UnmatchedFinding>,
    /// Sections or entries dropped while parsing advisory documents.
    #[serde(default)]
    pub skipped_sections: usize,
}

/// One driver action a dry run would have taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedAction {
    pub wave: usize,
    pub project: ProjectName,
    pub action: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortKind {
    Discovery,
    CycleDetected,
    UnknownDependency,
    OrderViolation,
    Cancelled,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortReport {
    pub kind: AbortKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub timestamp: DateTime<Utc>,
    pub mode: RunMode,
    pub dry_run: bool,
    pub summary: RunSummary,
    pub projects: BTreeMap<ProjectName, ProjectReport>,
    pub deployment_order: DeploymentOrder,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort: Option<AbortReport>,
    #[serde(default)]
    pub discovery_errors: Vec<DiscoveryError>,
    #[serde(default)]
    pub security: SecuritySummary,
    #[serde(default)]
    pub planned_actions: Vec<PlannedAction>,
}

impl RunReport {
    pub fn new(mode: RunMode, dry_run: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            mode,
            dry_run,
            summary: RunSummary::default(),
            projects: BTreeMap::new(),
            deployment_order: DeploymentOrder::default(),
            abort: None,
            discovery_errors: Vec::new(),
            security: SecuritySummary::default(),
            planned_actions: Vec::new(),
        }
    }

    pub fn set_order(&mut self, order: DeploymentOrder) {
        self.deployment_order = order;
    }

    pub fn set_abort(&mut self, kind: AbortKind, message: impl Into<String>) {
        // The first abort reason wins.
        if self.abort.is_none() {
            self.abort = Some(AbortReport { kind, message: message.into() });
        }
    }

    /// Snapshot a project's final state into the report.
    pub fn record_project(&mut self, descriptor: &ProjectDescriptor, state: &ProjectState) {
        let report = ProjectReport {
            status: state.status,
            priority: descriptor.priority,
            language: descriptor.language.clone(),
            dependencies: descriptor.dependencies.clone(),
            compliant: state
                .compliance_evaluated
                .then(|| !state.has_blocking_compliance_issue()),
            build_valid: state.build_evaluated.then(|| !state.has_blocking_build_issue()),
            issues: state.issues().cloned().collect(),
        };
        self.projects.insert(descriptor.name.clone(), report);
    }

    /// Recompute summary counts from the recorded projects.
    pub fn finalize(&mut self) {
        let mut s = RunSummary { total: self.projects.len(), ..RunSummary::default() };
        for p in self.projects.values() {
            if p.compliant == Some(true) {
                s.compliant += 1;
            }
            if p.build_valid == Some(true) {
                s.build_valid += 1;
            }
            match p.status {
                ProjectStatus::Deployed => s.deployed += 1,
                ProjectStatus::Failed => s.failed += 1,
                ProjectStatus::RolledBack => s.rolled_back += 1,
                _ => {}
            }
        }
        self.summary = s;
    }

    /// True when the run should exit non-zero.
    pub fn has_failures(&self) -> bool {
        self.abort.is_some()
            || self
                .projects
                .values()
                .any(|p| matches!(p.status, ProjectStatus::Failed | ProjectStatus::RolledBack))
    }

    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Atomically write the report to `path`, creating parent directories.
    pub fn save_at(&self, path: &Path) -> Result<(), ReportError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| report_io(parent, e))?;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report.json".to_string());
        let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

        let json = self.to_json()?;
        std::fs::write(&tmp_path, json).map_err(|e| report_io(&tmp_path, e))?;
        set_file_permissions(&tmp_path)?;
        std::fs::rename(&tmp_path, path).map_err(|e| report_io(path, e))?;
        Ok(())
    }

    pub fn load_at(path: &Path) -> Result<Self, ReportError> {
        let contents = std::fs::read_to_string(path).map_err(|e| report_io(path, e))?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ReportError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| report_io(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ReportError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IssueKind, Stage};
    use tempfile::TempDir;

    fn sample() -> RunReport {
        let mut report = RunReport::new(RunMode::Full, false);
        let api = ProjectDescriptor::new("api", "/p/api").with_priority(1);
        let mut state = ProjectState::new(api.name.clone());
        state.compliance_evaluated = true;
        state.build_evaluated = true;
        state.status = ProjectStatus::Deployed;
        report.record_project(&api, &state);

        let web = ProjectDescriptor::new("web", "/p/web").with_dependencies(["api"]);
        let mut state = ProjectState::new(web.name.clone());
        state.compliance_evaluated = true;
        state.compliance_issues.push(Issue::blocking(
            Stage::Compliance,
            IssueKind::ComplianceViolation,
            Severity::High,
            "missing header",
        ));
        state.status = ProjectStatus::Failed;
        report.record_project(&web, &state);

        report.set_order(DeploymentOrder(vec!["api".into(), "web".into()]));
        report.finalize();
        report
    }

    #[test]
    fn finalize_counts_statuses() {
        let report = sample();
        assert_eq!(
            report.summary,
            RunSummary {
                total: 2,
                compliant: 1,
                build_valid: 1,
                deployed: 1,
                failed: 1,
                rolled_back: 0,
            }
        );
        assert!(report.has_failures());
        assert_eq!(report.projects[&ProjectName::from("web")].build_valid, None);
    }

    #[test]
    fn json_uses_camel_case_keys() {
        let json = sample().to_json().expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["summary"]["buildValid"], 1);
        assert_eq!(value["summary"]["rolledBack"], 0);
        assert_eq!(value["deploymentOrder"], serde_json::json!(["api", "web"]));
        assert_eq!(value["projects"]["web"]["status"], "failed");
        assert_eq!(value["projects"]["web"]["issues"][0]["stage"], "compliance");
        assert!(value.get("abort").is_none());
    }

    #[test]
    fn first_blocking_issue_names_the_reason() {
        let report = sample();
        let web = &report.projects[&ProjectName::from("web")];
        assert_eq!(
            web.first_blocking_issue().map(|i| i.message.as_str()),
            Some("missing header")
        );
        assert!(report.projects[&ProjectName::from("api")].first_blocking_issue().is_none());
    }

    #[test]
    fn first_abort_reason_wins() {
        let mut report = RunReport::new(RunMode::Full, false);
        report.set_abort(AbortKind::Cancelled, "interrupted");
        report.set_abort(AbortKind::Timeout, "deadline");
        assert_eq!(report.abort.as_ref().map(|a| a.kind), Some(AbortKind::Cancelled));
        assert!(report.has_failures());
    }

    #[test]
    fn save_is_atomic_and_private() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("out").join("report.json");
        let report = sample();
        report.save_at(&path).expect("save");
        assert!(!dir.path().join("out").join("report.json.tmp").exists());

        let loaded = RunReport::load_at(&path).expect("load");
        assert_eq!(loaded, report);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).expect("meta").permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
