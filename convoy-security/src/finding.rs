//! Structured security findings.

use std::path::PathBuf;

use convoy_core::{Issue, IssueKind, ProjectName, Severity, Stage};
use serde::{Deserialize, Serialize};

/// One vulnerability, attributed to one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityFinding {
    /// `VULN-NNN` unless the document supplies an id.
    pub id: String,
    pub project: ProjectName,
    pub severity: Severity,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwe: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvss: Option<String>,
    /// Document the finding came from.
    pub source: PathBuf,
}

impl SecurityFinding {
    pub fn is_blocking(&self, threshold: Severity) -> bool {
        self.severity >= threshold
    }

    /// The issue recorded against the project: a `SecurityBlocked` blocker at
    /// or above `threshold`, a non-blocking `SecurityFinding` below it.
    pub fn to_issue(&self, threshold: Severity) -> Issue {
        let mut message = format!("{}: {}", self.id, self.title);
        if let Some(cwe) = &self.cwe {
            message.push_str(&format!(" ({cwe})"));
        }
        let issue = if self.is_blocking(threshold) {
            Issue::blocking(Stage::Security, IssueKind::SecurityBlocked, self.severity, message)
        } else {
            Issue::warning(Stage::Security, IssueKind::SecurityFinding, self.severity, message)
        };
        issue.at(&self.source, None)
    }
}

/// A section or entry that could not be turned into a finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSection {
    pub source: PathBuf,
    /// 1-based section number or array index.
    pub index: usize,
    pub reason: String,
}
