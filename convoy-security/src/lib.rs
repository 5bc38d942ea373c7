//! # convoy-security
//!
//! Ingests vulnerability audit documents into [`SecurityFinding`]s keyed by
//! project. Markdown audits and JSON finding lists are supported; the format
//! is picked by file extension (`.json`, anything else is markdown).
//!
//! Parsing is best-effort per section: a malformed section is logged and
//! listed in [`Advisories::skipped`], the rest of the document still counts.

pub mod error;
pub mod finding;
pub mod json;
pub mod markdown;

use std::collections::BTreeMap;
use std::path::Path;

use convoy_core::report::{SecuritySummary, UnmatchedFinding};
use convoy_core::{ProjectName, Severity};
use tracing::{info, warn};

pub use error::AdvisoryError;
pub use finding::{SecurityFinding, SkippedSection};

use crate::error::io_err;

/// Every finding ingested for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advisories {
    findings: Vec<SecurityFinding>,
    skipped: Vec<SkippedSection>,
}

impl Advisories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every document in `paths`, in order.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self, AdvisoryError> {
        let mut advisories = Self::new();
        for path in paths {
            advisories.ingest_file(path.as_ref())?;
        }
        Ok(advisories)
    }

    pub fn ingest_file(&mut self, path: &Path) -> Result<(), AdvisoryError> {
        let content = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        self.ingest_str(path, &content)
    }

    /// Parse `content` as if read from `source`.
    pub fn ingest_str(&mut self, source: &Path, content: &str) -> Result<(), AdvisoryError> {
        let is_json = source
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let (findings, skipped) = if is_json {
            json::parse(source, content)?
        } else {
            markdown::parse(source, content)
        };
        info!(
            source = %source.display(),
            findings = findings.len(),
            skipped = skipped.len(),
            "ingested advisory document"
        );
        self.findings.extend(findings);
        self.skipped.extend(skipped);
        Ok(())
    }

    pub fn push(&mut self, finding: SecurityFinding) {
        self.findings.push(finding);
    }

    pub fn findings(&self) -> &[SecurityFinding] {
        &self.findings
    }

    pub fn skipped(&self) -> &[SkippedSection] {
        &self.skipped
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn for_project<'a>(
        &'a self,
        project: &'a ProjectName,
    ) -> impl Iterator<Item = &'a SecurityFinding> + 'a {
        self.findings.iter().filter(move |f| &f.project == project)
    }

    /// Findings at or above `threshold`.
    pub fn blockers(&self, threshold: Severity) -> impl Iterator<Item = &SecurityFinding> + '_ {
        self.findings.iter().filter(move |f| f.is_blocking(threshold))
    }

    /// Report block for these findings. `known` says whether a project is in
    /// the registry; findings for unknown projects are listed as unmatched.
    pub fn summary<F>(&self, threshold: Severity, known: F) -> SecuritySummary
    where
        F: Fn(&ProjectName) -> bool,
    {
        let mut by_severity: BTreeMap<Severity, usize> = BTreeMap::new();
        let mut unmatched = Vec::new();
        let mut blocking = 0;
        for f in &self.findings {
            *by_severity.entry(f.severity).or_default() += 1;
            if !known(&f.project) {
                warn!(project = %f.project, id = %f.id, "finding names an unknown project");
                unmatched.push(UnmatchedFinding {
                    id: f.id.clone(),
                    project: f.project.clone(),
                    severity: f.severity,
                    title: f.title.clone(),
                });
            } else if f.is_blocking(threshold) {
                blocking += 1;
            }
        }
        SecuritySummary {
            findings: self.findings.len(),
            blocking,
            by_severity,
            unmatched_findings: unmatched,
            skipped_sections: self.skipped.len(),
        }
    }
}
