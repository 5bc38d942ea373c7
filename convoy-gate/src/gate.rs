//! The compliance gate: walks a project, threads each file through the rule
//! set, then applies and re-checks remediations.

use std::path::{Path, PathBuf};

use convoy_core::config::ComplianceConfig;
use convoy_core::{Issue, IssueKind, ProjectDescriptor, ProjectName, Severity, Stage};
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::diff::{render_diffs, FileDiff};
use crate::digest::sha256_hex;
use crate::error::{io_err, GateError};
use crate::rules::{build_rules, ComplianceRule, FileContext, RuleOutcome};
use crate::writer::{apply_remediations, Remediation, WriteResult};

/// Files above this size are not evaluated.
pub const MAX_SCAN_BYTES: u64 = 4 * 1024 * 1024;

const TMP_SUFFIX: &str = ".convoy.tmp";

/// Result of gating one project.
#[derive(Debug, Clone, Default)]
pub struct ComplianceResult {
    pub issues: Vec<Issue>,
    pub remediations: Vec<Remediation>,
    pub writes: Vec<WriteResult>,
    pub files_checked: usize,
}

impl ComplianceResult {
    pub fn is_compliant(&self) -> bool {
        !self.issues.iter().any(|i| i.blocking)
    }

    pub fn diffs(&self) -> Vec<FileDiff> {
        render_diffs(&self.remediations)
    }
}

pub struct ComplianceGate {
    rules: Vec<Box<dyn ComplianceRule>>,
    exclude_files: Vec<String>,
    skip_dirs: Vec<String>,
    auto_remediate: bool,
}

impl ComplianceGate {
    pub fn from_config(config: &ComplianceConfig) -> Result<Self, GateError> {
        Ok(Self::new(
            build_rules(config)?,
            config.exclude_files.clone(),
            config.skip_dirs.clone(),
            config.auto_remediate,
        ))
    }

    pub fn new(
        rules: Vec<Box<dyn ComplianceRule>>,
        exclude_files: Vec<String>,
        skip_dirs: Vec<String>,
        auto_remediate: bool,
    ) -> Self {
        let ids: Vec<&str> = rules.iter().map(|r| r.id()).collect();
        debug!(rules = ?ids, auto_remediate, "compliance gate built");
        Self { rules, exclude_files, skip_dirs, auto_remediate }
    }

    /// Evaluate, then write remediations (unless `dry_run`) and re-check the
    /// written files with remediation disabled.
    pub fn run(&self, project: &ProjectDescriptor, dry_run: bool) -> Result<ComplianceResult, GateError> {
        let mut result = self.check_project(project)?;
        let writes = apply_remediations(&result.remediations, dry_run)?;

        for (remediation, write) in result.remediations.iter().zip(&writes) {
            match write {
                WriteResult::Conflict { .. } => {
                    result.issues.push(
                        Issue::blocking(
                            Stage::Compliance,
                            IssueKind::ComplianceViolation,
                            Severity::High,
                            "file changed during evaluation; remediation not applied",
                        )
                        .at(&remediation.relative, None),
                    );
                }
                WriteResult::Written { path } => {
                    let content = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
                    let (left, _) =
                        self.evaluate_file(&project.name, &remediation.relative, &content, false);
                    for issue in left.into_iter().filter(|i| i.blocking) {
                        if !result.issues.contains(&issue) {
                            result.issues.push(issue);
                        }
                    }
                }
                WriteResult::WouldWrite { .. } => {}
            }
        }
        result.writes = writes;

        info!(
            project = %project.name,
            files = result.files_checked,
            blocking = result.issues.iter().filter(|i| i.blocking).count(),
            remediated = result.remediations.len(),
            dry_run,
            "compliance evaluated"
        );
        Ok(result)
    }

    /// Evaluate every matching file without writing anything.
    pub fn check_project(&self, project: &ProjectDescriptor) -> Result<ComplianceResult, GateError> {
        let mut result = ComplianceResult::default();
        for path in self.files(&project.root)? {
            let relative = path.strip_prefix(&project.root).unwrap_or(path.as_path()).to_path_buf();
            if !self.rules.iter().any(|r| r.applies_to(&relative)) {
                continue;
            }
            let Some(bytes) = read_text(&path)? else {
                continue;
            };
            let content = String::from_utf8_lossy(&bytes);
            result.files_checked += 1;

            let (issues, fixed) =
                self.evaluate_file(&project.name, &relative, &content, self.auto_remediate);
            result.issues.extend(issues);
            if let Some(fixed) = fixed {
                result.remediations.push(Remediation {
                    path: path.clone(),
                    relative,
                    original_digest: sha256_hex(&bytes),
                    original: content.into_owned(),
                    content: fixed,
                });
            }
        }
        Ok(result)
    }

    /// Thread `content` through every applicable rule in order. Returns the
    /// issues and the final content if any rule changed it.
    pub fn evaluate_file(
        &self,
        project: &ProjectName,
        relative: &Path,
        content: &str,
        remediate: bool,
    ) -> (Vec<Issue>, Option<String>) {
        let ctx = FileContext { project, relative, remediate };
        let mut issues = Vec::new();
        let mut current: Option<String> = None;
        for rule in self.rules.iter().filter(|r| r.applies_to(relative)) {
            let text = current.as_deref().unwrap_or(content);
            match rule.evaluate(&ctx, text) {
                RuleOutcome::Pass => {}
                RuleOutcome::Violations(found) => issues.extend(found),
                RuleOutcome::Remediable { issues: found, fixed } => {
                    issues.extend(found);
                    current = Some(fixed);
                }
            }
        }
        (issues, current)
    }

    /// Files under `root`, sorted, skipping hidden and configured directories
    /// and excluded file names.
    pub fn files(&self, root: &Path) -> Result<Vec<PathBuf>, GateError> {
        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.skip_dir(e));
        for entry in walker {
            let entry = entry.map_err(|e| GateError::Walk { path: root.to_path_buf(), source: e })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.ends_with(TMP_SUFFIX) || self.exclude_files.iter().any(|x| x == name.as_ref()) {
                continue;
            }
            files.push(entry.into_path());
        }
        Ok(files)
    }

    fn skip_dir(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        name.starts_with('.') || self.skip_dirs.iter().any(|d| d == name.as_ref())
    }
}

/// File bytes, or `None` for oversized or non-UTF-8 files.
fn read_text(path: &Path) -> Result<Option<Vec<u8>>, GateError> {
    let meta = std::fs::metadata(path).map_err(|e| io_err(path, e))?;
    if meta.len() > MAX_SCAN_BYTES {
        debug!(path = %path.display(), size = meta.len(), "skipping oversized file");
        return Ok(None);
    }
    let bytes = std::fs::read(path).map_err(|e| io_err(path, e))?;
    if std::str::from_utf8(&bytes).is_err() {
        debug!(path = %path.display(), "skipping non-UTF-8 file");
        return Ok(None);
    }
    Ok(Some(bytes))
}
