//! Domain types for convoy runs.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! Everything that ends up in the run report derives serde.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TransitionError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed project name. Always the directory name under the scan root.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectName(pub String);

impl ProjectName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ProjectName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProjectName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Deployment priority. Lower numbers deploy earlier.
pub type Priority = i64;

/// Priority assigned when neither the manifest nor the config declares one.
pub const DEFAULT_PRIORITY: Priority = 999;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Issue severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" | "informational" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" | "moderate" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!(
                "unknown severity '{other}'; expected: info, low, medium, high, critical"
            )),
        }
    }
}

/// The pipeline stage an issue originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovery,
    Resolution,
    Compliance,
    Build,
    Security,
    Deployment,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Discovery => "discovery",
            Stage::Resolution => "resolution",
            Stage::Compliance => "compliance",
            Stage::Build => "build",
            Stage::Security => "security",
            Stage::Deployment => "deployment",
        };
        f.write_str(s)
    }
}

/// What kind of problem an issue records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    DiscoveryError,
    UnknownDependency,
    ComplianceViolation,
    Remediated,
    BuildInvalid,
    SecurityBlocked,
    SecurityFinding,
    DeploymentFailure,
    HealthCheckFailure,
    RollbackFailure,
    BlockedByDependency,
    Timeout,
    Cancelled,
    Note,
}

/// Which stages a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Discover,
    Compliance,
    Build,
    Deploy,
    #[default]
    Full,
}

impl RunMode {
    pub fn runs_compliance(self) -> bool {
        matches!(self, RunMode::Compliance | RunMode::Full)
    }

    pub fn runs_build(self) -> bool {
        matches!(self, RunMode::Build | RunMode::Full)
    }

    pub fn runs_deploy(self) -> bool {
        matches!(self, RunMode::Deploy | RunMode::Full)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Discover => write!(f, "discover"),
            RunMode::Compliance => write!(f, "compliance"),
            RunMode::Build => write!(f, "build"),
            RunMode::Deploy => write!(f, "deploy"),
            RunMode::Full => write!(f, "full"),
        }
    }
}

/// Per-run lifecycle of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Discovered,
    ComplianceChecked,
    BuildValidated,
    Deploying,
    Deployed,
    Failed,
    RolledBack,
}

impl ProjectStatus {
    /// `Deployed`, `Failed` and `RolledBack` end a project's run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProjectStatus::Deployed | ProjectStatus::Failed | ProjectStatus::RolledBack
        )
    }

    fn can_advance_to(self, next: ProjectStatus) -> bool {
        use ProjectStatus::*;
        match (self, next) {
            (Discovered, ComplianceChecked | BuildValidated | Failed) => true,
            (ComplianceChecked, BuildValidated | Failed) => true,
            (BuildValidated, Deploying | Failed) => true,
            (Deploying, Deployed | Failed | RolledBack) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProjectStatus::Discovered => "discovered",
            ProjectStatus::ComplianceChecked => "compliance_checked",
            ProjectStatus::BuildValidated => "build_validated",
            ProjectStatus::Deploying => "deploying",
            ProjectStatus::Deployed => "deployed",
            ProjectStatus::Failed => "failed",
            ProjectStatus::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Issues
// ---------------------------------------------------------------------------

/// A single severity-tagged problem recorded against a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub stage: Stage,
    pub kind: IssueKind,
    pub severity: Severity,
    /// Blocking issues keep a project out of `Deploying`.
    pub blocking: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub message: String,
}

impl Issue {
    pub fn blocking(
        stage: Stage,
        kind: IssueKind,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            kind,
            severity,
            blocking: true,
            file: None,
            line: None,
            message: message.into(),
        }
    }

    /// A recorded but non-blocking issue.
    pub fn warning(
        stage: Stage,
        kind: IssueKind,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            blocking: false,
            ..Self::blocking(stage, kind, severity, message)
        }
    }

    pub fn info(stage: Stage, kind: IssueKind, message: impl Into<String>) -> Self {
        Self::warning(stage, kind, Severity::Info, message)
    }

    pub fn at(mut self, file: impl Into<PathBuf>, line: Option<usize>) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] ", self.stage, self.severity)?;
        if let Some(file) = &self.file {
            match self.line {
                Some(line) => write!(f, "{}:{}: ", file.display(), line)?,
                None => write!(f, "{}: ", file.display())?,
            }
        }
        f.write_str(&self.message)
    }
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// Deployment hooks declared in a project manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeploySpec {
    /// Custom deployment script, relative to the project root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
    /// Compensating action for `script`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<PathBuf>,
    /// Extra verification command run after the driver's own health check.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub health_check: Vec<String>,
}

/// An immutable project record produced by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDescriptor {
    pub name: ProjectName,
    pub priority: Priority,
    pub language: String,
    /// Declared dependencies, duplicates removed, declaration order kept.
    pub dependencies: Vec<ProjectName>,
    /// Absolute path to the project directory.
    pub root: PathBuf,
    pub manifest: PathBuf,
    #[serde(default)]
    pub required_files: Vec<PathBuf>,
    #[serde(default)]
    pub entry_points: Vec<PathBuf>,
    #[serde(default)]
    pub deploy: DeploySpec,
}

impl ProjectDescriptor {
    /// Minimal descriptor rooted at `root`; used by tests and embedders.
    pub fn new(name: impl Into<ProjectName>, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            name: name.into(),
            priority: DEFAULT_PRIORITY,
            language: "unknown".to_string(),
            dependencies: Vec::new(),
            manifest: root.join("project.yaml"),
            root,
            required_files: Vec::new(),
            entry_points: Vec::new(),
            deploy: DeploySpec::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ProjectName>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }
}

// ---------------------------------------------------------------------------
// Per-run state
// ---------------------------------------------------------------------------

/// Mutable per-run record for one project.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProjectState {
    pub name: ProjectName,
    pub status: ProjectStatus,
    pub compliance_evaluated: bool,
    pub build_evaluated: bool,
    pub discovery_issues: Vec<Issue>,
    pub compliance_issues: Vec<Issue>,
    pub build_issues: Vec<Issue>,
    pub security_issues: Vec<Issue>,
    pub deployment_issues: Vec<Issue>,
}

impl ProjectState {
    pub fn new(name: ProjectName) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    /// Move forward through the lifecycle. Backwards moves and moves out of a
    /// terminal status are rejected.
    pub fn advance(&mut self, next: ProjectStatus) -> Result<(), TransitionError> {
        if !self.status.can_advance_to(next) {
            return Err(TransitionError {
                project: self.name.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Mark the project `Failed` unless it already reached a terminal status.
    pub fn fail(&mut self) {
        if !self.status.is_terminal() {
            self.status = ProjectStatus::Failed;
        }
    }

    pub fn has_blocking_compliance_issue(&self) -> bool {
        self.compliance_issues.iter().any(|i| i.blocking)
    }

    pub fn has_blocking_build_issue(&self) -> bool {
        self.build_issues.iter().any(|i| i.blocking)
    }

    pub fn has_security_blocker(&self) -> bool {
        self.security_issues.iter().any(|i| i.blocking)
    }

    /// Record an issue in the list for its stage.
    pub fn push_issue(&mut self, issue: Issue) {
        match issue.stage {
            Stage::Discovery | Stage::Resolution => self.discovery_issues.push(issue),
            Stage::Compliance => self.compliance_issues.push(issue),
            Stage::Build => self.build_issues.push(issue),
            Stage::Security => self.record_security_issue(issue),
            Stage::Deployment => self.deployment_issues.push(issue),
        }
    }

    /// Record a security issue. Findings that arrive after the project is
    /// `Deployed` never block or roll back; they are kept for the next run.
    pub fn record_security_issue(&mut self, mut issue: Issue) {
        if self.status == ProjectStatus::Deployed && issue.blocking {
            issue.blocking = false;
            issue.kind = IssueKind::SecurityFinding;
            issue.message = format!(
                "{} (reported after deployment; flagged for the next run)",
                issue.message
            );
        }
        self.security_issues.push(issue);
    }

    /// All issues in pipeline order.
    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.discovery_issues
            .iter()
            .chain(self.compliance_issues.iter())
            .chain(self.build_issues.iter())
            .chain(self.security_issues.iter())
            .chain(self.deployment_issues.iter())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_by_impact() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low > Severity::Info);
        let mut all = vec![Severity::High, Severity::Info, Severity::Critical];
        all.sort();
        assert_eq!(all, vec![Severity::Info, Severity::High, Severity::Critical]);
    }

    #[test]
    fn severity_parses_case_insensitively() {
        assert_eq!("CRITICAL".parse::<Severity>(), Ok(Severity::Critical));
        assert_eq!(" Medium ".parse::<Severity>(), Ok(Severity::Medium));
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn status_moves_forward_only() {
        let mut state = ProjectState::new(ProjectName::from("api"));
        state.advance(ProjectStatus::ComplianceChecked).expect("forward");
        state.advance(ProjectStatus::BuildValidated).expect("forward");
        let err = state.advance(ProjectStatus::Discovered).unwrap_err();
        assert_eq!(err.from, ProjectStatus::BuildValidated);
        state.advance(ProjectStatus::Deploying).expect("forward");
        state.advance(ProjectStatus::RolledBack).expect("forward");
        assert!(state.advance(ProjectStatus::Deployed).is_err());
    }

    #[test]
    fn fail_keeps_terminal_status() {
        let mut state = ProjectState::new(ProjectName::from("api"));
        state.status = ProjectStatus::Deployed;
        state.fail();
        assert_eq!(state.status, ProjectStatus::Deployed);
    }

    #[test]
    fn security_issue_after_deployment_is_not_blocking() {
        let mut state = ProjectState::new(ProjectName::from("api"));
        state.status = ProjectStatus::Deployed;
        state.record_security_issue(Issue::blocking(
            Stage::Security,
            IssueKind::SecurityBlocked,
            Severity::Critical,
            "heap overflow",
        ));
        assert!(!state.has_security_blocker());
        assert_eq!(state.security_issues[0].kind, IssueKind::SecurityFinding);
        assert!(state.security_issues[0].message.contains("next run"));
    }

    #[test]
    fn issue_display_includes_location() {
        let issue = Issue::blocking(
            Stage::Compliance,
            IssueKind::ComplianceViolation,
            Severity::High,
            "forbidden term",
        )
        .at("src/main.py", Some(3));
        assert_eq!(
            issue.to_string(),
            "[compliance/high] src/main.py:3: forbidden term"
        );
    }

    #[test]
    fn run_mode_stage_selection() {
        assert!(RunMode::Full.runs_compliance() && RunMode::Full.runs_deploy());
        assert!(!RunMode::Deploy.runs_compliance());
        assert!(!RunMode::Discover.runs_build());
    }
}
