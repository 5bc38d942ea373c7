//! End-to-end runs against an in-memory deployment driver.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use convoy_core::config::RuleConfig;
use convoy_core::report::AbortKind;
use convoy_core::{
    IssueKind, OrchestrationConfig, ProjectDescriptor, ProjectName, ProjectStatus, Registry,
    RunMode, RunReport, Severity,
};
use convoy_deploy::{
    discover, start_blocking, DeployProgress, DeployReceipt, DeploymentDriver, DriverError,
    Orchestrator, OrchestratorError,
};
use convoy_security::{Advisories, SecurityFinding};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockDriver {
    fail_deploy: HashSet<String>,
    partial_deploy: HashSet<String>,
    unhealthy: HashSet<String>,
    fail_rollback: HashSet<String>,
    /// Commit, then never finish.
    hang: HashSet<String>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockDriver {
    fn record(&self, call: &str, project: &ProjectDescriptor) {
        self.calls
            .lock()
            .expect("calls lock")
            .push(format!("{call}:{}", project.name));
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn deployed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix("deploy:").map(str::to_string))
            .collect()
    }
}

fn set(names: &[&str]) -> HashSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl DeploymentDriver for MockDriver {
    fn describe(&self, project: &ProjectDescriptor) -> String {
        format!("mock deploy {}", project.name)
    }

    async fn deploy(
        &self,
        project: &ProjectDescriptor,
        progress: &DeployProgress,
    ) -> Result<DeployReceipt, DriverError> {
        self.record("deploy", project);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let name = project.name.as_str();
        let mut receipt = DeployReceipt::new(&project.name, "mock");
        if self.hang.contains(name) {
            receipt.committed = true;
            progress.record(&receipt);
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if self.partial_deploy.contains(name) {
            receipt.committed = true;
            return Err(DriverError::partial(
                receipt,
                DriverError::Unhealthy("push rejected".into()),
            ));
        }
        if self.fail_deploy.contains(name) {
            return Err(DriverError::CommandFailed {
                command: "mock".into(),
                status: Some(1),
                stderr: "boom".into(),
            });
        }
        receipt.committed = true;
        receipt.pushed = true;
        Ok(receipt)
    }

    async fn health_check(
        &self,
        project: &ProjectDescriptor,
        _receipt: &DeployReceipt,
    ) -> Result<(), DriverError> {
        self.record("health", project);
        if self.unhealthy.contains(project.name.as_str()) {
            return Err(DriverError::Unhealthy("endpoint returned 503".into()));
        }
        Ok(())
    }

    async fn rollback(
        &self,
        project: &ProjectDescriptor,
        _receipt: &DeployReceipt,
    ) -> Result<(), DriverError> {
        self.record("rollback", project);
        if self.fail_rollback.contains(project.name.as_str()) {
            return Err(DriverError::NoRollback {
                project: project.name.clone(),
            });
        }
        Ok(())
    }
}

fn project(dir: &Path, name: &str, priority: i64, deps: &[&str]) -> ProjectDescriptor {
    let root: PathBuf = dir.join(name);
    fs::create_dir_all(&root).expect("mkdir");
    fs::write(root.join("project.yaml"), format!("name: {name}\n")).expect("write manifest");
    ProjectDescriptor::new(name, root)
        .with_priority(priority)
        .with_dependencies(deps.iter().copied())
}

/// base <- mid <- top, plus an independent `solo`.
fn chain(dir: &Path) -> Registry {
    Registry::from_descriptors(
        dir,
        vec![
            project(dir, "base", 1, &[]),
            project(dir, "mid", 2, &["base"]),
            project(dir, "top", 1, &["mid"]),
            project(dir, "solo", 5, &[]),
        ],
    )
}

fn quiet_config() -> OrchestrationConfig {
    let mut config = OrchestrationConfig::default();
    config.compliance.rules = Vec::new();
    config
}

async fn run_with(
    driver: Arc<MockDriver>,
    config: OrchestrationConfig,
    registry: &Registry,
    advisories: &Advisories,
    mode: RunMode,
    dry_run: bool,
) -> RunReport {
    let orchestrator = Orchestrator::new(config, driver).expect("orchestrator");
    orchestrator
        .run(registry, advisories, mode, dry_run, CancellationToken::new())
        .await
}

fn status(report: &RunReport, name: &str) -> ProjectStatus {
    report.projects[&ProjectName::from(name)].status
}

fn has_issue(report: &RunReport, name: &str, kind: IssueKind) -> bool {
    report.projects[&ProjectName::from(name)]
        .issues
        .iter()
        .any(|i| i.kind == kind)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_run_deploys_everything_in_order() {
    let dir = TempDir::new().expect("tempdir");
    let registry = chain(dir.path());
    let driver = Arc::new(MockDriver::default());

    let report = run_with(
        driver.clone(),
        quiet_config(),
        &registry,
        &Advisories::new(),
        RunMode::Full,
        false,
    )
    .await;

    assert!(!report.has_failures(), "{report:#?}");
    assert_eq!(report.summary.deployed, 4);
    assert_eq!(report.summary.compliant, 4);
    assert_eq!(report.summary.build_valid, 4);
    let order: Vec<&str> = report.deployment_order.iter().map(|n| n.as_str()).collect();
    assert_eq!(order, vec!["base", "mid", "top", "solo"]);

    let deployed = driver.deployed();
    let pos = |n: &str| deployed.iter().position(|d| d == n).expect("deployed");
    assert!(pos("base") < pos("mid") && pos("mid") < pos("top"));
}

#[tokio::test]
async fn failed_health_check_rolls_back_and_blocks_dependents() {
    let dir = TempDir::new().expect("tempdir");
    let registry = chain(dir.path());
    let driver = Arc::new(MockDriver {
        unhealthy: set(&["mid"]),
        ..MockDriver::default()
    });

    let report = run_with(
        driver.clone(),
        quiet_config(),
        &registry,
        &Advisories::new(),
        RunMode::Full,
        false,
    )
    .await;

    assert_eq!(status(&report, "mid"), ProjectStatus::RolledBack);
    assert!(has_issue(&report, "mid", IssueKind::HealthCheckFailure));
    assert_eq!(status(&report, "top"), ProjectStatus::Failed);
    assert!(has_issue(&report, "top", IssueKind::BlockedByDependency));
    assert_eq!(status(&report, "base"), ProjectStatus::Deployed);
    assert_eq!(status(&report, "solo"), ProjectStatus::Deployed);
    assert!(!driver.deployed().contains(&"top".to_string()));
    assert!(driver.calls().contains(&"rollback:mid".to_string()));
    assert_eq!(report.summary.rolled_back, 1);
    assert!(report.has_failures());
}

#[tokio::test]
async fn failed_rollback_leaves_project_failed() {
    let dir = TempDir::new().expect("tempdir");
    let registry = chain(dir.path());
    let driver = Arc::new(MockDriver {
        unhealthy: set(&["base"]),
        fail_rollback: set(&["base"]),
        ..MockDriver::default()
    });

    let report = run_with(
        driver,
        quiet_config(),
        &registry,
        &Advisories::new(),
        RunMode::Full,
        false,
    )
    .await;

    assert_eq!(status(&report, "base"), ProjectStatus::Failed);
    let rollback = report.projects[&ProjectName::from("base")]
        .issues
        .iter()
        .find(|i| i.kind == IssueKind::RollbackFailure)
        .expect("rollback failure recorded");
    assert_eq!(rollback.severity, Severity::Critical);
    assert_eq!(status(&report, "mid"), ProjectStatus::Failed);
    assert_eq!(status(&report, "top"), ProjectStatus::Failed);
}

#[tokio::test]
async fn partial_deploy_is_compensated() {
    let dir = TempDir::new().expect("tempdir");
    let registry = chain(dir.path());
    let driver = Arc::new(MockDriver {
        partial_deploy: set(&["solo"]),
        fail_deploy: set(&["top"]),
        ..MockDriver::default()
    });

    let report = run_with(
        driver.clone(),
        quiet_config(),
        &registry,
        &Advisories::new(),
        RunMode::Full,
        false,
    )
    .await;

    assert_eq!(status(&report, "solo"), ProjectStatus::RolledBack);
    assert!(has_issue(&report, "solo", IssueKind::DeploymentFailure));
    assert_eq!(status(&report, "top"), ProjectStatus::Failed);
    assert!(!driver.calls().contains(&"rollback:top".to_string()));
}

#[tokio::test]
async fn security_blocker_stops_project_and_dependents() {
    let dir = TempDir::new().expect("tempdir");
    let registry = chain(dir.path());
    let mut advisories = Advisories::new();
    advisories.push(SecurityFinding {
        id: "VULN-001".into(),
        project: ProjectName::from("base"),
        severity: Severity::Critical,
        title: "Heap overflow".into(),
        description: String::new(),
        cwe: None,
        cvss: None,
        source: PathBuf::from("audit.md"),
    });
    advisories.push(SecurityFinding {
        id: "VULN-002".into(),
        project: ProjectName::from("solo"),
        severity: Severity::Low,
        title: "Verbose errors".into(),
        description: String::new(),
        cwe: None,
        cvss: None,
        source: PathBuf::from("audit.md"),
    });
    let driver = Arc::new(MockDriver::default());

    let report = run_with(
        driver.clone(),
        quiet_config(),
        &registry,
        &advisories,
        RunMode::Full,
        false,
    )
    .await;

    assert_eq!(status(&report, "base"), ProjectStatus::Failed);
    assert!(has_issue(&report, "base", IssueKind::SecurityBlocked));
    assert_eq!(status(&report, "mid"), ProjectStatus::Failed);
    assert_eq!(status(&report, "solo"), ProjectStatus::Deployed);
    assert!(has_issue(&report, "solo", IssueKind::SecurityFinding));
    assert_eq!(driver.deployed(), vec!["solo".to_string()]);
    assert_eq!(report.security.findings, 2);
    assert_eq!(report.security.blocking, 1);
}

#[tokio::test]
async fn build_failure_fails_project_before_deploy() {
    let dir = TempDir::new().expect("tempdir");
    let mut base = project(dir.path(), "base", 1, &[]);
    base.required_files = vec![PathBuf::from("Dockerfile")];
    let registry = Registry::from_descriptors(
        dir.path(),
        vec![base, project(dir.path(), "mid", 2, &["base"])],
    );
    let driver = Arc::new(MockDriver::default());

    let report = run_with(
        driver.clone(),
        quiet_config(),
        &registry,
        &Advisories::new(),
        RunMode::Full,
        false,
    )
    .await;

    let base = &report.projects[&ProjectName::from("base")];
    assert_eq!(base.status, ProjectStatus::Failed);
    assert_eq!(base.build_valid, Some(false));
    assert_eq!(status(&report, "mid"), ProjectStatus::Failed);
    assert!(has_issue(&report, "mid", IssueKind::BlockedByDependency));
    assert!(!has_issue(&report, "mid", IssueKind::BuildInvalid));
    assert!(driver.deployed().is_empty());
}

#[tokio::test]
async fn compliance_failure_blocks_the_whole_chain() {
    let dir = TempDir::new().expect("tempdir");
    let registry = chain(dir.path());
    fs::write(dir.path().join("base").join("notes.txt"), "internal use only\n").expect("write");
    let mut config = quiet_config();
    config.compliance.rules = vec![RuleConfig::ForbiddenTerms {
        terms: vec!["internal use only".into()],
        replacements: Default::default(),
        extensions: vec![],
        remediate: true,
    }];
    let driver = Arc::new(MockDriver::default());

    let report = run_with(
        driver.clone(),
        config,
        &registry,
        &Advisories::new(),
        RunMode::Full,
        false,
    )
    .await;

    let base = &report.projects[&ProjectName::from("base")];
    assert_eq!(base.status, ProjectStatus::Failed);
    assert_eq!(base.compliant, Some(false));
    assert!(has_issue(&report, "base", IssueKind::ComplianceViolation));
    for name in ["mid", "top"] {
        assert_eq!(status(&report, name), ProjectStatus::Failed, "{name}");
        assert!(has_issue(&report, name, IssueKind::BlockedByDependency), "{name}");
    }
    assert_eq!(status(&report, "solo"), ProjectStatus::Deployed);
    assert_eq!(driver.deployed(), vec!["solo".to_string()]);
}

#[tokio::test]
async fn timed_out_deploy_rolls_back_what_it_committed() {
    let dir = TempDir::new().expect("tempdir");
    let registry = chain(dir.path());
    let driver = Arc::new(MockDriver {
        hang: set(&["solo"]),
        ..MockDriver::default()
    });
    let mut config = quiet_config();
    config.timeouts.deploy_secs = 1;

    let report = run_with(
        driver.clone(),
        config,
        &registry,
        &Advisories::new(),
        RunMode::Full,
        false,
    )
    .await;

    assert_eq!(status(&report, "solo"), ProjectStatus::RolledBack);
    assert!(has_issue(&report, "solo", IssueKind::Timeout));
    assert!(driver.calls().contains(&"rollback:solo".to_string()));
    assert_eq!(status(&report, "top"), ProjectStatus::Deployed);
}

#[tokio::test]
async fn timed_out_deploy_is_left_alone_without_rollback_on_failure() {
    let dir = TempDir::new().expect("tempdir");
    let registry = Registry::from_descriptors(dir.path(), vec![project(dir.path(), "api", 1, &[])]);
    let driver = Arc::new(MockDriver {
        hang: set(&["api"]),
        ..MockDriver::default()
    });
    let mut config = quiet_config();
    config.timeouts.deploy_secs = 1;
    config.deployment.rollback_on_failure = false;

    let report = run_with(
        driver.clone(),
        config,
        &registry,
        &Advisories::new(),
        RunMode::Full,
        false,
    )
    .await;

    assert_eq!(status(&report, "api"), ProjectStatus::Failed);
    assert!(has_issue(&report, "api", IssueKind::Note));
    assert!(!driver.calls().contains(&"rollback:api".to_string()));
}

#[tokio::test]
async fn cycle_aborts_without_deploying() {
    let dir = TempDir::new().expect("tempdir");
    let registry = Registry::from_descriptors(
        dir.path(),
        vec![
            project(dir.path(), "x", 1, &["y"]),
            project(dir.path(), "y", 1, &["x"]),
        ],
    );
    let driver = Arc::new(MockDriver::default());

    let report = run_with(
        driver.clone(),
        quiet_config(),
        &registry,
        &Advisories::new(),
        RunMode::Full,
        false,
    )
    .await;

    let abort = report.abort.as_ref().expect("aborted");
    assert_eq!(abort.kind, AbortKind::CycleDetected);
    assert!(abort.message.contains("x -> y"));
    assert!(driver.calls().is_empty());
    assert_eq!(status(&report, "x"), ProjectStatus::Discovered);
    assert!(report.has_failures());
}

#[tokio::test]
async fn lenient_unknown_dependency_is_a_warning() {
    let dir = TempDir::new().expect("tempdir");
    let registry = Registry::from_descriptors(
        dir.path(),
        vec![project(dir.path(), "api", 1, &["ghost"])],
    );
    let mut config = quiet_config();
    config.strict = false;

    let report = run_with(
        Arc::new(MockDriver::default()),
        config,
        &registry,
        &Advisories::new(),
        RunMode::Full,
        false,
    )
    .await;

    assert_eq!(status(&report, "api"), ProjectStatus::Deployed);
    let issue = report.projects[&ProjectName::from("api")]
        .issues
        .iter()
        .find(|i| i.kind == IssueKind::UnknownDependency)
        .expect("warning recorded");
    assert!(!issue.blocking);
}

#[tokio::test]
async fn dry_run_plans_waves_without_calling_the_driver() {
    let dir = TempDir::new().expect("tempdir");
    let registry = chain(dir.path());
    let driver = Arc::new(MockDriver::default());

    let report = run_with(
        driver.clone(),
        quiet_config(),
        &registry,
        &Advisories::new(),
        RunMode::Full,
        true,
    )
    .await;

    assert!(driver.calls().is_empty());
    assert!(!report.has_failures());
    let planned: Vec<(usize, &str)> = report
        .planned_actions
        .iter()
        .map(|a| (a.wave, a.project.as_str()))
        .collect();
    assert_eq!(planned, vec![(0, "base"), (0, "solo"), (1, "mid"), (2, "top")]);
    assert_eq!(report.planned_actions[0].action, "mock deploy base");
    assert_eq!(status(&report, "top"), ProjectStatus::BuildValidated);
}

#[tokio::test]
async fn compliance_mode_never_deploys() {
    let dir = TempDir::new().expect("tempdir");
    let registry = chain(dir.path());
    let driver = Arc::new(MockDriver::default());

    let report = run_with(
        driver.clone(),
        quiet_config(),
        &registry,
        &Advisories::new(),
        RunMode::Compliance,
        false,
    )
    .await;

    assert!(driver.calls().is_empty());
    assert_eq!(status(&report, "base"), ProjectStatus::ComplianceChecked);
    assert_eq!(report.projects[&ProjectName::from("base")].build_valid, None);
    assert_eq!(report.summary.compliant, 4);
}

#[tokio::test]
async fn deploy_mode_skips_gates_with_a_note() {
    let dir = TempDir::new().expect("tempdir");
    let registry = chain(dir.path());

    let report = run_with(
        Arc::new(MockDriver::default()),
        quiet_config(),
        &registry,
        &Advisories::new(),
        RunMode::Deploy,
        false,
    )
    .await;

    assert_eq!(report.summary.deployed, 4);
    assert!(has_issue(&report, "base", IssueKind::Note));
    assert_eq!(report.projects[&ProjectName::from("base")].compliant, None);
}

#[tokio::test]
async fn deployment_concurrency_is_bounded() {
    let dir = TempDir::new().expect("tempdir");
    let registry = Registry::from_descriptors(
        dir.path(),
        (0..5)
            .map(|i| project(dir.path(), &format!("p{i}"), 1, &[]))
            .collect::<Vec<_>>(),
    );
    let driver = Arc::new(MockDriver {
        delay: Duration::from_millis(50),
        ..MockDriver::default()
    });
    let mut config = quiet_config();
    config.concurrency.deployment = 2;

    let report = run_with(
        driver.clone(),
        config,
        &registry,
        &Advisories::new(),
        RunMode::Deploy,
        false,
    )
    .await;

    assert_eq!(report.summary.deployed, 5);
    assert_eq!(driver.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cancellation_finalizes_a_partial_report() {
    let dir = TempDir::new().expect("tempdir");
    let registry = chain(dir.path());
    let driver = Arc::new(MockDriver {
        delay: Duration::from_secs(30),
        ..MockDriver::default()
    });
    let orchestrator = Orchestrator::new(quiet_config(), driver).expect("orchestrator");
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        });
    }

    let report = orchestrator
        .run(&registry, &Advisories::new(), RunMode::Full, false, cancel)
        .await;

    assert_eq!(report.abort.as_ref().map(|a| a.kind), Some(AbortKind::Cancelled));
    for name in ["base", "mid", "top", "solo"] {
        assert_eq!(status(&report, name), ProjectStatus::Failed, "{name}");
    }
    assert!(has_issue(&report, "base", IssueKind::Cancelled));
    assert!(has_issue(&report, "top", IssueKind::Cancelled));
}

#[tokio::test]
async fn cancelled_deploy_rolls_back_what_it_committed() {
    let dir = TempDir::new().expect("tempdir");
    let registry = Registry::from_descriptors(dir.path(), vec![project(dir.path(), "api", 1, &[])]);
    let driver = Arc::new(MockDriver {
        hang: set(&["api"]),
        ..MockDriver::default()
    });
    let orchestrator = Orchestrator::new(quiet_config(), driver.clone()).expect("orchestrator");
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        });
    }

    let report = orchestrator
        .run(&registry, &Advisories::new(), RunMode::Full, false, cancel)
        .await;

    assert_eq!(status(&report, "api"), ProjectStatus::RolledBack);
    assert!(has_issue(&report, "api", IssueKind::Cancelled));
    assert!(driver.calls().contains(&"rollback:api".to_string()));
}

#[tokio::test]
async fn run_deadline_aborts_with_timeout() {
    let dir = TempDir::new().expect("tempdir");
    let registry = Registry::from_descriptors(dir.path(), vec![project(dir.path(), "api", 1, &[])]);
    let driver = Arc::new(MockDriver {
        delay: Duration::from_secs(30),
        ..MockDriver::default()
    });
    let mut config = quiet_config();
    config.timeouts.run_secs = Some(1);

    let report = run_with(driver, config, &registry, &Advisories::new(), RunMode::Full, false).await;

    assert_eq!(report.abort.as_ref().map(|a| a.kind), Some(AbortKind::Timeout));
    assert_eq!(status(&report, "api"), ProjectStatus::Failed);
}

#[tokio::test]
async fn discover_scans_the_root_off_the_runtime() {
    let dir = TempDir::new().expect("tempdir");
    for name in ["api", "web"] {
        fs::create_dir_all(dir.path().join(name)).expect("mkdir");
        fs::write(dir.path().join(name).join("project.yaml"), "priority: 3\n").expect("manifest");
    }

    let registry = discover(dir.path(), &OrchestrationConfig::default())
        .await
        .expect("discover");
    assert_eq!(registry.names(), vec![ProjectName::from("api"), ProjectName::from("web")]);

    let missing = discover(&dir.path().join("nope"), &OrchestrationConfig::default()).await;
    assert!(matches!(missing, Err(OrchestratorError::Registry(_))));
}

#[test]
fn failed_discovery_yields_an_aborted_report() {
    let dir = TempDir::new().expect("tempdir");
    let orchestrator =
        Orchestrator::new(quiet_config(), Arc::new(MockDriver::default())).expect("orchestrator");

    let report = start_blocking(
        &orchestrator,
        &dir.path().join("nope"),
        &Advisories::new(),
        RunMode::Full,
        false,
    )
    .expect("report");

    let abort = report.abort.as_ref().expect("aborted");
    assert_eq!(abort.kind, AbortKind::Discovery);
    assert!(report.projects.is_empty());
    assert!(report.has_failures());
}
