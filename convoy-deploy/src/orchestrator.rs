//! The run pipeline: resolve, validate, gate on security, deploy in waves.
//!
//! Everything is recorded as an issue against a project; nothing is skipped
//! silently. The run always produces a report, even when resolution aborts or
//! the run is cancelled.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use convoy_core::report::{AbortKind, PlannedAction};
use convoy_core::{
    DependencyGraph, DeploymentOrder, GraphError, Issue, IssueKind, OrchestrationConfig,
    ProjectDescriptor, ProjectName, ProjectState, ProjectStatus, Registry, RunMode, RunReport,
    Severity, Stage,
};
use convoy_gate::{BuildValidator, ComplianceGate, ComplianceResult};
use convoy_security::Advisories;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::driver::{DeployProgress, DeployReceipt, DeploymentDriver, StandardDriver};
use crate::error::{DriverError, OrchestratorError};

pub struct Orchestrator {
    config: Arc<OrchestrationConfig>,
    gate: Arc<ComplianceGate>,
    validator: Arc<BuildValidator>,
    driver: Arc<dyn DeploymentDriver>,
}

/// Mutable bookkeeping for one run.
struct Run {
    mode: RunMode,
    dry_run: bool,
    report: RunReport,
    states: BTreeMap<ProjectName, ProjectState>,
    planned: HashSet<ProjectName>,
}

impl Run {
    fn new(registry: &Registry, mode: RunMode, dry_run: bool) -> Self {
        let states = registry
            .names()
            .into_iter()
            .map(|name| (name.clone(), ProjectState::new(name)))
            .collect();
        Self {
            mode,
            dry_run,
            report: RunReport::new(mode, dry_run),
            states,
            planned: HashSet::new(),
        }
    }

    fn abort_on(&mut self, err: &GraphError) {
        error!(error = %err, "dependency resolution failed; no project will be deployed");
        let kind = match err {
            GraphError::CycleDetected { .. } => AbortKind::CycleDetected,
            GraphError::UnknownDependency { project, .. } => {
                if let Some(state) = self.states.get_mut(project) {
                    state.push_issue(Issue::blocking(
                        Stage::Resolution,
                        IssueKind::UnknownDependency,
                        Severity::High,
                        err.to_string(),
                    ));
                }
                AbortKind::UnknownDependency
            }
            GraphError::OrderViolation { .. } => AbortKind::OrderViolation,
        };
        self.report.set_abort(kind, err.to_string());
    }

    /// Whether a project got as far as this run's mode takes it.
    fn finished(&self, name: &ProjectName, state: &ProjectState) -> bool {
        if state.status.is_terminal() {
            return true;
        }
        match self.mode {
            RunMode::Discover => true,
            RunMode::Compliance => state.status == ProjectStatus::ComplianceChecked,
            RunMode::Build => state.status == ProjectStatus::BuildValidated,
            RunMode::Deploy | RunMode::Full => self.dry_run && self.planned.contains(name),
        }
    }

    /// Fail every project the interrupted run did not get to.
    fn interrupt(&mut self, kind: IssueKind, message: &str) {
        let pending: Vec<ProjectName> = self
            .states
            .iter()
            .filter(|(name, state)| !self.finished(name, state))
            .map(|(name, _)| name.clone())
            .collect();
        let stage = if self.mode.runs_deploy() {
            Stage::Deployment
        } else {
            gate_stage(self.mode)
        };
        for name in pending {
            if let Some(state) = self.states.get_mut(&name) {
                state.push_issue(Issue::blocking(
                    stage,
                    kind,
                    Severity::High,
                    message,
                ));
                state.fail();
            }
        }
    }
}

impl Orchestrator {
    pub fn new(
        config: OrchestrationConfig,
        driver: Arc<dyn DeploymentDriver>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let gate = ComplianceGate::from_config(&config.compliance)?;
        let validator = BuildValidator::from_config(&config.build);
        Ok(Self {
            config: Arc::new(config),
            gate: Arc::new(gate),
            validator: Arc::new(validator),
            driver,
        })
    }

    /// An orchestrator using the git/script driver selection.
    pub fn with_standard_driver(config: OrchestrationConfig) -> Result<Self, OrchestratorError> {
        let driver = Arc::new(StandardDriver::from_config(&config.deployment));
        Self::new(config, driver)
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    /// Execute one run over `registry`. Cancelling `cancel` (or hitting the
    /// configured run deadline) stops new work, lets rollbacks finish, and
    /// returns a partial report with an abort reason.
    pub async fn run(
        &self,
        registry: &Registry,
        advisories: &Advisories,
        mode: RunMode,
        dry_run: bool,
        cancel: CancellationToken,
    ) -> RunReport {
        let started = Instant::now();
        let token = cancel.child_token();
        let deadline_hit = Arc::new(AtomicBool::new(false));
        let deadline = self
            .config
            .timeouts
            .run()
            .map(|limit| spawn_deadline(limit, token.clone(), deadline_hit.clone()));

        info!(
            root = %registry.root().display(),
            projects = registry.len(),
            %mode,
            dry_run,
            "run started"
        );

        let mut run = Run::new(registry, mode, dry_run);
        run.report.discovery_errors = registry.discovery_errors().to_vec();
        self.execute(registry, advisories, &mut run, &token).await;

        if token.is_cancelled() {
            if deadline_hit.load(Ordering::SeqCst) {
                let secs = self.config.timeouts.run_secs.unwrap_or_default();
                let message = format!("run deadline of {secs}s reached");
                warn!(deadline_secs = secs, "run deadline reached");
                run.interrupt(IssueKind::Timeout, &format!("{message} before this project finished"));
                run.report.set_abort(AbortKind::Timeout, message);
            } else {
                warn!("run cancelled");
                run.interrupt(IssueKind::Cancelled, "run cancelled before this project finished");
                run.report.set_abort(AbortKind::Cancelled, "run cancelled");
            }
        }
        if let Some(handle) = deadline {
            handle.abort();
        }

        for descriptor in registry.projects() {
            if let Some(state) = run.states.get(&descriptor.name) {
                run.report.record_project(descriptor, state);
            }
        }
        run.report.finalize();

        let s = &run.report.summary;
        info!(
            total = s.total,
            deployed = s.deployed,
            failed = s.failed,
            rolled_back = s.rolled_back,
            aborted = run.report.abort.is_some(),
            duration_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );
        run.report
    }

    async fn execute(
        &self,
        registry: &Registry,
        advisories: &Advisories,
        run: &mut Run,
        token: &CancellationToken,
    ) {
        self.merge_security(registry, advisories, run);

        let graph = match DependencyGraph::build(registry, self.config.strict) {
            Ok(graph) => graph,
            Err(err) => return run.abort_on(&err),
        };
        for edge in graph.dropped_edges() {
            warn!(project = %edge.project, missing = %edge.missing, "ignoring unknown dependency");
            if let Some(state) = run.states.get_mut(&edge.project) {
                state.push_issue(Issue::warning(
                    Stage::Resolution,
                    IssueKind::UnknownDependency,
                    Severity::Medium,
                    format!("unknown dependency '{}' ignored", edge.missing),
                ));
            }
        }
        let order = match graph.deployment_order() {
            Ok(order) => order,
            Err(err) => return run.abort_on(&err),
        };
        if let Err(err) = order.verify(&graph) {
            return run.abort_on(&err);
        }
        let sequence: Vec<&str> = order.iter().map(ProjectName::as_str).collect();
        info!(order = ?sequence, "deployment order resolved");
        run.report.set_order(order.clone());

        if run.mode == RunMode::Discover {
            return;
        }

        if run.mode.runs_compliance() || run.mode.runs_build() {
            self.validate(registry, &order, run, token).await;
        } else {
            for state in run.states.values_mut() {
                state.push_issue(Issue::info(
                    Stage::Build,
                    IssueKind::Note,
                    "validation gates skipped in deploy mode",
                ));
                if let Err(err) = state.advance(ProjectStatus::BuildValidated) {
                    warn!(error = %err, "unexpected transition");
                }
            }
        }

        if run.mode.runs_deploy() && !token.is_cancelled() {
            self.deploy_waves(registry, &graph, &order, run, token).await;
        }
    }

    // -----------------------------------------------------------------------
    // Security
    // -----------------------------------------------------------------------

    fn merge_security(&self, registry: &Registry, advisories: &Advisories, run: &mut Run) {
        let threshold = self.config.security.blocking_severity;
        for finding in advisories.findings() {
            if let Some(state) = run.states.get_mut(&finding.project) {
                state.record_security_issue(finding.to_issue(threshold));
            }
        }
        run.report.security = advisories.summary(threshold, |p| registry.contains(p));
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    async fn validate(
        &self,
        registry: &Registry,
        order: &DeploymentOrder,
        run: &mut Run,
        token: &CancellationToken,
    ) {
        let mode = run.mode;
        let dry_run = run.dry_run;
        let limit = Arc::new(Semaphore::new(self.config.concurrency.validation));
        let timeout = self.config.timeouts.gate();

        let mut tasks = JoinSet::new();
        for name in order.iter() {
            let Some(project) = registry.get(name).cloned() else {
                continue;
            };
            let gate = self.gate.clone();
            let validator = self.validator.clone();
            let limit = limit.clone();
            let token = token.clone();
            tasks.spawn(async move {
                let name = project.name.clone();
                let outcome =
                    validate_project(project, gate, validator, mode, dry_run, limit, timeout, token)
                        .await;
                (name, outcome)
            });
        }

        let mut seen = HashSet::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, outcome)) => {
                    if let Some(state) = run.states.get_mut(&name) {
                        apply_validation(state, mode, outcome, timeout);
                    }
                    seen.insert(name);
                }
                Err(err) => error!(error = %err, "validation task failed"),
            }
        }

        for (name, state) in run.states.iter_mut() {
            if !seen.contains(name) {
                state.push_issue(Issue::blocking(
                    gate_stage(mode),
                    IssueKind::Note,
                    Severity::High,
                    "validation did not complete",
                ));
                state.fail();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Deployment
    // -----------------------------------------------------------------------

    async fn deploy_waves(
        &self,
        registry: &Registry,
        graph: &DependencyGraph,
        order: &DeploymentOrder,
        run: &mut Run,
        token: &CancellationToken,
    ) {
        let limit = Arc::new(Semaphore::new(self.config.concurrency.deployment));

        for (wave, names) in graph.waves(order).into_iter().enumerate() {
            if token.is_cancelled() {
                break;
            }
            let ready = self.ready_set(registry, graph, &names, run);
            debug!(wave, ready = ready.len(), size = names.len(), "wave prepared");

            if run.dry_run {
                for project in ready {
                    let action = self.driver.describe(&project);
                    info!(wave, project = %project.name, %action, "planned");
                    run.report.planned_actions.push(PlannedAction {
                        wave,
                        project: project.name.clone(),
                        action,
                    });
                    run.planned.insert(project.name);
                }
                continue;
            }

            let mut tasks = JoinSet::new();
            for project in ready {
                let Some(state) = run.states.get_mut(&project.name) else {
                    continue;
                };
                if let Err(err) = state.advance(ProjectStatus::Deploying) {
                    warn!(error = %err, "unexpected transition");
                    continue;
                }
                let driver = self.driver.clone();
                let config = self.config.clone();
                let limit = limit.clone();
                let token = token.clone();
                tasks.spawn(async move {
                    let name = project.name.clone();
                    let outcome = deploy_project(driver, project, config, limit, token).await;
                    (name, outcome)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((name, outcome)) => {
                        if let Some(state) = run.states.get_mut(&name) {
                            state.deployment_issues.extend(outcome.issues);
                            if let Err(err) = state.advance(outcome.status) {
                                warn!(error = %err, "unexpected transition");
                                state.fail();
                            }
                        }
                    }
                    Err(err) => error!(error = %err, "deployment task failed"),
                }
            }

            for state in run.states.values_mut() {
                if state.status == ProjectStatus::Deploying {
                    state.push_issue(Issue::blocking(
                        Stage::Deployment,
                        IssueKind::DeploymentFailure,
                        Severity::High,
                        "deployment task ended without a result",
                    ));
                    state.status = ProjectStatus::Failed;
                }
            }
        }
    }

    /// The projects of one wave that may deploy. Every other project in the
    /// wave is failed with the reason recorded.
    fn ready_set(
        &self,
        registry: &Registry,
        graph: &DependencyGraph,
        names: &[ProjectName],
        run: &mut Run,
    ) -> Vec<ProjectDescriptor> {
        let mut ready = Vec::new();
        for name in names {
            let Some(project) = registry.get(name) else {
                continue;
            };
            let blocked_by = graph.dependencies_of(name).into_iter().find(|dep| {
                let deployed = run
                    .states
                    .get(dep)
                    .map(|s| s.status == ProjectStatus::Deployed)
                    .unwrap_or(false);
                !(deployed || run.planned.contains(dep))
            });
            let Some(state) = run.states.get_mut(name) else {
                continue;
            };

            if state.status == ProjectStatus::Failed {
                debug!(project = %name, "not deployed: failed validation");
                continue;
            }
            if let Some(dep) = blocked_by {
                info!(project = %name, dependency = %dep, "blocked by dependency");
                state.push_issue(Issue::blocking(
                    Stage::Deployment,
                    IssueKind::BlockedByDependency,
                    Severity::High,
                    format!("not deployed: dependency '{dep}' did not deploy"),
                ));
                state.fail();
                continue;
            }
            if state.has_security_blocker() {
                info!(project = %name, "blocked by security finding");
                state.fail();
                continue;
            }
            if state.status != ProjectStatus::BuildValidated {
                state.push_issue(Issue::blocking(
                    Stage::Deployment,
                    IssueKind::Note,
                    Severity::High,
                    format!("not deployed: status is {}", state.status),
                ));
                state.fail();
                continue;
            }
            ready.push(project.clone());
        }
        ready
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

enum ValidationOutcome {
    Finished {
        compliance: Option<Result<ComplianceResult, String>>,
        build: Option<Vec<Issue>>,
    },
    TimedOut,
    Cancelled,
    Crashed(String),
}

fn gate_stage(mode: RunMode) -> Stage {
    if mode.runs_compliance() {
        Stage::Compliance
    } else {
        Stage::Build
    }
}

#[allow(clippy::too_many_arguments)]
async fn validate_project(
    project: ProjectDescriptor,
    gate: Arc<ComplianceGate>,
    validator: Arc<BuildValidator>,
    mode: RunMode,
    dry_run: bool,
    limit: Arc<Semaphore>,
    timeout: Duration,
    token: CancellationToken,
) -> ValidationOutcome {
    let _permit = tokio::select! {
        permit = limit.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return ValidationOutcome::Cancelled,
        },
        _ = token.cancelled() => return ValidationOutcome::Cancelled,
    };

    let started = Instant::now();
    let name = project.name.clone();
    let work = tokio::task::spawn_blocking(move || {
        let compliance = mode
            .runs_compliance()
            .then(|| gate.run(&project, dry_run).map_err(|e| e.to_string()));
        let build = mode.runs_build().then(|| validator.validate(&project));
        (compliance, build)
    });

    let outcome = tokio::select! {
        _ = token.cancelled() => ValidationOutcome::Cancelled,
        joined = tokio::time::timeout(timeout, work) => match joined {
            Ok(Ok((compliance, build))) => ValidationOutcome::Finished { compliance, build },
            Ok(Err(err)) => ValidationOutcome::Crashed(err.to_string()),
            Err(_) => ValidationOutcome::TimedOut,
        },
    };
    debug!(
        project = %name,
        duration_ms = started.elapsed().as_millis() as u64,
        "validation finished"
    );
    outcome
}

fn apply_validation(
    state: &mut ProjectState,
    mode: RunMode,
    outcome: ValidationOutcome,
    timeout: Duration,
) {
    let stage = gate_stage(mode);
    match outcome {
        ValidationOutcome::Finished { compliance, build } => {
            if let Some(result) = compliance {
                state.compliance_evaluated = true;
                match result {
                    Ok(result) => state.compliance_issues.extend(result.issues),
                    Err(message) => state.push_issue(Issue::blocking(
                        Stage::Compliance,
                        IssueKind::ComplianceViolation,
                        Severity::High,
                        format!("compliance gate error: {message}"),
                    )),
                }
            }
            if let Some(issues) = build {
                state.build_evaluated = true;
                state.build_issues.extend(issues);
            }
        }
        ValidationOutcome::TimedOut => {
            state.compliance_evaluated |= mode.runs_compliance();
            state.build_evaluated |= mode.runs_build();
            state.push_issue(Issue::blocking(
                stage,
                IssueKind::Timeout,
                Severity::High,
                format!("validation timed out after {}s", timeout.as_secs()),
            ));
        }
        ValidationOutcome::Cancelled => state.push_issue(Issue::blocking(
            stage,
            IssueKind::Cancelled,
            Severity::High,
            "validation cancelled",
        )),
        ValidationOutcome::Crashed(message) => state.push_issue(Issue::blocking(
            stage,
            IssueKind::Note,
            Severity::High,
            format!("validation crashed: {message}"),
        )),
    }

    if state.has_blocking_compliance_issue() || state.has_blocking_build_issue() {
        state.fail();
        return;
    }
    let mut steps = Vec::new();
    if state.compliance_evaluated {
        steps.push(ProjectStatus::ComplianceChecked);
    }
    if state.build_evaluated {
        steps.push(ProjectStatus::BuildValidated);
    }
    for next in steps {
        if let Err(err) = state.advance(next) {
            warn!(error = %err, "unexpected transition");
        }
    }
}

struct DeployOutcome {
    status: ProjectStatus,
    issues: Vec<Issue>,
}

impl DeployOutcome {
    fn deployed() -> Self {
        Self {
            status: ProjectStatus::Deployed,
            issues: Vec::new(),
        }
    }

    fn failed(issue: Issue) -> Self {
        Self {
            status: ProjectStatus::Failed,
            issues: vec![issue],
        }
    }

    fn cancelled(message: &str) -> Self {
        Self::failed(Issue::blocking(
            Stage::Deployment,
            IssueKind::Cancelled,
            Severity::High,
            message,
        ))
    }
}

async fn deploy_project(
    driver: Arc<dyn DeploymentDriver>,
    project: ProjectDescriptor,
    config: Arc<OrchestrationConfig>,
    limit: Arc<Semaphore>,
    token: CancellationToken,
) -> DeployOutcome {
    let _permit = tokio::select! {
        permit = limit.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return DeployOutcome::cancelled("deployment cancelled before it started"),
        },
        _ = token.cancelled() => return DeployOutcome::cancelled("deployment cancelled before it started"),
    };
    let timeouts = config.timeouts;
    let started = Instant::now();
    info!(project = %project.name, "deploying");

    let progress = DeployProgress::new();
    let deployed = tokio::select! {
        _ = token.cancelled() => {
            let mut outcome = DeployOutcome::cancelled("deployment cancelled while in flight");
            let partial = progress.snapshot();
            compensate_partial(driver.as_ref(), &project, partial.as_ref(), &config, &mut outcome)
                .await;
            return outcome;
        }
        result = tokio::time::timeout(timeouts.deploy(), driver.deploy(&project, &progress)) => result,
    };
    let receipt = match deployed {
        Ok(Ok(receipt)) => receipt,
        Ok(Err(err)) => {
            warn!(project = %project.name, error = %err, "deployment failed");
            let mut outcome = DeployOutcome::failed(Issue::blocking(
                Stage::Deployment,
                IssueKind::DeploymentFailure,
                Severity::High,
                format!("deployment failed: {err}"),
            ));
            let partial = err.partial_receipt().cloned().or_else(|| progress.snapshot());
            compensate_partial(driver.as_ref(), &project, partial.as_ref(), &config, &mut outcome)
                .await;
            return outcome;
        }
        Err(_) => {
            warn!(project = %project.name, "deployment timed out");
            let mut outcome = DeployOutcome::failed(Issue::blocking(
                Stage::Deployment,
                IssueKind::Timeout,
                Severity::High,
                format!("deployment timed out after {}s", timeouts.deploy_secs),
            ));
            let partial = progress.snapshot();
            compensate_partial(driver.as_ref(), &project, partial.as_ref(), &config, &mut outcome)
                .await;
            return outcome;
        }
    };

    let checked = tokio::select! {
        _ = token.cancelled() => return DeployOutcome::cancelled(
            "cancelled before the health check completed; deployment left in place",
        ),
        result = tokio::time::timeout(timeouts.health_check(), driver.health_check(&project, &receipt)) => result,
    };
    let failure = match checked {
        Ok(Ok(())) => {
            info!(
                project = %project.name,
                duration_ms = started.elapsed().as_millis() as u64,
                "deployed"
            );
            return DeployOutcome::deployed();
        }
        Ok(Err(DriverError::Unhealthy(message))) => format!("health check failed: {message}"),
        Ok(Err(err)) => format!("health check failed: {err}"),
        Err(_) => format!(
            "health check timed out after {}s",
            timeouts.health_check_secs
        ),
    };
    warn!(project = %project.name, reason = %failure, "health check failed; rolling back");

    let mut outcome = DeployOutcome::failed(Issue::blocking(
        Stage::Deployment,
        IssueKind::HealthCheckFailure,
        Severity::High,
        failure,
    ));
    compensate(driver.as_ref(), &project, &receipt, timeouts.rollback(), &mut outcome).await;
    outcome
}

/// Undo whatever an interrupted or failed deployment left behind, if anything
/// was committed and `rollback_on_failure` allows it.
async fn compensate_partial(
    driver: &dyn DeploymentDriver,
    project: &ProjectDescriptor,
    partial: Option<&DeployReceipt>,
    config: &OrchestrationConfig,
    outcome: &mut DeployOutcome,
) {
    let Some(receipt) = partial.filter(|r| r.committed) else {
        return;
    };
    if config.deployment.rollback_on_failure {
        compensate(driver, project, receipt, config.timeouts.rollback(), outcome).await;
    } else {
        outcome.issues.push(Issue::info(
            Stage::Deployment,
            IssueKind::Note,
            "partial deployment left in place; rollback_on_failure is off",
        ));
    }
}

/// Roll back a deployment. Runs to completion even when the run is cancelled.
async fn compensate(
    driver: &dyn DeploymentDriver,
    project: &ProjectDescriptor,
    receipt: &DeployReceipt,
    limit: Duration,
    outcome: &mut DeployOutcome,
) {
    let failure = match tokio::time::timeout(limit, driver.rollback(project, receipt)).await {
        Ok(Ok(())) => {
            info!(project = %project.name, "rolled back");
            outcome.status = ProjectStatus::RolledBack;
            return;
        }
        Ok(Err(err)) => format!("rollback failed: {err}"),
        Err(_) => format!("rollback timed out after {}s", limit.as_secs()),
    };
    error!(project = %project.name, reason = %failure, "rollback failed");
    outcome.status = ProjectStatus::Failed;
    outcome.issues.push(Issue::blocking(
        Stage::Deployment,
        IssueKind::RollbackFailure,
        Severity::Critical,
        failure,
    ));
}

fn spawn_deadline(
    limit: Duration,
    token: CancellationToken,
    hit: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(limit) => {
                hit.store(true, Ordering::SeqCst);
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}
