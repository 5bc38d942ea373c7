//! Runtime plumbing for the CLI: tracing setup, the tokio runtime, bounded
//! discovery, and ctrl-c handling around a single run.

use std::path::Path;
use std::time::Duration;

use convoy_core::report::AbortKind;
use convoy_core::{OrchestrationConfig, Registry, RunMode, RunReport};
use convoy_security::Advisories;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{io_err, OrchestratorError};
use crate::orchestrator::Orchestrator;

/// Install the global subscriber. `RUST_LOG` wins over `verbose`. Logs go to
/// stderr so a JSON report on stdout stays parseable.
pub fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// How long a finished run waits for timed-out blocking work before exiting.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn build_runtime() -> Result<tokio::runtime::Runtime, OrchestratorError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))
}

/// Scan `root` on the blocking pool, bounded by the discovery timeout.
pub async fn discover(
    root: &Path,
    config: &OrchestrationConfig,
) -> Result<Registry, OrchestratorError> {
    let limit = config.timeouts.discovery();
    let scan_root = root.to_path_buf();
    let scan_config = config.clone();
    let scan = tokio::task::spawn_blocking(move || Registry::discover(&scan_root, &scan_config));
    match tokio::time::timeout(limit, scan).await {
        Ok(joined) => {
            let registry = joined??;
            info!(
                root = %registry.root().display(),
                projects = registry.len(),
                errors = registry.discovery_errors().len(),
                "discovery finished"
            );
            Ok(registry)
        }
        Err(_) => Err(OrchestratorError::DiscoveryTimeout {
            root: root.to_path_buf(),
            secs: config.timeouts.discovery_secs,
        }),
    }
}

/// Blocking wrapper around [`discover`] for callers that never run a pipeline.
pub fn discover_blocking(
    root: &Path,
    config: &OrchestrationConfig,
) -> Result<Registry, OrchestratorError> {
    let runtime = build_runtime()?;
    let registry = runtime.block_on(discover(root, config));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    registry
}

/// Build a runtime, discover `root`, and block the current thread until the
/// run finishes.
pub fn start_blocking(
    orchestrator: &Orchestrator,
    root: &Path,
    advisories: &Advisories,
    mode: RunMode,
    dry_run: bool,
) -> Result<RunReport, OrchestratorError> {
    let runtime = build_runtime()?;
    let report = runtime.block_on(async {
        match discover(root, orchestrator.config()).await {
            Ok(registry) => {
                run_until_interrupted(orchestrator, &registry, advisories, mode, dry_run).await
            }
            Err(err) => {
                error!(root = %root.display(), error = %err, "discovery failed");
                discovery_aborted(mode, dry_run, &err)
            }
        }
    });
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    Ok(report)
}

/// A run that never got past discovery still yields a report.
fn discovery_aborted(mode: RunMode, dry_run: bool, err: &OrchestratorError) -> RunReport {
    let mut report = RunReport::new(mode, dry_run);
    report.set_abort(AbortKind::Discovery, err.to_string());
    report.finalize();
    report
}

/// Run once, cancelling on ctrl-c.
pub async fn run_until_interrupted(
    orchestrator: &Orchestrator,
    registry: &Registry,
    advisories: &Advisories,
    mode: RunMode,
    dry_run: bool,
) -> RunReport {
    let cancel = CancellationToken::new();
    let signal = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                signal = tokio::signal::ctrl_c() => match signal {
                    Ok(()) => {
                        info!("received ctrl-c, cancelling run");
                        cancel.cancel();
                    }
                    Err(err) => warn!(error = %err, "ctrl-c handler failed"),
                },
            }
        })
    };

    let report = orchestrator
        .run(registry, advisories, mode, dry_run, cancel.clone())
        .await;
    cancel.cancel();
    handle_join("signal", signal.await);
    report
}

fn handle_join(task: &str, result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        warn!(task, error = %err, "task join failure");
    }
}
