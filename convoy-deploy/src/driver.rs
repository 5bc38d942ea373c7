//! The deployment driver seam.
//!
//! A driver turns a validated project into a live deployment and knows how to
//! verify and undo it. The orchestrator owns timeouts and cancellation; a
//! driver only has to do the work.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use convoy_core::config::DeploymentConfig;
use convoy_core::{ProjectDescriptor, ProjectName};
use convoy_gate::is_executable;
use serde::{Deserialize, Serialize};

use crate::error::DriverError;
use crate::git::GitDriver;
use crate::process;
use crate::script::{ScriptDriver, DEFAULT_SCRIPT};

/// What a deployment did, enough to verify or roll it back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployReceipt {
    pub project: ProjectName,
    pub driver: String,
    /// Commit checked out before the deployment started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_commit: Option<String>,
    /// Commit the deployment produced or published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_commit: Option<String>,
    pub committed: bool,
    pub pushed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
}

impl DeployReceipt {
    pub fn new(project: &ProjectName, driver: &str) -> Self {
        Self {
            project: project.clone(),
            driver: driver.to_string(),
            ..Self::default()
        }
    }
}

/// The last receipt a driver recorded while deploying.
///
/// Shared with the orchestrator so a deployment that is dropped on timeout or
/// cancellation can still be compensated.
#[derive(Debug, Clone, Default)]
pub struct DeployProgress(Arc<Mutex<Option<DeployReceipt>>>);

impl DeployProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, receipt: &DeployReceipt) {
        let mut slot = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(receipt.clone());
    }

    pub fn snapshot(&self) -> Option<DeployReceipt> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
pub trait DeploymentDriver: Send + Sync {
    /// One line describing what `deploy` would do. Used for dry runs.
    fn describe(&self, project: &ProjectDescriptor) -> String;

    /// Deploy `project`. Any step that leaves something to undo is recorded
    /// in `progress` before the next step starts.
    async fn deploy(
        &self,
        project: &ProjectDescriptor,
        progress: &DeployProgress,
    ) -> Result<DeployReceipt, DriverError>;

    async fn health_check(
        &self,
        project: &ProjectDescriptor,
        receipt: &DeployReceipt,
    ) -> Result<(), DriverError>;

    async fn rollback(
        &self,
        project: &ProjectDescriptor,
        receipt: &DeployReceipt,
    ) -> Result<(), DriverError>;
}

// ---------------------------------------------------------------------------
// Standard driver
// ---------------------------------------------------------------------------

/// Picks a script driver for projects that ship a deploy script and the git
/// driver for everything else, then runs the manifest's extra health command.
pub struct StandardDriver {
    git: GitDriver,
    script: ScriptDriver,
}

impl StandardDriver {
    pub fn new(git: GitDriver, script: ScriptDriver) -> Self {
        Self { git, script }
    }

    pub fn from_config(config: &DeploymentConfig) -> Self {
        Self::new(GitDriver::from_config(config), ScriptDriver)
    }

    fn uses_script(project: &ProjectDescriptor) -> bool {
        project.deploy.script.is_some() || is_executable(&project.root.join(DEFAULT_SCRIPT))
    }

    fn select(&self, project: &ProjectDescriptor) -> &dyn DeploymentDriver {
        if Self::uses_script(project) {
            &self.script
        } else {
            &self.git
        }
    }
}

#[async_trait]
impl DeploymentDriver for StandardDriver {
    fn describe(&self, project: &ProjectDescriptor) -> String {
        let mut line = self.select(project).describe(project);
        if !project.deploy.health_check.is_empty() {
            line.push_str(&format!(
                ", then check `{}`",
                project.deploy.health_check.join(" ")
            ));
        }
        line
    }

    async fn deploy(
        &self,
        project: &ProjectDescriptor,
        progress: &DeployProgress,
    ) -> Result<DeployReceipt, DriverError> {
        self.select(project).deploy(project, progress).await
    }

    async fn health_check(
        &self,
        project: &ProjectDescriptor,
        receipt: &DeployReceipt,
    ) -> Result<(), DriverError> {
        self.select(project).health_check(project, receipt).await?;
        run_manifest_check(project).await
    }

    async fn rollback(
        &self,
        project: &ProjectDescriptor,
        receipt: &DeployReceipt,
    ) -> Result<(), DriverError> {
        self.select(project).rollback(project, receipt).await
    }
}

/// Run the `deploy.health_check` command from the manifest, if one is set.
async fn run_manifest_check(project: &ProjectDescriptor) -> Result<(), DriverError> {
    let Some((program, args)) = project.deploy.health_check.split_first() else {
        return Ok(());
    };
    let label = project.deploy.health_check.join(" ");
    let mut cmd = process::project_command(program, project);
    cmd.args(args);
    match process::run(cmd, &label).await {
        Ok(_) => Ok(()),
        Err(DriverError::CommandFailed { stderr, status, .. }) => Err(DriverError::Unhealthy(
            format!(
                "`{label}` exited with {}{}",
                status.map(|c| format!("status {c}")).unwrap_or_else(|| "a signal".into()),
                if stderr.is_empty() { String::new() } else { format!(": {stderr}") }
            ),
        )),
        Err(other) => Err(other),
    }
}
