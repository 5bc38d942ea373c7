//! Deployments driven by a project-supplied script.

use std::path::PathBuf;

use async_trait::async_trait;
use convoy_core::ProjectDescriptor;
use tracing::info;

use crate::driver::{DeployProgress, DeployReceipt, DeploymentDriver};
use crate::error::{driver_io, DriverError};
use crate::process;

/// Script used when the manifest declares none.
pub const DEFAULT_SCRIPT: &str = "deploy.sh";

#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptDriver;

impl ScriptDriver {
    fn deploy_script(project: &ProjectDescriptor) -> PathBuf {
        project
            .deploy
            .script
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRIPT))
    }
}

#[async_trait]
impl DeploymentDriver for ScriptDriver {
    fn describe(&self, project: &ProjectDescriptor) -> String {
        format!("run {}", Self::deploy_script(project).display())
    }

    async fn deploy(
        &self,
        project: &ProjectDescriptor,
        progress: &DeployProgress,
    ) -> Result<DeployReceipt, DriverError> {
        let relative = Self::deploy_script(project);
        let script = project.root.join(&relative);
        if !script.is_file() {
            return Err(driver_io(
                &script,
                std::io::Error::new(std::io::ErrorKind::NotFound, "deploy script not found"),
            ));
        }

        let mut receipt = DeployReceipt::new(&project.name, "script");
        let label = relative.display().to_string();
        if project.deploy.rollback.is_some() {
            // Once the script starts, the rollback script is the way back.
            let mut started = receipt.clone();
            started.committed = true;
            progress.record(&started);
        }
        match process::run(process::project_command(&script, project), &label).await {
            Ok(output) => {
                receipt.committed = true;
                receipt.output = output;
                info!(project = %project.name, script = %label, "deploy script finished");
                Ok(receipt)
            }
            // A failing script may have done part of its work; with a
            // rollback script available the orchestrator can compensate.
            Err(err) if project.deploy.rollback.is_some() => {
                receipt.committed = true;
                Err(DriverError::partial(receipt, err))
            }
            Err(err) => Err(err),
        }
    }

    async fn health_check(
        &self,
        _project: &ProjectDescriptor,
        _receipt: &DeployReceipt,
    ) -> Result<(), DriverError> {
        Ok(())
    }

    async fn rollback(
        &self,
        project: &ProjectDescriptor,
        _receipt: &DeployReceipt,
    ) -> Result<(), DriverError> {
        let Some(relative) = &project.deploy.rollback else {
            return Err(DriverError::NoRollback {
                project: project.name.clone(),
            });
        };
        let label = relative.display().to_string();
        process::run(
            process::project_command(project.root.join(relative), project),
            &label,
        )
        .await?;
        info!(project = %project.name, script = %label, "rollback script finished");
        Ok(())
    }
}
