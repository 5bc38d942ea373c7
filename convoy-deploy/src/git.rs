//! Git-backed deployments: commit the project's changes and push them.
//!
//! All projects of a run usually share one repository, so every mutating git
//! operation goes through a single lock.

use std::path::Path;

use async_trait::async_trait;
use convoy_core::config::DeploymentConfig;
use convoy_core::ProjectDescriptor;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::driver::{DeployProgress, DeployReceipt, DeploymentDriver};
use crate::error::DriverError;
use crate::process;

pub struct GitDriver {
    remote: String,
    branch: Option<String>,
    commit_message: String,
    lock: Mutex<()>,
}

impl GitDriver {
    pub fn new(remote: impl Into<String>, branch: Option<String>, commit_message: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            branch,
            commit_message: commit_message.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &DeploymentConfig) -> Self {
        Self::new(
            config.remote.clone(),
            config.branch.clone(),
            config.commit_message.clone(),
        )
    }

    fn message_for(&self, project: &ProjectDescriptor) -> String {
        self.commit_message.replace("{project}", project.name.as_str())
    }

    /// The configured branch, or the branch currently checked out.
    async fn target_branch(&self, root: &Path) -> Result<String, DriverError> {
        match &self.branch {
            Some(branch) => Ok(branch.clone()),
            None => git(root, &["rev-parse", "--abbrev-ref", "HEAD"]).await,
        }
    }

    /// Fetch `branch` from the remote and return the commit it points at.
    async fn remote_head(&self, root: &Path, branch: &str) -> Result<String, DriverError> {
        git(root, &["fetch", "-q", &self.remote, &format!("refs/heads/{branch}")]).await?;
        git(root, &["rev-parse", "FETCH_HEAD"]).await
    }

    /// Whether the remote branch already carries `commit`. An unreachable
    /// remote counts as not published.
    async fn published(&self, root: &Path, branch: &str, commit: &str) -> bool {
        match self.remote_head(root, branch).await {
            Ok(head) => contains(root, &head, commit).await.unwrap_or(false),
            Err(err) => {
                debug!(remote = %self.remote, error = %err, "remote not reachable");
                false
            }
        }
    }
}

fn git_cmd(root: &Path, args: &[&str]) -> Command {
    let mut cmd = process::command("git", root);
    cmd.args(args);
    cmd
}

async fn git(root: &Path, args: &[&str]) -> Result<String, DriverError> {
    process::run(git_cmd(root, args), &format!("git {}", args.join(" "))).await
}

/// `git merge-base --is-ancestor`: does `head` contain `commit`?
async fn contains(root: &Path, head: &str, commit: &str) -> Result<bool, DriverError> {
    process::succeeds(
        git_cmd(root, &["merge-base", "--is-ancestor", commit, head]),
        "git merge-base --is-ancestor",
    )
    .await
}

#[async_trait]
impl DeploymentDriver for GitDriver {
    fn describe(&self, project: &ProjectDescriptor) -> String {
        format!(
            "git commit \"{}\" and push to {}/{}",
            self.message_for(project),
            self.remote,
            self.branch.as_deref().unwrap_or("<current branch>")
        )
    }

    async fn deploy(
        &self,
        project: &ProjectDescriptor,
        progress: &DeployProgress,
    ) -> Result<DeployReceipt, DriverError> {
        let _guard = self.lock.lock().await;
        let root = project.root.as_path();
        let mut receipt = DeployReceipt::new(&project.name, "git");

        let previous = git(root, &["rev-parse", "HEAD"]).await?;
        receipt.previous_commit = Some(previous.clone());

        git(root, &["add", "-A", "--", "."]).await?;
        let clean = process::succeeds(
            git_cmd(root, &["diff", "--cached", "--quiet", "--", "."]),
            "git diff --cached",
        )
        .await?;

        if clean {
            receipt.deployed_commit = Some(previous);
        } else {
            let message = self.message_for(project);
            if let Err(err) = git(root, &["commit", "-q", "-m", &message, "--", "."]).await {
                if let Err(reset) = git(root, &["reset", "-q", "--", "."]).await {
                    warn!(project = %project.name, error = %reset, "failed to unstage after commit error");
                }
                return Err(err);
            }
            receipt.committed = true;
            match git(root, &["rev-parse", "HEAD"]).await {
                Ok(sha) => receipt.deployed_commit = Some(sha),
                Err(err) => return Err(DriverError::partial(receipt, err)),
            }
            progress.record(&receipt);
        }

        let branch = match self.target_branch(root).await {
            Ok(b) => b,
            Err(err) if receipt.committed => return Err(DriverError::partial(receipt, err)),
            Err(err) => return Err(err),
        };
        let refspec = format!("HEAD:refs/heads/{branch}");
        if let Err(err) = git(root, &["push", "-q", &self.remote, &refspec]).await {
            if receipt.committed {
                return Err(DriverError::partial(receipt, err));
            }
            return Err(err);
        }
        receipt.pushed = true;
        progress.record(&receipt);

        info!(
            project = %project.name,
            commit = receipt.deployed_commit.as_deref().unwrap_or_default(),
            committed = receipt.committed,
            remote = %self.remote,
            branch = %branch,
            "pushed"
        );
        Ok(receipt)
    }

    /// The remote branch must contain the deployed commit. Siblings pushing
    /// after us move the branch forward without making this deployment stale.
    async fn health_check(
        &self,
        project: &ProjectDescriptor,
        receipt: &DeployReceipt,
    ) -> Result<(), DriverError> {
        let Some(deployed) = receipt.deployed_commit.as_deref() else {
            return Err(DriverError::Unhealthy("no deployed commit recorded".to_string()));
        };
        let root = project.root.as_path();
        // FETCH_HEAD lives in the shared repository.
        let _guard = self.lock.lock().await;
        let branch = self.target_branch(root).await?;
        let head = self.remote_head(root, &branch).await?;
        if contains(root, &head, deployed).await? {
            Ok(())
        } else {
            Err(DriverError::Unhealthy(format!(
                "{}/{branch} is at {head}, which does not contain {deployed}",
                self.remote
            )))
        }
    }

    /// A published commit is reverted and the revert pushed. An unpublished
    /// commit still at `HEAD` is reset away, keeping the working tree; one
    /// that siblings have committed on top of is reverted locally.
    async fn rollback(
        &self,
        project: &ProjectDescriptor,
        receipt: &DeployReceipt,
    ) -> Result<(), DriverError> {
        let _guard = self.lock.lock().await;
        if !receipt.committed {
            return Ok(());
        }
        let root = project.root.as_path();
        let no_rollback = || DriverError::NoRollback {
            project: project.name.clone(),
        };
        let deployed = receipt.deployed_commit.as_deref().ok_or_else(no_rollback)?;
        let branch = self.target_branch(root).await?;

        if receipt.pushed || self.published(root, &branch, deployed).await {
            git(root, &["revert", "--no-edit", deployed]).await?;
            git(
                root,
                &["push", "-q", &self.remote, &format!("HEAD:refs/heads/{branch}")],
            )
            .await?;
            info!(project = %project.name, reverted = deployed, "reverted and pushed");
            return Ok(());
        }

        let head = git(root, &["rev-parse", "HEAD"]).await?;
        if head == deployed {
            let previous = receipt.previous_commit.as_deref().ok_or_else(no_rollback)?;
            git(root, &["reset", "-q", previous]).await?;
            info!(project = %project.name, reset_to = previous, "reset unpushed commit");
        } else {
            git(root, &["revert", "--no-edit", deployed]).await?;
            info!(project = %project.name, reverted = deployed, "reverted unpushed commit");
        }
        Ok(())
    }
}
