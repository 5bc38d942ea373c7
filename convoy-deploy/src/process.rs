//! Child process helpers shared by the drivers.
//!
//! Every command is spawned with `kill_on_drop`, so dropping the future (on
//! timeout or cancellation) also stops the child.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use convoy_core::ProjectDescriptor;
use tokio::process::Command;
use tracing::debug;

use crate::error::DriverError;

/// Environment passed to every project hook.
pub const ENV_PROJECT: &str = "CONVOY_PROJECT";
pub const ENV_ROOT: &str = "CONVOY_ROOT";

/// Build a command running in `cwd`.
pub fn command<S: AsRef<OsStr>>(program: S, cwd: &Path) -> Command {
    let mut cmd = Command::new(program);
    cmd.current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Build a command for a project hook, with the project environment set.
pub fn project_command<S: AsRef<OsStr>>(program: S, project: &ProjectDescriptor) -> Command {
    let mut cmd = command(program, &project.root);
    cmd.env(ENV_PROJECT, project.name.as_str())
        .env(ENV_ROOT, &project.root);
    cmd
}

/// Run to completion. Returns trimmed stdout on success.
pub async fn run(mut cmd: Command, label: &str) -> Result<String, DriverError> {
    debug!(command = label, "spawning");
    let output = cmd.output().await.map_err(|source| DriverError::Spawn {
        command: label.to_string(),
        source,
    })?;
    if !output.status.success() {
        return Err(DriverError::CommandFailed {
            command: label.to_string(),
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run and report only whether the command exited zero.
pub async fn succeeds(mut cmd: Command, label: &str) -> Result<bool, DriverError> {
    let status = cmd.status().await.map_err(|source| DriverError::Spawn {
        command: label.to_string(),
        source,
    })?;
    Ok(status.success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn run_captures_stdout_and_failures() {
        let dir = TempDir::new().expect("tempdir");
        let mut ok = command("sh", dir.path());
        ok.args(["-c", "echo hello"]);
        assert_eq!(run(ok, "echo").await.expect("runs"), "hello");

        let mut bad = command("sh", dir.path());
        bad.args(["-c", "echo boom >&2; exit 3"]);
        match run(bad, "fail").await {
            Err(DriverError::CommandFailed { status, stderr, .. }) => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let dir = TempDir::new().expect("tempdir");
        let cmd = command("convoy-definitely-not-a-program", dir.path());
        assert!(matches!(
            run(cmd, "missing").await,
            Err(DriverError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn project_command_sets_environment() {
        let dir = TempDir::new().expect("tempdir");
        let project = ProjectDescriptor::new("api", dir.path());
        let mut cmd = project_command("sh", &project);
        cmd.args(["-c", "echo $CONVOY_PROJECT"]);
        assert_eq!(run(cmd, "env").await.expect("runs"), "api");
    }
}
