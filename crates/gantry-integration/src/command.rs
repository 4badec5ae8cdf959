//! Execution of external commands (git, ssh).

use async_trait::async_trait;
use gantry_core::{Error, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runs external commands for the integration adapters.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `cmd` and return its standard output.
    async fn check_output(&self, cmd: &[String], cwd: Option<&Path>) -> Result<String>;

    /// Run `cmd`, discarding its output.
    async fn check_call(&self, cmd: &[String], cwd: Option<&Path>) -> Result<()> {
        self.check_output(cmd, cwd).await.map(|_| ())
    }
}

/// Builds an owned argument vector.
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

fn display(cmd: &[String]) -> String {
    cmd.join(" ")
}

/// Runs commands as child processes of the host.
#[derive(Debug, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn check_output(&self, cmd: &[String], cwd: Option<&Path>) -> Result<String> {
        let command = display(cmd);
        let Some((program, rest)) = cmd.split_first() else {
            return Err(Error::Other("empty command".to_string()));
        };

        debug!(command = %command, cwd = ?cwd, "Running command");
        let mut child = Command::new(program);
        child
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            child.current_dir(dir);
        }

        let output = child.output().await.map_err(|e| {
            warn!(command = %command, error = %e, "Failed to spawn process");
            Error::CommandFailed {
                command: command.clone(),
                exit_code: None,
            }
        })?;

        if !output.status.success() {
            warn!(
                command = %command,
                exit_code = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim_end(),
                "Command failed"
            );
            return Err(Error::CommandFailed {
                command,
                exit_code: output.status.code(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Logs commands instead of running them.
#[derive(Debug, Default)]
pub struct DryRunRunner;

impl DryRunRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn check_output(&self, cmd: &[String], cwd: Option<&Path>) -> Result<String> {
        info!(command = %crate::command::display(cmd), cwd = ?cwd, "Dry run: not executing");
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_process_runner_output() {
        let runner = ProcessRunner::new();
        let out = runner
            .check_output(&args(["echo", "hello"]), None)
            .await
            .unwrap();
        assert_eq!(out, "hello\n");
    }

    #[tokio::test]
    async fn test_process_runner_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new();
        let out = runner
            .check_output(&args(["pwd"]), Some(dir.path()))
            .await
            .unwrap();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(
            std::path::PathBuf::from(out.trim()).canonicalize().unwrap(),
            expected
        );
    }

    #[tokio::test]
    async fn test_process_runner_failure() {
        let runner = ProcessRunner::new();
        let err = runner
            .check_call(&args(["sh", "-c", "exit 3"]), None)
            .await
            .unwrap_err();
        match err {
            Error::CommandFailed { command, exit_code } => {
                assert_eq!(command, "sh -c exit 3");
                assert_eq!(exit_code, Some(3));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_process_runner_missing_program() {
        let runner = ProcessRunner::new();
        let err = runner
            .check_call(&args(["gantry-no-such-program"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { exit_code: None, .. }));
    }

    #[tokio::test]
    async fn test_dry_run_does_nothing() {
        let runner = DryRunRunner::new();
        let out = runner
            .check_output(&args(["rm", "-rf", "/nonexistent"]), None)
            .await
            .unwrap();
        assert!(out.is_empty());
    }
}
