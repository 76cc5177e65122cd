use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use cryolive_contracts::{CommandExecutor, ExecError, ExecOutput};
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;

fn scheduler_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(_\d+)?$").expect("valid scheduler id regex"))
}

/// Accepts only strings matching `^\d+(_\d+)?$` (P6): a bare SLURM job id or
/// a job-id_array-task-id pair. Never trusts an id sourced from parsed
/// scheduler output without re-validating it here first.
pub fn sanitize_scheduler_id(id: &str) -> Result<&str, ExecError> {
    if scheduler_id_regex().is_match(id) {
        Ok(id)
    } else {
        Err(ExecError::Spawn {
            binary: "scancel".to_string(),
            reason: format!("rejected scheduler id: {id:?}"),
        })
    }
}

/// `tokio::process::Command`-backed executor. Never builds a shell string;
/// every argv element is passed to the child process independently.
pub struct ProcessCommandExecutor {
    timeout: Duration,
}

impl ProcessCommandExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ProcessCommandExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl CommandExecutor for ProcessCommandExecutor {
    async fn exec(&self, binary: &str, argv: &[String]) -> Result<ExecOutput, ExecError> {
        let mut command = Command::new(binary);
        command.args(argv);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| ExecError::Spawn {
            binary: binary.to_string(),
            reason: e.to_string(),
        })?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let run = async move {
            let mut stdout = String::new();
            let mut stderr = String::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut stdout).await;
            }
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            let status = child.wait().await;
            (stdout, stderr, status)
        };

        match timeout(self.timeout, run).await {
            Ok((stdout, stderr, status)) => {
                let status = status.map_err(|e| ExecError::Spawn {
                    binary: binary.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(ExecOutput {
                    stdout,
                    stderr,
                    exit_code: status.code().unwrap_or(-1),
                })
            }
            Err(_) => Err(ExecError::Timeout {
                binary: binary.to_string(),
                elapsed_secs: self.timeout.as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_job_id() {
        assert_eq!(sanitize_scheduler_id("12345").unwrap(), "12345");
    }

    #[test]
    fn accepts_array_task_id() {
        assert_eq!(sanitize_scheduler_id("12345_7").unwrap(), "12345_7");
    }

    #[test]
    fn rejects_anything_else() {
        assert!(sanitize_scheduler_id("12345; rm -rf /").is_err());
        assert!(sanitize_scheduler_id("abc").is_err());
        assert!(sanitize_scheduler_id("").is_err());
    }

    #[tokio::test]
    async fn exec_runs_true_and_false() {
        let exec = ProcessCommandExecutor::default();
        let out = exec.exec("true", &[]).await.unwrap();
        assert!(out.success());
        let out = exec.exec("false", &[]).await.unwrap();
        assert!(!out.success());
    }
}
