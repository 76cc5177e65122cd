use async_trait::async_trait;

/// The captured result of running an external binary to completion.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecError {
    #[error("failed to spawn {binary}: {reason}")]
    Spawn { binary: String, reason: String },
    #[error("timed out waiting for {binary} after {elapsed_secs}s")]
    Timeout { binary: String, elapsed_secs: u64 },
}

/// Single entry point for shelling out to the scheduler's client binaries.
/// Implementations never concatenate `argv` into a shell string; every
/// element is passed to the child process independently (P6, P7).
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn exec(&self, binary: &str, argv: &[String]) -> Result<ExecOutput, ExecError>;
}
