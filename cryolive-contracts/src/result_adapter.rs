use async_trait::async_trait;

use cryolive_model::{JobId, PipelineStats};

#[derive(Debug, Clone, thiserror::Error)]
#[error("result adapter failed to read output for job {job_id}: {reason}")]
pub struct ResultAdapterError {
    pub job_id: JobId,
    pub reason: String,
}

/// Opaque, per-stage reader of a completed Job's output directory. The core
/// never interprets CTF metrics, particle counts, or class images itself; it
/// only asks an adapter for the cumulative `PipelineStats` it should record.
#[async_trait]
pub trait ResultAdapter: Send + Sync {
    async fn read_stats(&self, job_id: JobId, output_dir: &str) -> Result<PipelineStats, ResultAdapterError>;
}
