use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use cryolive_contracts::{ResultAdapter, ResultAdapterError};
use cryolive_model::{JobId, PipelineStats};

/// The stage-specific tools write a `stats.json` alongside their other
/// outputs; exactly what puts it there is out of scope here, only its shape
/// is fixed. A job that hasn't written one yet (still running, or its stage
/// doesn't emit one) reads back as zeroed stats rather than an error.
#[derive(Debug, Deserialize, Default)]
struct StatsFile {
    #[serde(default)]
    iteration_count: u64,
    #[serde(default)]
    total_iterations: u64,
    #[serde(default)]
    micrograph_count: u64,
    #[serde(default)]
    particle_count: u64,
    #[serde(default)]
    pixel_size: Option<f64>,
    #[serde(default)]
    box_size: Option<u32>,
}

impl From<StatsFile> for PipelineStats {
    fn from(s: StatsFile) -> Self {
        Self {
            iteration_count: s.iteration_count,
            total_iterations: s.total_iterations,
            micrograph_count: s.micrograph_count,
            particle_count: s.particle_count,
            pixel_size: s.pixel_size,
            box_size: s.box_size,
        }
    }
}

/// Reads `<output_dir>/stats.json`, the one file every stage builder's
/// rendered script is expected to produce as it progresses (§4.2's
/// `render_script` leaves this to the wrapped binary).
pub struct StatsFileResultAdapter {
    file_name: &'static str,
}

impl StatsFileResultAdapter {
    pub fn new() -> Self {
        Self {
            file_name: "stats.json",
        }
    }
}

impl Default for StatsFileResultAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultAdapter for StatsFileResultAdapter {
    async fn read_stats(&self, job_id: JobId, output_dir: &str) -> Result<PipelineStats, ResultAdapterError> {
        let path = Path::new(output_dir).join(self.file_name);
        let contents = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PipelineStats::default()),
            Err(e) => {
                return Err(ResultAdapterError {
                    job_id,
                    reason: e.to_string(),
                })
            }
        };
        let parsed: StatsFile = serde_json::from_slice(&contents).map_err(|e| ResultAdapterError {
            job_id,
            reason: e.to_string(),
        })?;
        Ok(parsed.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_stats_file_yields_zeroed_stats() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = StatsFileResultAdapter::new();
        let stats = adapter
            .read_stats(JobId::new(), dir.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(stats, PipelineStats::default());
    }

    #[tokio::test]
    async fn reads_and_deserializes_stats_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("stats.json"),
            r#"{"micrograph_count": 12, "particle_count": 500}"#,
        )
        .unwrap();
        let adapter = StatsFileResultAdapter::new();
        let stats = adapter
            .read_stats(JobId::new(), dir.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(stats.micrograph_count, 12);
        assert_eq!(stats.particle_count, 500);
    }
}
