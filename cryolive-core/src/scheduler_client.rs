use std::collections::HashMap;
use std::sync::Arc;

use cryolive_contracts::{CommandExecutor, ExecError};
use cryolive_model::JobStatus;

use crate::command_executor::sanitize_scheduler_id;

/// Maps a raw `squeue` state letter to the internal status (§4.4).
pub fn map_squeue_state(raw: &str) -> JobStatus {
    match raw {
        "PD" | "CF" => JobStatus::Pending,
        "R" | "CG" | "S" | "ST" => JobStatus::Running,
        "CD" => JobStatus::Success,
        "CA" => JobStatus::Cancelled,
        // F, TO, NF, OOM, PR, BF and anything unrecognized fall through to
        // failed, matching the "unknown raw state maps to failed" rule.
        _ => JobStatus::Failed,
    }
}

/// Maps a raw `sacct` state word to the internal status (§4.4).
pub fn map_sacct_state(raw: &str) -> JobStatus {
    match raw {
        "PENDING" => JobStatus::Pending,
        "RUNNING" | "SUSPENDED" | "COMPLETING" => JobStatus::Running,
        "COMPLETED" => JobStatus::Success,
        "CANCELLED" => JobStatus::Cancelled,
        _ => JobStatus::Failed,
    }
}

/// One scheduler-reported observation for a single job id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerObservation {
    pub raw_state: String,
    pub status: JobStatus,
}

/// Parses `squeue -j <ids> --format=%i|%t|%M|%L --noheader` output into a map
/// keyed by scheduler id. Lines that don't parse cleanly are skipped; a
/// malformed line never panics the Monitor tick.
pub fn parse_squeue_output(raw: &str) -> HashMap<String, SchedulerObservation> {
    let mut out = HashMap::new();
    for line in raw.lines() {
        let mut fields = line.split('|');
        let Some(id) = fields.next() else { continue };
        let Some(state) = fields.next() else { continue };
        let id = id.trim();
        let state = state.trim();
        if id.is_empty() || state.is_empty() {
            continue;
        }
        out.insert(
            id.to_string(),
            SchedulerObservation {
                raw_state: state.to_string(),
                status: map_squeue_state(state),
            },
        );
    }
    out
}

/// Parses `sacct -j <ids> --format=JobID,State,ExitCode,Elapsed --noheader
/// --parsable2` output. `sacct` emits one extra row per job for each job
/// step (`<id>.batch`, `<id>.extern`); only the bare job id row is kept.
pub fn parse_sacct_output(raw: &str) -> HashMap<String, SchedulerObservation> {
    let mut out = HashMap::new();
    for line in raw.lines() {
        let mut fields = line.split('|');
        let Some(id) = fields.next() else { continue };
        let Some(state) = fields.next() else { continue };
        let id = id.trim();
        let state = state.trim();
        if id.is_empty() || state.is_empty() || id.contains('.') {
            continue;
        }
        // State may carry a trailing cause, e.g. "CANCELLED by 1001".
        let state_word = state.split_whitespace().next().unwrap_or(state);
        out.insert(
            id.to_string(),
            SchedulerObservation {
                raw_state: state.to_string(),
                status: map_sacct_state(state_word),
            },
        );
    }
    out
}

/// Thin wrapper over the Command Executor for the three scheduler verbs the
/// orchestrator and monitor both need. Never builds a shell string; argv
/// elements are always passed independently.
#[derive(Clone)]
pub struct SchedulerClient {
    executor: Arc<dyn CommandExecutor>,
}

impl SchedulerClient {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    /// Submits `script_path` via `sbatch` and returns the parsed scheduler
    /// id out of `Submitted batch job <id>`.
    pub async fn submit(&self, script_path: &str) -> Result<String, ExecError> {
        let out = self
            .executor
            .exec("sbatch", &[script_path.to_string()])
            .await?;
        out.stdout
            .split_whitespace()
            .last()
            .filter(|id| sanitize_scheduler_id(id).is_ok())
            .map(|id| id.to_string())
            .ok_or_else(|| ExecError::Spawn {
                binary: "sbatch".to_string(),
                reason: format!("could not parse a scheduler id out of: {:?}", out.stdout),
            })
    }

    pub async fn squeue(&self, ids: &[String]) -> Result<HashMap<String, SchedulerObservation>, ExecError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let joined = ids.join(",");
        let out = self
            .executor
            .exec(
                "squeue",
                &[
                    "-j".to_string(),
                    joined,
                    "--format=%i|%t|%M|%L".to_string(),
                    "--noheader".to_string(),
                ],
            )
            .await?;
        Ok(parse_squeue_output(&out.stdout))
    }

    pub async fn sacct(&self, ids: &[String]) -> Result<HashMap<String, SchedulerObservation>, ExecError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let joined = ids.join(",");
        let out = self
            .executor
            .exec(
                "sacct",
                &[
                    "-j".to_string(),
                    joined,
                    "--format=JobID,State,ExitCode,Elapsed".to_string(),
                    "--noheader".to_string(),
                    "--parsable2".to_string(),
                ],
            )
            .await?;
        Ok(parse_sacct_output(&out.stdout))
    }

    pub async fn cancel(&self, scheduler_id: &str) -> Result<(), ExecError> {
        let id = sanitize_scheduler_id(scheduler_id)?;
        self.executor.exec("scancel", &[id.to_string()]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_squeue_lines() {
        let raw = "12345|R|0:30|1-00:00:00\n12346|PD|0:00|1-00:00:00\n";
        let parsed = parse_squeue_output(raw);
        assert_eq!(parsed["12345"].status, JobStatus::Running);
        assert_eq!(parsed["12346"].status, JobStatus::Pending);
    }

    #[test]
    fn parses_sacct_lines_and_skips_step_rows() {
        let raw = "12345|COMPLETED|0:0|00:05:00\n12345.batch|COMPLETED|0:0|00:05:00\n";
        let parsed = parse_sacct_output(raw);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["12345"].status, JobStatus::Success);
    }

    #[test]
    fn unknown_squeue_state_maps_to_failed() {
        assert_eq!(map_squeue_state("OOM"), JobStatus::Failed);
        assert_eq!(map_squeue_state("???"), JobStatus::Failed);
    }

    #[test]
    fn sacct_state_with_cause_suffix_still_maps() {
        assert_eq!(map_sacct_state("CANCELLED"), JobStatus::Cancelled);
    }
}
