use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::ids::{JobId, ProjectId};
use crate::stage::StageKey;

/// Mutable lifecycle status of a Job. Once a terminal value is reached it is
/// absorbing: no later write may move the Job back to a non-terminal state
/// or to a different terminal state (P2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

/// Parsed per-job pipeline statistics, refreshed by the SLURM Monitor as it
/// reads progress markers out of the job's working directory.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineStats {
    pub iteration_count: u64,
    pub total_iterations: u64,
    pub micrograph_count: u64,
    pub particle_count: u64,
    pub pixel_size: Option<f64>,
    pub box_size: Option<u32>,
}

impl PipelineStats {
    pub fn progress_percent(&self) -> f64 {
        if self.total_iterations == 0 {
            0.0
        } else {
            (self.iteration_count as f64 / self.total_iterations as f64 * 100.0).clamp(0.0, 100.0)
        }
    }
}

/// A single submitted unit of work, one row in the Job Store.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Job {
    pub id: JobId,
    pub project_id: ProjectId,
    pub stage: StageKey,
    /// JSON snapshot of the typed parameters used to build this job; frozen
    /// at create time.
    pub params_snapshot: serde_json::Value,
    pub command: String,
    pub output_dir: String,
    pub status: JobStatus,
    pub scheduler_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub stats: PipelineStats,
}

impl Job {
    pub fn new(
        id: JobId,
        project_id: ProjectId,
        stage: StageKey,
        params_snapshot: serde_json::Value,
        command: String,
        output_dir: String,
    ) -> Self {
        Self {
            id,
            project_id,
            stage,
            params_snapshot,
            command,
            output_dir,
            status: JobStatus::Pending,
            scheduler_id: None,
            started_at: None,
            ended_at: None,
            error_message: None,
            stats: PipelineStats::default(),
        }
    }

    /// Attempts to transition to `new_status`. Returns `false` without
    /// mutating anything if the current status is already terminal (P2).
    pub fn try_transition(&mut self, new_status: JobStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        if new_status.is_terminal() && self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
        if new_status == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.status = new_status;
        true
    }

    /// Sets the scheduler id exactly once.
    pub fn set_scheduler_id(&mut self, id: String) {
        if self.scheduler_id.is_none() {
            self.scheduler_id = Some(id);
        }
    }
}

/// Aggregated statistics view over a project's jobs, keyed by stage.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JobsStats {
    pub latest_by_stage: HashMap<StageKey, JobId>,
}
