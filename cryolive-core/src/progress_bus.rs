use cryolive_model::{JobId, ProjectId, StageKey};
use tokio::sync::broadcast;

/// Where a `statusChange` observation came from, preserved for the UI and
/// for scenario 2's "emitted exactly once with `source=orphan_detection`"
/// assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum StatusSource {
    File,
    Squeue,
    Sacct,
    OrphanDetection,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusChange {
    pub job_id: JobId,
    pub project_id: ProjectId,
    pub old_status: cryolive_model::JobStatus,
    pub new_status: cryolive_model::JobStatus,
    pub raw_scheduler_state: Option<String>,
    pub source: StatusSource,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgressChange {
    pub job_id: JobId,
    pub project_id: ProjectId,
    pub stage_key: StageKey,
    pub iteration_count: u64,
    pub total_iterations: u64,
    pub micrograph_count: u64,
    pub particle_count: u64,
    pub progress_percent: f64,
}

/// The two fixed-shape events the Progress Bus carries (§4.5).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type"))]
pub enum ProgressEvent {
    StatusChange(StatusChange),
    ProgressChange(ProgressChange),
}

impl ProgressEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            ProgressEvent::StatusChange(e) => e.job_id,
            ProgressEvent::ProgressChange(e) => e.job_id,
        }
    }
}

/// In-process typed publish/subscribe. Status events are delivered
/// at-least-once within the process (a slow subscriber only ever misses
/// events if it lags the channel capacity, which is sized generously);
/// progress events are allowed to drop under backpressure, matching the
/// lossy-for-progress / ordered-for-status policy of §9.
#[derive(Clone)]
pub struct ProgressBus {
    status_tx: broadcast::Sender<StatusChange>,
    progress_tx: broadcast::Sender<ProgressChange>,
}

impl ProgressBus {
    pub fn new() -> Self {
        let (status_tx, _) = broadcast::channel(4096);
        let (progress_tx, _) = broadcast::channel(1024);
        Self {
            status_tx,
            progress_tx,
        }
    }

    pub fn publish_status(&self, event: StatusChange) {
        // best-effort: a send error only means there are no subscribers.
        let _ = self.status_tx.send(event);
    }

    pub fn publish_progress(&self, event: ProgressChange) {
        let _ = self.progress_tx.send(event);
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusChange> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressChange> {
        self.progress_tx.subscribe()
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryolive_model::JobStatus;

    #[tokio::test]
    async fn status_events_preserve_order_per_job() {
        let bus = ProgressBus::new();
        let mut rx = bus.subscribe_status();
        let job_id = JobId::new();
        let project_id = ProjectId::new();

        bus.publish_status(StatusChange {
            job_id,
            project_id,
            old_status: JobStatus::Pending,
            new_status: JobStatus::Running,
            raw_scheduler_state: Some("R".into()),
            source: StatusSource::Squeue,
        });
        bus.publish_status(StatusChange {
            job_id,
            project_id,
            old_status: JobStatus::Running,
            new_status: JobStatus::Success,
            raw_scheduler_state: None,
            source: StatusSource::File,
        });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.new_status, JobStatus::Running);
        assert_eq!(second.new_status, JobStatus::Success);
    }
}
