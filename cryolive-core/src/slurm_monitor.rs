use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, warn};

use cryolive_contracts::{JobStore, ResultAdapter};
use cryolive_model::{Job, JobId, JobStatus, PipelineStats};

use crate::log_error_parser::{parse_job_logs, top_issue_summary};
use crate::progress_bus::{ProgressBus, ProgressChange, StatusChange, StatusSource};
use crate::scheduler_client::SchedulerClient;

/// Either marker file's mere presence is authoritative, regardless of
/// content (§6).
pub const SUCCESS_MARKER: &str = "RELION_JOB_EXIT_SUCCESS";
pub const FAILURE_MARKER: &str = "RELION_JOB_EXIT_FAILURE";

/// The submission script redirects stdout/stderr to `slurm-<schedulerId>.out`
/// / `.err` inside the Job's output directory (§4.2's `render_script`).
fn stdout_path(output_dir: &str, scheduler_id: &str) -> std::path::PathBuf {
    Path::new(output_dir).join(format!("slurm-{scheduler_id}.out"))
}

fn stderr_path(output_dir: &str, scheduler_id: &str) -> std::path::PathBuf {
    Path::new(output_dir).join(format!("slurm-{scheduler_id}.err"))
}

fn marker_status(output_dir: &str) -> Option<JobStatus> {
    let dir = Path::new(output_dir);
    if dir.join(FAILURE_MARKER).exists() {
        Some(JobStatus::Failed)
    } else if dir.join(SUCCESS_MARKER).exists() {
        Some(JobStatus::Success)
    } else {
        None
    }
}

/// Background reconciliation loop: one instance, process-wide (§5).
pub struct SlurmMonitor {
    job_store: Arc<dyn JobStore>,
    result_adapter: Arc<dyn ResultAdapter>,
    scheduler: SchedulerClient,
    bus: ProgressBus,
    poll_interval: Duration,
    ghost_miss_threshold: u32,
    miss_counts: DashMap<String, u32>,
    last_stats: DashMap<JobId, PipelineStats>,
}

impl SlurmMonitor {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        result_adapter: Arc<dyn ResultAdapter>,
        scheduler: SchedulerClient,
        bus: ProgressBus,
        poll_interval: Duration,
        ghost_miss_threshold: u32,
    ) -> Self {
        Self {
            job_store,
            result_adapter,
            scheduler,
            bus,
            poll_interval,
            ghost_miss_threshold,
            miss_counts: DashMap::new(),
            last_stats: DashMap::new(),
        }
    }

    /// Runs one reconciliation tick over every active Job.
    pub async fn tick(&self) {
        let active = match self.job_store.list_active().await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "slurm monitor: failed to list active jobs");
                return;
            }
        };
        if active.is_empty() {
            self.miss_counts.clear();
            return;
        }

        let mut by_marker = Vec::new();
        let mut needs_scheduler = Vec::new();
        for job in active {
            match marker_status(&job.output_dir) {
                Some(status) => by_marker.push((job, status)),
                None => needs_scheduler.push(job),
            }
        }

        for (job, status) in by_marker {
            if let Some(scheduler_id) = &job.scheduler_id {
                self.miss_counts.remove(scheduler_id);
            }
            self.apply_status(&job, status, None, StatusSource::File).await;
        }

        self.reconcile_via_scheduler(needs_scheduler).await;

        self.prune_stale_miss_counts().await;
    }

    async fn reconcile_via_scheduler(&self, jobs: Vec<Job>) {
        if jobs.is_empty() {
            return;
        }
        let ids: Vec<String> = jobs
            .iter()
            .filter_map(|j| j.scheduler_id.clone())
            .collect();

        let squeue = self.scheduler.squeue(&ids).await.unwrap_or_else(|e| {
            debug!(error = %e, "squeue query failed, treating as miss for this tick");
            HashMap::new()
        });

        let missing_from_squeue: Vec<String> = ids
            .iter()
            .filter(|id| !squeue.contains_key(*id))
            .cloned()
            .collect();
        let sacct = self
            .scheduler
            .sacct(&missing_from_squeue)
            .await
            .unwrap_or_else(|e| {
                debug!(error = %e, "sacct query failed, treating as miss for this tick");
                HashMap::new()
            });

        for job in jobs {
            let Some(scheduler_id) = job.scheduler_id.clone() else {
                continue;
            };

            if let Some(obs) = squeue.get(&scheduler_id) {
                self.miss_counts.remove(&scheduler_id);
                self.apply_status(
                    &job,
                    obs.status,
                    Some(obs.raw_state.clone()),
                    StatusSource::Squeue,
                )
                .await;
                continue;
            }

            if let Some(obs) = sacct.get(&scheduler_id) {
                self.miss_counts.remove(&scheduler_id);
                self.apply_status(
                    &job,
                    obs.status,
                    Some(obs.raw_state.clone()),
                    StatusSource::Sacct,
                )
                .await;
                continue;
            }

            // Neither squeue nor sacct returned this id this tick: a miss.
            let misses = {
                let mut entry = self.miss_counts.entry(scheduler_id.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            if misses >= self.ghost_miss_threshold {
                if marker_status(&job.output_dir).is_none() {
                    self.miss_counts.remove(&scheduler_id);
                    let changed = self
                        .job_store
                        .transition_status(
                            job.id,
                            JobStatus::Failed,
                            Some("GHOST_JOB: scheduler lost track of this job".to_string()),
                        )
                        .await
                        .unwrap_or(false);
                    if changed {
                        self.bus.publish_status(StatusChange {
                            job_id: job.id,
                            project_id: job.project_id,
                            old_status: job.status,
                            new_status: JobStatus::Failed,
                            raw_scheduler_state: None,
                            source: StatusSource::OrphanDetection,
                        });
                    }
                } else {
                    // Markers appeared between the last marker check and now;
                    // let the next tick's marker pass pick it up cleanly.
                    self.miss_counts.remove(&scheduler_id);
                }
            }
        }

        // Progress diffing runs over every job that is still active, marker
        // or scheduler alike is irrelevant here: only the parsed stats matter.
    }

    async fn prune_stale_miss_counts(&self) {
        let active_ids: std::collections::HashSet<String> = match self.job_store.list_active().await {
            Ok(jobs) => jobs.into_iter().filter_map(|j| j.scheduler_id).collect(),
            Err(_) => return,
        };
        self.miss_counts.retain(|id, _| active_ids.contains(id));
    }

    async fn apply_status(
        &self,
        job: &Job,
        new_status: JobStatus,
        raw_scheduler_state: Option<String>,
        source: StatusSource,
    ) {
        if job.status == new_status || job.status.is_terminal() {
            return;
        }

        let error_message = if new_status == JobStatus::Failed {
            self.enriched_error_message(job).await
        } else {
            None
        };

        let changed = self
            .job_store
            .transition_status(job.id, new_status, error_message)
            .await
            .unwrap_or(false);
        if !changed {
            return;
        }

        self.bus.publish_status(StatusChange {
            job_id: job.id,
            project_id: job.project_id,
            old_status: job.status,
            new_status,
            raw_scheduler_state,
            source,
        });

        if !new_status.is_terminal() {
            self.refresh_progress(job).await;
        }
    }

    async fn enriched_error_message(&self, job: &Job) -> Option<String> {
        let Some(scheduler_id) = &job.scheduler_id else {
            return None;
        };
        let issues = parse_job_logs(
            &stdout_path(&job.output_dir, scheduler_id),
            &stderr_path(&job.output_dir, scheduler_id),
        );
        top_issue_summary(&issues)
    }

    async fn refresh_progress(&self, job: &Job) {
        let stats = match self.result_adapter.read_stats(job.id, &job.output_dir).await {
            Ok(stats) => stats,
            Err(_) => return,
        };
        let changed = self
            .last_stats
            .get(&job.id)
            .map(|prev| *prev != stats)
            .unwrap_or(true);
        if !changed {
            return;
        }
        self.last_stats.insert(job.id, stats);
        let _ = self.job_store.update_stats(job.id, stats).await;
        self.bus.publish_progress(ProgressChange {
            job_id: job.id,
            project_id: job.project_id,
            stage_key: job.stage,
            iteration_count: stats.iteration_count,
            total_iterations: stats.total_iterations,
            micrograph_count: stats.micrograph_count,
            particle_count: stats.particle_count,
            progress_percent: stats.progress_percent(),
        });
    }

    /// Runs the reconciliation loop until `shutdown` resolves.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_marker_outranks_failure_check_order_but_failure_wins_if_both_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SUCCESS_MARKER), b"").unwrap();
        std::fs::write(dir.path().join(FAILURE_MARKER), b"").unwrap();
        assert_eq!(
            marker_status(dir.path().to_str().unwrap()),
            Some(JobStatus::Failed)
        );
    }

    #[test]
    fn success_marker_alone_yields_success() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SUCCESS_MARKER), b"").unwrap();
        assert_eq!(
            marker_status(dir.path().to_str().unwrap()),
            Some(JobStatus::Success)
        );
    }

    #[test]
    fn no_marker_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(marker_status(dir.path().to_str().unwrap()), None);
    }
}
