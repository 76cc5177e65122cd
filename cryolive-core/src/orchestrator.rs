use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use cryolive_contracts::{ActivityStore, JobStore, ResolvedInputs, ResultAdapter, SessionStore};
use cryolive_model::{
    ActivityEntry, ActivityLevel, InputMode, Job, JobId, JobStatus, PassRecord, ProjectId, Session,
    SessionConfig, SessionCounters, SessionId, SessionSnapshot, SessionStatus, StageKey,
};

use crate::error::{CoreError, CoreResult};
use crate::file_watcher::FileWatcher;
use crate::progress_bus::{ProgressBus, ProgressChange, StatusChange};
use crate::scheduler_client::SchedulerClient;
use crate::stage_builders::builder_for;

/// Tunables for the pass loop and file watcher, shared by every active
/// session run (§4.1, §5).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Parent directory under which `<project_id>/<StageKey>/Job###/` trees
    /// are created for every submitted job.
    pub base_output_dir: PathBuf,
    pub pass_tick_interval: Duration,
    pub watch_poll_interval: Duration,
    /// Consecutive empty watch ticks (no new file, no pass in flight) before
    /// an `existing`-mode session is declared naturally complete.
    pub natural_completion_ticks: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            base_output_dir: PathBuf::from("./cryolive-sessions"),
            pass_tick_interval: Duration::from_secs(5),
            watch_poll_interval: Duration::from_secs(2),
            natural_completion_ticks: 2,
        }
    }
}

/// What a single pass tick accomplished, returned to callers mainly for
/// tests; production callers observe state through the Progress Bus and the
/// Activity Log instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassOutcome {
    pub newly_discovered_files: usize,
    pub stages_submitted: Vec<StageKey>,
    pub pass_completed: bool,
    pub class2d_triggers: u32,
    pub session_completed: bool,
}

/// The pick stage a session actually uses is whichever one its config
/// supplies parameters for; `AutoPick` is the default when neither is
/// configured, matching unattended live operation.
fn active_pick_stage(config: &SessionConfig) -> StageKey {
    if config.stage_params.contains_key(&StageKey::ManualPick)
        && !config.stage_params.contains_key(&StageKey::AutoPick)
    {
        StageKey::ManualPick
    } else {
        StageKey::AutoPick
    }
}

/// The live pipeline stages this session actually drives, in order, with
/// whichever picking stage its config selects.
fn active_pipeline(config: &SessionConfig) -> Vec<StageKey> {
    let pick = active_pick_stage(config);
    StageKey::LIVE_PIPELINE
        .into_iter()
        .filter(|s| *s != StageKey::ManualPick && *s != StageKey::AutoPick || *s == pick)
        .collect()
}

fn apply_stage_counters(counters: &mut SessionCounters, stage: StageKey, stats: &cryolive_model::PipelineStats) {
    match stage {
        StageKey::Import => counters.movies_imported += stats.micrograph_count,
        StageKey::MotionCorr => counters.movies_motion_corrected += stats.micrograph_count,
        StageKey::CtfFind => counters.movies_ctf_estimated += stats.micrograph_count,
        StageKey::ManualPick | StageKey::AutoPick => counters.movies_picked += stats.micrograph_count,
        StageKey::Extract => {
            counters.movies_extracted += stats.micrograph_count;
            counters.extracted_particles += stats.particle_count;
        }
        _ => {}
    }
}

struct SessionRun {
    id: SessionId,
    project_root: PathBuf,
    session: Mutex<Session>,
    watcher: Arc<Mutex<FileWatcher>>,
    pending_files: Mutex<VecDeque<PathBuf>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct Inner {
    session_store: Arc<dyn SessionStore>,
    job_store: Arc<dyn JobStore>,
    activity_store: Arc<dyn ActivityStore>,
    result_adapter: Arc<dyn ResultAdapter>,
    scheduler: SchedulerClient,
    bus: ProgressBus,
    config: OrchestratorConfig,
    runs: DashMap<SessionId, Arc<SessionRun>>,
    /// Session-level push, separate from the Progress Bus's fixed job-level
    /// `statusChange`/`progressChange` pair (§4.5): fired whenever a
    /// session's status, current stage, or pass number changes, so the
    /// WebSocket Hub can forward a `live_session_update` (§4.6).
    session_tx: tokio::sync::broadcast::Sender<SessionSnapshot>,
}

/// Owns every active live session's background work: the file watcher
/// polling its watch directory, and the pass loop cascading jobs through the
/// live pipeline as each stage's job succeeds. Structurally the same shape
/// as a scan control plane wrapping one run object per in-flight scan, with
/// `Session` playing the run's role and the pass loop playing the scan
/// loop's (§4.1).
#[derive(Clone)]
pub struct LiveOrchestrator {
    inner: Arc<Inner>,
}

impl LiveOrchestrator {
    pub fn new(
        session_store: Arc<dyn SessionStore>,
        job_store: Arc<dyn JobStore>,
        activity_store: Arc<dyn ActivityStore>,
        result_adapter: Arc<dyn ResultAdapter>,
        scheduler: SchedulerClient,
        bus: ProgressBus,
        config: OrchestratorConfig,
    ) -> Self {
        let (session_tx, _) = tokio::sync::broadcast::channel(1024);
        Self {
            inner: Arc::new(Inner {
                session_store,
                job_store,
                activity_store,
                result_adapter,
                scheduler,
                bus,
                config,
                runs: DashMap::new(),
                session_tx,
            }),
        }
    }

    pub async fn create_session(&self, config: SessionConfig) -> CoreResult<Session> {
        let id = SessionId::new();
        let session = self.inner.session_store.create(id, config).await?;
        Inner::spawn_run(&self.inner, session.clone());
        Ok(session)
    }

    pub async fn start(&self, id: SessionId) -> CoreResult<()> {
        self.inner
            .transition(id, &[SessionStatus::Pending], SessionStatus::Running)
            .await
    }

    pub async fn pause(&self, id: SessionId) -> CoreResult<()> {
        self.inner
            .transition(id, &[SessionStatus::Running], SessionStatus::Paused)
            .await
    }

    pub async fn resume(&self, id: SessionId) -> CoreResult<()> {
        self.inner
            .transition(id, &[SessionStatus::Paused], SessionStatus::Running)
            .await
    }

    pub async fn stop(&self, id: SessionId) -> CoreResult<()> {
        self.inner
            .transition(
                id,
                &[SessionStatus::Pending, SessionStatus::Running, SessionStatus::Paused],
                SessionStatus::Stopped,
            )
            .await?;
        // Fires scancel for every in-flight Job without waiting for the
        // scheduler to confirm (§4.1, §5); the SLURM Monitor observes the
        // resulting state change on its own next tick.
        self.inner.cancel_in_flight_jobs(id).await;
        self.inner.shutdown_run(id).await;
        Ok(())
    }

    pub async fn delete(&self, id: SessionId) -> CoreResult<()> {
        self.inner.shutdown_run(id).await;
        self.inner.session_store.delete(id).await?;
        Ok(())
    }

    pub async fn snapshot(&self, id: SessionId) -> CoreResult<SessionSnapshot> {
        let run = self.inner.runs.get(&id).map(|r| r.value().clone());
        if let Some(run) = run {
            let session = run.session.lock().await;
            return Ok(SessionSnapshot::from(&*session));
        }
        let session = self.inner.session_store.get(id).await?;
        Ok(SessionSnapshot::from(&session))
    }

    pub async fn list_for_project(&self, project_id: ProjectId) -> CoreResult<Vec<Session>> {
        Ok(self.inner.session_store.list_for_project(project_id).await?)
    }

    /// Lets the WebSocket hub subscribe to the same job status stream the
    /// SLURM Monitor publishes on, without needing its own handle on the
    /// Progress Bus (§4.5, §4.6).
    pub fn subscribe_status(&self) -> tokio::sync::broadcast::Receiver<StatusChange> {
        self.inner.bus.subscribe_status()
    }

    pub fn subscribe_progress(&self) -> tokio::sync::broadcast::Receiver<ProgressChange> {
        self.inner.bus.subscribe_progress()
    }

    /// Session-level push used for `live_session_update` (§4.6): a snapshot
    /// every time a session's status, current stage, or pass number changes.
    pub fn subscribe_session(&self) -> tokio::sync::broadcast::Receiver<SessionSnapshot> {
        self.inner.session_tx.subscribe()
    }
}

impl Inner {
    /// Registers a session's run state and spawns its two long-lived
    /// background tasks. Takes an explicit `Arc<Self>` reference (rather than
    /// a `self: &Arc<Self>` receiver, not a legal receiver type on stable
    /// Rust) so it can hand owned clones to the spawned tasks.
    fn spawn_run(inner: &Arc<Self>, session: Session) {
        let project_root = inner
            .config
            .base_output_dir
            .join(session.config.project_id.as_uuid().to_string());
        let watcher = FileWatcher::new(
            PathBuf::from(&session.config.watch_path),
            &session.config.file_glob,
            inner.config.watch_poll_interval,
            session.config.input_mode == InputMode::Existing,
        );
        let run = Arc::new(SessionRun {
            id: session.id,
            project_root,
            session: Mutex::new(session),
            watcher: Arc::new(Mutex::new(watcher)),
            pending_files: Mutex::new(VecDeque::new()),
            shutdown_tx: watch::channel(false).0,
            tasks: Mutex::new(Vec::new()),
        });

        let watch_task = tokio::spawn(Self::watch_loop(inner.clone(), run.clone()));
        let pass_task = tokio::spawn(Self::pass_loop(inner.clone(), run.clone()));

        // `tasks` is only ever read back by `shutdown_run`, after inserting
        // `run` into `runs`, so no other task can observe it half-populated.
        if let Ok(mut tasks) = run.tasks.try_lock() {
            tasks.push(watch_task);
            tasks.push(pass_task);
        }
        inner.runs.insert(run.id, run);
    }

    /// Cancels every Job the session's latest-jobs map points to and which
    /// is still active, via `scancel` (§4.1 `stop`, §5). Best-effort: a
    /// cancellation failure is logged, not propagated, since `stop` itself
    /// must still complete.
    async fn cancel_in_flight_jobs(&self, id: SessionId) {
        let Some(run) = self.runs.get(&id).map(|r| r.value().clone()) else {
            return;
        };
        let job_ids: Vec<JobId> = {
            let session = run.session.lock().await;
            session.jobs.latest.values().copied().collect()
        };
        for job_id in job_ids {
            let job = match self.job_store.get(job_id).await {
                Ok(job) => job,
                Err(_) => continue,
            };
            if !job.status.is_active() {
                continue;
            }
            let Some(scheduler_id) = &job.scheduler_id else {
                continue;
            };
            if let Err(e) = self.scheduler.cancel(scheduler_id).await {
                warn!(session_id = %id, job_id = %job_id, error = %e, "failed to cancel in-flight job");
            }
        }
    }

    async fn shutdown_run(&self, id: SessionId) {
        let Some((_, run)) = self.runs.remove(&id) else {
            return;
        };
        let _ = run.shutdown_tx.send(true);
        let mut tasks = run.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
    }

    async fn transition(
        &self,
        id: SessionId,
        allowed_from: &[SessionStatus],
        to: SessionStatus,
    ) -> CoreResult<()> {
        let run = match self.runs.get(&id) {
            Some(r) => r.value().clone(),
            None => return Err(CoreError::NotFound),
        };
        let mut session = run.session.lock().await;
        if !allowed_from.contains(&session.status) {
            return Err(CoreError::Validation(format!(
                "cannot move session from {:?} to {:?}",
                session.status, to
            )));
        }
        session.status = to;
        self.session_store.save(&session).await?;
        self.publish_session_change(&session);
        Ok(())
    }

    /// Best-effort: a send error only means there are no subscribers.
    fn publish_session_change(&self, session: &Session) {
        let _ = self.session_tx.send(SessionSnapshot::from(session));
    }

    /// Polls the session's watch directory until shut down. The task itself
    /// lives for the whole session (shut down only by `stop`/`delete`), but
    /// each tick is a no-op while the session is not `Running`: `pause`
    /// stops the watcher from observing new files, and `resume` lets it pick
    /// back up, per §4.1.
    async fn watch_loop(inner: Arc<Self>, run: Arc<SessionRun>) {
        let mut ticker = tokio::time::interval(inner.config.watch_poll_interval);
        let mut shutdown = run.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let running = run.session.lock().await.status == SessionStatus::Running;
                    if !running {
                        continue;
                    }
                    let settled = run.watcher.lock().await.poll();
                    if !settled.is_empty() {
                        run.pending_files.lock().await.extend(settled);
                    }
                }
            }
        }
    }

    async fn pass_loop(inner: Arc<Self>, run: Arc<SessionRun>) {
        let mut ticker = tokio::time::interval(inner.config.pass_tick_interval);
        let mut shutdown = run.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    inner.pass_tick(&run).await;
                }
            }
        }
    }

    /// Advances a session's in-flight pass as far as it can go this tick:
    /// waiting on an active job, halting on a failed one, or cascading
    /// straight through any run of already-succeeded stages (§4.1).
    async fn pass_tick(&self, run: &Arc<SessionRun>) -> PassOutcome {
        let mut outcome = PassOutcome::default();
        let mut session = run.session.lock().await;
        if session.status != SessionStatus::Running {
            return outcome;
        }

        let new_files: Vec<PathBuf> = {
            let mut pending = run.pending_files.lock().await;
            pending.drain(..).collect()
        };
        outcome.newly_discovered_files = new_files.len();

        if session.current_stage.is_none() {
            if new_files.is_empty() {
                session.consecutive_empty_ticks += 1;
            } else {
                session.consecutive_empty_ticks = 0;
                if let Err(e) = self
                    .start_pass(&mut session, run, new_files, &mut outcome)
                    .await
                {
                    warn!(session_id = %run.id, error = %e, "failed to start a new pass");
                }
            }
        } else if !new_files.is_empty() {
            // A pass is already in flight; queue today's files for the next.
            run.pending_files.lock().await.extend(new_files);
        }

        self.cascade(&mut session, run, &mut outcome).await;

        if session.current_stage.is_none() {
            self.maybe_complete(&mut session, &mut outcome);
        }

        let _ = self.session_store.save(&session).await;
        self.publish_session_change(&session);
        outcome
    }

    async fn start_pass(
        &self,
        session: &mut Session,
        run: &Arc<SessionRun>,
        files: Vec<PathBuf>,
        outcome: &mut PassOutcome,
    ) -> CoreResult<()> {
        let resolved = ResolvedInputs {
            files,
            named: Default::default(),
        };
        let job = self
            .submit_job(session, StageKey::Import, &run.project_root, &resolved)
            .await?;
        session.current_stage = Some(StageKey::Import);
        outcome.stages_submitted.push(StageKey::Import);
        info!(session_id = %run.id, job_id = %job.id, "started a new pass with Import");
        Ok(())
    }

    /// Walks the active pipeline forward from `session.current_stage` while
    /// each stage's latest job keeps resolving to `Success` in the same
    /// tick, stopping at the first job still active or failed.
    async fn cascade(&self, session: &mut Session, run: &Arc<SessionRun>, outcome: &mut PassOutcome) {
        let pipeline = active_pipeline(&session.config);
        while let Some(stage) = session.current_stage {
            let Some(job_id) = session.jobs.latest_for(stage) else {
                break;
            };
            let job = match self.job_store.get(job_id).await {
                Ok(job) => job,
                Err(e) => {
                    warn!(session_id = %run.id, error = %e, "could not load current stage job");
                    break;
                }
            };

            match job.status {
                JobStatus::Pending | JobStatus::Running => break,
                JobStatus::Failed | JobStatus::Cancelled => {
                    self.record_activity(
                        session,
                        ActivityLevel::Error,
                        Some(stage),
                        "job_failed",
                        format!("{stage} job failed, abandoning this pass"),
                    )
                    .await;
                    session.current_stage = None;
                    break;
                }
                JobStatus::Success => {
                    self.apply_counted_success(session, &job).await;

                    let Some(pos) = pipeline.iter().position(|s| *s == stage) else {
                        session.current_stage = None;
                        break;
                    };
                    match pipeline.get(pos + 1) {
                        Some(&next_stage) => {
                            let resolved = ResolvedInputs {
                                files: vec![PathBuf::from(&job.output_dir)],
                                named: Default::default(),
                            };
                            match self
                                .submit_job(session, next_stage, &run.project_root, &resolved)
                                .await
                            {
                                Ok(next_job) => {
                                    session.current_stage = Some(next_stage);
                                    outcome.stages_submitted.push(next_stage);
                                    info!(session_id = %run.id, job_id = %next_job.id, stage = %next_stage, "cascaded to next stage");
                                }
                                Err(e) => {
                                    warn!(session_id = %run.id, error = %e, "failed to submit next stage");
                                    break;
                                }
                            }
                        }
                        None => {
                            // The pipeline's last stage just succeeded: the pass is complete.
                            self.complete_pass(session, outcome).await;
                            session.current_stage = None;
                            self.maybe_trigger_class2d(session, run, outcome).await;
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn apply_counted_success(&self, session: &mut Session, job: &Job) {
        if session.counted_stage_jobs.get(&job.stage) == Some(&job.id) {
            return;
        }
        let stats = self
            .result_adapter
            .read_stats(job.id, &job.output_dir)
            .await
            .unwrap_or_default();
        apply_stage_counters(&mut session.counters, job.stage, &stats);
        session.counted_stage_jobs.insert(job.stage, job.id);
    }

    async fn complete_pass(&self, session: &mut Session, outcome: &mut PassOutcome) {
        session.pass_number += 1;
        session.last_pass_at = Some(chrono::Utc::now());
        session
            .pass_history
            .push(PassRecord::new(session.pass_number, counters_to_map(&session.counters)));
        outcome.pass_completed = true;
        self.record_activity(
            session,
            ActivityLevel::Success,
            None,
            "pipeline_pass",
            format!("completed pass {}", session.pass_number),
        )
        .await;
    }

    async fn maybe_trigger_class2d(&self, session: &mut Session, run: &Arc<SessionRun>, outcome: &mut PassOutcome) {
        if !session.config.class2d_enabled {
            return;
        }
        let Some(threshold) = session.config.particle_threshold.filter(|t| *t > 0) else {
            return;
        };
        let target_k = session.counters.extracted_particles / threshold;
        while target_k > session.class2d_last_triggered_k {
            let resolved = ResolvedInputs::default();
            match self
                .submit_job(session, StageKey::Class2D, &run.project_root, &resolved)
                .await
            {
                Ok(job) => {
                    session.class2d_last_triggered_k += 1;
                    session.counters.class2d_runs += 1;
                    outcome.class2d_triggers += 1;
                    self.record_activity(
                        session,
                        ActivityLevel::Info,
                        Some(StageKey::Class2D),
                        "class2d_triggered",
                        format!(
                            "extracted particle count crossed {} (job {})",
                            session.class2d_last_triggered_k * threshold,
                            job.id
                        ),
                    )
                    .await;
                }
                Err(e) => {
                    warn!(session_id = %run.id, error = %e, "failed to submit Class2D job");
                    break;
                }
            }
        }
    }

    fn maybe_complete(&self, session: &mut Session, outcome: &mut PassOutcome) {
        if session.config.input_mode != InputMode::Existing {
            return;
        }
        if session.status.is_terminal() {
            return;
        }
        if session.consecutive_empty_ticks >= 2 {
            session.status = SessionStatus::Completed;
            outcome.session_completed = true;
        }
    }

    async fn submit_job(
        &self,
        session: &mut Session,
        stage: StageKey,
        project_root: &Path,
        resolved_inputs: &ResolvedInputs,
    ) -> CoreResult<Job> {
        let params = session.config.stage_params.get(&stage).cloned().unwrap_or_default();
        let job_index = session
            .jobs
            .history
            .get(&stage)
            .map(|history| history.len() as u32 + 1)
            .unwrap_or(1);

        let builder = builder_for(stage);
        let output = builder.build(project_root, job_index, &params, resolved_inputs)?;

        if let Some(dropped) = &output.dropped_additional_arguments {
            self.record_activity(
                session,
                ActivityLevel::Warning,
                Some(stage),
                "additional_argument_dropped",
                format!("dropped dangerous additional argument for {stage}: {dropped}"),
            )
            .await;
        }

        let params_snapshot = serde_json::to_value(&params.values).unwrap_or(serde_json::Value::Null);
        let job = Job::new(
            cryolive_model::JobId::new(),
            session.config.project_id,
            stage,
            params_snapshot,
            output.argv.join(" "),
            output.output_dir.to_string_lossy().into_owned(),
        );
        let job = self.job_store.create(job).await?;

        let script_path = output.output_dir.join("submit.sh");
        tokio::fs::write(&script_path, &output.script)
            .await
            .map_err(|e| CoreError::Internal(format!("writing submission script: {e}")))?;

        let scheduler_id = self.scheduler.submit(&script_path.to_string_lossy()).await?;
        self.job_store.set_scheduler_id(job.id, scheduler_id).await?;

        session.jobs.record(stage, job.id);
        Ok(job)
    }

    async fn record_activity(
        &self,
        session: &Session,
        level: ActivityLevel,
        stage: Option<StageKey>,
        event_kind: &str,
        message: String,
    ) {
        let entry = ActivityEntry {
            session_id: session.id,
            seq: 0,
            timestamp: chrono::Utc::now(),
            level,
            stage,
            event_kind: event_kind.to_string(),
            message,
            context: serde_json::Value::Null,
        };
        let _ = self.activity_store.append(entry).await;
    }
}

fn counters_to_map(counters: &SessionCounters) -> std::collections::HashMap<StageKey, u64> {
    let mut map = std::collections::HashMap::new();
    map.insert(StageKey::Import, counters.movies_imported);
    map.insert(StageKey::MotionCorr, counters.movies_motion_corrected);
    map.insert(StageKey::CtfFind, counters.movies_ctf_estimated);
    map.insert(StageKey::AutoPick, counters.movies_picked);
    map.insert(StageKey::Extract, counters.movies_extracted);
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_store::memory::InMemoryStore;
    use crate::result_adapter::StatsFileResultAdapter;
    use crate::scheduler_client::SchedulerClient;
    use cryolive_contracts::{CommandExecutor, ExecError, ExecOutput};
    use cryolive_model::{OpticsConfig, ProjectId};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeExecutor {
        next_id: AtomicU32,
        scancel_calls: Mutex<Vec<String>>,
    }

    impl FakeExecutor {
        fn new() -> Self {
            Self {
                next_id: AtomicU32::new(1),
                scancel_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl CommandExecutor for FakeExecutor {
        async fn exec(&self, binary: &str, argv: &[String]) -> Result<ExecOutput, ExecError> {
            if binary == "sbatch" {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                return Ok(ExecOutput {
                    stdout: format!("Submitted batch job {id}"),
                    stderr: String::new(),
                    exit_code: 0,
                });
            }
            if binary == "scancel" {
                self.scancel_calls.lock().await.extend(argv.iter().cloned());
            }
            Ok(ExecOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            })
        }
    }

    fn test_config(watch_dir: &Path) -> SessionConfig {
        SessionConfig {
            project_id: ProjectId::new(),
            input_mode: InputMode::Existing,
            watch_path: watch_dir.to_string_lossy().into_owned(),
            file_glob: "*.tiff".to_string(),
            optics: OpticsConfig {
                pixel_size_angstrom: 1.0,
                voltage_kv: 300.0,
                spherical_aberration_mm: 2.7,
                amplitude_contrast: 0.1,
            },
            stage_params: Default::default(),
            quality_thresholds: Default::default(),
            scheduler_hints: Default::default(),
            class2d_enabled: true,
            particle_threshold: Some(5000),
        }
    }

    fn test_orchestrator(base_dir: &Path) -> LiveOrchestrator {
        test_orchestrator_with_executor(base_dir).0
    }

    fn test_orchestrator_with_executor(base_dir: &Path) -> (LiveOrchestrator, Arc<FakeExecutor>) {
        let store = Arc::new(InMemoryStore::new());
        let executor = Arc::new(FakeExecutor::new());
        let orch = LiveOrchestrator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(StatsFileResultAdapter::new()),
            SchedulerClient::new(executor.clone()),
            ProgressBus::new(),
            OrchestratorConfig {
                base_output_dir: base_dir.to_path_buf(),
                pass_tick_interval: Duration::from_millis(10),
                watch_poll_interval: Duration::from_millis(10),
                natural_completion_ticks: 2,
            },
        );
        (orch, executor)
    }

    #[test]
    fn active_pipeline_defaults_to_autopick() {
        let config = test_config(Path::new("/tmp"));
        let pipeline = active_pipeline(&config);
        assert!(pipeline.contains(&StageKey::AutoPick));
        assert!(!pipeline.contains(&StageKey::ManualPick));
    }

    #[test]
    fn active_pipeline_honors_manual_pick_selection() {
        let mut config = test_config(Path::new("/tmp"));
        config
            .stage_params
            .insert(StageKey::ManualPick, Default::default());
        let pipeline = active_pipeline(&config);
        assert!(pipeline.contains(&StageKey::ManualPick));
        assert!(!pipeline.contains(&StageKey::AutoPick));
    }

    #[tokio::test]
    async fn class2d_triggers_exactly_once_per_threshold_crossing() {
        let base = tempfile::tempdir().unwrap();
        let mut counters = SessionCounters::default();
        counters.extracted_particles = 10_999;
        let mut session = Session::new(SessionId::new(), test_config(base.path()));
        session.counters = counters;
        session.status = SessionStatus::Running;

        let orch = test_orchestrator(base.path());
        let run = Arc::new(SessionRun {
            id: session.id,
            project_root: base.path().join("proj"),
            session: Mutex::new(session),
            watcher: Arc::new(Mutex::new(FileWatcher::new(
                base.path().to_path_buf(),
                "*.tiff",
                Duration::from_secs(1),
                true,
            ))),
            pending_files: Mutex::new(VecDeque::new()),
            shutdown_tx: watch::channel(false).0,
            tasks: Mutex::new(Vec::new()),
        });

        let mut outcome = PassOutcome::default();
        {
            let mut session = run.session.lock().await;
            orch.inner.maybe_trigger_class2d(&mut session, &run, &mut outcome).await;
        }
        assert_eq!(outcome.class2d_triggers, 2);
        let session = run.session.lock().await;
        assert_eq!(session.class2d_last_triggered_k, 2);
        assert_eq!(session.counters.class2d_runs, 2);
    }

    #[tokio::test]
    async fn pause_then_resume_preserves_counters_and_pass_number() {
        let base = tempfile::tempdir().unwrap();
        let config = test_config(base.path());
        let orch = test_orchestrator(base.path());
        let session = orch.create_session(config).await.unwrap();

        orch.start(session.id).await.unwrap();
        orch.pause(session.id).await.unwrap();
        let paused = orch.snapshot(session.id).await.unwrap();
        assert_eq!(paused.pass_number, 0);

        orch.resume(session.id).await.unwrap();
        let resumed = orch.snapshot(session.id).await.unwrap();
        assert_eq!(resumed.pass_number, paused.pass_number);
        assert_eq!(resumed.counters, paused.counters);

        orch.stop(session.id).await.unwrap();
    }

    #[tokio::test]
    async fn stop_cancels_in_flight_jobs_via_scancel() {
        let base = tempfile::tempdir().unwrap();
        let config = test_config(base.path());
        let (orch, executor) = test_orchestrator_with_executor(base.path());
        let session = orch.create_session(config).await.unwrap();
        orch.start(session.id).await.unwrap();

        let file_path = base.path().join("a.tiff");
        std::fs::write(&file_path, b"hi").unwrap();

        let run = orch.inner.runs.get(&session.id).unwrap().value().clone();
        run.pending_files.lock().await.push_back(file_path);
        orch.inner.pass_tick(&run).await;

        // The Import job is still `pending` in the in-memory store (no
        // monitor is running in this test), so it counts as in-flight.
        orch.stop(session.id).await.unwrap();

        let calls = executor.scancel_calls.lock().await;
        assert_eq!(calls.as_slice(), &["1".to_string()]);
    }
}
