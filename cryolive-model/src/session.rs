use std::collections::HashMap;

use crate::ids::{JobId, ProjectId, SessionId};
use crate::pass_record::PassRecord;
use crate::stage::StageKey;

/// Input discovery mode for a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum InputMode {
    /// Keep polling the watch directory for new movies indefinitely.
    Watch,
    /// Snapshot the directory once at start and process only those files.
    Existing,
}

/// Optical parameters of the microscope session, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OpticsConfig {
    pub pixel_size_angstrom: f64,
    pub voltage_kv: f64,
    pub spherical_aberration_mm: f64,
    pub amplitude_contrast: f64,
}

impl OpticsConfig {
    /// Amplitude contrast must lie in (0, 1].
    pub fn is_valid(&self) -> bool {
        self.amplitude_contrast > 0.0 && self.amplitude_contrast <= 1.0
    }
}

/// Quality filter thresholds applied when deciding whether a micrograph's
/// derived metrics are acceptable. Opaque beyond the numeric cutoffs; the
/// core never inspects them, only forwards them to stage parameter blocks.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QualityThresholds {
    pub max_ctf_resolution_angstrom: Option<f64>,
    pub min_defocus_micrometer: Option<f64>,
    pub max_defocus_micrometer: Option<f64>,
}

/// Resource hints forwarded to the scheduler submission script.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchedulerResourceHints {
    pub partition: Option<String>,
    pub cpus_per_task: Option<u32>,
    pub gpus: Option<u32>,
    pub mem_mb: Option<u32>,
    pub time_limit_minutes: Option<u32>,
}

/// Per-stage parameter block: a typed key/value record plus an optional
/// free-form `additional_arguments` string that stage builders must sanitize
/// before appending to the argv.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StageParams {
    #[cfg_attr(feature = "serde", serde(default))]
    pub values: HashMap<String, serde_json::Value>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub additional_arguments: Option<String>,
}

/// The immutable configuration of a Session, fixed at creation time.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    pub project_id: ProjectId,
    pub input_mode: InputMode,
    pub watch_path: String,
    pub file_glob: String,
    pub optics: OpticsConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub stage_params: HashMap<StageKey, StageParams>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub quality_thresholds: QualityThresholds,
    #[cfg_attr(feature = "serde", serde(default))]
    pub scheduler_hints: SchedulerResourceHints,
    /// Whether the optional Class2D stage is enabled for this session.
    #[cfg_attr(feature = "serde", serde(default))]
    pub class2d_enabled: bool,
    /// Cumulative extracted-particle count that re-arms the Class2D trigger
    /// every time it is crossed.
    #[cfg_attr(feature = "serde", serde(default))]
    pub particle_threshold: Option<u64>,
}

/// The Session's mutable runtime status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SessionStatus {
    Pending,
    Running,
    Paused,
    Stopped,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Stopped | SessionStatus::Completed)
    }
}

/// Cumulative per-stage counters, monotonically non-decreasing within a
/// session (P1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionCounters {
    pub movies_imported: u64,
    pub movies_motion_corrected: u64,
    pub movies_ctf_estimated: u64,
    pub movies_picked: u64,
    pub movies_extracted: u64,
    pub extracted_particles: u64,
    pub class2d_runs: u64,
}

/// For each pipeline stage key, the latest submitted Job and its history.
#[derive(Debug, Clone, Default)]
pub struct JobsMap {
    pub latest: HashMap<StageKey, JobId>,
    pub history: HashMap<StageKey, Vec<JobId>>,
}

impl JobsMap {
    pub fn record(&mut self, stage: StageKey, job_id: JobId) {
        self.latest.insert(stage, job_id);
        self.history.entry(stage).or_default().push(job_id);
    }

    pub fn latest_for(&self, stage: StageKey) -> Option<JobId> {
        self.latest.get(&stage).copied()
    }
}

/// The full, mutable runtime state of a live session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub config: SessionConfig,
    pub status: SessionStatus,
    pub current_stage: Option<StageKey>,
    pub counters: SessionCounters,
    pub pass_number: u32,
    pub last_pass_at: Option<chrono::DateTime<chrono::Utc>>,
    pub pass_history: Vec<PassRecord>,
    pub jobs: JobsMap,
    /// Highest multiple of `particle_threshold` for which a Class2D job has
    /// already been submitted.
    pub class2d_last_triggered_k: u64,
    /// Consecutive ticks with no newly discovered input file, used by the
    /// `existing` input mode's natural-completion check.
    pub consecutive_empty_ticks: u32,
    /// For each stage, the latest Job id whose success has already been
    /// folded into `counters`. Prevents a stage's completion from being
    /// double-counted across pass ticks, and in particular prevents a pass
    /// from being recorded twice for the same completed terminal-stage run.
    pub counted_stage_jobs: HashMap<StageKey, JobId>,
}

impl Session {
    pub fn new(id: SessionId, config: SessionConfig) -> Self {
        Self {
            id,
            config,
            status: SessionStatus::Pending,
            current_stage: None,
            counters: SessionCounters::default(),
            pass_number: 0,
            last_pass_at: None,
            pass_history: Vec::new(),
            jobs: JobsMap::default(),
            class2d_last_triggered_k: 0,
            consecutive_empty_ticks: 0,
            counted_stage_jobs: HashMap::new(),
        }
    }
}

/// A read-only snapshot returned by `snapshot(sessionId)`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub project_id: ProjectId,
    pub status: SessionStatus,
    pub current_stage: Option<StageKey>,
    pub counters: SessionCounters,
    pub pass_number: u32,
    pub last_pass_at: Option<chrono::DateTime<chrono::Utc>>,
    pub latest_jobs: HashMap<StageKey, JobId>,
}

impl From<&Session> for SessionSnapshot {
    fn from(s: &Session) -> Self {
        Self {
            id: s.id,
            project_id: s.config.project_id,
            status: s.status,
            current_stage: s.current_stage,
            counters: s.counters,
            pass_number: s.pass_number,
            last_pass_at: s.last_pass_at,
            latest_jobs: s.jobs.latest.clone(),
        }
    }
}
