use chrono::{DateTime, Utc};

use crate::ids::SessionId;
use crate::stage::StageKey;

/// Severity level of an activity entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ActivityLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// An append-only structured log record attached to a Session.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActivityEntry {
    pub session_id: SessionId,
    /// Monotonically increasing per-session sequence number.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub level: ActivityLevel,
    pub stage: Option<StageKey>,
    /// Free string drawn from a closed set, e.g. `pipeline_pass`,
    /// `pipeline_complete`, `job_failed`, `class2d_triggered`.
    pub event_kind: String,
    pub message: String,
    pub context: serde_json::Value,
}

/// Filter parameters for listing activity entries.
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub level: Option<ActivityLevel>,
    pub stage: Option<StageKey>,
    pub search: Option<String>,
    pub limit: Option<u32>,
}
