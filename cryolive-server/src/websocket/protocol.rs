//! Wire messages for `/ws`. Generalizes the teacher's tagged `SyncMessage`
//! enum (`ferrex-core::sync_session::SyncMessage`) from room-scoped
//! playback events to project-scoped job/session events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cryolive_core::{ProgressChange, StatusChange};
use cryolive_model::{JobId, JobStatus, ProjectId, SessionId, SessionSnapshot, StageKey};

pub fn channel_for(project_id: ProjectId) -> String {
    format!("project:{project_id}")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { project_id: ProjectId },
    Unsubscribe { project_id: ProjectId },
    Ping,
    GetLiveState { session_id: SessionId },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        connection_id: String,
    },
    Subscribed {
        channel: String,
    },
    Unsubscribed {
        channel: String,
    },
    Error {
        message: String,
        channel: Option<String>,
    },
    Pong,
    JobUpdate {
        job_id: JobId,
        project_id: ProjectId,
        old_status: JobStatus,
        new_status: JobStatus,
        timestamp: DateTime<Utc>,
    },
    JobProgress {
        job_id: JobId,
        project_id: ProjectId,
        stage_key: StageKey,
        iteration_count: u64,
        total_iterations: u64,
        progress_percent: f64,
    },
    LiveSessionState {
        session: SessionSnapshot,
    },
    /// Pushed whenever a subscribed session's status, current stage, or pass
    /// number changes (§4.6), as opposed to `LiveSessionState`, which is
    /// sent only in reply to a `get_live_state` request.
    LiveSessionUpdate {
        session: SessionSnapshot,
    },
}

impl From<&StatusChange> for ServerMessage {
    fn from(e: &StatusChange) -> Self {
        ServerMessage::JobUpdate {
            job_id: e.job_id,
            project_id: e.project_id,
            old_status: e.old_status,
            new_status: e.new_status,
            timestamp: Utc::now(),
        }
    }
}

impl From<&ProgressChange> for ServerMessage {
    fn from(e: &ProgressChange) -> Self {
        ServerMessage::JobProgress {
            job_id: e.job_id,
            project_id: e.project_id,
            stage_key: e.stage_key,
            iteration_count: e.iteration_count,
            total_iterations: e.total_iterations,
            progress_percent: e.progress_percent,
        }
    }
}
