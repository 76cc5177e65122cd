use async_trait::async_trait;

use cryolive_model::{
    ActivityEntry, ActivityFilter, Job, JobId, JobStatus, PipelineStats, Project, ProjectId,
    Session, SessionConfig, SessionId, User, UserId,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("backend error: {0}")]
    Backend(String),
}

/// Persistent record of Sessions. The Orchestrator is the only writer of
/// Session status; the Monitor never calls these mutating methods.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, id: SessionId, config: SessionConfig) -> Result<Session, StoreError>;
    async fn get(&self, id: SessionId) -> Result<Session, StoreError>;
    async fn list_for_project(&self, project_id: ProjectId) -> Result<Vec<Session>, StoreError>;
    async fn save(&self, session: &Session) -> Result<(), StoreError>;
    async fn delete(&self, id: SessionId) -> Result<(), StoreError>;
}

/// Single source of truth for Job rows. Every mutation is atomic at the row
/// level and respects the terminal-state-absorbing invariant (P2).
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: Job) -> Result<Job, StoreError>;
    async fn get(&self, id: JobId) -> Result<Job, StoreError>;
    /// Returns every Job whose status is `pending` or `running` and which
    /// has a non-null scheduler id, for the Monitor's per-tick reconcile.
    async fn list_active(&self) -> Result<Vec<Job>, StoreError>;
    /// Atomically transitions `id` to `new_status`, returning `false`
    /// (without error) if the current status was already terminal.
    async fn transition_status(
        &self,
        id: JobId,
        new_status: JobStatus,
        error_message: Option<String>,
    ) -> Result<bool, StoreError>;
    async fn set_scheduler_id(&self, id: JobId, scheduler_id: String) -> Result<(), StoreError>;
    async fn update_stats(&self, id: JobId, stats: PipelineStats) -> Result<(), StoreError>;
}

/// Append-only activity log, one sequence space per Session.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn append(&self, entry: ActivityEntry) -> Result<ActivityEntry, StoreError>;
    async fn list(
        &self,
        session_id: SessionId,
        filter: ActivityFilter,
    ) -> Result<Vec<ActivityEntry>, StoreError>;
}

/// Minimal account/membership surface needed by auth and the WebSocket
/// access check (P5).
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, id: UserId) -> Result<User, StoreError>;
    async fn get_by_username(&self, username: &str) -> Result<User, StoreError>;
    async fn get_project(&self, id: ProjectId) -> Result<Project, StoreError>;
    async fn is_member(&self, project_id: ProjectId, user_id: UserId) -> Result<bool, StoreError>;
}
