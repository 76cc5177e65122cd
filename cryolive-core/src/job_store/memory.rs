use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use cryolive_contracts::{ActivityStore, JobStore, SessionStore, StoreError, UserStore};
use cryolive_model::{
    ActivityEntry, ActivityFilter, Job, JobId, JobStatus, PipelineStats, Project, ProjectId,
    Session, SessionConfig, SessionId, User, UserId,
};

/// In-memory implementation of every store trait, backing unit and
/// integration tests the way the teacher's test fixtures back its database
/// layer.
#[derive(Default)]
pub struct InMemoryStore {
    sessions: DashMap<SessionId, Session>,
    jobs: DashMap<JobId, Job>,
    activity: DashMap<SessionId, Mutex<Vec<ActivityEntry>>>,
    seq: DashMap<SessionId, Mutex<u64>>,
    users: DashMap<UserId, User>,
    projects: DashMap<ProjectId, Project>,
    memberships: DashMap<ProjectId, Mutex<Vec<UserId>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn insert_project(&self, project: Project) {
        self.projects.insert(project.id, project);
    }

    pub fn add_member(&self, project_id: ProjectId, user_id: UserId) {
        self.memberships
            .entry(project_id)
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .push(user_id);
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn create(&self, id: SessionId, config: SessionConfig) -> Result<Session, StoreError> {
        let session = Session::new(id, config);
        self.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn get(&self, id: SessionId) -> Result<Session, StoreError> {
        self.sessions
            .get(&id)
            .map(|s| s.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn list_for_project(&self, project_id: ProjectId) -> Result<Vec<Session>, StoreError> {
        Ok(self
            .sessions
            .iter()
            .filter(|s| s.config.project_id == project_id)
            .map(|s| s.clone())
            .collect())
    }

    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        self.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn delete(&self, id: SessionId) -> Result<(), StoreError> {
        self.sessions.remove(&id).ok_or(StoreError::NotFound)?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn create(&self, job: Job) -> Result<Job, StoreError> {
        self.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        self.jobs.get(&id).map(|j| j.clone()).ok_or(StoreError::NotFound)
    }

    async fn list_active(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .jobs
            .iter()
            .filter(|j| j.status.is_active() && j.scheduler_id.is_some())
            .map(|j| j.clone())
            .collect())
    }

    async fn transition_status(
        &self,
        id: JobId,
        new_status: JobStatus,
        error_message: Option<String>,
    ) -> Result<bool, StoreError> {
        let mut job = self.jobs.get_mut(&id).ok_or(StoreError::NotFound)?;
        let changed = job.try_transition(new_status);
        if changed {
            if let Some(msg) = error_message {
                job.error_message = Some(msg);
            }
        }
        Ok(changed)
    }

    async fn set_scheduler_id(&self, id: JobId, scheduler_id: String) -> Result<(), StoreError> {
        let mut job = self.jobs.get_mut(&id).ok_or(StoreError::NotFound)?;
        job.set_scheduler_id(scheduler_id);
        Ok(())
    }

    async fn update_stats(&self, id: JobId, stats: PipelineStats) -> Result<(), StoreError> {
        let mut job = self.jobs.get_mut(&id).ok_or(StoreError::NotFound)?;
        job.stats = stats;
        Ok(())
    }
}

#[async_trait]
impl ActivityStore for InMemoryStore {
    async fn append(&self, mut entry: ActivityEntry) -> Result<ActivityEntry, StoreError> {
        let seq_lock = self
            .seq
            .entry(entry.session_id)
            .or_insert_with(|| Mutex::new(0));
        let mut seq = seq_lock.lock();
        *seq += 1;
        entry.seq = *seq;
        drop(seq);

        self.activity
            .entry(entry.session_id)
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .push(entry.clone());
        Ok(entry)
    }

    async fn list(
        &self,
        session_id: SessionId,
        filter: ActivityFilter,
    ) -> Result<Vec<ActivityEntry>, StoreError> {
        let Some(entries) = self.activity.get(&session_id) else {
            return Ok(Vec::new());
        };
        let entries = entries.lock();
        let mut filtered: Vec<ActivityEntry> = entries
            .iter()
            .filter(|e| filter.level.is_none_or(|l| l == e.level))
            .filter(|e| filter.stage.is_none_or(|s| Some(s) == e.stage))
            .filter(|e| {
                filter
                    .search
                    .as_ref()
                    .is_none_or(|needle| e.message.contains(needle.as_str()))
            })
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            filtered.truncate(limit as usize);
        }
        Ok(filtered)
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn get(&self, id: UserId) -> Result<User, StoreError> {
        self.users.get(&id).map(|u| u.clone()).ok_or(StoreError::NotFound)
    }

    async fn get_by_username(&self, username: &str) -> Result<User, StoreError> {
        self.users
            .iter()
            .find(|u| u.username == username)
            .map(|u| u.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn get_project(&self, id: ProjectId) -> Result<Project, StoreError> {
        self.projects
            .get(&id)
            .map(|p| p.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn is_member(&self, project_id: ProjectId, user_id: UserId) -> Result<bool, StoreError> {
        if let Some(project) = self.projects.get(&project_id) {
            if project.owner_id == user_id {
                return Ok(true);
            }
        }
        Ok(self
            .memberships
            .get(&project_id)
            .map(|members| members.lock().contains(&user_id))
            .unwrap_or(false))
    }
}
