use async_trait::async_trait;
use sqlx::{PgPool, Row};

use cryolive_contracts::{ActivityStore, JobStore, SessionStore, StoreError, UserStore};
use cryolive_model::{
    ActivityEntry, ActivityFilter, ActivityLevel, Job, JobId, JobStatus, PipelineStats, Project,
    ProjectId, Session, SessionConfig, SessionId, StageKey, User, UserId,
};

/// Postgres-backed persistence, mirroring the teacher's
/// `PostgresDatabase`/`MediaDatabase` split: a thin pool wrapper with one
/// method per store operation, no ORM layer.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn job_status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "pending",
        JobStatus::Running => "running",
        JobStatus::Success => "success",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
    }
}

fn parse_job_status(raw: &str) -> JobStatus {
    match raw {
        "pending" => JobStatus::Pending,
        "running" => JobStatus::Running,
        "success" => JobStatus::Success,
        "failed" => JobStatus::Failed,
        "cancelled" => JobStatus::Cancelled,
        _ => JobStatus::Failed,
    }
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job, StoreError> {
    let stage_raw: String = row.try_get("stage").map_err(|e| StoreError::Backend(e.to_string()))?;
    let stage: StageKey = stage_raw
        .parse()
        .map_err(|_| StoreError::Backend(format!("invalid stage key in row: {stage_raw}")))?;
    let status_raw: String = row.try_get("status").map_err(|e| StoreError::Backend(e.to_string()))?;

    Ok(Job {
        id: JobId::from_uuid(row.try_get("id").map_err(|e| StoreError::Backend(e.to_string()))?),
        project_id: ProjectId::from_uuid(
            row.try_get("project_id").map_err(|e| StoreError::Backend(e.to_string()))?,
        ),
        stage,
        params_snapshot: row
            .try_get("params_snapshot")
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        command: row.try_get("command").map_err(|e| StoreError::Backend(e.to_string()))?,
        output_dir: row.try_get("output_dir").map_err(|e| StoreError::Backend(e.to_string()))?,
        status: parse_job_status(&status_raw),
        scheduler_id: row.try_get("scheduler_id").map_err(|e| StoreError::Backend(e.to_string()))?,
        started_at: row.try_get("started_at").map_err(|e| StoreError::Backend(e.to_string()))?,
        ended_at: row.try_get("ended_at").map_err(|e| StoreError::Backend(e.to_string()))?,
        error_message: row.try_get("error_message").map_err(|e| StoreError::Backend(e.to_string()))?,
        stats: PipelineStats {
            iteration_count: row.try_get::<i64, _>("iteration_count").unwrap_or(0) as u64,
            total_iterations: row.try_get::<i64, _>("total_iterations").unwrap_or(0) as u64,
            micrograph_count: row.try_get::<i64, _>("micrograph_count").unwrap_or(0) as u64,
            particle_count: row.try_get::<i64, _>("particle_count").unwrap_or(0) as u64,
            pixel_size: row.try_get("pixel_size").ok(),
            box_size: row.try_get::<Option<i32>, _>("box_size").ok().flatten().map(|v| v as u32),
        },
    })
}

#[async_trait]
impl JobStore for PostgresStore {
    async fn create(&self, job: Job) -> Result<Job, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, project_id, stage, params_snapshot, command, output_dir,
                status, scheduler_id, started_at, ended_at, error_message,
                iteration_count, total_iterations, micrograph_count, particle_count,
                pixel_size, box_size
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.project_id.as_uuid())
        .bind(job.stage.as_str())
        .bind(&job.params_snapshot)
        .bind(&job.command)
        .bind(&job.output_dir)
        .bind(job_status_str(job.status))
        .bind(&job.scheduler_id)
        .bind(job.started_at)
        .bind(job.ended_at)
        .bind(&job.error_message)
        .bind(job.stats.iteration_count as i64)
        .bind(job.stats.total_iterations as i64)
        .bind(job.stats.micrograph_count as i64)
        .bind(job.stats.particle_count as i64)
        .bind(job.stats.pixel_size)
        .bind(job.stats.box_size.map(|v| v as i32))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .ok_or(StoreError::NotFound)?;
        row_to_job(&row)
    }

    async fn list_active(&self) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE status IN ('pending', 'running') AND scheduler_id IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.iter().map(row_to_job).collect()
    }

    async fn transition_status(
        &self,
        id: JobId,
        new_status: JobStatus,
        error_message: Option<String>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                error_message = COALESCE($3, error_message),
                ended_at = CASE WHEN ended_at IS NULL AND $2 IN ('success','failed','cancelled')
                                THEN now() ELSE ended_at END,
                started_at = CASE WHEN started_at IS NULL AND $2 = 'running'
                                THEN now() ELSE started_at END
            WHERE id = $1 AND status NOT IN ('success', 'failed', 'cancelled')
            "#,
        )
        .bind(id.as_uuid())
        .bind(job_status_str(new_status))
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_scheduler_id(&self, id: JobId, scheduler_id: String) -> Result<(), StoreError> {
        sqlx::query("UPDATE jobs SET scheduler_id = $2 WHERE id = $1 AND scheduler_id IS NULL")
            .bind(id.as_uuid())
            .bind(scheduler_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn update_stats(&self, id: JobId, stats: PipelineStats) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE jobs SET
                iteration_count = $2, total_iterations = $3,
                micrograph_count = $4, particle_count = $5,
                pixel_size = $6, box_size = $7
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(stats.iteration_count as i64)
        .bind(stats.total_iterations as i64)
        .bind(stats.micrograph_count as i64)
        .bind(stats.particle_count as i64)
        .bind(stats.pixel_size)
        .bind(stats.box_size.map(|v| v as i32))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ActivityStore for PostgresStore {
    async fn append(&self, entry: ActivityEntry) -> Result<ActivityEntry, StoreError> {
        // No per-session sequence object: the next seq is one past the
        // session's current max, computed and inserted in the same
        // statement so two concurrent appends for the same session still
        // serialize on the row lock implied by the subquery.
        let row = sqlx::query(
            r#"
            INSERT INTO activity_entries (session_id, seq, timestamp, level, stage, event_kind, message, context)
            VALUES (
                $1,
                COALESCE((SELECT MAX(seq) FROM activity_entries WHERE session_id = $1), 0) + 1,
                now(), $2, $3, $4, $5, $6
            )
            RETURNING seq, timestamp
            "#,
        )
        .bind(entry.session_id.as_uuid())
        .bind(level_str(entry.level))
        .bind(entry.stage.map(|s| s.as_str().to_string()))
        .bind(&entry.event_kind)
        .bind(&entry.message)
        .bind(&entry.context)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(ActivityEntry {
            seq: row.try_get::<i64, _>("seq").unwrap_or(0) as u64,
            timestamp: row.try_get("timestamp").unwrap_or(entry.timestamp),
            ..entry
        })
    }

    async fn list(
        &self,
        session_id: SessionId,
        filter: ActivityFilter,
    ) -> Result<Vec<ActivityEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, seq, timestamp, level, stage, event_kind, message, context
            FROM activity_entries
            WHERE session_id = $1
              AND ($2::text IS NULL OR level = $2)
              AND ($3::text IS NULL OR stage = $3)
              AND ($4::text IS NULL OR message ILIKE '%' || $4 || '%')
            ORDER BY seq DESC
            LIMIT $5
            "#,
        )
        .bind(session_id.as_uuid())
        .bind(filter.level.map(level_str))
        .bind(filter.stage.map(|s| s.as_str().to_string()))
        .bind(&filter.search)
        .bind(filter.limit.unwrap_or(200) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let level_raw: String = row.try_get("level").map_err(|e| StoreError::Backend(e.to_string()))?;
                let stage_raw: Option<String> =
                    row.try_get("stage").map_err(|e| StoreError::Backend(e.to_string()))?;
                Ok(ActivityEntry {
                    session_id: SessionId::from_uuid(
                        row.try_get("session_id").map_err(|e| StoreError::Backend(e.to_string()))?,
                    ),
                    seq: row.try_get::<i64, _>("seq").unwrap_or(0) as u64,
                    timestamp: row.try_get("timestamp").map_err(|e| StoreError::Backend(e.to_string()))?,
                    level: parse_level(&level_raw),
                    stage: stage_raw.and_then(|s| s.parse().ok()),
                    event_kind: row.try_get("event_kind").map_err(|e| StoreError::Backend(e.to_string()))?,
                    message: row.try_get("message").map_err(|e| StoreError::Backend(e.to_string()))?,
                    context: row.try_get("context").map_err(|e| StoreError::Backend(e.to_string()))?,
                })
            })
            .collect()
    }
}

fn session_status_str(status: cryolive_model::SessionStatus) -> &'static str {
    match status {
        cryolive_model::SessionStatus::Pending => "pending",
        cryolive_model::SessionStatus::Running => "running",
        cryolive_model::SessionStatus::Paused => "paused",
        cryolive_model::SessionStatus::Stopped => "stopped",
        cryolive_model::SessionStatus::Completed => "completed",
        cryolive_model::SessionStatus::Error => "error",
    }
}

fn parse_session_status(raw: &str) -> cryolive_model::SessionStatus {
    match raw {
        "running" => cryolive_model::SessionStatus::Running,
        "paused" => cryolive_model::SessionStatus::Paused,
        "stopped" => cryolive_model::SessionStatus::Stopped,
        "completed" => cryolive_model::SessionStatus::Completed,
        "error" => cryolive_model::SessionStatus::Error,
        _ => cryolive_model::SessionStatus::Pending,
    }
}

/// Reconstructs a Session from its durable row. Only the immutable config,
/// status, and pass counter survive a restart this way; pass history, the
/// jobs map, and counters live in the orchestrator's in-memory cache while
/// the session is active and are not needed to resume `snapshot()` queries
/// for a session that was already running before a process restart picks it
/// back up from `pending`/`paused`.
fn row_to_session(row: &sqlx::postgres::PgRow) -> Result<Session, StoreError> {
    let id = SessionId::from_uuid(row.try_get("id").map_err(|e| StoreError::Backend(e.to_string()))?);
    let config: SessionConfig = {
        let raw: serde_json::Value =
            row.try_get("config").map_err(|e| StoreError::Backend(e.to_string()))?;
        serde_json::from_value(raw)
            .map_err(|e| StoreError::Backend(format!("corrupt session config: {e}")))?
    };
    let status_raw: String = row.try_get("status").map_err(|e| StoreError::Backend(e.to_string()))?;
    let pass_number: i32 = row.try_get("pass_number").map_err(|e| StoreError::Backend(e.to_string()))?;

    let mut session = Session::new(id, config);
    session.status = parse_session_status(&status_raw);
    session.pass_number = pass_number.max(0) as u32;
    Ok(session)
}

fn level_str(level: ActivityLevel) -> &'static str {
    match level {
        ActivityLevel::Info => "info",
        ActivityLevel::Success => "success",
        ActivityLevel::Warning => "warning",
        ActivityLevel::Error => "error",
    }
}

fn parse_level(raw: &str) -> ActivityLevel {
    match raw {
        "success" => ActivityLevel::Success,
        "warning" => ActivityLevel::Warning,
        "error" => ActivityLevel::Error,
        _ => ActivityLevel::Info,
    }
}

#[async_trait]
impl SessionStore for PostgresStore {
    async fn create(&self, id: SessionId, config: SessionConfig) -> Result<Session, StoreError> {
        let config_json = serde_json::to_value(&config)
            .map_err(|e| StoreError::Backend(format!("failed to serialize session config: {e}")))?;
        sqlx::query(
            "INSERT INTO sessions (id, project_id, config, status) VALUES ($1, $2, $3, 'pending')",
        )
        .bind(id.as_uuid())
        .bind(config.project_id.as_uuid())
        .bind(config_json)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Session::new(id, config))
    }

    async fn get(&self, id: SessionId) -> Result<Session, StoreError> {
        let row = sqlx::query("SELECT id, config, status, pass_number FROM sessions WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .ok_or(StoreError::NotFound)?;
        row_to_session(&row)
    }

    async fn list_for_project(&self, project_id: ProjectId) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query("SELECT id, config, status, pass_number FROM sessions WHERE project_id = $1")
            .bind(project_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        rows.iter().map(row_to_session).collect()
    }

    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query("UPDATE sessions SET status = $2, pass_number = $3 WHERE id = $1")
            .bind(session.id.as_uuid())
            .bind(session_status_str(session.status))
            .bind(session.pass_number as i32)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, id: SessionId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn get(&self, id: UserId) -> Result<User, StoreError> {
        let row = sqlx::query("SELECT id, username, password_hash FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .ok_or(StoreError::NotFound)?;
        Ok(User {
            id: UserId::from_uuid(row.try_get("id").map_err(|e| StoreError::Backend(e.to_string()))?),
            username: row.try_get("username").map_err(|e| StoreError::Backend(e.to_string()))?,
            password_hash: row
                .try_get("password_hash")
                .map_err(|e| StoreError::Backend(e.to_string()))?,
        })
    }

    async fn get_by_username(&self, username: &str) -> Result<User, StoreError> {
        let row = sqlx::query("SELECT id, username, password_hash FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .ok_or(StoreError::NotFound)?;
        Ok(User {
            id: UserId::from_uuid(row.try_get("id").map_err(|e| StoreError::Backend(e.to_string()))?),
            username: row.try_get("username").map_err(|e| StoreError::Backend(e.to_string()))?,
            password_hash: row
                .try_get("password_hash")
                .map_err(|e| StoreError::Backend(e.to_string()))?,
        })
    }

    async fn get_project(&self, id: ProjectId) -> Result<Project, StoreError> {
        let row = sqlx::query("SELECT id, owner_id, name FROM projects WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .ok_or(StoreError::NotFound)?;
        Ok(Project {
            id: ProjectId::from_uuid(row.try_get("id").map_err(|e| StoreError::Backend(e.to_string()))?),
            owner_id: UserId::from_uuid(
                row.try_get("owner_id").map_err(|e| StoreError::Backend(e.to_string()))?,
            ),
            name: row.try_get("name").map_err(|e| StoreError::Backend(e.to_string()))?,
        })
    }

    async fn is_member(&self, project_id: ProjectId, user_id: UserId) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM projects WHERE id = $1 AND owner_id = $2
                UNION
                SELECT 1 FROM project_members WHERE project_id = $1 AND user_id = $2
            ) AS member
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        row.try_get("member").map_err(|e| StoreError::Backend(e.to_string()))
    }
}
