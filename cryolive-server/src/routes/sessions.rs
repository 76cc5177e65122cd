//! Handlers for `/api/live-sessions*` (§6), thin adapters over
//! [`cryolive_core::LiveOrchestrator`] and the stores, following the
//! teacher's handler shape of `extract -> call one service method -> map to
//! JSON` (`ferrex-server/src/scan_handlers.rs`).

use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use cryolive_model::{
    ActivityFilter, ActivityLevel, ProjectId, SessionConfig, SessionId, SessionSnapshot, StageKey,
    User,
};

use crate::app_state::AppState;
use crate::error::{AppError, AppResult};

/// `POST /api/live-sessions`
pub async fn create_session(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(config): Json<SessionConfig>,
) -> AppResult<Json<SessionSnapshot>> {
    require_project_access(&state, &user, config.project_id).await?;
    if !config.optics.is_valid() {
        return Err(AppError::bad_request(
            "amplitude contrast must be in (0, 1]",
        ));
    }
    let session = state.orchestrator.create_session(config).await?;
    Ok(Json(SessionSnapshot::from(&session)))
}

/// `GET /api/live-sessions/:id`
pub async fn get_session(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SessionSnapshot>> {
    let snapshot = state.orchestrator.snapshot(SessionId::from_uuid(id)).await?;
    authorize_session(&state, &user, snapshot.id).await?;
    Ok(Json(snapshot))
}

/// `POST /api/live-sessions/:id/start`
pub async fn start_session(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SessionSnapshot>> {
    let id = SessionId::from_uuid(id);
    authorize_session(&state, &user, id).await?;
    state.orchestrator.start(id).await?;
    Ok(Json(state.orchestrator.snapshot(id).await?))
}

/// `POST /api/live-sessions/:id/pause`
pub async fn pause_session(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SessionSnapshot>> {
    let id = SessionId::from_uuid(id);
    authorize_session(&state, &user, id).await?;
    state.orchestrator.pause(id).await?;
    Ok(Json(state.orchestrator.snapshot(id).await?))
}

/// `POST /api/live-sessions/:id/resume`
pub async fn resume_session(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SessionSnapshot>> {
    let id = SessionId::from_uuid(id);
    authorize_session(&state, &user, id).await?;
    state.orchestrator.resume(id).await?;
    Ok(Json(state.orchestrator.snapshot(id).await?))
}

/// `POST /api/live-sessions/:id/stop`
pub async fn stop_session(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SessionSnapshot>> {
    let id = SessionId::from_uuid(id);
    authorize_session(&state, &user, id).await?;
    state.orchestrator.stop(id).await?;
    Ok(Json(state.orchestrator.snapshot(id).await?))
}

/// `DELETE /api/live-sessions/:id`
pub async fn delete_session(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let id = SessionId::from_uuid(id);
    authorize_session(&state, &user, id).await?;
    state.orchestrator.delete(id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// `GET /api/live-sessions/:id/stats`
pub async fn session_stats(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SessionSnapshot>> {
    let id = SessionId::from_uuid(id);
    authorize_session(&state, &user, id).await?;
    Ok(Json(state.orchestrator.snapshot(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub level: Option<String>,
    pub stage: Option<String>,
    pub search: Option<String>,
    pub limit: Option<u32>,
}

/// `GET /api/live-sessions/:id/activity`
pub async fn session_activity(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Query(query): Query<ActivityQuery>,
) -> AppResult<Json<Vec<cryolive_model::ActivityEntry>>> {
    let id = SessionId::from_uuid(id);
    authorize_session(&state, &user, id).await?;

    let level = query
        .level
        .map(|raw| parse_activity_level(&raw))
        .transpose()?;
    let stage = query
        .stage
        .map(|raw| raw.parse::<StageKey>().map_err(|e| AppError::bad_request(e.to_string())))
        .transpose()?;

    let filter = ActivityFilter {
        level,
        stage,
        search: query.search,
        limit: query.limit,
    };
    let entries = state.activity_store.list(id, filter).await?;
    Ok(Json(entries))
}

/// `GET /api/live-sessions/project/:projectId`
pub async fn list_sessions_for_project(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Vec<SessionSnapshot>>> {
    let project_id = ProjectId::from_uuid(project_id);
    require_project_access(&state, &user, project_id).await?;
    let sessions = state.orchestrator.list_for_project(project_id).await?;
    Ok(Json(sessions.iter().map(SessionSnapshot::from).collect()))
}

fn parse_activity_level(raw: &str) -> AppResult<ActivityLevel> {
    match raw {
        "info" => Ok(ActivityLevel::Info),
        "success" => Ok(ActivityLevel::Success),
        "warning" => Ok(ActivityLevel::Warning),
        "error" => Ok(ActivityLevel::Error),
        other => Err(AppError::bad_request(format!("unknown activity level: {other}"))),
    }
}

/// Looks the session's owning project up and applies the same membership
/// check the WebSocket Hub uses for `subscribe` (P5).
async fn authorize_session(state: &AppState, user: &User, id: SessionId) -> AppResult<()> {
    let snapshot = state.orchestrator.snapshot(id).await?;
    require_project_access(state, user, snapshot.project_id).await
}

async fn require_project_access(state: &AppState, user: &User, project_id: ProjectId) -> AppResult<()> {
    let project = state.user_store.get_project(project_id).await?;
    if project.owner_id == user.id {
        return Ok(());
    }
    let is_member = state.user_store.is_member(project_id, user.id).await?;
    if !is_member {
        return Err(AppError::forbidden("access denied to project"));
    }
    Ok(())
}
