//! Minimal login endpoint: enough to issue the JWT that `require_auth` and
//! the WebSocket Hub's token check expect. Full account management (signup,
//! password reset, project CRUD) is out of scope (spec.md §1) and lives in
//! an external collaborator; this crate only needs to turn a valid
//! username/password into a bearer token, following the teacher's
//! `auth::handlers::login` shape (`ferrex-server/src/users/auth/handlers.rs`).

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::auth::{issue_token, verify_password};
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: cryolive_model::UserId,
}

/// `POST /api/auth/login`
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let user = state
        .user_store
        .get_by_username(&req.username)
        .await
        .map_err(|_| AppError::unauthorized("invalid username or password"))?;

    if !verify_password(&req.password, &user.password_hash) {
        return Err(AppError::unauthorized("invalid username or password"));
    }

    let token = issue_token(user.id, &state.config.jwt_secret)
        .map_err(|e| AppError::internal(format!("failed to issue token: {e}")))?;

    Ok(Json(LoginResponse {
        token,
        user_id: user.id,
    }))
}
