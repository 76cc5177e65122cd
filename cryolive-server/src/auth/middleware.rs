use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use cryolive_model::User;

use super::jwt::verify_token;
use crate::app_state::AppState;
use crate::error::AppError;

/// Extracts and validates the bearer token, loads the user, and inserts it
/// as a request extension, following the teacher's `auth_middleware`
/// (`ferrex-server/src/users/auth/middleware.rs`). Unlike the teacher this
/// system has no permissions/device-id extensions to attach — project
/// membership is checked per-endpoint instead (P5).
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(&request)?;
    let claims = verify_token(&token, &state.config.jwt_secret)
        .map_err(|_| AppError::unauthorized("invalid or expired token"))?;
    let user = state
        .user_store
        .get(claims.sub)
        .await
        .map_err(|_| AppError::unauthorized("unknown user"))?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

fn extract_bearer_token(request: &Request) -> Result<String, AppError> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("missing authorization header"))?;

    header_value
        .strip_prefix("Bearer ")
        .map(|s| s.to_string())
        .ok_or_else(|| AppError::unauthorized("expected a bearer token"))
}

/// Extracted by `Extension<User>` inside handlers after `require_auth` runs.
pub type AuthenticatedUser = User;
