//! HTTP route tables (§6), mirroring the teacher's `routes::{create_api_router, v1}`
//! split: one module per resource, merged into a single versioned router.

pub mod auth;
pub mod health;
pub mod sessions;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;
use crate::auth::require_auth;

/// Builds the full `/api` router, public auth/health routes unguarded and
/// every live-session route behind [`require_auth`].
pub fn create_api_router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/live-sessions", post(sessions::create_session))
        .route("/live-sessions/{id}", get(sessions::get_session).delete(sessions::delete_session))
        .route("/live-sessions/{id}/start", post(sessions::start_session))
        .route("/live-sessions/{id}/pause", post(sessions::pause_session))
        .route("/live-sessions/{id}/resume", post(sessions::resume_session))
        .route("/live-sessions/{id}/stop", post(sessions::stop_session))
        .route("/live-sessions/{id}/stats", get(sessions::session_stats))
        .route("/live-sessions/{id}/activity", get(sessions::session_activity))
        .route(
            "/live-sessions/project/{project_id}",
            get(sessions::list_sessions_for_project),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/auth/login", post(auth::login))
        .merge(protected)
}
