//! HTTP/WebSocket adapter for the CryoLive live-processing orchestrator.
//!
//! Exposes the thin surface of spec.md §6 over the services built in
//! `cryolive-core`: a versioned JSON API under `/api`, the authenticated
//! `/ws` upgrade, and a liveness probe. Grounded in the teacher's
//! `ferrex-server` crate: a `create_app(state) -> Router` entry point
//! (`ferrex-server/src/main.rs`), `routes::create_api_router` for resource
//! route tables, and a CORS + tracing middleware stack.

pub mod app_state;
pub mod auth;
pub mod error;
pub mod routes;
pub mod websocket;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use app_state::AppState;

/// Assembles the full application router: `/api/*` resource routes, `/ws`,
/// and the CORS + request-tracing middleware stack applied outermost-first.
pub fn create_app(state: AppState) -> Router {
    let allowed_prefix = state.config.cors_origin.clone();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            origin
                .to_str()
                .map(|o| o.starts_with(&allowed_prefix))
                .unwrap_or(false)
        }))
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", routes::create_api_router(state.clone()))
        .route("/ws", get(websocket::websocket_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
