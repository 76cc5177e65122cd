//! Supplementing the distilled spec, which is silent on ops concerns
//! (SPEC_FULL.md §5): a thin liveness endpoint for load balancers and
//! deployment health checks.

use axum::Json;
use serde_json::{json, Value};

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
