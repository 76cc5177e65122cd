//! In-process HTTP API tests, exercising `create_app` the way the teacher's
//! `tests/support/mod.rs` builds a `TestApp` from a hand-assembled `AppState`
//! instead of a real running process (`ferrex-server/tests/support/mod.rs`).
//! Uses `tower::ServiceExt::oneshot` rather than a bound socket.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use cryolive_config::{Config, MpiLauncher};
use cryolive_core::job_store::memory::InMemoryStore;
use cryolive_core::{
    LiveOrchestrator, OrchestratorConfig, ProcessCommandExecutor, ProgressBus, SchedulerClient,
    StatsFileResultAdapter,
};
use cryolive_model::{Project, ProjectId, User, UserId};
use cryolive_server::websocket::ConnectionManager;
use cryolive_server::{create_app, AppState};

struct Fixture {
    app: Router,
    user_id: UserId,
    project_id: ProjectId,
    jwt_secret: String,
    _tempdir: tempfile::TempDir,
}

async fn build_fixture() -> Fixture {
    let tempdir = tempfile::tempdir().unwrap();

    let store = Arc::new(InMemoryStore::new());

    let user_id = UserId::new();
    let password_hash = cryolive_server::auth::hash_password("correct horse battery staple").unwrap();
    store.insert_user(User {
        id: user_id,
        username: "operator".to_string(),
        password_hash,
    });

    let project_id = ProjectId::new();
    store.insert_project(Project {
        id: project_id,
        owner_id: user_id,
        name: "Grid 42".to_string(),
    });

    let config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_url: None,
        redis_url: None,
        cors_origin: "http://localhost:5173".to_string(),
        mpi_launcher: MpiLauncher::Srun,
        jwt_secret: "test-secret".to_string(),
        monitor_poll_interval: Duration::from_secs(5),
        ghost_job_miss_threshold: 60,
        watch_debounce: Duration::from_secs(5),
        max_ws_connections: 10,
        data_dir: tempdir.path().to_path_buf(),
    };

    let bus = ProgressBus::new();
    let executor = Arc::new(ProcessCommandExecutor::new(Duration::from_secs(1)));
    let scheduler = SchedulerClient::new(executor);
    let result_adapter = Arc::new(StatsFileResultAdapter::new());

    let orchestrator = LiveOrchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        result_adapter,
        scheduler,
        bus,
        OrchestratorConfig {
            base_output_dir: config.data_dir.clone(),
            ..OrchestratorConfig::default()
        },
    );

    let state = AppState {
        orchestrator,
        job_store: store.clone(),
        activity_store: store.clone(),
        user_store: store,
        websocket_manager: Arc::new(ConnectionManager::new(config.max_ws_connections)),
        config: Arc::new(config.clone()),
    };

    Fixture {
        app: create_app(state),
        user_id,
        project_id,
        jwt_secret: config.jwt_secret,
        _tempdir: tempdir,
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_reports_ok_without_authentication() {
    let fixture = build_fixture().await;
    let response = fixture
        .app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn login_then_create_and_fetch_a_session() {
    let fixture = build_fixture().await;

    let login_req = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "username": "operator", "password": "correct horse battery staple" }).to_string(),
        ))
        .unwrap();
    let response = fixture.app.clone().oneshot(login_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let login_body = body_json(response).await;
    let token = login_body["token"].as_str().unwrap().to_string();
    assert_eq!(login_body["user_id"], fixture.user_id.to_string());

    let session_config = json!({
        "project_id": fixture.project_id.to_string(),
        "input_mode": "watch",
        "watch_path": "/data/incoming",
        "file_glob": "*.tiff",
        "optics": {
            "pixel_size_angstrom": 0.83,
            "voltage_kv": 300.0,
            "spherical_aberration_mm": 2.7,
            "amplitude_contrast": 0.07
        },
    });

    let create_req = Request::builder()
        .method("POST")
        .uri("/api/live-sessions")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(session_config.to_string()))
        .unwrap();
    let response = fixture.app.clone().oneshot(create_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created = body_json(response).await;
    let session_id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["status"], "pending");

    let get_req = Request::builder()
        .uri(format!("/api/live-sessions/{session_id}"))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = fixture.app.clone().oneshot(get_req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let _ = fixture.jwt_secret;
}

#[tokio::test]
async fn protected_routes_reject_missing_bearer_token() {
    let fixture = build_fixture().await;
    let request = Request::builder()
        .uri(format!("/api/live-sessions/project/{}", fixture.project_id))
        .body(Body::empty())
        .unwrap();
    let response = fixture.app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_amplitude_contrast_is_rejected_with_a_bad_request() {
    let fixture = build_fixture().await;

    let login_req = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "username": "operator", "password": "correct horse battery staple" }).to_string(),
        ))
        .unwrap();
    let response = fixture.app.clone().oneshot(login_req).await.unwrap();
    let token = body_json(response).await["token"].as_str().unwrap().to_string();

    let bad_config = json!({
        "project_id": fixture.project_id.to_string(),
        "input_mode": "existing",
        "watch_path": "/data/incoming",
        "file_glob": "*.tiff",
        "optics": {
            "pixel_size_angstrom": 0.83,
            "voltage_kv": 300.0,
            "spherical_aberration_mm": 2.7,
            "amplitude_contrast": 0.0
        },
    });

    let request = Request::builder()
        .method("POST")
        .uri("/api/live-sessions")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(bad_config.to_string()))
        .unwrap();
    let response = fixture.app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
