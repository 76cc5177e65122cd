use std::sync::Arc;

use cryolive_config::Config;
use cryolive_contracts::{ActivityStore, JobStore, UserStore};
use cryolive_core::LiveOrchestrator;

use crate::websocket::ConnectionManager;

/// Shared server state, the same shape as the teacher's `AppState`: one
/// `Arc` handle per long-lived service, cheaply `Clone`d into every handler
/// (`ferrex-server/src/infra/app_state.rs`).
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: LiveOrchestrator,
    pub job_store: Arc<dyn JobStore>,
    pub activity_store: Arc<dyn ActivityStore>,
    pub user_store: Arc<dyn UserStore>,
    pub websocket_manager: Arc<ConnectionManager>,
    pub config: Arc<Config>,
}
