use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use cryolive_model::UserId;

use super::protocol::ServerMessage;

/// One live WebSocket client, generalizing the teacher's `Connection`
/// (`ferrex-server/src/infra/websocket/connection.rs`): an id, the
/// authenticated user, an outbound channel, and a liveness timestamp. Project
/// channel membership lives in `ConnectionManager`'s indexed map, not here,
/// so there is exactly one place that knows who is subscribed to what.
#[derive(Clone)]
pub struct Connection {
    pub id: String,
    pub user_id: UserId,
    sender: mpsc::Sender<ServerMessage>,
    last_pong: Arc<RwLock<i64>>,
    missed_pongs: Arc<std::sync::atomic::AtomicU32>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("channel_closed", &self.sender.is_closed())
            .finish()
    }
}

impl Connection {
    pub fn new(id: String, user_id: UserId, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            user_id,
            sender,
            last_pong: Arc::new(RwLock::new(chrono::Utc::now().timestamp())),
            missed_pongs: Arc::new(std::sync::atomic::AtomicU32::new(0)),
        }
    }

    pub async fn send(&self, message: ServerMessage) -> Result<(), mpsc::error::SendError<ServerMessage>> {
        self.sender.send(message).await
    }

    pub async fn record_pong(&self) {
        *self.last_pong.write().await = chrono::Utc::now().timestamp();
        self.missed_pongs.store(0, std::sync::atomic::Ordering::SeqCst);
    }

    /// Called once per heartbeat tick; returns the number of consecutive
    /// misses after incrementing, so the caller can close after two.
    pub fn note_missed_pong(&self) -> u32 {
        self.missed_pongs.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1
    }
}
