use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use cryolive_model::ProjectId;

use super::connection::Connection;
use super::protocol::ServerMessage;

/// Generalizes the teacher's `ConnectionManager`
/// (`ferrex-server/src/infra/websocket/manager.rs`): a `DashMap` of active
/// connections plus a per-channel index, here indexed by project id rather
/// than by sync-session room code (§4.6).
pub struct ConnectionManager {
    connections: DashMap<String, Arc<Connection>>,
    channels: DashMap<ProjectId, Vec<String>>,
    max_connections: usize,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connection_count", &self.connections.len())
            .field("channel_count", &self.channels.len())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: DashMap::new(),
            channels: DashMap::new(),
            max_connections,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_at_capacity(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    pub fn add_connection(&self, connection: Arc<Connection>) {
        self.connections.insert(connection.id.clone(), connection);
    }

    pub fn remove_connection(&self, conn_id: &str) {
        self.connections.remove(conn_id);
        for mut entry in self.channels.iter_mut() {
            entry.value_mut().retain(|id| id != conn_id);
        }
        self.channels.retain(|_, ids| !ids.is_empty());
    }

    pub fn join_channel(&self, project_id: ProjectId, conn_id: &str) {
        let mut entry = self.channels.entry(project_id).or_default();
        if !entry.iter().any(|id| id == conn_id) {
            entry.push(conn_id.to_string());
        }
    }

    pub fn leave_channel(&self, project_id: ProjectId, conn_id: &str) {
        if let Some(mut ids) = self.channels.get_mut(&project_id) {
            ids.retain(|id| id != conn_id);
        }
    }

    pub fn get_connection(&self, conn_id: &str) -> Option<Arc<Connection>> {
        self.connections.get(conn_id).map(|c| c.clone())
    }

    pub fn connection_ids(&self) -> Vec<String> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Delivers a message to every connection subscribed to `project_id`.
    pub async fn broadcast_to_project(&self, project_id: ProjectId, message: ServerMessage) {
        let Some(conn_ids) = self.channels.get(&project_id).map(|ids| ids.clone()) else {
            return;
        };
        for conn_id in conn_ids {
            if let Some(conn) = self.get_connection(&conn_id) {
                let _ = conn.send(message.clone()).await;
            }
        }
    }
}
