//! The `/ws` upgrade handler and per-connection socket loop. Grounded in
//! the teacher's `handlers/handle_websocket.rs`: split the socket into a
//! sender/receiver pair, pump outbound messages from an mpsc channel in one
//! task, and read inbound frames in the main task until the socket closes.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use cryolive_core::LiveOrchestrator;
use cryolive_model::ProjectId;

use crate::app_state::AppState;
use crate::auth::jwt::verify_token;

use super::connection::Connection;
use super::manager::ConnectionManager;
use super::protocol::{channel_for, ClientMessage, ServerMessage};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const MAX_MISSED_PONGS: u32 = 2;

const CLOSE_SHUTDOWN: u16 = 1001;
const CLOSE_AUTH: u16 = 4001;
const CLOSE_ORIGIN: u16 = 4003;
const CLOSE_OVERLOADED: u16 = 4013;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

/// Reads the `atoken` cookie's value out of a raw `Cookie` header, the
/// fallback authentication path for clients that can't set a query
/// parameter (§4.6, §6).
fn cookie_token(headers: &axum::http::HeaderMap) -> Option<String> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "atoken").then(|| value.to_string())
    })
}

fn close(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

/// Checks the request's `Origin` header against the configured prefix
/// (§4.6, §6). A missing header is rejected — browsers always send one for
/// cross-origin WebSocket upgrades.
fn origin_allowed(headers: &axum::http::HeaderMap, allowed_prefix: &str) -> bool {
    headers
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(|origin| origin.starts_with(allowed_prefix))
        .unwrap_or(false)
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: axum::http::HeaderMap,
) -> Response {
    if !origin_allowed(&headers, &state.config.cors_origin) {
        return ws.on_upgrade(|mut socket| async move {
            let _ = socket.send(close(CLOSE_ORIGIN, "origin not allowed")).await;
        });
    }

    if state.websocket_manager.is_at_capacity() {
        return ws.on_upgrade(|mut socket| async move {
            let _ = socket.send(close(CLOSE_OVERLOADED, "too many connections")).await;
        });
    }

    let Some(token) = query.token.clone().or_else(|| cookie_token(&headers)) else {
        return ws.on_upgrade(|mut socket| async move {
            let _ = socket.send(close(CLOSE_AUTH, "missing token")).await;
        });
    };

    let claims = match verify_token(&token, &state.config.jwt_secret) {
        Ok(claims) => claims,
        Err(_) => {
            return ws.on_upgrade(|mut socket| async move {
                let _ = socket.send(close(CLOSE_AUTH, "invalid token")).await;
            });
        }
    };

    let user = match state.user_store.get(claims.sub).await {
        Ok(user) => user,
        Err(_) => {
            return ws.on_upgrade(|mut socket| async move {
                let _ = socket.send(close(CLOSE_AUTH, "unknown user")).await;
            });
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user.id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: cryolive_model::UserId) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(128);

    let conn_id = cryolive_model::ConnectionId::new().to_string();
    let connection = Arc::new(Connection::new(conn_id.clone(), user_id, tx.clone()));
    state.websocket_manager.add_connection(connection.clone());

    let _ = connection
        .send(ServerMessage::Connected {
            connection_id: conn_id.clone(),
        })
        .await;

    // Progress Bus / session-update delivery is fanned out centrally by
    // `run_event_forwarder` through the per-project channel index, not
    // polled here — this task only pumps this connection's own outbound
    // queue and the heartbeat (§4.6, §9).
    let writer_conn = connection.clone();
    let writer_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    if let Ok(json) = serde_json::to_string(&msg)
                        && ws_sender.send(Message::Text(json.into())).await.is_err()
                    {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if writer_conn.note_missed_pong() > MAX_MISSED_PONGS {
                        let _ = ws_sender
                            .send(close(CLOSE_SHUTDOWN, "heartbeat timeout"))
                            .await;
                        break;
                    }
                    if ws_sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Ok(client_msg) = serde_json::from_str::<ClientMessage>(text.as_str()) {
                    handle_client_message(client_msg, &state, &connection).await;
                }
            }
            Ok(Message::Pong(_)) => {
                connection.record_pong().await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(conn_id = %connection.id, error = %e, "websocket read error");
                break;
            }
            _ => {}
        }
    }

    writer_task.abort();
    state.websocket_manager.remove_connection(&connection.id);
    info!(conn_id = %connection.id, "websocket connection closed");
}

async fn handle_client_message(msg: ClientMessage, state: &AppState, connection: &Connection) {
    match msg {
        ClientMessage::Ping => {
            let _ = connection.send(ServerMessage::Pong).await;
        }
        ClientMessage::Subscribe { project_id } => {
            handle_subscribe(state, connection, project_id).await;
        }
        ClientMessage::Unsubscribe { project_id } => {
            state.websocket_manager.leave_channel(project_id, &connection.id);
            let _ = connection
                .send(ServerMessage::Unsubscribed {
                    channel: channel_for(project_id),
                })
                .await;
        }
        ClientMessage::GetLiveState { session_id } => {
            if let Ok(snapshot) = state.orchestrator.snapshot(session_id).await {
                let _ = connection.send(ServerMessage::LiveSessionState { session: snapshot }).await;
            } else {
                let _ = connection
                    .send(ServerMessage::Error {
                        message: "session not found".to_string(),
                        channel: None,
                    })
                    .await;
            }
        }
    }
}

/// Enforces P5: subscribing to `project:<P>` succeeds only if the connected
/// user created or is a member of P.
async fn handle_subscribe(state: &AppState, connection: &Connection, project_id: ProjectId) {
    let channel = channel_for(project_id);
    let allowed = match state.user_store.get_project(project_id).await {
        Ok(project) if project.owner_id == connection.user_id => true,
        Ok(_) => state
            .user_store
            .is_member(project_id, connection.user_id)
            .await
            .unwrap_or(false),
        Err(_) => false,
    };

    if !allowed {
        let _ = connection
            .send(ServerMessage::Error {
                message: "Access denied to project".to_string(),
                channel: Some(channel),
            })
            .await;
        return;
    }

    state.websocket_manager.join_channel(project_id, &connection.id);
    let _ = connection.send(ServerMessage::Subscribed { channel }).await;
}

/// Process-wide fan-out from the Progress Bus and the Orchestrator's
/// session-update channel into each subscribed project's connections.
/// Spawned once at server startup, not per connection: `broadcast_to_project`
/// looks subscribers up through `ConnectionManager`'s per-project index
/// (O(subscribers)), so no connection's own task needs to evaluate every
/// event in the process (§4.6, §9).
pub async fn run_event_forwarder(
    manager: Arc<ConnectionManager>,
    orchestrator: LiveOrchestrator,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut status_rx = orchestrator.subscribe_status();
    let mut progress_rx = orchestrator.subscribe_progress();
    let mut session_rx = orchestrator.subscribe_session();
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            status = status_rx.recv() => {
                if let Ok(event) = status {
                    manager.broadcast_to_project(event.project_id, ServerMessage::from(&event)).await;
                }
            }
            progress = progress_rx.recv() => {
                if let Ok(event) = progress {
                    manager.broadcast_to_project(event.project_id, ServerMessage::from(&event)).await;
                }
            }
            session = session_rx.recv() => {
                if let Ok(snapshot) = session {
                    let project_id = snapshot.project_id;
                    manager
                        .broadcast_to_project(project_id, ServerMessage::LiveSessionUpdate { session: snapshot })
                        .await;
                }
            }
        }
    }
}
