//! WebSocket handler — the connection gateway.
//!
//! DESIGN
//! ======
//! On upgrade, registers an unattached session and enters a `select!` loop:
//! - Inbound client frames → parse into the command union → dispatch
//! - Queued outbound items from services/timers → forward to the client
//!
//! Dispatch returns the events owed directly to the sender; everything
//! addressed to the group travels through the per-session outbound queues.
//! Any inbound traffic counts as a heartbeat.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → session registered, unattached
//! 2. Frames dispatch to join/leave/location/chat/heartbeat services
//! 3. Close, socket error, or a liveness `Close` item → loop exits
//! 4. Implicit leave of the current group → session destroyed

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::protocol::{ClientCommand, ServerEvent};
use crate::services;
use crate::state::{AppState, Outbound};

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.config.session_queue_capacity);
    state.roster.write().await.register(session_id, tx);
    info!(%session_id, "ws: rider connected");

    'conn: loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        state.roster.write().await.touch(session_id);
                        for event in dispatch_text(&state, session_id, &text).await {
                            if send_event(&mut socket, session_id, &event).await.is_err() {
                                break 'conn;
                            }
                        }
                    }
                    // Pongs answer liveness probes; pings are auto-answered
                    // by the transport. Both prove the peer is alive.
                    Message::Pong(_) | Message::Ping(_) | Message::Binary(_) => {
                        state.roster.write().await.touch(session_id);
                    }
                    Message::Close(_) => break,
                }
            }
            item = rx.recv() => {
                match item {
                    Some(Outbound::Event(event)) => {
                        if send_event(&mut socket, session_id, &event).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Ping) => {
                        if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => break,
                }
            }
        }
    }

    services::group::disconnect(&state, session_id).await;
    info!(%session_id, "ws: rider disconnected");
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Parse one inbound text frame and dispatch it, returning the events owed
/// to the sender. Split from the socket loop so tests can drive the whole
/// command surface without a transport.
async fn dispatch_text(state: &AppState, session_id: Uuid, text: &str) -> Vec<ServerEvent> {
    let cmd: ClientCommand = match serde_json::from_str(text) {
        Ok(cmd) => cmd,
        Err(e) => {
            warn!(%session_id, error = %e, "ws: invalid inbound frame");
            return vec![ServerEvent::bad_frame(e)];
        }
    };
    dispatch(state, session_id, cmd).await
}

async fn dispatch(state: &AppState, session_id: Uuid, cmd: ClientCommand) -> Vec<ServerEvent> {
    match cmd {
        ClientCommand::JoinGroup { group_id, token } => {
            match services::group::join(state, session_id, &group_id, &token).await {
                Ok(()) => Vec::new(),
                Err(e) => vec![ServerEvent::error_from(&e)],
            }
        }
        ClientCommand::LeaveGroup { group_id } => {
            services::group::leave(state, session_id, &group_id).await;
            Vec::new()
        }
        ClientCommand::LocationUpdate { group_id, sample } => {
            match services::delta::ingest(state, session_id, &group_id, sample).await {
                Ok(_) => Vec::new(),
                Err(e) => vec![ServerEvent::error_from(&e)],
            }
        }
        ClientCommand::ChatMessage { group_id, text, kind } => {
            match services::chat::relay(state, session_id, &group_id, &text, &kind).await {
                Ok(()) => Vec::new(),
                Err(e) => vec![ServerEvent::error_from(&e)],
            }
        }
        ClientCommand::Heartbeat => vec![ServerEvent::HeartbeatAck],
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_event(socket: &mut WebSocket, session_id: Uuid, event: &ServerEvent) -> Result<(), ()> {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            warn!(%session_id, error = %e, "ws: failed to serialize event");
            return Err(());
        }
    };
    if let ServerEvent::Error { code, message } = event {
        warn!(%session_id, code, message, "ws: send error event");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
