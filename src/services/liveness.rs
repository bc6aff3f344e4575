//! Liveness monitor — periodic probe sweep and eviction of silent sessions.
//!
//! DESIGN
//! ======
//! A background task sweeps every session at a fixed cadence. Sessions quiet
//! for longer than the timeout get a `Close` pushed down their outbound
//! queue; the gateway then tears the connection down through the normal
//! disconnect path, so eviction and a client-initiated close behave the
//! same. Everyone else gets a ping probe and their liveness flag cleared —
//! any inbound traffic restores it.

use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::warn;

use crate::state::{AppState, Outbound};

/// Spawn the background sweep task. Returns a handle for shutdown.
pub fn spawn_liveness_task(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.heartbeat_sweep);
        // Skip the immediate first tick; freshly started servers have no
        // sessions worth probing yet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep(&state).await;
        }
    })
}

/// One sweep over all sessions: evict the silent, probe the rest.
pub async fn sweep(state: &AppState) {
    let timeout = state.config.heartbeat_timeout;
    let now = Instant::now();

    let mut roster = state.roster.write().await;
    for (session_id, session) in roster.sessions_mut() {
        if now.duration_since(session.last_heartbeat) >= timeout {
            warn!(%session_id, "liveness timeout, evicting session");
            let _ = session.tx.try_send(Outbound::Close);
        } else {
            session.alive = false;
            let _ = session.tx.try_send(Outbound::Ping);
        }
    }
}

#[cfg(test)]
#[path = "liveness_test.rs"]
mod tests;
