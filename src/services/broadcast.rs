//! Broadcast scheduler — per-group snapshot coalescing.
//!
//! DESIGN
//! ======
//! Two timers per group, both detached tasks that receive the group code
//! explicitly and re-resolve state when they fire:
//!
//! - A one-shot debounce timer, armed when an update marks the group pending
//!   and no timer is already armed. Its delay adapts to the group's activity
//!   flag, and it fires only if the pending flag survived — a superseding
//!   snapshot makes it a no-op.
//! - A repeating fallback timer, running for the group's whole lifetime,
//!   that snapshots unconditionally so clients self-heal after any missed
//!   debounced cycle or dropped frame.
//!
//! Both funnel into the same snapshot step, which assembles every member's
//! freshest sample and fans it out under the roster lock. Sends use
//! `try_send` and are never awaited, so the lock is held only for assembly.

use std::time::Instant;

use tracing::debug;

use crate::protocol::ServerEvent;
use crate::state::{AppState, Outbound, RosterInner};

/// Broadcast a snapshot immediately, bypassing the debounce. Used on join so
/// the new member sees current state without waiting for the next cycle.
pub async fn snapshot_now(state: &AppState, group_id: &str) {
    let mut roster = state.roster.write().await;
    snapshot_locked(&mut roster, group_id);
}

/// Arm the debounce timer if the group is pending and idle. The delay is
/// `interval − timeSinceLastBroadcast`, floored at zero, with the interval
/// chosen by the activity flag.
pub async fn ensure_armed(state: &AppState, group_id: &str) {
    let mut roster = state.roster.write().await;
    let Some(group) = roster.for_group_mut(group_id) else {
        return;
    };
    if !group.pending || group.debounce.is_some() {
        return;
    }

    let interval = if group.active { state.config.active_broadcast } else { state.config.idle_broadcast };
    let delay = interval.saturating_sub(group.last_broadcast.elapsed());

    let task_state = state.clone();
    let task_group = group_id.to_string();
    group.debounce = Some(tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        debounce_fired(&task_state, &task_group).await;
    }));
}

/// Start the fallback snapshot timer for a freshly created group and store
/// its handle. If the group dissolved in the meantime (the only member
/// disconnected mid-join), the orphan task is aborted on the spot.
pub async fn start_fallback(state: &AppState, group_id: &str) {
    let period = state.config.fallback_broadcast;
    let task_state = state.clone();
    let task_group = group_id.to_string();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately and the join flow has already
        // broadcast; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            snapshot_now(&task_state, &task_group).await;
        }
    });

    let mut roster = state.roster.write().await;
    match roster.for_group_mut(group_id) {
        Some(group) => group.fallback = Some(handle),
        None => handle.abort(),
    }
}

/// Debounce timer body: disarm, then snapshot only if still pending.
async fn debounce_fired(state: &AppState, group_id: &str) {
    let mut roster = state.roster.write().await;
    let Some(group) = roster.for_group_mut(group_id) else {
        return;
    };
    group.debounce = None;
    if !group.pending {
        debug!(%group_id, "debounce fired after a superseding broadcast");
        return;
    }
    snapshot_locked(&mut roster, group_id);
}

/// The shared snapshot step: gather every member's identity and freshest
/// sample, push one combined event to every member including the senders,
/// clear pending, and stamp the broadcast time.
fn snapshot_locked(roster: &mut RosterInner, group_id: &str) {
    if roster.for_group(group_id).is_none() {
        return;
    }
    let members = roster.member_entries(group_id);
    let senders = roster.member_senders(group_id);
    debug!(%group_id, members = members.len(), "broadcasting group snapshot");

    let event = ServerEvent::GroupSnapshot { group_id: group_id.to_string(), members };
    for tx in &senders {
        // Best-effort: a slow session with a full queue misses this frame
        // and catches up on the next fallback tick.
        let _ = tx.try_send(Outbound::Event(event.clone()));
    }

    if let Some(group) = roster.for_group_mut(group_id) {
        group.pending = false;
        group.last_broadcast = Instant::now();
    }
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;
