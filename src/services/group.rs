//! Group membership — join, leave, and disconnect handling.
//!
//! DESIGN
//! ======
//! Join verifies the token against the identity collaborator, resolves the
//! rider's profile, and attaches the session — implicitly leaving any group
//! it was in. The first member in brings the group (and its fallback timer)
//! up; the last member out tears both down. The joining session is owed its
//! `joined` confirmation before the immediate snapshot, so both are queued
//! on its outbound channel in that order.

use tracing::{debug, info};
use uuid::Uuid;

use crate::collab::CollabError;
use crate::protocol::{ErrorCode, ServerEvent};
use crate::services::broadcast;
use crate::state::{AppState, Detach, Outbound, RiderIdentity};

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("invalid or expired token")]
    Unauthorized,
    #[error("no rider profile for this token")]
    UnknownRider,
    #[error("identity service unavailable: {0}")]
    Collaborator(#[from] CollabError),
}

impl ErrorCode for JoinError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized | Self::UnknownRider => "E_UNAUTHORIZED",
            Self::Collaborator(_) => "E_COLLAB",
        }
    }
}

/// Join a group. On success the session receives `joined` followed by an
/// immediate (non-debounced) snapshot of the whole group.
pub async fn join(state: &AppState, session_id: Uuid, group_id: &str, token: &str) -> Result<(), JoinError> {
    let rider_id = state
        .identity
        .verify(token)
        .await?
        .ok_or(JoinError::Unauthorized)?;
    let profile = state
        .profiles
        .profile(rider_id)
        .await?
        .ok_or(JoinError::UnknownRider)?;
    let identity =
        RiderIdentity { rider_id, display_name: profile.display_name, avatar_ref: profile.avatar_ref };

    let (created, rearm_old) = {
        let mut roster = state.roster.write().await;
        let Some(session) = roster.session(session_id) else {
            // Disconnected while the collaborators were in flight.
            return Ok(());
        };

        // Implicit leave when already attached elsewhere.
        let mut rearm_old = None;
        if let Some(old_group) = session.group.clone() {
            if old_group != group_id {
                if matches!(roster.detach(session_id, &old_group), Detach::Remaining(_)) {
                    rearm_old = Some(old_group);
                }
            }
        }

        let Some(created) = roster.attach(session_id, group_id, identity) else {
            return Ok(());
        };

        if let Some(session) = roster.session(session_id) {
            let joined = ServerEvent::Joined { group_id: group_id.to_string(), rider_id };
            let _ = session.tx.try_send(Outbound::Event(joined));
        }
        let members = roster.for_group(group_id).map_or(0, |g| g.members.len());
        info!(%session_id, %group_id, %rider_id, members, "rider joined group");
        (created, rearm_old)
    };

    if let Some(old_group) = rearm_old {
        broadcast::ensure_armed(state, &old_group).await;
    }
    if created {
        broadcast::start_fallback(state, group_id).await;
    }
    broadcast::snapshot_now(state, group_id).await;
    Ok(())
}

/// Leave a group. Idempotent: leaving a group the session is not in is a
/// no-op. Remaining members see the departure on the next scheduled cycle.
pub async fn leave(state: &AppState, session_id: Uuid, group_id: &str) {
    let outcome = {
        let mut roster = state.roster.write().await;
        roster.detach(session_id, group_id)
    };
    match outcome {
        Detach::Remaining(members) => {
            info!(%session_id, %group_id, members, "rider left group");
            broadcast::ensure_armed(state, group_id).await;
        }
        Detach::Dissolved => {
            info!(%session_id, %group_id, "last rider left, group dissolved");
        }
        Detach::NotAttached => {}
    }
}

/// Disconnect handling: implicit leave of the current group, then session
/// teardown. Safe to call for sessions that already vanished.
pub async fn disconnect(state: &AppState, session_id: Uuid) {
    let group = {
        let roster = state.roster.read().await;
        roster.session(session_id).and_then(|s| s.group.clone())
    };
    if let Some(group_id) = group {
        leave(state, session_id, &group_id).await;
    }
    state.roster.write().await.unregister(session_id);
}

/// Fan a single event out to every member of a group.
pub async fn broadcast_event(state: &AppState, group_id: &str, event: &ServerEvent) {
    let roster = state.roster.read().await;
    let senders = roster.member_senders(group_id);
    if senders.is_empty() {
        debug!(%group_id, "broadcast raced group teardown, dropped");
        return;
    }
    for tx in &senders {
        let _ = tx.try_send(Outbound::Event(event.clone()));
    }
}

#[cfg(test)]
#[path = "group_test.rs"]
mod tests;
