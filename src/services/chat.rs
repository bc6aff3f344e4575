//! Chat relay — persist, then fan out immediately.
//!
//! Chat is not gated by the broadcast scheduler: a persisted message goes to
//! every member right away, senders included. A failed persist surfaces to
//! the sender only and nothing is broadcast.

use tracing::info;
use uuid::Uuid;

use crate::collab::CollabError;
use crate::protocol::{ErrorCode, ServerEvent};
use crate::services::group::broadcast_event;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("not a member of group {0}")]
    NotAMember(String),
    #[error("chat persistence failed: {0}")]
    Persistence(#[from] CollabError),
}

impl ErrorCode for ChatError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotAMember(_) => "E_NOT_A_MEMBER",
            Self::Persistence(_) => "E_PERSISTENCE",
        }
    }
}

/// Relay one chat message from a session to its group.
pub async fn relay(
    state: &AppState,
    session_id: Uuid,
    group_id: &str,
    text: &str,
    kind: &str,
) -> Result<(), ChatError> {
    let identity = {
        let roster = state.roster.read().await;
        roster
            .session(session_id)
            .filter(|s| s.group.as_deref() == Some(group_id))
            .and_then(|s| s.identity.clone())
            .ok_or_else(|| ChatError::NotAMember(group_id.to_string()))?
    };

    let stored = state
        .chat
        .append(group_id, identity.rider_id, text, kind)
        .await?;

    let event = ServerEvent::ChatBroadcast {
        group_id: group_id.to_string(),
        message_id: stored.message_id,
        rider_id: identity.rider_id,
        display_name: identity.display_name.clone(),
        avatar_ref: identity.avatar_ref.clone(),
        text: text.to_string(),
        kind: kind.to_string(),
        created_at: stored.created_at,
    };
    broadcast_event(state, group_id, &event).await;
    info!(%group_id, rider_id = %identity.rider_id, message_id = %stored.message_id, "chat relayed");

    // Push notification is fire-and-forget; delivery never blocks the relay.
    if let Some(push) = state.push.clone() {
        let group = group_id.to_string();
        let sender_name = identity.display_name;
        let body = text.to_string();
        tokio::spawn(async move {
            push.notify(&group, &sender_name, &body).await;
        });
    }

    Ok(())
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
