//! Delta filter — decides which location samples are worth broadcasting.
//!
//! Every accepted sample replaces the session's freshest state, but only
//! significant ones mark the group pending. Significance, in order: first
//! sample since attach, force-refresh bound elapsed, geo movement beyond the
//! threshold, or a riding-state flip.

use std::time::Instant;

use uuid::Uuid;

use crate::config::RelayConfig;
use crate::protocol::{ErrorCode, LocationSample};
use crate::services::broadcast;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
#[error("not a member of group {0}")]
pub struct NotAMember(pub String);

impl ErrorCode for NotAMember {
    fn error_code(&self) -> &'static str {
        "E_NOT_A_MEMBER"
    }
}

/// What became of an accepted sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// Stored only; no broadcast triggered.
    Stored,
    /// Stored and the group's broadcast was scheduled.
    Scheduled,
}

/// Ingest one sample from a session. Updates for a group the session is not
/// attached to are rejected without storing anything.
pub async fn ingest(
    state: &AppState,
    session_id: Uuid,
    group_id: &str,
    sample: LocationSample,
) -> Result<Ingest, NotAMember> {
    let significant = {
        let mut roster = state.roster.write().await;
        let Some(session) = roster.session_mut(session_id) else {
            return Err(NotAMember(group_id.to_string()));
        };
        if session.group.as_deref() != Some(group_id) {
            return Err(NotAMember(group_id.to_string()));
        }

        session.last_sample = Some(sample);

        let now = Instant::now();
        let significant = is_significant(
            &state.config,
            session.last_broadcast_sample.as_ref(),
            session.last_broadcast_at,
            now,
            &sample,
        );
        if significant {
            // Provisional: the snapshot that carries this out may coalesce
            // several samples, but the comparison base moves now.
            session.last_broadcast_sample = Some(sample);
            session.last_broadcast_at = Some(now);
            roster.mark_pending(group_id, state.config.min_active_speed);
        }
        significant
    };

    if significant {
        broadcast::ensure_armed(state, group_id).await;
        Ok(Ingest::Scheduled)
    } else {
        Ok(Ingest::Stored)
    }
}

/// Pure significance decision against the session's last broadcast state.
#[must_use]
pub fn is_significant(
    config: &RelayConfig,
    prior: Option<&LocationSample>,
    last_broadcast_at: Option<Instant>,
    now: Instant,
    sample: &LocationSample,
) -> bool {
    let Some(prior) = prior else {
        return true;
    };
    if let Some(at) = last_broadcast_at {
        if now.duration_since(at) >= config.force_refresh {
            return true;
        }
    }
    if (sample.lat - prior.lat).abs() > config.delta_threshold_deg {
        return true;
    }
    if (sample.lon - prior.lon).abs() > config.delta_threshold_deg {
        return true;
    }
    sample.is_riding != prior.is_riding
}

#[cfg(test)]
#[path = "delta_test.rs"]
mod tests;
