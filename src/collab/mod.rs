//! External collaborators consumed through narrow interfaces.
//!
//! ARCHITECTURE
//! ============
//! Identity verification, profile lookup, chat persistence, and push
//! notifications are other services' business. The relay talks to them only
//! through these traits, injected into `AppState` as `Arc<dyn ...>` so tests
//! swap in-memory fakes and production wires up Postgres + webhooks.

pub mod postgres;
pub mod push;

use async_trait::async_trait;
use uuid::Uuid;

/// Transport/storage failure inside a collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Profile fields the relay attaches to a session on join.
#[derive(Debug, Clone)]
pub struct RiderProfile {
    pub display_name: String,
    pub avatar_ref: Option<String>,
}

/// Chat record as persisted by the storage collaborator.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message_id: Uuid,
    /// Milliseconds since Unix epoch, assigned by storage.
    pub created_at: i64,
}

/// Token verification. Safe to call on every join.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// `Ok(None)` means the token is invalid or expired.
    async fn verify(&self, token: &str) -> Result<Option<Uuid>, CollabError>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// `Ok(None)` means no rider record exists for this id.
    async fn profile(&self, rider_id: Uuid) -> Result<Option<RiderProfile>, CollabError>;
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn append(
        &self,
        group_id: &str,
        rider_id: Uuid,
        text: &str,
        kind: &str,
    ) -> Result<StoredMessage, CollabError>;
}

/// Fire-and-forget notification for offline members. Not required for
/// correctness; failures are logged and dropped.
#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn notify(&self, group_id: &str, sender_name: &str, text: &str);
}
