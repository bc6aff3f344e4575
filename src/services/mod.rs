//! Domain services behind the websocket gateway.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the relay's business logic — membership, delta
//! filtering, scheduling, chat, liveness — so the gateway stays focused on
//! protocol translation and connection lifecycle.

pub mod broadcast;
pub mod chat;
pub mod delta;
pub mod group;
pub mod liveness;
