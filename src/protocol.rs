//! Wire protocol — the tagged message unions exchanged over the socket.
//!
//! DESIGN
//! ======
//! Every inbound frame deserializes into one `ClientCommand` and every
//! outbound frame serializes from one `ServerEvent`. The gateway routes on
//! the variant, never on raw payload keys, so protocol-specific branching
//! lives entirely in serde.
//!
//! Snapshot member entries are flat on the wire (identity fields and sample
//! fields side by side); members that have not reported a location yet omit
//! the sample fields. `MemberEntryWire` is the flat intermediate that makes
//! that round-trip lossless.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code for structured error events.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}

/// Code emitted for frames that fail to parse.
pub const CODE_BAD_FRAME: &str = "E_BAD_FRAME";

// =============================================================================
// LOCATION SAMPLE
// =============================================================================

/// One position report from a rider. Immutable value; each new sample
/// replaces the previous one wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub lat: f64,
    pub lon: f64,
    pub speed: f64,
    /// Accumulated ride distance as reported by the client.
    pub distance: f64,
    /// Accumulated ride duration as reported by the client.
    pub duration: f64,
    pub is_riding: bool,
    /// Client-supplied timestamp, milliseconds since Unix epoch.
    pub ts: i64,
}

// =============================================================================
// INBOUND
// =============================================================================

/// Commands a rider may send. One dispatch function routes on this union.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    JoinGroup {
        group_id: String,
        token: String,
    },
    LeaveGroup {
        group_id: String,
    },
    LocationUpdate {
        group_id: String,
        #[serde(flatten)]
        sample: LocationSample,
    },
    ChatMessage {
        group_id: String,
        text: String,
        /// Opaque message kind, stored and echoed verbatim.
        #[serde(default = "default_chat_kind")]
        kind: String,
    },
    Heartbeat,
}

fn default_chat_kind() -> String {
    "text".to_string()
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Events pushed to riders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Joined {
        group_id: String,
        rider_id: Uuid,
    },
    GroupSnapshot {
        group_id: String,
        members: Vec<MemberEntry>,
    },
    ChatBroadcast {
        group_id: String,
        message_id: Uuid,
        rider_id: Uuid,
        display_name: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        avatar_ref: Option<String>,
        text: String,
        kind: String,
        /// Storage-assigned timestamp, milliseconds since Unix epoch.
        created_at: i64,
    },
    Error {
        code: String,
        message: String,
    },
    HeartbeatAck,
}

impl ServerEvent {
    /// Build a structured error event from a typed error.
    pub fn error_from(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::Error { code: err.error_code().to_string(), message: err.to_string() }
    }

    /// Build the error event for an unparseable inbound frame.
    pub fn bad_frame(detail: impl std::fmt::Display) -> Self {
        Self::Error { code: CODE_BAD_FRAME.to_string(), message: format!("invalid frame: {detail}") }
    }
}

// =============================================================================
// SNAPSHOT MEMBER ENTRY
// =============================================================================

/// One rider's row in a group snapshot: identity plus the freshest known
/// sample, if any has been received this attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "MemberEntryWire", into = "MemberEntryWire")]
pub struct MemberEntry {
    pub rider_id: Uuid,
    pub display_name: String,
    pub avatar_ref: Option<String>,
    pub sample: Option<LocationSample>,
}

/// Flat wire shape for `MemberEntry`. Sample fields are individually
/// optional so identity-only entries omit them cleanly.
#[derive(Serialize, Deserialize)]
struct MemberEntryWire {
    rider_id: Uuid,
    display_name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    avatar_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    is_riding: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    ts: Option<i64>,
}

impl From<MemberEntry> for MemberEntryWire {
    fn from(entry: MemberEntry) -> Self {
        let MemberEntry { rider_id, display_name, avatar_ref, sample } = entry;
        Self {
            rider_id,
            display_name,
            avatar_ref,
            lat: sample.map(|s| s.lat),
            lon: sample.map(|s| s.lon),
            speed: sample.map(|s| s.speed),
            distance: sample.map(|s| s.distance),
            duration: sample.map(|s| s.duration),
            is_riding: sample.map(|s| s.is_riding),
            ts: sample.map(|s| s.ts),
        }
    }
}

impl From<MemberEntryWire> for MemberEntry {
    fn from(wire: MemberEntryWire) -> Self {
        let sample = match (wire.lat, wire.lon) {
            (Some(lat), Some(lon)) => Some(LocationSample {
                lat,
                lon,
                speed: wire.speed.unwrap_or(0.0),
                distance: wire.distance.unwrap_or(0.0),
                duration: wire.duration.unwrap_or(0.0),
                is_riding: wire.is_riding.unwrap_or(false),
                ts: wire.ts.unwrap_or(0),
            }),
            _ => None,
        };
        Self {
            rider_id: wire.rider_id,
            display_name: wire.display_name,
            avatar_ref: wire.avatar_ref,
            sample,
        }
    }
}

// =============================================================================
// TIME
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LocationSample {
        LocationSample {
            lat: 37.5,
            lon: 127.0,
            speed: 15.0,
            distance: 1200.0,
            duration: 300.0,
            is_riding: true,
            ts: 1_700_000_000_000,
        }
    }

    #[test]
    fn location_update_parses_flat_fields() {
        let json = r#"{"type":"location_update","group_id":"ABC123",
            "lat":37.5,"lon":127.0,"speed":15.0,"distance":1200.0,
            "duration":300.0,"is_riding":true,"ts":1700000000000}"#;
        let cmd: ClientCommand = serde_json::from_str(json).expect("parse");
        let ClientCommand::LocationUpdate { group_id, sample } = cmd else {
            panic!("wrong variant");
        };
        assert_eq!(group_id, "ABC123");
        assert!((sample.lat - 37.5).abs() < f64::EPSILON);
        assert!(sample.is_riding);
    }

    #[test]
    fn chat_kind_defaults_to_text() {
        let json = r#"{"type":"chat_message","group_id":"ABC123","text":"hi"}"#;
        let cmd: ClientCommand = serde_json::from_str(json).expect("parse");
        let ClientCommand::ChatMessage { kind, .. } = cmd else {
            panic!("wrong variant");
        };
        assert_eq!(kind, "text");
    }

    #[test]
    fn heartbeat_parses_bare() {
        let cmd: ClientCommand = serde_json::from_str(r#"{"type":"heartbeat"}"#).expect("parse");
        assert!(matches!(cmd, ClientCommand::Heartbeat));
    }

    #[test]
    fn garbage_frame_is_an_error() {
        assert!(serde_json::from_str::<ClientCommand>(r#"{"type":"warp_drive"}"#).is_err());
        assert!(serde_json::from_str::<ClientCommand>("not json").is_err());
    }

    #[test]
    fn member_entry_round_trips_with_sample() {
        let entry = MemberEntry {
            rider_id: Uuid::new_v4(),
            display_name: "Ana".into(),
            avatar_ref: Some("avatars/ana.png".into()),
            sample: Some(sample()),
        };
        let json = serde_json::to_value(entry.clone()).expect("serialize");
        // Flat on the wire: sample fields sit beside identity fields.
        assert!((json["lat"].as_f64().unwrap() - 37.5).abs() < f64::EPSILON);
        assert_eq!(json["display_name"], "Ana");

        let restored: MemberEntry = serde_json::from_value(json).expect("deserialize");
        assert_eq!(restored.sample, entry.sample);
    }

    #[test]
    fn member_entry_without_sample_omits_location_fields() {
        let entry = MemberEntry {
            rider_id: Uuid::new_v4(),
            display_name: "Ben".into(),
            avatar_ref: None,
            sample: None,
        };
        let json = serde_json::to_value(entry).expect("serialize");
        assert!(json.get("lat").is_none());
        assert!(json.get("avatar_ref").is_none());

        let restored: MemberEntry = serde_json::from_value(json).expect("deserialize");
        assert!(restored.sample.is_none());
    }

    #[test]
    fn event_serializes_tagged() {
        let ev = ServerEvent::Joined { group_id: "ABC123".into(), rider_id: Uuid::new_v4() };
        let json = serde_json::to_value(ev).expect("serialize");
        assert_eq!(json["type"], "joined");
        assert_eq!(json["group_id"], "ABC123");
    }

    #[test]
    fn error_from_typed() {
        #[derive(Debug, thiserror::Error)]
        #[error("not a member")]
        struct NotMember;

        impl ErrorCode for NotMember {
            fn error_code(&self) -> &'static str {
                "E_NOT_A_MEMBER"
            }
        }

        let ev = ServerEvent::error_from(&NotMember);
        let ServerEvent::Error { code, message } = ev else {
            panic!("wrong variant");
        };
        assert_eq!(code, "E_NOT_A_MEMBER");
        assert_eq!(message, "not a member");
    }

    #[test]
    fn now_ms_is_positive() {
        assert!(now_ms() > 0);
    }
}
