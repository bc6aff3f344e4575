//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the membership roster, the external collaborators, and the relay
//! config. The roster owns every session and every live group under one
//! `RwLock`, so membership, sample storage, and snapshot assembly are all
//! mutually consistent: a snapshot can never observe a half-applied join.
//!
//! INVARIANTS
//! ==========
//! - A `GroupState` exists iff its member set is non-empty.
//! - A session id appears in `groups[g].members` iff that session's `group`
//!   field is `Some(g)`. All mutation goes through `attach`/`detach`, which
//!   preserve both directions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::collab::{ChatStore, IdentityVerifier, ProfileStore, PushNotifier};
use crate::config::RelayConfig;
use crate::protocol::{LocationSample, MemberEntry, ServerEvent};

// =============================================================================
// OUTBOUND ITEMS
// =============================================================================

/// Items queued to a session's connection task. Besides protocol events, the
/// liveness monitor uses the same queue to probe and to force a disconnect.
#[derive(Debug)]
pub enum Outbound {
    Event(ServerEvent),
    Ping,
    Close,
}

// =============================================================================
// SESSION
// =============================================================================

/// Identity attached to a session after a verified join.
#[derive(Debug, Clone)]
pub struct RiderIdentity {
    pub rider_id: Uuid,
    pub display_name: String,
    pub avatar_ref: Option<String>,
}

/// Per-connection state. Created on connect, destroyed on disconnect or
/// eviction. A rider on two devices holds two independent sessions.
pub struct Session {
    pub tx: mpsc::Sender<Outbound>,
    pub identity: Option<RiderIdentity>,
    /// Group code this session is attached to, if any.
    pub group: Option<String>,
    /// Freshest sample received; what snapshots report.
    pub last_sample: Option<LocationSample>,
    /// Sample as of this session's last significant broadcast; what the
    /// delta filter compares against.
    pub last_broadcast_sample: Option<LocationSample>,
    pub last_broadcast_at: Option<Instant>,
    pub last_heartbeat: Instant,
    /// Cleared when a probe goes out, restored by any inbound traffic.
    pub alive: bool,
}

impl Session {
    fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            tx,
            identity: None,
            group: None,
            last_sample: None,
            last_broadcast_sample: None,
            last_broadcast_at: None,
            last_heartbeat: Instant::now(),
            alive: true,
        }
    }

    fn clear_location(&mut self) {
        self.last_sample = None;
        self.last_broadcast_sample = None;
        self.last_broadcast_at = None;
    }
}

// =============================================================================
// GROUP STATE
// =============================================================================

/// Per-group broadcast state. Exists only while the group has members.
pub struct GroupState {
    pub members: HashSet<Uuid>,
    /// Set when the delta filter deems an update significant; cleared by the
    /// snapshot that carries it out.
    pub pending: bool,
    /// True while any member is riding above the minimum speed. Selects the
    /// short debounce interval.
    pub active: bool,
    pub last_broadcast: Instant,
    /// One-shot debounce timer, armed at most once at a time.
    pub debounce: Option<JoinHandle<()>>,
    /// Repeating fallback snapshot timer, running for the group's lifetime.
    pub fallback: Option<JoinHandle<()>>,
}

impl GroupState {
    fn new() -> Self {
        Self {
            members: HashSet::new(),
            pending: false,
            active: false,
            last_broadcast: Instant::now(),
            debounce: None,
            fallback: None,
        }
    }
}

// =============================================================================
// ROSTER
// =============================================================================

/// Outcome of a `detach` call.
#[derive(Debug, PartialEq, Eq)]
pub enum Detach {
    /// The session was not attached to that group; nothing changed.
    NotAttached,
    /// Members remain; the group was marked pending so they see the
    /// departure on the next cycle.
    Remaining(usize),
    /// Last member out; group state and timers were torn down.
    Dissolved,
}

/// The membership index: every session and every live group, guarded by one
/// lock. Injectable so a distributed store can replace it later.
pub struct Roster {
    inner: RwLock<RosterInner>,
}

impl Roster {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: RwLock::new(RosterInner { sessions: HashMap::new(), groups: HashMap::new() }) }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, RosterInner> {
        self.inner.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, RosterInner> {
        self.inner.write().await
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RosterInner {
    sessions: HashMap<Uuid, Session>,
    groups: HashMap<String, GroupState>,
}

impl RosterInner {
    /// Register a freshly connected, unattached session.
    pub fn register(&mut self, session_id: Uuid, tx: mpsc::Sender<Outbound>) {
        self.sessions.insert(session_id, Session::new(tx));
    }

    /// Destroy a session. Detaches first if the caller skipped the implicit
    /// leave, so the membership invariant survives misuse.
    pub fn unregister(&mut self, session_id: Uuid) {
        if let Some(group) = self.sessions.get(&session_id).and_then(|s| s.group.clone()) {
            self.detach(session_id, &group);
        }
        self.sessions.remove(&session_id);
    }

    /// Attach a session to a group, creating the group on first member.
    /// Returns whether the group was created (caller starts its fallback
    /// timer). No-op if the session no longer exists.
    pub fn attach(&mut self, session_id: Uuid, group_id: &str, identity: RiderIdentity) -> Option<bool> {
        let session = self.sessions.get_mut(&session_id)?;
        session.group = Some(group_id.to_string());
        session.identity = Some(identity);

        let created = !self.groups.contains_key(group_id);
        let group = self.groups.entry(group_id.to_string()).or_insert_with(GroupState::new);
        group.members.insert(session_id);
        Some(created)
    }

    /// Remove a session from a group. Idempotent: detaching an already
    /// absent session is `NotAttached`, not an error.
    pub fn detach(&mut self, session_id: Uuid, group_id: &str) -> Detach {
        let attached = self
            .sessions
            .get(&session_id)
            .is_some_and(|s| s.group.as_deref() == Some(group_id));
        if !attached {
            return Detach::NotAttached;
        }

        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.group = None;
            session.clear_location();
        }

        let Some(group) = self.groups.get_mut(group_id) else {
            return Detach::NotAttached;
        };
        group.members.remove(&session_id);

        if group.members.is_empty() {
            // Timers must never outlive the group.
            if let Some(debounce) = group.debounce.take() {
                debounce.abort();
            }
            if let Some(fallback) = group.fallback.take() {
                fallback.abort();
            }
            self.groups.remove(group_id);
            Detach::Dissolved
        } else {
            group.pending = true;
            Detach::Remaining(group.members.len())
        }
    }

    /// Mark a group pending and recompute its activity flag from the
    /// freshest samples. Returns false if the group does not exist.
    pub fn mark_pending(&mut self, group_id: &str, min_active_speed: f64) -> bool {
        let Some(group) = self.groups.get_mut(group_id) else {
            return false;
        };
        group.pending = true;
        group.active = group.members.iter().any(|id| {
            self.sessions
                .get(id)
                .and_then(|s| s.last_sample)
                .is_some_and(|s| s.is_riding && s.speed >= min_active_speed)
        });
        true
    }

    /// Record inbound traffic from a session: refreshes the heartbeat clock
    /// and the liveness flag.
    pub fn touch(&mut self, session_id: Uuid) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.last_heartbeat = Instant::now();
            session.alive = true;
        }
    }

    pub fn session(&self, session_id: Uuid) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    pub fn session_mut(&mut self, session_id: Uuid) -> Option<&mut Session> {
        self.sessions.get_mut(&session_id)
    }

    pub fn sessions_mut(&mut self) -> impl Iterator<Item = (&Uuid, &mut Session)> {
        self.sessions.iter_mut()
    }

    pub fn for_group(&self, group_id: &str) -> Option<&GroupState> {
        self.groups.get(group_id)
    }

    pub fn for_group_mut(&mut self, group_id: &str) -> Option<&mut GroupState> {
        self.groups.get_mut(group_id)
    }

    /// Assemble the snapshot rows for a group: every member's identity plus
    /// its freshest sample. Order is not part of the contract.
    pub fn member_entries(&self, group_id: &str) -> Vec<MemberEntry> {
        let Some(group) = self.groups.get(group_id) else {
            return Vec::new();
        };
        group
            .members
            .iter()
            .filter_map(|id| {
                let session = self.sessions.get(id)?;
                let identity = session.identity.as_ref()?;
                Some(MemberEntry {
                    rider_id: identity.rider_id,
                    display_name: identity.display_name.clone(),
                    avatar_ref: identity.avatar_ref.clone(),
                    sample: session.last_sample,
                })
            })
            .collect()
    }

    /// Outbound senders for every member of a group.
    pub fn member_senders(&self, group_id: &str) -> Vec<mpsc::Sender<Outbound>> {
        let Some(group) = self.groups.get(group_id) else {
            return Vec::new();
        };
        group
            .members
            .iter()
            .filter_map(|id| self.sessions.get(id).map(|s| s.tx.clone()))
            .collect()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum — all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub roster: Arc<Roster>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub profiles: Arc<dyn ProfileStore>,
    pub chat: Arc<dyn ChatStore>,
    /// Optional push notifier. `None` if the webhook env vars are missing.
    pub push: Option<Arc<dyn PushNotifier>>,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(
        identity: Arc<dyn IdentityVerifier>,
        profiles: Arc<dyn ProfileStore>,
        chat: Arc<dyn ChatStore>,
        push: Option<Arc<dyn PushNotifier>>,
        config: RelayConfig,
    ) -> Self {
        Self { roster: Arc::new(Roster::new()), identity, profiles, chat, push, config: Arc::new(config) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::collab::{CollabError, RiderProfile, StoredMessage};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Identity fake: a fixed token → rider table.
    pub struct StubIdentity {
        tokens: HashMap<String, Uuid>,
    }

    #[async_trait]
    impl IdentityVerifier for StubIdentity {
        async fn verify(&self, token: &str) -> Result<Option<Uuid>, CollabError> {
            Ok(self.tokens.get(token).copied())
        }
    }

    /// Profile fake backed by a fixed rider table.
    pub struct StubProfiles {
        profiles: HashMap<Uuid, RiderProfile>,
    }

    #[async_trait]
    impl ProfileStore for StubProfiles {
        async fn profile(&self, rider_id: Uuid) -> Result<Option<RiderProfile>, CollabError> {
            Ok(self.profiles.get(&rider_id).cloned())
        }
    }

    /// Recorded arguments of one `append` call.
    #[derive(Debug, Clone)]
    pub struct AppendCall {
        pub group_id: String,
        pub rider_id: Uuid,
        pub text: String,
        pub kind: String,
    }

    /// Chat store fake: records appends, can be told to fail.
    #[derive(Default)]
    pub struct MemoryChat {
        pub calls: Mutex<Vec<AppendCall>>,
        pub fail: AtomicBool,
    }

    impl MemoryChat {
        pub fn call_count(&self) -> usize {
            self.calls.lock().expect("chat mutex").len()
        }
    }

    #[async_trait]
    impl ChatStore for MemoryChat {
        async fn append(
            &self,
            group_id: &str,
            rider_id: Uuid,
            text: &str,
            kind: &str,
        ) -> Result<StoredMessage, CollabError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CollabError::Unavailable("chat store down".into()));
            }
            self.calls.lock().expect("chat mutex").push(AppendCall {
                group_id: group_id.to_string(),
                rider_id,
                text: text.to_string(),
                kind: kind.to_string(),
            });
            Ok(StoredMessage { message_id: Uuid::new_v4(), created_at: crate::protocol::now_ms() })
        }
    }

    /// Two riders known to every stub state: token `"tok-a"` / `"tok-b"`.
    pub struct Fixture {
        pub state: AppState,
        pub chat: Arc<MemoryChat>,
        pub rider_a: Uuid,
        pub rider_b: Uuid,
    }

    /// Config with timers short enough for tests and the fallback pushed far
    /// out so debounce behavior can be observed in isolation.
    #[must_use]
    pub fn test_config() -> RelayConfig {
        RelayConfig {
            active_broadcast: Duration::from_millis(25),
            idle_broadcast: Duration::from_millis(60),
            fallback_broadcast: Duration::from_secs(30),
            force_refresh: Duration::from_secs(30),
            ..RelayConfig::default()
        }
    }

    #[must_use]
    pub fn fixture() -> Fixture {
        fixture_with_config(test_config())
    }

    #[must_use]
    pub fn fixture_with_config(config: RelayConfig) -> Fixture {
        let rider_a = Uuid::new_v4();
        let rider_b = Uuid::new_v4();
        let tokens = HashMap::from([("tok-a".to_string(), rider_a), ("tok-b".to_string(), rider_b)]);
        let profiles = HashMap::from([
            (rider_a, RiderProfile { display_name: "Ana".into(), avatar_ref: Some("avatars/ana.png".into()) }),
            (rider_b, RiderProfile { display_name: "Ben".into(), avatar_ref: None }),
        ]);
        let chat = Arc::new(MemoryChat::default());
        let state = AppState::new(
            Arc::new(StubIdentity { tokens }),
            Arc::new(StubProfiles { profiles }),
            chat.clone(),
            None,
            config,
        );
        Fixture { state, chat, rider_a, rider_b }
    }

    /// Register a session the way the gateway does, returning its id and the
    /// receiving end of its outbound queue.
    pub async fn connect(state: &AppState) -> (Uuid, mpsc::Receiver<Outbound>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(state.config.session_queue_capacity);
        state.roster.write().await.register(session_id, tx);
        (session_id, rx)
    }

    /// Receive the next protocol event from a session queue, skipping
    /// liveness pings.
    pub async fn recv_event(rx: &mut mpsc::Receiver<Outbound>) -> ServerEvent {
        loop {
            let item = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("event receive timed out")
                .expect("outbound channel closed");
            match item {
                Outbound::Event(event) => return event,
                Outbound::Ping => {}
                Outbound::Close => panic!("unexpected close item"),
            }
        }
    }

    /// Assert that no protocol event arrives within the window.
    pub async fn assert_no_event(rx: &mut mpsc::Receiver<Outbound>, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Err(_) | Ok(None) => return,
                Ok(Some(Outbound::Ping)) => {}
                Ok(Some(Outbound::Event(event))) => panic!("expected no event, got {event:?}"),
                Ok(Some(Outbound::Close)) => panic!("unexpected close item"),
            }
        }
    }
}
