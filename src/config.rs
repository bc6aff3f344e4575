//! Relay tunables parsed from environment variables.
//!
//! DESIGN
//! ======
//! One flat config struct, built once at startup and shared through
//! `AppState`. Every knob has a default; tests build custom configs with
//! short timers instead of touching the environment.

use std::time::Duration;

const DEFAULT_ACTIVE_BROADCAST_MS: u64 = 500;
const DEFAULT_IDLE_BROADCAST_MS: u64 = 2_000;
const DEFAULT_FALLBACK_BROADCAST_MS: u64 = 3_000;
const DEFAULT_FORCE_REFRESH_SECS: u64 = 30;

const DEFAULT_DELTA_THRESHOLD_DEG: f64 = 0.000_05;
const DEFAULT_MIN_ACTIVE_SPEED: f64 = 1.0;

const DEFAULT_HEARTBEAT_SWEEP_SECS: u64 = 10;
const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 45;

const DEFAULT_SESSION_QUEUE_CAPACITY: usize = 256;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Debounce interval while any member is actively riding.
    pub active_broadcast: Duration,
    /// Debounce interval while the whole group is stationary.
    pub idle_broadcast: Duration,
    /// Fixed cadence of the unconditional fallback snapshot.
    pub fallback_broadcast: Duration,
    /// A sample older than this since the session's last broadcast is always
    /// significant, so stationary riders still refresh.
    pub force_refresh: Duration,
    /// Latitude/longitude delta (degrees) below which a move is noise.
    pub delta_threshold_deg: f64,
    /// Minimum speed for a riding member to count toward group activity.
    pub min_active_speed: f64,
    /// Liveness sweep cadence.
    pub heartbeat_sweep: Duration,
    /// Silence longer than this evicts the session.
    pub heartbeat_timeout: Duration,
    /// Bound of the per-session outbound queue; overflow drops the frame
    /// for that session only.
    pub session_queue_capacity: usize,
    pub db_max_connections: u32,
}

impl RelayConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            active_broadcast: Duration::from_millis(env_parse("ACTIVE_BROADCAST_MS", DEFAULT_ACTIVE_BROADCAST_MS)),
            idle_broadcast: Duration::from_millis(env_parse("IDLE_BROADCAST_MS", DEFAULT_IDLE_BROADCAST_MS)),
            fallback_broadcast: Duration::from_millis(env_parse(
                "FALLBACK_BROADCAST_MS",
                DEFAULT_FALLBACK_BROADCAST_MS,
            )),
            force_refresh: Duration::from_secs(env_parse("FORCE_REFRESH_SECS", DEFAULT_FORCE_REFRESH_SECS)),
            delta_threshold_deg: env_parse("DELTA_THRESHOLD_DEG", DEFAULT_DELTA_THRESHOLD_DEG),
            min_active_speed: env_parse("MIN_ACTIVE_SPEED", DEFAULT_MIN_ACTIVE_SPEED),
            heartbeat_sweep: Duration::from_secs(env_parse("HEARTBEAT_SWEEP_SECS", DEFAULT_HEARTBEAT_SWEEP_SECS)),
            heartbeat_timeout: Duration::from_secs(env_parse(
                "HEARTBEAT_TIMEOUT_SECS",
                DEFAULT_HEARTBEAT_TIMEOUT_SECS,
            )),
            session_queue_capacity: env_parse("SESSION_QUEUE_CAPACITY", DEFAULT_SESSION_QUEUE_CAPACITY),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            active_broadcast: Duration::from_millis(DEFAULT_ACTIVE_BROADCAST_MS),
            idle_broadcast: Duration::from_millis(DEFAULT_IDLE_BROADCAST_MS),
            fallback_broadcast: Duration::from_millis(DEFAULT_FALLBACK_BROADCAST_MS),
            force_refresh: Duration::from_secs(DEFAULT_FORCE_REFRESH_SECS),
            delta_threshold_deg: DEFAULT_DELTA_THRESHOLD_DEG,
            min_active_speed: DEFAULT_MIN_ACTIVE_SPEED,
            heartbeat_sweep: Duration::from_secs(DEFAULT_HEARTBEAT_SWEEP_SECS),
            heartbeat_timeout: Duration::from_secs(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
            session_queue_capacity: DEFAULT_SESSION_QUEUE_CAPACITY,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
