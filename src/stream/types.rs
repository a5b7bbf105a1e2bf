//! Stream session configuration and lifecycle types.

use std::time::Duration;
use tracing::warn;

/// Heartbeat and reconnect settings for push streams.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    /// Idle time before an authenticated stream sends a heartbeat.
    /// Default: 30s
    pub heartbeat_interval: Duration,

    /// Idle time before a guest stream sends a heartbeat.
    /// Default: 60s
    pub guest_heartbeat_interval: Duration,

    /// Reconnect delay suggested to clients in the `retry:` field.
    /// Default: 5000ms
    pub retry_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            guest_heartbeat_interval: Duration::from_secs(60),
            retry_interval: Duration::from_millis(5000),
        }
    }
}

impl StreamConfig {
    /// Defaults overridden by `SSE_HEARTBEAT_INTERVAL` (seconds),
    /// `SSE_GUEST_HEARTBEAT_INTERVAL` (seconds) and `SSE_RETRY_INTERVAL`
    /// (milliseconds).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            heartbeat_interval: read_duration(
                &lookup,
                "SSE_HEARTBEAT_INTERVAL",
                Duration::from_secs,
                defaults.heartbeat_interval,
            ),
            guest_heartbeat_interval: read_duration(
                &lookup,
                "SSE_GUEST_HEARTBEAT_INTERVAL",
                Duration::from_secs,
                defaults.guest_heartbeat_interval,
            ),
            retry_interval: read_duration(
                &lookup,
                "SSE_RETRY_INTERVAL",
                Duration::from_millis,
                defaults.retry_interval,
            ),
        }
    }
}

fn read_duration<F>(
    lookup: &F,
    key: &str,
    unit: fn(u64) -> Duration,
    default: Duration,
) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(n) if n > 0 => unit(n),
            _ => {
                warn!(key, value = %raw, "ignoring invalid stream setting");
                default
            }
        },
    }
}

/// Lifecycle of one push connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Connected,
    WaitingForEvent,
    Delivering,
    Disconnected,
}

/// Who is on the other end of a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Authenticated { user_id: String },
    Guest,
}

/// Why a stream ended without an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// The client went away.
    ClientDisconnected,
    /// The bus deregistered the connection (inbox overflow).
    InboxClosed,
}

/// Counters for a finished stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSummary {
    pub end: StreamEnd,
    pub events_delivered: usize,
    pub heartbeats: usize,
    /// Private events a guest stream refused to forward.
    pub filtered: usize,
}
