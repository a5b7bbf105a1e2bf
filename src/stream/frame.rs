//! Server-sent event framing.

use crate::error::Result;
use crate::event::Event;
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use std::fmt::Write as _;
use std::time::Duration;

/// One fully serialized frame, ready to hand to the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseFrame {
    /// Frame name: `connected`, `heartbeat`, or the event type.
    pub event: String,
    /// JSON body.
    pub data: String,
    /// Reconnect delay hint in milliseconds.
    pub retry: Option<u64>,
}

impl SseFrame {
    /// First frame of an authenticated stream. Not stored anywhere.
    pub fn connected(user_id: &str, retry: Duration) -> Result<Self> {
        let data = json!({
            "status": "connected",
            "user_id": user_id,
            "timestamp": now_iso(),
        });
        Ok(Self {
            event: "connected".into(),
            data: serde_json::to_string(&data)?,
            retry: Some(retry_millis(retry)),
        })
    }

    /// First frame of a guest stream.
    pub fn connected_guest(retry: Duration) -> Result<Self> {
        let data = json!({
            "status": "connected",
            "user_type": "guest",
            "timestamp": now_iso(),
        });
        Ok(Self {
            event: "connected".into(),
            data: serde_json::to_string(&data)?,
            retry: Some(retry_millis(retry)),
        })
    }

    /// Keep-alive sent when no event arrived within the heartbeat interval.
    pub fn heartbeat() -> Result<Self> {
        let data = json!({ "timestamp": now_iso() });
        Ok(Self {
            event: "heartbeat".into(),
            data: serde_json::to_string(&data)?,
            retry: None,
        })
    }

    /// A real event, named after its type, with the wire mapping as body.
    pub fn from_event(event: &Event) -> Result<Self> {
        Ok(Self {
            event: event.event_type().as_str().to_string(),
            data: serde_json::to_string(event)?,
            retry: None,
        })
    }

    /// Text encoding: optional `retry:`, then `event:` and `data:` lines,
    /// terminated by a blank line.
    pub fn to_wire(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + self.event.len() + 32);
        if let Some(retry) = self.retry {
            let _ = writeln!(out, "retry: {retry}");
        }
        let _ = writeln!(out, "event: {}", self.event);
        for line in self.data.split('\n') {
            let _ = writeln!(out, "data: {line}");
        }
        out.push('\n');
        out
    }
}

/// Retry hint in milliseconds, saturating at `u64::MAX`.
fn retry_millis(retry: Duration) -> u64 {
    u64::try_from(retry.as_millis()).unwrap_or(u64::MAX)
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
