//! Change-source contract and monitor settings.

use crate::error::Result;
use crate::event::EventInput;
use crate::types::Timestamp;
use std::time::Duration;

/// Polling cadence for one monitor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Wait after a successful poll.
    pub interval: Duration,

    /// Wait after a failed poll before retrying.
    pub error_backoff: Duration,

    /// How far back the first poll looks.
    /// Default: 5 minutes
    pub initial_lookback: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(60),
            initial_lookback: Duration::from_secs(5 * 60),
        }
    }
}

impl MonitorConfig {
    fn every(interval_secs: u64, backoff_secs: u64) -> Self {
        Self {
            interval: Duration::from_secs(interval_secs),
            error_backoff: Duration::from_secs(backoff_secs),
            ..Default::default()
        }
    }

    /// New announcements: every 30s, 60s after a failure.
    pub fn announcements() -> Self {
        Self::every(30, 60)
    }

    /// Confirmed grades: every 60s, 120s after a failure.
    pub fn grades() -> Self {
        Self::every(60, 120)
    }

    /// Card transactions: every 30s, 60s after a failure.
    pub fn transactions() -> Self {
        Self::every(30, 60)
    }

    /// Library due dates: every 120s, 180s after a failure.
    pub fn library() -> Self {
        Self::every(120, 180)
    }
}

/// A data source polled for changes.
pub trait ChangeSource: Send {
    /// Short name for logs and the monitor thread.
    fn name(&self) -> &str;

    /// Events for everything that changed after `since`.
    fn poll(&mut self, since: Timestamp) -> Result<Vec<EventInput>>;
}

/// Adapts a closure into a [`ChangeSource`].
pub struct PollFn<F> {
    name: String,
    poll: F,
}

impl<F> PollFn<F>
where
    F: FnMut(Timestamp) -> Result<Vec<EventInput>> + Send,
{
    pub fn new(name: impl Into<String>, poll: F) -> Self {
        Self {
            name: name.into(),
            poll,
        }
    }
}

impl<F> ChangeSource for PollFn<F>
where
    F: FnMut(Timestamp) -> Result<Vec<EventInput>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn poll(&mut self, since: Timestamp) -> Result<Vec<EventInput>> {
        (self.poll)(since)
    }
}

/// Counters reported when a monitor thread exits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub cycles: u64,
    pub failures: u64,
    pub events_emitted: u64,
}
