//! Cancellable periodic polling of change sources.

use crate::error::{BusError, Result};
use crate::types::Timestamp;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

use super::dispatcher::EventDispatcher;
use super::types::{ChangeSource, MonitorConfig, MonitorStats};

/// Polls one [`ChangeSource`] and emits what it finds.
pub struct ChangeMonitor<S: ChangeSource> {
    source: S,
    dispatcher: Arc<EventDispatcher>,
    config: MonitorConfig,
    last_check: Timestamp,
}

impl<S: ChangeSource> ChangeMonitor<S> {
    pub fn new(source: S, dispatcher: Arc<EventDispatcher>, config: MonitorConfig) -> Self {
        let last_check = Timestamp::now().minus(config.initial_lookback);
        Self {
            source,
            dispatcher,
            config,
            last_check,
        }
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    /// Cutoff for the next poll.
    pub fn last_check(&self) -> Timestamp {
        self.last_check
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Poll once and emit every resulting event.
    ///
    /// The cutoff only advances on success, to the instant the poll started,
    /// so a failed cycle is retried over the same window.
    pub fn run_once(&mut self) -> Result<usize> {
        let started = Timestamp::now();
        let inputs = self.source.poll(self.last_check)?;
        let count = inputs.len();
        for input in inputs {
            self.dispatcher.emit(input);
        }
        self.last_check = started;
        debug!(source = self.source.name(), count, "poll cycle complete");
        Ok(count)
    }
}

impl<S: ChangeSource + 'static> ChangeMonitor<S> {
    /// Run on a dedicated thread until the returned handle is stopped or dropped.
    ///
    /// Waits `interval` after a good cycle and `error_backoff` after a failed
    /// one, retrying forever. A panic in the source or a listener counts as a
    /// failed cycle.
    pub fn spawn(self) -> Result<MonitorHandle> {
        let name = format!("monitor-{}", self.source.name());
        let (stop_tx, stop_rx) = bounded(1);
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run_until(stop_rx))?;
        info!(monitor = %name, "monitor started");
        Ok(MonitorHandle {
            name,
            stop: stop_tx,
            join: Some(join),
        })
    }

    fn run_until(mut self, stop: Receiver<()>) -> MonitorStats {
        let mut stats = MonitorStats::default();
        loop {
            stats.cycles += 1;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_once()));
            let wait = match outcome {
                Ok(Ok(count)) => {
                    stats.events_emitted += count as u64;
                    self.config.interval
                }
                Ok(Err(e)) => {
                    stats.failures += 1;
                    error!(source = self.source.name(), error = %e, "poll failed, backing off");
                    self.config.error_backoff
                }
                Err(_) => {
                    stats.failures += 1;
                    error!(source = self.source.name(), "poll panicked, backing off");
                    self.config.error_backoff
                }
            };
            match stop.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!(source = self.source.name(), cycles = stats.cycles, "monitor stopped");
        stats
    }
}

/// Control handle for a running monitor thread.
///
/// Dropping it without calling [`stop`](Self::stop) also ends the thread at
/// its next wait, without joining.
pub struct MonitorHandle {
    name: String,
    stop: Sender<()>,
    join: Option<JoinHandle<MonitorStats>>,
}

impl MonitorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Interrupt the current wait, then join the thread.
    pub fn stop(mut self) -> Result<MonitorStats> {
        let _ = self.stop.try_send(());
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| BusError::MonitorPanicked(self.name.clone())),
            None => Ok(MonitorStats::default()),
        }
    }
}

/// The set of monitors started together at process start.
#[derive(Default)]
pub struct MonitorSet {
    handles: Vec<MonitorHandle>,
}

impl MonitorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a monitor and keep its handle.
    pub fn start<S: ChangeSource + 'static>(&mut self, monitor: ChangeMonitor<S>) -> Result<()> {
        self.handles.push(monitor.spawn()?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop every monitor, returning stats by monitor name.
    pub fn stop_all(self) -> Vec<(String, Result<MonitorStats>)> {
        self.handles
            .into_iter()
            .map(|handle| {
                let name = handle.name().to_string();
                (name, handle.stop())
            })
            .collect()
    }
}
