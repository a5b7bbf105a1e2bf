//! Push stream driver: connect, wait, deliver, heartbeat, clean up.

use crate::bus::EventQueue;
use crate::error::{BusError, Result};
use crate::subscriptions::ConnectionHandle;
use crossbeam_channel::RecvTimeoutError;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::frame::SseFrame;
use super::types::{StreamConfig, StreamEnd, StreamKind, StreamState, StreamSummary};

/// Transport side of a stream, owned by the HTTP layer.
pub trait EventSink {
    /// Whether the client has gone away. Checked once per cycle.
    fn is_disconnected(&self) -> bool;

    /// Write one complete frame.
    fn send(&mut self, frame: &SseFrame) -> Result<()>;
}

/// Sink over any writer, e.g. a chunked response body.
///
/// A failed write marks the sink disconnected. The flag can also be set from
/// outside through [`disconnect_flag`](Self::disconnect_flag).
pub struct WriterSink<W: Write> {
    writer: W,
    closed: Arc<AtomicBool>,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag; storing `true` ends the stream at the next cycle.
    pub fn disconnect_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for WriterSink<W> {
    fn is_disconnected(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn send(&mut self, frame: &SseFrame) -> Result<()> {
        let wire = frame.to_wire();
        let written = self
            .writer
            .write_all(wire.as_bytes())
            .and_then(|()| self.writer.flush());
        written.map_err(|e| {
            self.closed.store(true, Ordering::Release);
            BusError::Transport(e.to_string())
        })
    }
}

/// Keeps a connection registered for exactly as long as it is alive.
///
/// Dropping the guard unsubscribes, on every exit path including errors and
/// panics.
pub struct SubscriptionGuard {
    bus: Arc<EventQueue>,
    handle: ConnectionHandle,
}

impl SubscriptionGuard {
    pub fn new(bus: Arc<EventQueue>, handle: ConnectionHandle) -> Self {
        Self { bus, handle }
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.bus.release(&self.handle);
    }
}

/// One long-lived push connection.
///
/// ```ignore
/// let mut session = StreamSession::authenticated(bus, "S1", StreamConfig::default());
/// let summary = session.run(&mut sink)?;
/// ```
pub struct StreamSession {
    bus: Arc<EventQueue>,
    kind: StreamKind,
    config: StreamConfig,
    state: StreamState,
}

impl StreamSession {
    pub fn authenticated(bus: Arc<EventQueue>, user_id: impl Into<String>, config: StreamConfig) -> Self {
        Self::new(
            bus,
            StreamKind::Authenticated {
                user_id: user_id.into(),
            },
            config,
        )
    }

    /// Anonymous stream that only forwards public events.
    pub fn guest(bus: Arc<EventQueue>, config: StreamConfig) -> Self {
        Self::new(bus, StreamKind::Guest, config)
    }

    pub fn new(bus: Arc<EventQueue>, kind: StreamKind, config: StreamConfig) -> Self {
        Self {
            bus,
            kind,
            config,
            state: StreamState::Connecting,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn kind(&self) -> &StreamKind {
        &self.kind
    }

    fn heartbeat_interval(&self) -> Duration {
        match self.kind {
            StreamKind::Authenticated { .. } => self.config.heartbeat_interval,
            StreamKind::Guest => self.config.guest_heartbeat_interval,
        }
    }

    /// Drive the stream until the client leaves, the bus drops the
    /// connection, or the sink fails.
    ///
    /// The connection is unsubscribed before this returns, whatever the outcome.
    pub fn run<S: EventSink + ?Sized>(&mut self, sink: &mut S) -> Result<StreamSummary> {
        self.state = StreamState::Connecting;
        let handle = match &self.kind {
            StreamKind::Authenticated { user_id } => self.bus.subscribe(user_id),
            StreamKind::Guest => self.bus.subscribe_guest(),
        };
        let subscriber = handle.subscriber().to_string();
        let guard = SubscriptionGuard::new(Arc::clone(&self.bus), handle);
        self.state = StreamState::Connected;
        info!(subscriber = %subscriber, "stream opened");

        let result = self.pump(guard.handle(), sink);

        drop(guard);
        self.state = StreamState::Disconnected;

        match &result {
            Ok(summary) => info!(
                subscriber = %subscriber,
                end = ?summary.end,
                delivered = summary.events_delivered,
                heartbeats = summary.heartbeats,
                "stream closed"
            ),
            Err(e) => error!(subscriber = %subscriber, error = %e, "stream failed"),
        }
        result
    }

    fn pump<S: EventSink + ?Sized>(
        &mut self,
        handle: &ConnectionHandle,
        sink: &mut S,
    ) -> Result<StreamSummary> {
        let connected = match &self.kind {
            StreamKind::Authenticated { user_id } => {
                SseFrame::connected(user_id, self.config.retry_interval)?
            }
            StreamKind::Guest => SseFrame::connected_guest(self.config.retry_interval)?,
        };
        sink.send(&connected)?;

        let guest = matches!(self.kind, StreamKind::Guest);
        let heartbeat = self.heartbeat_interval();
        let mut summary = StreamSummary {
            end: StreamEnd::ClientDisconnected,
            events_delivered: 0,
            heartbeats: 0,
            filtered: 0,
        };

        loop {
            if sink.is_disconnected() {
                summary.end = StreamEnd::ClientDisconnected;
                break;
            }

            self.state = StreamState::WaitingForEvent;
            match handle.recv_timeout(heartbeat) {
                Ok(event) => {
                    if guest && !event.is_public() {
                        summary.filtered += 1;
                        continue;
                    }
                    self.state = StreamState::Delivering;
                    let frame = SseFrame::from_event(&event)?;
                    sink.send(&frame)?;
                    summary.events_delivered += 1;
                }
                Err(RecvTimeoutError::Timeout) => {
                    sink.send(&SseFrame::heartbeat()?)?;
                    summary.heartbeats += 1;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    summary.end = StreamEnd::InboxClosed;
                    break;
                }
            }
        }

        Ok(summary)
    }
}
