//! Long-lived push streams over the bus.
//!
//! A [`StreamSession`] walks one connection through
//! `Connecting -> Connected -> (WaitingForEvent <-> Delivering) -> Disconnected`:
//! - on connect it subscribes and sends a synthetic `connected` frame
//! - while idle it waits on the inbox and sends `heartbeat` frames on timeout
//! - each event is written as a frame named after its type
//! - on exit a [`SubscriptionGuard`] unsubscribes, even on error
//!
//! The HTTP layer plugs in through [`EventSink`].

mod frame;
mod session;
mod types;

pub use frame::SseFrame;
pub use session::{EventSink, StreamSession, SubscriptionGuard, WriterSink};
pub use types::{StreamConfig, StreamEnd, StreamKind, StreamState, StreamSummary};
