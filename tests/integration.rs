//! Integration tests for the event bus and push streams.

use campus_stream::{
    BusConfig, EventInput, EventQueue, EventSink, EventType, Result, SseFrame, StreamConfig,
    StreamEnd, StreamSession, Timestamp,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn ids(events: &[Arc<campus_stream::Event>]) -> Vec<String> {
    events.iter().map(|e| e.event_id().to_string()).collect()
}

fn fast_streams() -> StreamConfig {
    StreamConfig {
        heartbeat_interval: Duration::from_millis(20),
        guest_heartbeat_interval: Duration::from_millis(40),
        retry_interval: Duration::from_millis(5000),
    }
}

/// Forwards every frame to a channel. Disconnects once the flag channel says so.
struct ChannelSink {
    frames: Sender<SseFrame>,
    stop: Receiver<()>,
}

impl EventSink for ChannelSink {
    fn is_disconnected(&self) -> bool {
        !self.stop.is_empty()
    }

    fn send(&mut self, frame: &SseFrame) -> Result<()> {
        let _ = self.frames.send(frame.clone());
        Ok(())
    }
}

fn next_named(frames: &Receiver<SseFrame>, name: &str) -> SseFrame {
    loop {
        let frame = frames
            .recv_timeout(Duration::from_secs(5))
            .expect("stream produced no frame");
        if frame.event == name {
            return frame;
        }
    }
}

// --- Fan-out ---

#[test]
fn test_announcement_reaches_every_connection_and_resync() {
    let bus = EventQueue::default();
    let before = Timestamp::now().to_iso();

    let s1 = bus.subscribe("S1");
    let s2 = bus.subscribe("S2");
    let guest = bus.subscribe_guest();

    let event = bus.publish_event(
        EventInput::announcement("Exam week", "Library open 24h", "Academic Affairs").build(),
    );

    for handle in [&s1, &s2, &guest] {
        let received = handle.drain();
        assert_eq!(ids(&received), vec![event.event_id().to_string()]);
    }

    // A user who never connected still catches up through resync
    let missed = bus.get_events_since("S3", &before).unwrap();
    assert_eq!(ids(&missed), vec![event.event_id().to_string()]);
}

#[test]
fn test_private_event_reaches_only_its_target() {
    let bus = EventQueue::default();
    let s1 = bus.subscribe("S1");
    let s2 = bus.subscribe("S2");
    let guest = bus.subscribe_guest();

    let event = bus.publish_event(EventInput::grade_update("S1", "Calculus", 93.5, "A").build());
    assert!(!event.is_public());
    assert_eq!(event.target_users(), ["S1".to_string()]);

    assert_eq!(s1.drain().len(), 1);
    assert!(s2.is_empty());
    assert!(guest.is_empty());
    assert!(bus.queued_events("S2").is_empty());
    assert_eq!(bus.history("S1").len(), 1);
    assert_eq!(bus.unread_count("S1"), 1);
}

#[test]
fn test_course_change_reaches_every_affected_student() {
    let bus = EventQueue::default();
    let a = bus.subscribe("S1");
    let b = bus.subscribe("S2");
    let c = bus.subscribe("S3");

    bus.publish_event(
        EventInput::course_change(["S1", "S2", "S1"], "Physics", "Mon 8:00", "Tue 10:00", "Room")
            .build(),
    );

    assert_eq!(a.drain().len(), 1);
    assert_eq!(b.drain().len(), 1);
    assert!(c.is_empty());
}

// --- Backfill ---

#[test]
fn test_backfill_takes_recent_public_and_private_oldest_first() {
    let bus = EventQueue::default();

    for i in 0..25 {
        bus.publish_event(EventInput::transaction("S1", -(i as f64), "Canteen", 100.0).build());
        if i < 15 {
            bus.publish_event(EventInput::announcement(format!("Notice {i}"), "", "Office").build());
        }
    }

    let handle = bus.subscribe("S1");
    let replayed = handle.drain();
    assert_eq!(replayed.len(), 30);

    let public: Vec<_> = replayed.iter().filter(|e| e.is_public()).collect();
    let private: Vec<_> = replayed.iter().filter(|e| !e.is_public()).collect();
    assert_eq!(public.len(), 10);
    assert_eq!(private.len(), 20);

    // Most recent ten of each kind
    let all_public = bus.public_events();
    let expected_public: Vec<_> = all_public[5..].iter().map(|e| e.event_id().clone()).collect();
    let got_public: Vec<_> = public.iter().map(|e| e.event_id().clone()).collect();
    assert_eq!(got_public, expected_public);

    assert!(replayed.windows(2).all(|w| w[0].timestamp() < w[1].timestamp()));
}

#[test]
fn test_guest_backfill_is_public_only() {
    let bus = EventQueue::default();
    bus.publish_event(EventInput::announcement("Welcome", "", "Office").build());
    bus.publish_event(EventInput::grade_update("S1", "Art", 70.0, "C").build());

    let guest = bus.subscribe_guest();
    let replayed = guest.drain();
    assert_eq!(replayed.len(), 1);
    assert!(replayed[0].is_public());
}

// --- Multi-device ---

#[test]
fn test_full_inbox_drops_only_that_connection() {
    let bus = EventQueue::new(BusConfig {
        inbox_capacity: 2,
        ..Default::default()
    });
    let stalled = bus.subscribe("S1");
    let active = bus.subscribe("S1");
    assert_eq!(bus.connection_count("S1"), 2);

    for i in 0..3 {
        bus.publish_event(EventInput::transaction("S1", -1.0, "Shop", 10.0 - i as f64).build());
        assert_eq!(active.drain().len(), 1);
    }

    assert_eq!(bus.connection_count("S1"), 1);
    assert!(bus.is_online("S1"));

    // The stalled connection keeps what it buffered, then sees the close
    assert_eq!(stalled.drain().len(), 2);
    assert!(stalled.recv_timeout(Duration::from_millis(10)).is_err());
    assert_eq!(bus.unread_count("S1"), 3);
}

#[test]
fn test_subscribe_unsubscribe_leaves_nothing_behind() {
    let bus = EventQueue::default();
    let phone = bus.subscribe("S1");
    let laptop = bus.subscribe("S1");

    bus.unsubscribe("S1", &phone);
    assert!(bus.is_online("S1"));
    bus.unsubscribe("S1", &laptop);
    assert!(!bus.is_online("S1"));
    assert_eq!(bus.connected_users(), 0);

    // Idempotent
    bus.unsubscribe("S1", &laptop);
    assert_eq!(bus.connected_users(), 0);
}

// --- Resync ---

#[test]
fn test_resync_is_filtered_sorted_and_idempotent() {
    let bus = EventQueue::default();
    bus.publish_event(EventInput::announcement("Old", "", "Office").build());
    let cutoff = Timestamp::now().to_iso();

    bus.publish_event(EventInput::grade_update("S1", "Math", 80.0, "B").build());
    bus.publish_event(EventInput::announcement("New", "", "Office").build());
    bus.publish_event(EventInput::grade_update("S2", "Math", 60.0, "D").build());
    bus.publish_event(EventInput::library_reminder("S1", "Dune", "2024-06-01", 0).build());

    let first = bus.get_events_since("S1", &cutoff).unwrap();
    let second = bus.get_events_since("S1", &cutoff).unwrap();
    assert_eq!(ids(&first), ids(&second));

    let types: Vec<_> = first.iter().map(|e| e.event_type()).collect();
    assert_eq!(
        types,
        vec![EventType::GradeUpdate, EventType::Announcement, EventType::LibraryReminder]
    );
    assert!(first.iter().all(|e| e.is_public() || e.targets("S1")));

    // Unique, and nothing from before the cutoff
    let unique: HashSet<_> = ids(&first).into_iter().collect();
    assert_eq!(unique.len(), first.len());
    let cutoff = Timestamp::parse(&cutoff).unwrap();
    assert!(first.iter().all(|e| e.timestamp() > cutoff));
}

#[test]
fn test_resync_does_not_consume_queue() {
    let bus = EventQueue::default();
    bus.publish_event(EventInput::transaction("S1", -5.0, "Cafe", 20.0).build());

    let sync = bus.sync("S1", "2000-01-01T00:00:00").unwrap();
    assert_eq!(sync.count, 1);
    assert_eq!(bus.unread_count("S1"), 1);

    let guest = bus.sync_guest("2000-01-01T00:00:00Z").unwrap();
    assert_eq!(guest.count, 0);
}

#[test]
fn test_status_reports_bus_counters() {
    let bus = EventQueue::default();
    let _handle = bus.subscribe("S1");
    let _guest = bus.subscribe_guest();
    bus.publish_event(EventInput::announcement("Hi", "", "Office").build());
    bus.publish_event(EventInput::grade_update("S1", "Art", 99.0, "A+").build());

    let status = bus.status(Some("S1"));
    assert!(status.is_online);
    assert_eq!(status.unread_count, 1);
    assert_eq!(status.connected_users, 2);
    assert_eq!(status.total_events, 1);
    assert_eq!(status.system_status, "running");

    let anon = bus.status(None);
    assert_eq!(anon.user_id, "guest");
    assert!(!anon.is_online);
}

// --- Streams ---

#[test]
fn test_authenticated_stream_end_to_end() {
    let bus = Arc::new(EventQueue::default());
    let (frames_tx, frames) = unbounded();
    let (stop_tx, stop) = unbounded();

    let session_bus = Arc::clone(&bus);
    let worker = thread::spawn(move || {
        let mut sink = ChannelSink { frames: frames_tx, stop };
        StreamSession::authenticated(session_bus, "S1", fast_streams()).run(&mut sink)
    });

    let connected = next_named(&frames, "connected");
    assert_eq!(connected.retry, Some(5000));
    assert!(connected.data.contains("\"user_id\":\"S1\""));
    assert!(bus.is_online("S1"));

    bus.publish_event(EventInput::grade_update("S1", "Biology", 77.0, "C+").build());
    bus.publish_event(EventInput::grade_update("S2", "Biology", 50.0, "F").build());
    let frame = next_named(&frames, "grade_update");
    assert!(frame.data.contains("\"target_users\":[\"S1\"]"));

    next_named(&frames, "heartbeat");

    stop_tx.send(()).unwrap();
    let summary = worker.join().unwrap().unwrap();
    assert_eq!(summary.end, StreamEnd::ClientDisconnected);
    assert_eq!(summary.events_delivered, 1);
    assert!(summary.heartbeats >= 1);
    assert!(!bus.is_online("S1"));
}

#[test]
fn test_guest_stream_only_sees_public_events() {
    let bus = Arc::new(EventQueue::default());
    let (frames_tx, frames) = unbounded();
    let (stop_tx, stop) = unbounded();

    let session_bus = Arc::clone(&bus);
    let worker = thread::spawn(move || {
        let mut sink = ChannelSink { frames: frames_tx, stop };
        StreamSession::guest(session_bus, fast_streams()).run(&mut sink)
    });

    let connected = next_named(&frames, "connected");
    assert!(connected.data.contains("\"user_type\":\"guest\""));

    bus.publish_event(EventInput::transaction("S1", -1.0, "Shop", 1.0).build());
    bus.publish_event(EventInput::urgent_announcement("Fire drill", "Now", "Safety").build());
    let frame = next_named(&frames, "announcement");
    assert!(frame.data.contains("\"is_urgent\":true"));

    stop_tx.send(()).unwrap();
    let summary = worker.join().unwrap().unwrap();
    assert_eq!(summary.events_delivered, 1);
    assert_eq!(bus.connected_users(), 0);
}

/// Blocks on the first real event until released.
struct GatedSink {
    frames: Sender<SseFrame>,
    blocked: Sender<()>,
    gate: Receiver<()>,
    gated: bool,
}

impl EventSink for GatedSink {
    fn is_disconnected(&self) -> bool {
        false
    }

    fn send(&mut self, frame: &SseFrame) -> Result<()> {
        if frame.event != "connected" && frame.event != "heartbeat" && !self.gated {
            self.gated = true;
            let _ = self.blocked.send(());
            let _ = self.gate.recv();
        }
        let _ = self.frames.send(frame.clone());
        Ok(())
    }
}

#[test]
fn test_slow_stream_is_dropped_and_ends() {
    let bus = Arc::new(EventQueue::new(BusConfig {
        inbox_capacity: 3,
        ..Default::default()
    }));
    let (frames_tx, frames) = unbounded();
    let (blocked_tx, blocked) = unbounded();
    let (gate_tx, gate) = unbounded();

    let session_bus = Arc::clone(&bus);
    let worker = thread::spawn(move || {
        let mut sink = GatedSink {
            frames: frames_tx,
            blocked: blocked_tx,
            gate,
            gated: false,
        };
        StreamSession::authenticated(session_bus, "S1", fast_streams()).run(&mut sink)
    });

    next_named(&frames, "connected");
    bus.publish_event(EventInput::transaction("S1", -1.0, "Shop", 9.0).build());
    blocked.recv_timeout(Duration::from_secs(5)).unwrap();

    // Three fit in the inbox, the fourth overflows it
    for _ in 0..4 {
        bus.publish_event(EventInput::transaction("S1", -1.0, "Shop", 8.0).build());
    }
    assert!(!bus.is_online("S1"));
    gate_tx.send(()).unwrap();

    let summary = worker.join().unwrap().unwrap();
    assert_eq!(summary.end, StreamEnd::InboxClosed);
    assert_eq!(summary.events_delivered, 4);

    // Everything is still available to resync
    assert_eq!(bus.unread_count("S1"), 5);
}
