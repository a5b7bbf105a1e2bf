//! Core types for the event bus.

use crate::error::{BusError, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// Kind of notification. Membership in the public set decides routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Public
    Announcement,
    Notice,
    SystemMessage,
    Emergency,
    // Private
    GradeUpdate,
    CourseChange,
    ExamReminder,
    LibraryReminder,
    Transaction,
    ActivityResult,
    Scholarship,
}

impl EventType {
    pub const ALL: [EventType; 11] = [
        EventType::Announcement,
        EventType::Notice,
        EventType::SystemMessage,
        EventType::Emergency,
        EventType::GradeUpdate,
        EventType::CourseChange,
        EventType::ExamReminder,
        EventType::LibraryReminder,
        EventType::Transaction,
        EventType::ActivityResult,
        EventType::Scholarship,
    ];

    /// Whether events of this type go to every subscriber.
    pub fn is_public(self) -> bool {
        matches!(
            self,
            EventType::Announcement
                | EventType::Notice
                | EventType::SystemMessage
                | EventType::Emergency
        )
    }

    /// Wire name, also used as the SSE frame name.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Announcement => "announcement",
            EventType::Notice => "notice",
            EventType::SystemMessage => "system_message",
            EventType::Emergency => "emergency",
            EventType::GradeUpdate => "grade_update",
            EventType::CourseChange => "course_change",
            EventType::ExamReminder => "exam_reminder",
            EventType::LibraryReminder => "library_reminder",
            EventType::Transaction => "transaction",
            EventType::ActivityResult => "activity_result",
            EventType::Scholarship => "scholarship",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| BusError::UnknownEventType(s.to_string()))
    }
}

/// Display priority. Carried for consumers; the bus never schedules by it.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Opaque event identifier: `evt_` followed by a UUIDv7 in simple hex form.
///
/// UUIDv7 puts a millisecond timestamp in the high bits and random data in
/// the rest, so ids sort roughly by creation time and never collide in
/// practice.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn generate() -> Self {
        EventId(format!("evt_{}", Uuid::now_v7().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last issued timestamp, in microseconds since the Unix epoch.
static LAST_ISSUED_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// UTC instant with microsecond precision, ISO-8601 on the wire.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current time.
    ///
    /// Strictly increasing within the process: if the wall clock stalls or
    /// steps back, the previous value plus one microsecond is issued instead.
    pub fn now() -> Self {
        let wall = Utc::now().timestamp_micros();
        let prev = LAST_ISSUED_MICROS
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(wall.max(prev.saturating_add(1)))
            })
            .unwrap_or(wall);
        let micros = wall.max(prev.saturating_add(1));
        Timestamp(DateTime::from_timestamp_micros(micros).unwrap_or_else(Utc::now))
    }

    /// Parse an ISO-8601 timestamp.
    ///
    /// Accepts RFC 3339 (`Z` or an explicit offset) and naive date-times,
    /// which are read as UTC.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(Timestamp(dt.with_timezone(&Utc)));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                return Ok(Timestamp(naive.and_utc()));
            }
        }
        Err(BusError::InvalidTimestamp(s.to_string()))
    }

    /// This instant shifted back by `duration`.
    pub fn minus(self, duration: std::time::Duration) -> Self {
        chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| self.0.checked_sub_signed(d))
            .map_or(Timestamp(DateTime::<Utc>::MIN_UTC), Timestamp)
    }

    pub fn to_iso(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.to_iso())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timestamp::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Default advisory cache TTL: 24 hours.
pub const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;

/// Client-side caching hint attached to every event.
///
/// Advisory only: the bus evicts by capacity, never by TTL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Seconds a client may keep the event cached.
    pub ttl: u64,
    /// Whether the event is kept in per-user history (private events).
    pub persist: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL_SECS,
            persist: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_public_set() {
        let public: Vec<_> = EventType::ALL.iter().filter(|t| t.is_public()).collect();
        assert_eq!(
            public,
            vec![
                &EventType::Announcement,
                &EventType::Notice,
                &EventType::SystemMessage,
                &EventType::Emergency
            ]
        );
    }

    #[test]
    fn test_event_type_names_roundtrip() {
        for t in EventType::ALL {
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
        assert!(matches!(
            "homework".parse::<EventType>(),
            Err(BusError::UnknownEventType(_))
        ));
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let mut prev = Timestamp::now();
        for _ in 0..1000 {
            let next = Timestamp::now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_timestamp_parse_forms() {
        let z = Timestamp::parse("2024-12-20T08:30:00Z").unwrap();
        let offset = Timestamp::parse("2024-12-20T16:30:00+08:00").unwrap();
        let naive = Timestamp::parse("2024-12-20T08:30:00").unwrap();
        let spaced = Timestamp::parse("2024-12-20 08:30:00.000").unwrap();
        assert_eq!(z, offset);
        assert_eq!(z, naive);
        assert_eq!(z, spaced);
        assert_eq!(z.to_iso(), "2024-12-20T08:30:00.000000Z");
    }

    #[test]
    fn test_timestamp_parse_rejects_garbage() {
        for bad in ["", "yesterday", "2024-13-01T00:00:00Z", "1700000000"] {
            let err = Timestamp::parse(bad).unwrap_err();
            assert!(err.is_bad_request(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_timestamp_serde() {
        let ts = Timestamp::parse("2025-01-02T03:04:05.123456Z").unwrap();
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"2025-01-02T03:04:05.123456Z\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn test_event_ids_unique_and_prefixed() {
        let ids: HashSet<_> = (0..10_000).map(|_| EventId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
        assert!(ids.iter().all(|id| id.as_str().starts_with("evt_")));
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::High < Priority::Urgent);
        assert_eq!(Priority::default(), Priority::Normal);
    }
}
