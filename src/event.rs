//! Event value object and its builder.

use crate::error::{BusError, Result};
use crate::types::{CachePolicy, EventId, EventType, Priority, Timestamp, DEFAULT_TTL_SECS};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Key-value payload carried by an event. Owned by the producer.
pub type Payload = Map<String, Value>;

/// A single notification.
///
/// Immutable once built: fields are private and only readable. `is_public`
/// is always derived from `event_type`, including when deserializing, so a
/// producer can never widen the audience of a private event type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawEvent")]
pub struct Event {
    event_id: EventId,
    event_type: EventType,
    timestamp: Timestamp,
    target_users: Vec<String>,
    is_public: bool,
    priority: Priority,
    data: Payload,
    cache_policy: CachePolicy,
}

impl Event {
    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// When the event was published. Before publishing, when it was built.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Restamp at publish time, under the bus lock.
    pub(crate) fn stamp(&mut self, timestamp: Timestamp) {
        self.timestamp = timestamp;
    }

    /// Recipients of a private event. Always empty for public events.
    pub fn target_users(&self) -> &[String] {
        &self.target_users
    }

    pub fn is_public(&self) -> bool {
        self.is_public
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn data(&self) -> &Payload {
        &self.data
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    /// Whether `user_id` is one of the recipients.
    pub fn targets(&self, user_id: &str) -> bool {
        self.target_users.iter().any(|u| u == user_id)
    }

    /// Wire representation as a JSON object.
    pub fn to_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Deserialization mirror of [`Event`].
///
/// Has no `is_public` field: a flag on the wire is skipped as unknown.
#[derive(Deserialize)]
struct RawEvent {
    event_id: EventId,
    event_type: EventType,
    timestamp: Timestamp,
    #[serde(default)]
    target_users: Vec<String>,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    data: Payload,
    #[serde(default)]
    cache_policy: Option<CachePolicy>,
}

impl From<RawEvent> for Event {
    fn from(raw: RawEvent) -> Self {
        let is_public = raw.event_type.is_public();
        let ttl = raw.cache_policy.map_or(DEFAULT_TTL_SECS, |p| p.ttl);
        Event {
            event_id: raw.event_id,
            event_type: raw.event_type,
            timestamp: raw.timestamp,
            target_users: if is_public { Vec::new() } else { raw.target_users },
            is_public,
            priority: raw.priority,
            data: raw.data,
            cache_policy: CachePolicy {
                ttl,
                persist: !is_public,
            },
        }
    }
}

/// Input for creating a new event (before id and timestamp are assigned).
#[derive(Clone, Debug)]
pub struct EventInput {
    pub event_type: EventType,
    pub data: Payload,
    pub target_users: Vec<String>,
    pub priority: Priority,
    pub ttl: u64,
}

impl EventInput {
    /// Create an input with an object payload.
    pub fn new(event_type: EventType, data: Payload) -> Self {
        Self {
            event_type,
            data,
            target_users: Vec::new(),
            priority: Priority::Normal,
            ttl: DEFAULT_TTL_SECS,
        }
    }

    /// Create an input from any serializable payload that encodes as a JSON object.
    pub fn json(event_type: EventType, payload: &impl Serialize) -> Result<Self> {
        match serde_json::to_value(payload)? {
            Value::Object(data) => Ok(Self::new(event_type, data)),
            other => Err(BusError::Serialization(format!(
                "event payload must be a JSON object, got {other}"
            ))),
        }
    }

    /// Set recipients. Ignored for public event types.
    pub fn with_targets<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_users = users.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the advisory client cache TTL in seconds.
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self
    }

    /// Stamp id and a provisional timestamp and freeze the event.
    ///
    /// Publishing replaces the timestamp with the publish instant.
    pub fn build(self) -> Event {
        let is_public = self.event_type.is_public();
        let target_users = if is_public {
            Vec::new()
        } else {
            let mut seen = Vec::with_capacity(self.target_users.len());
            for user in self.target_users {
                if !seen.contains(&user) {
                    seen.push(user);
                }
            }
            seen
        };

        Event {
            event_id: EventId::generate(),
            event_type: self.event_type,
            timestamp: Timestamp::now(),
            target_users,
            is_public,
            priority: self.priority,
            data: self.data,
            cache_policy: CachePolicy {
                ttl: self.ttl,
                persist: !is_public,
            },
        }
    }

    // --- Factories ---

    /// Campus-wide announcement.
    pub fn announcement(
        title: impl Into<String>,
        content: impl Into<String>,
        department: impl Into<String>,
    ) -> Self {
        Self::new(
            EventType::Announcement,
            object(json!({
                "title": title.into(),
                "content": content.into(),
                "department": department.into(),
            })),
        )
    }

    /// Announcement flagged as urgent, raised to high priority.
    pub fn urgent_announcement(
        title: impl Into<String>,
        content: impl Into<String>,
        department: impl Into<String>,
    ) -> Self {
        let mut input = Self::announcement(title, content, department);
        input.data.insert("is_urgent".into(), Value::Bool(true));
        input.with_priority(Priority::High)
    }

    /// A confirmed grade for one student.
    pub fn grade_update(
        student_id: impl Into<String>,
        course_name: impl Into<String>,
        score: f64,
        grade_level: impl Into<String>,
    ) -> Self {
        let student_id = student_id.into();
        Self::new(
            EventType::GradeUpdate,
            object(json!({
                "student_id": &student_id,
                "course_name": course_name.into(),
                "total_score": score,
                "grade_level": grade_level.into(),
            })),
        )
        .with_targets([student_id])
        .with_priority(Priority::High)
    }

    /// A campus-card transaction.
    pub fn transaction(
        user_id: impl Into<String>,
        amount: f64,
        location: impl Into<String>,
        balance: f64,
    ) -> Self {
        let user_id = user_id.into();
        Self::new(
            EventType::Transaction,
            object(json!({
                "person_id": &user_id,
                "amount": amount,
                "merchant_name": location.into(),
                "balance_after": balance,
            })),
        )
        .with_targets([user_id])
    }

    /// Reminder that a borrowed book is due. Due-today reminders are high priority.
    pub fn library_reminder(
        user_id: impl Into<String>,
        book_title: impl Into<String>,
        due_date: impl Into<String>,
        days_left: i64,
    ) -> Self {
        let priority = if days_left <= 0 {
            Priority::High
        } else {
            Priority::Normal
        };
        Self::new(
            EventType::LibraryReminder,
            object(json!({
                "book_title": book_title.into(),
                "due_date": due_date.into(),
                "days_left": days_left,
            })),
        )
        .with_targets([user_id.into()])
        .with_priority(priority)
    }

    /// Schedule change for every affected student.
    pub fn course_change<I, S>(
        students: I,
        course_name: impl Into<String>,
        old_schedule: impl Into<String>,
        new_schedule: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            EventType::CourseChange,
            object(json!({
                "course_name": course_name.into(),
                "old_schedule": old_schedule.into(),
                "new_schedule": new_schedule.into(),
                "reason": reason.into(),
            })),
        )
        .with_targets(students)
        .with_priority(Priority::High)
    }
}

fn object(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}
