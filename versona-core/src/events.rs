//! Append-only assignment event log.
use crate::EventSink;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use uuid::Uuid;

/// Emitted when a sticky assignment is first created.
pub const EVENT_ASSIGNMENT_CREATED: &str = "assignment_created";
/// Emitted when an operator explicitly overrides an assignment.
pub const EVENT_ASSIGNMENT_OVERRIDDEN: &str = "assignment_overridden";
/// Emitted by the host runtime after each user interaction.
pub const EVENT_MESSAGE_SENT: &str = "message_sent";

/// Default capacity of the in-memory event ring.
pub const DEFAULT_EVENT_CAPACITY: usize = 65_536;

/// Open metadata attached to an event.
pub type EventMetadata = HashMap<String, serde_json::Value>;

/// A single append-only log entry. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentEvent {
    pub event_id: Uuid,
    pub user_id: String,
    pub base_character_id: String,
    pub character_version_id: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: EventMetadata,
}

impl AssignmentEvent {
    /// Build a new event stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(
        user_id: &str,
        base_character_id: &str,
        character_version_id: &str,
        event_type: &str,
        metadata: EventMetadata,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            base_character_id: base_character_id.to_string(),
            character_version_id: character_version_id.to_string(),
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            metadata,
        }
    }
}

#[derive(Debug, Default)]
struct LogInner {
    events: VecDeque<AssignmentEvent>,
    dropped: u64,
}

/// Bounded in-memory event log. The upstream system never specified a
/// retention policy; this sink keeps the newest `capacity` events and
/// counts what it sheds. Durable sinks behind [`EventSink`] pick their
/// own policy.
#[derive(Debug)]
pub struct MemoryEventLog {
    inner: Mutex<LogInner>,
    capacity: usize,
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl MemoryEventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log that retains at most `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LogInner::default()),
            capacity: capacity.max(1),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }

    /// Number of events shed to the retention cap so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// Snapshot of every retained event, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AssignmentEvent> {
        self.inner.lock().events.iter().cloned().collect()
    }

    /// Retained events for one base character, oldest first.
    #[must_use]
    pub fn events_for(&self, base_character_id: &str) -> Vec<AssignmentEvent> {
        self.inner
            .lock()
            .events
            .iter()
            .filter(|event| event.base_character_id == base_character_id)
            .cloned()
            .collect()
    }
}

impl EventSink for MemoryEventLog {
    type Error = Infallible;

    fn append(&self, event: AssignmentEvent) -> Result<(), Self::Error> {
        let mut inner = self.inner.lock();
        inner.events.push_back(event);
        while inner.events.len() > self.capacity {
            inner.events.pop_front();
            if inner.dropped == 0 {
                log::warn!(
                    "event log reached capacity {}; oldest events are being shed",
                    self.capacity
                );
            }
            inner.dropped += 1;
        }
        Ok(())
    }
}
