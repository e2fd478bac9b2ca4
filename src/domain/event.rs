//! Event, cursor and identity records.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event pulled from the remote stream.
///
/// The payload is opaque to the poll loop; only `event_id` is interpreted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Ordinal identifier, ascending within a batch
    pub event_id: i64,
    /// Raw event body as delivered by the remote API
    pub payload: Value,
}

impl Event {
    /// Create a new event
    pub fn new(event_id: i64, payload: Value) -> Self {
        Self { event_id, payload }
    }
}

/// Offset into the remote event stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cursor(i64);

impl Cursor {
    /// Requests only the newest pending event. Used by the backlog skip.
    pub const LATEST: Cursor = Cursor(-1);

    /// Cursor at the start of the stream
    pub const fn start() -> Self {
        Cursor(0)
    }

    /// Create a cursor at an explicit offset
    pub const fn at(offset: i64) -> Self {
        Cursor(offset)
    }

    /// Raw offset value sent to the remote API
    pub fn value(self) -> i64 {
        self.0
    }

    /// Cursor positioned just past `event_id`, never moving backward.
    pub fn advanced_past(self, event_id: i64) -> Self {
        Cursor(self.0.max(event_id.saturating_add(1)))
    }

    /// Cursor positioned past the highest event of a batch.
    ///
    /// An empty batch leaves the cursor unchanged.
    pub fn advanced_past_batch(self, events: &[Event]) -> Self {
        events
            .iter()
            .map(|e| e.event_id)
            .max()
            .map_or(self, |max| self.advanced_past(max))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identity this client runs as on the remote side.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub id: i64,
    pub name: String,
}

impl Identity {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}
