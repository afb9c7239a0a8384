//! Core types for the stream broker.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Zero-based position of an event within its stream.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Cursor(pub u64);

impl Cursor {
    pub fn next(self) -> Self {
        Cursor(self.0 + 1)
    }

    /// Cursor of the last element in a sequence of `len` events.
    pub fn last_of(len: usize) -> Option<Self> {
        len.checked_sub(1).map(|i| Cursor(i as u64))
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({})", self.0)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_millis() as i64)
    }

    /// This timestamp moved back by `age`, saturating at the epoch.
    pub fn minus(self, age: Duration) -> Self {
        let millis = i64::try_from(age.as_millis()).unwrap_or(i64::MAX);
        Timestamp(self.0.saturating_sub(millis).max(0))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Producer tags attached to a stream when it is created.
///
/// The broker never interprets these; they travel with the entry so that a
/// reconnecting client (or an operator) can tell which generation a stream
/// belongs to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub model_id: Option<String>,
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl StreamMetadata {
    pub fn new(model_id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            model_id: Some(model_id.into()),
            provider: Some(provider.into()),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// An opaque event paired with the cursor it was assigned at append time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub cursor: Cursor,
    pub payload: serde_json::Value,
}

impl StreamEvent {
    pub fn new(cursor: Cursor, payload: serde_json::Value) -> Self {
        Self { cursor, payload }
    }
}

/// Point-in-time copy of a stream held by an adapter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamEntry {
    pub stream_id: String,
    pub metadata: StreamMetadata,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed: bool,
    pub events: Vec<StreamEvent>,
}

impl StreamEntry {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Cursor of the most recent event, if any.
    pub fn last_cursor(&self) -> Option<Cursor> {
        Cursor::last_of(self.events.len())
    }
}

/// Adapter statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AdapterStats {
    pub streams: usize,
    pub completed: usize,
    pub events: usize,
    pub subscribers: usize,
}
