//! Storage adapters for buffered streams.
//!
//! An adapter keeps the ordered events of every in-flight stream together
//! with its metadata and completion flag, and owns the live listeners for
//! each stream. Any backend must honour the same contract:
//!
//! - `get_events`/`get_stream` return copies; callers can never mutate stored state
//! - `publish` isolates listeners from each other and never fails the caller
//! - `remove` and `mark_completed` are idempotent and notify each listener once
//! - event cursors are gap-free and start at zero for every stream

mod memory;

pub use memory::MemoryAdapter;

use crate::broadcast::{StreamListener, Unsubscribe};
use crate::config::CreationPolicy;
use crate::error::Result;
use crate::types::{StreamEntry, StreamEvent, StreamMetadata};
use std::sync::Arc;
use std::time::Duration;

/// Storage and broadcast backend for resumable streams.
///
/// Methods may block (a network- or disk-backed adapter will); the broker
/// only calls the slow ones from writer threads or replay sessions.
pub trait StreamAdapter: Send + Sync {
    /// Creation policy this adapter was configured with.
    fn creation_policy(&self) -> CreationPolicy {
        CreationPolicy::Explicit
    }

    /// Whether an entry exists for `stream_id`.
    fn exists(&self, stream_id: &str) -> Result<bool>;

    /// Allocate an empty entry. A no-op if the entry already exists.
    fn create(&self, stream_id: &str, metadata: StreamMetadata) -> Result<()>;

    /// Append a payload and return it paired with its cursor.
    ///
    /// Returns `Ok(None)` when the stream is unknown and the adapter does not
    /// create streams lazily.
    fn append(&self, stream_id: &str, payload: serde_json::Value) -> Result<Option<StreamEvent>>;

    /// Flag the stream as finished and notify its listeners. Idempotent.
    fn mark_completed(&self, stream_id: &str) -> Result<()>;

    /// False for unknown streams.
    fn is_completed(&self, stream_id: &str) -> Result<bool>;

    /// Copy of the buffered events, or `None` for unknown streams.
    fn get_events(&self, stream_id: &str) -> Result<Option<Vec<StreamEvent>>>;

    /// Copy of the whole entry, or `None` for unknown streams.
    fn get_stream(&self, stream_id: &str) -> Result<Option<StreamEntry>>;

    /// Register a live listener.
    ///
    /// Unknown streams yield a no-op handle unless the adapter creates lazily.
    /// A listener attached to an already completed stream is notified of
    /// completion immediately.
    fn subscribe(&self, stream_id: &str, listener: Arc<dyn StreamListener>)
        -> Result<Unsubscribe>;

    /// Deliver an event to the current listeners of `stream_id`.
    fn publish(&self, stream_id: &str, event: &StreamEvent);

    /// Notify listeners of completion, then drop the entry. Idempotent.
    fn remove(&self, stream_id: &str) -> Result<()>;

    /// Drop every entry not updated within `max_age`. Returns how many were dropped.
    fn cleanup(&self, max_age: Duration) -> Result<usize>;
}
