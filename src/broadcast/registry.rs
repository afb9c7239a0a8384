//! Per-stream listener registry.

use crate::types::StreamEvent;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use super::types::{StreamListener, SubscriptionId, Unsubscribe};

/// A listener bound to one incarnation of a stream id.
struct Registered {
    generation: u64,
    listener: Arc<dyn StreamListener>,
}

type ListenerSet = HashMap<SubscriptionId, Registered>;

/// Fans events out to the live listeners of each stream.
///
/// A stream id can be removed and created again. Every listener is tagged
/// with the generation of the stream it subscribed to, and publish and
/// complete only reach listeners of the generation they name.
pub struct BroadcastRegistry {
    /// Listeners keyed by stream id, then subscription id.
    streams: RwLock<HashMap<String, ListenerSet>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl BroadcastRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener for generation `generation` of `stream_id`.
    ///
    /// The returned handle removes the listener when consumed or dropped.
    pub fn subscribe(
        self: &Arc<Self>,
        stream_id: &str,
        generation: u64,
        listener: Arc<dyn StreamListener>,
    ) -> Unsubscribe {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));

        self.streams
            .write()
            .entry(stream_id.to_string())
            .or_default()
            .insert(
                id,
                Registered {
                    generation,
                    listener,
                },
            );

        let registry: Weak<Self> = Arc::downgrade(self);
        let stream_id = stream_id.to_string();
        Unsubscribe::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.unsubscribe(&stream_id, id);
            }
        })
    }

    /// Remove one listener. Returns false if it was already gone.
    pub fn unsubscribe(&self, stream_id: &str, id: SubscriptionId) -> bool {
        let mut streams = self.streams.write();
        let Some(listeners) = streams.get_mut(stream_id) else {
            return false;
        };
        let removed = listeners.remove(&id).is_some();
        if listeners.is_empty() {
            streams.remove(stream_id);
        }
        removed
    }

    /// Deliver `event` to every current listener of `stream_id` at `generation`.
    ///
    /// Listeners are called outside the lock, so they may subscribe or
    /// unsubscribe while being notified. Returns the number of listeners that
    /// accepted the event.
    pub fn publish(&self, stream_id: &str, generation: u64, event: &StreamEvent) -> usize {
        let listeners = self.snapshot(stream_id, generation);
        let mut delivered = 0;

        for (id, listener) in listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(stream_id, subscription = id.0, cursor = event.cursor.0, error = %e, "listener rejected event");
                }
                Err(_) => {
                    warn!(stream_id, subscription = id.0, cursor = event.cursor.0, "listener panicked on event");
                }
            }
        }

        delivered
    }

    /// Detach every listener of `stream_id` at `generation` and notify each
    /// one exactly once. Listeners of other generations stay registered.
    ///
    /// Returns the number of listeners notified.
    pub fn complete(&self, stream_id: &str, generation: u64) -> usize {
        let detached: Vec<(SubscriptionId, Arc<dyn StreamListener>)> = {
            let mut streams = self.streams.write();
            let Some(listeners) = streams.get_mut(stream_id) else {
                return 0;
            };
            let ids: Vec<SubscriptionId> = listeners
                .iter()
                .filter(|(_, r)| r.generation == generation)
                .map(|(id, _)| *id)
                .collect();
            let detached = ids
                .into_iter()
                .filter_map(|id| listeners.remove(&id).map(|r| (id, r.listener)))
                .collect();
            if listeners.is_empty() {
                streams.remove(stream_id);
            }
            detached
        };

        let count = detached.len();
        for (id, listener) in detached {
            if panic::catch_unwind(AssertUnwindSafe(|| listener.on_complete())).is_err() {
                warn!(stream_id, subscription = id.0, "listener panicked on completion");
            }
        }

        debug!(stream_id, generation, listeners = count, "stream listeners completed");
        count
    }

    /// Number of listeners for one stream, across generations.
    pub fn subscriber_count(&self, stream_id: &str) -> usize {
        self.streams.read().get(stream_id).map_or(0, HashMap::len)
    }

    /// Number of listeners across all streams.
    pub fn total_subscribers(&self) -> usize {
        self.streams.read().values().map(HashMap::len).sum()
    }

    fn snapshot(
        &self,
        stream_id: &str,
        generation: u64,
    ) -> Vec<(SubscriptionId, Arc<dyn StreamListener>)> {
        self.streams
            .read()
            .get(stream_id)
            .map(|listeners| {
                listeners
                    .iter()
                    .filter(|(_, r)| r.generation == generation)
                    .map(|(id, r)| (*id, Arc::clone(&r.listener)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for BroadcastRegistry {
    fn default() -> Self {
        Self::new()
    }
}
