//! In-memory adapter with bounded capacity.

use crate::broadcast::{BroadcastRegistry, StreamListener, Unsubscribe};
use crate::config::{BrokerConfig, CapacityPolicy, CreationPolicy};
use crate::error::{BrokerError, Result};
use crate::types::{
    AdapterStats, Cursor, StreamEntry, StreamEvent, StreamMetadata, Timestamp,
};
use lru::LruCache;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::StreamAdapter;

/// Mutable state of one buffered stream.
struct EntryState {
    /// Distinguishes this entry from earlier ones under the same id.
    generation: u64,
    metadata: StreamMetadata,
    created_at: Timestamp,
    updated_at: Timestamp,
    completed: bool,
    events: Vec<StreamEvent>,
}

impl EntryState {
    fn new(generation: u64, metadata: StreamMetadata) -> Self {
        let now = Timestamp::now();
        Self {
            generation,
            metadata,
            created_at: now,
            updated_at: now,
            completed: false,
            events: Vec::new(),
        }
    }

    fn snapshot(&self, stream_id: &str) -> StreamEntry {
        StreamEntry {
            stream_id: stream_id.to_string(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed: self.completed,
            events: self.events.clone(),
        }
    }
}

type SharedEntry = Arc<Mutex<EntryState>>;

/// Reference adapter keeping every stream in process memory.
///
/// Entries live in an LRU list ordered by recency of *update*: appends,
/// creation and completion promote an entry, reads never do. When
/// `max_streams` is reached the least recently updated entry is evicted in
/// O(1), or the new stream is refused under `CapacityPolicy::Reject`.
///
/// The map lock is held only to look entries up; each entry has its own lock
/// so work on different streams does not serialize.
///
/// An entry leaving the map (removal, eviction or expiry) is marked completed
/// under its own lock before its listeners are notified, so a subscriber that
/// races the removal is either notified or sees the completed flag.
pub struct MemoryAdapter {
    entries: Mutex<LruCache<String, SharedEntry>>,
    registry: Arc<BroadcastRegistry>,
    next_generation: AtomicU64,
    max_streams: usize,
    capacity_policy: CapacityPolicy,
    creation_policy: CreationPolicy,
}

impl MemoryAdapter {
    /// Create an adapter from broker configuration.
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            registry: Arc::new(BroadcastRegistry::new()),
            next_generation: AtomicU64::new(1),
            max_streams: config.effective_max_streams(),
            capacity_policy: config.capacity_policy,
            creation_policy: config.creation_policy,
        }
    }

    /// Adapter with default policies and the given capacity.
    pub fn with_capacity(max_streams: usize) -> Self {
        Self::new(&BrokerConfig::default().with_max_streams(max_streams))
    }

    /// The registry backing `subscribe`/`publish`.
    pub fn registry(&self) -> &Arc<BroadcastRegistry> {
        &self.registry
    }

    /// Number of buffered streams.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Ids ordered from most to least recently updated.
    pub fn stream_ids(&self) -> Vec<String> {
        self.entries.lock().iter().map(|(id, _)| id.clone()).collect()
    }

    /// Counts across all buffered streams.
    pub fn stats(&self) -> AdapterStats {
        let entries: Vec<SharedEntry> = self
            .entries
            .lock()
            .iter()
            .map(|(_, e)| Arc::clone(e))
            .collect();

        let mut stats = AdapterStats {
            streams: entries.len(),
            subscribers: self.registry.total_subscribers(),
            ..Default::default()
        };
        for entry in entries {
            let state = entry.lock();
            stats.events += state.events.len();
            if state.completed {
                stats.completed += 1;
            }
        }
        stats
    }

    /// Insert a fresh entry, making room first if needed.
    ///
    /// Returns the new entry and the evicted stream, if any. The caller must
    /// retire the evicted stream after releasing the map lock.
    fn insert_entry(
        &self,
        entries: &mut LruCache<String, SharedEntry>,
        stream_id: &str,
        metadata: StreamMetadata,
    ) -> Result<(SharedEntry, Option<(String, SharedEntry)>)> {
        let mut evicted = None;
        if entries.len() >= self.max_streams {
            match self.capacity_policy {
                CapacityPolicy::Reject => {
                    return Err(BrokerError::CapacityExceeded {
                        max_streams: self.max_streams,
                    });
                }
                CapacityPolicy::EvictLeastRecent => {
                    if let Some((id, entry)) = entries.pop_lru() {
                        debug!(stream_id = %id, "evicted least recently updated stream");
                        evicted = Some((id, entry));
                    }
                }
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(Mutex::new(EntryState::new(generation, metadata)));
        entries.put(stream_id.to_string(), Arc::clone(&entry));
        debug!(stream_id, "stream created");
        Ok((entry, evicted))
    }

    fn notify_evicted(&self, evicted: Option<(String, SharedEntry)>) {
        if let Some((id, entry)) = evicted {
            self.retire(&id, &entry);
        }
    }

    /// Complete an entry that has left the map and notify its listeners.
    fn retire(&self, stream_id: &str, entry: &SharedEntry) {
        let generation = {
            let mut state = entry.lock();
            state.completed = true;
            state.generation
        };
        self.registry.complete(stream_id, generation);
    }

    fn peek_entry(&self, stream_id: &str) -> Option<SharedEntry> {
        self.entries.lock().peek(stream_id).map(Arc::clone)
    }

    /// Look an entry up for writing, creating it lazily if configured to.
    ///
    /// `Ok(None)` means the stream is unknown and stays unknown.
    fn entry_for_write(&self, stream_id: &str) -> Result<Option<SharedEntry>> {
        let (entry, evicted) = {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get(stream_id) {
                return Ok(Some(Arc::clone(entry)));
            }
            match self.creation_policy {
                CreationPolicy::Lazy => {
                    self.insert_entry(&mut entries, stream_id, StreamMetadata::default())?
                }
                CreationPolicy::Explicit => {
                    if self.capacity_policy == CapacityPolicy::Reject
                        && entries.len() >= self.max_streams
                    {
                        return Err(BrokerError::CapacityExceeded {
                            max_streams: self.max_streams,
                        });
                    }
                    return Ok(None);
                }
            }
        };
        self.notify_evicted(evicted);
        Ok(Some(entry))
    }
}

impl StreamAdapter for MemoryAdapter {
    fn creation_policy(&self) -> CreationPolicy {
        self.creation_policy
    }

    fn exists(&self, stream_id: &str) -> Result<bool> {
        Ok(self.entries.lock().contains(stream_id))
    }

    fn create(&self, stream_id: &str, metadata: StreamMetadata) -> Result<()> {
        let evicted = {
            let mut entries = self.entries.lock();
            if entries.contains(stream_id) {
                debug!(stream_id, "create ignored, stream already exists");
                return Ok(());
            }
            self.insert_entry(&mut entries, stream_id, metadata)?.1
        };
        self.notify_evicted(evicted);
        Ok(())
    }

    fn append(&self, stream_id: &str, payload: serde_json::Value) -> Result<Option<StreamEvent>> {
        let Some(entry) = self.entry_for_write(stream_id)? else {
            debug!(stream_id, "append to unknown stream dropped");
            return Ok(None);
        };

        let mut state = entry.lock();
        if state.completed {
            return Err(BrokerError::StreamCompleted(stream_id.to_string()));
        }

        let event = StreamEvent::new(Cursor(state.events.len() as u64), payload);
        state.events.push(event.clone());
        state.updated_at = Timestamp::now();
        Ok(Some(event))
    }

    fn mark_completed(&self, stream_id: &str) -> Result<()> {
        let Some(entry) = self.entries.lock().get(stream_id).map(Arc::clone) else {
            return Ok(());
        };

        let newly_completed = {
            let mut state = entry.lock();
            let was_completed = state.completed;
            state.completed = true;
            state.updated_at = Timestamp::now();
            (!was_completed).then_some(state.generation)
        };

        if let Some(generation) = newly_completed {
            debug!(stream_id, "stream marked completed");
            self.registry.complete(stream_id, generation);
        }
        Ok(())
    }

    fn is_completed(&self, stream_id: &str) -> Result<bool> {
        Ok(self
            .peek_entry(stream_id)
            .map_or(false, |entry| {
                let state = entry.lock();
                state.completed
            }))
    }

    fn get_events(&self, stream_id: &str) -> Result<Option<Vec<StreamEvent>>> {
        Ok(self
            .peek_entry(stream_id)
            .map(|entry| {
                let state = entry.lock();
                state.events.clone()
            }))
    }

    fn get_stream(&self, stream_id: &str) -> Result<Option<StreamEntry>> {
        Ok(self
            .peek_entry(stream_id)
            .map(|entry| {
                let state = entry.lock();
                state.snapshot(stream_id)
            }))
    }

    fn subscribe(
        &self,
        stream_id: &str,
        listener: Arc<dyn StreamListener>,
    ) -> Result<Unsubscribe> {
        let entry = match self.peek_entry(stream_id) {
            Some(entry) => entry,
            None => match self.creation_policy {
                CreationPolicy::Explicit => return Ok(Unsubscribe::noop()),
                CreationPolicy::Lazy => {
                    let (entry, evicted) = {
                        let mut entries = self.entries.lock();
                        match entries.peek(stream_id) {
                            Some(entry) => (Arc::clone(entry), None),
                            None => self.insert_entry(
                                &mut entries,
                                stream_id,
                                StreamMetadata::default(),
                            )?,
                        }
                    };
                    self.notify_evicted(evicted);
                    entry
                }
            },
        };

        // Registration happens under the entry lock so it cannot interleave
        // with the completed flag flipping in `mark_completed` or `retire`.
        let state = entry.lock();
        if state.completed {
            drop(state);
            listener.on_complete();
            return Ok(Unsubscribe::noop());
        }
        let handle = self
            .registry
            .subscribe(stream_id, state.generation, listener);
        drop(state);
        Ok(handle)
    }

    fn publish(&self, stream_id: &str, event: &StreamEvent) {
        if let Some(entry) = self.peek_entry(stream_id) {
            let generation = entry.lock().generation;
            self.registry.publish(stream_id, generation, event);
        }
    }

    fn remove(&self, stream_id: &str) -> Result<()> {
        let Some(entry) = self.entries.lock().pop(stream_id) else {
            return Ok(());
        };
        self.retire(stream_id, &entry);
        debug!(stream_id, "stream removed");
        Ok(())
    }

    fn cleanup(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Timestamp::now().minus(max_age);

        let expired: Vec<(String, SharedEntry)> = {
            let mut entries = self.entries.lock();
            let stale: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.lock().updated_at < cutoff)
                .map(|(id, _)| id.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|id| entries.pop(&id).map(|entry| (id, entry)))
                .collect()
        };

        for (id, entry) in &expired {
            self.retire(id, entry);
        }

        if !expired.is_empty() {
            info!(removed = expired.len(), "swept expired streams");
        }
        Ok(expired.len())
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new(&BrokerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::FnListener;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn counting_listener() -> (Arc<FnListener>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let events = Arc::new(AtomicUsize::new(0));
        let completions = Arc::new(AtomicUsize::new(0));
        let events_in = Arc::clone(&events);
        let completions_in = Arc::clone(&completions);
        let listener = FnListener::new(
            move |_| {
                events_in.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            move || {
                completions_in.fetch_add(1, Ordering::SeqCst);
            },
        );
        (Arc::new(listener), events, completions)
    }

    #[test]
    fn test_create_and_append() {
        let adapter = MemoryAdapter::default();
        adapter
            .create("s1", StreamMetadata::new("model", "provider"))
            .unwrap();
        assert!(adapter.exists("s1").unwrap());

        let first = adapter.append("s1", json!("Hello")).unwrap().unwrap();
        let second = adapter.append("s1", json!(" world")).unwrap().unwrap();
        assert_eq!(first.cursor, Cursor(0));
        assert_eq!(second.cursor, Cursor(1));

        let events = adapter.get_events("s1").unwrap().unwrap();
        let payloads: Vec<_> = events.iter().map(|e| e.payload.clone()).collect();
        assert_eq!(payloads, vec![json!("Hello"), json!(" world")]);
    }

    #[test]
    fn test_create_existing_is_noop() {
        let adapter = MemoryAdapter::default();
        adapter.create("s1", StreamMetadata::new("a", "x")).unwrap();
        adapter.append("s1", json!(1)).unwrap();

        adapter.create("s1", StreamMetadata::new("b", "y")).unwrap();

        let entry = adapter.get_stream("s1").unwrap().unwrap();
        assert_eq!(entry.metadata.model_id.as_deref(), Some("a"));
        assert_eq!(entry.len(), 1);
    }

    #[test]
    fn test_get_events_returns_copy() {
        let adapter = MemoryAdapter::default();
        adapter.create("s1", StreamMetadata::default()).unwrap();
        adapter.append("s1", json!("a")).unwrap();

        let mut events = adapter.get_events("s1").unwrap().unwrap();
        events.push(StreamEvent::new(Cursor(99), json!("injected")));
        events[0].payload = json!("mutated");

        let stored = adapter.get_events("s1").unwrap().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].payload, json!("a"));
    }

    #[test]
    fn test_explicit_append_to_unknown_is_noop() {
        let adapter = MemoryAdapter::default();
        assert!(adapter.append("missing", json!(1)).unwrap().is_none());
        assert!(!adapter.exists("missing").unwrap());
        assert!(adapter.get_events("missing").unwrap().is_none());
    }

    #[test]
    fn test_lazy_append_creates_stream() {
        let config = BrokerConfig::default().with_creation_policy(CreationPolicy::Lazy);
        let adapter = MemoryAdapter::new(&config);

        let event = adapter.append("lazy", json!("x")).unwrap().unwrap();
        assert_eq!(event.cursor, Cursor(0));
        assert!(adapter.exists("lazy").unwrap());
    }

    #[test]
    fn test_lazy_subscribe_creates_stream() {
        let config = BrokerConfig::default().with_creation_policy(CreationPolicy::Lazy);
        let adapter = MemoryAdapter::new(&config);
        let (listener, events, _) = counting_listener();

        let _sub = adapter.subscribe("lazy", listener).unwrap();
        assert!(adapter.exists("lazy").unwrap());

        let event = adapter.append("lazy", json!(1)).unwrap().unwrap();
        adapter.publish("lazy", &event);
        assert_eq!(events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_explicit_subscribe_to_unknown_is_noop() {
        let adapter = MemoryAdapter::default();
        let (listener, _, _) = counting_listener();
        let handle = adapter.subscribe("missing", listener).unwrap();
        assert!(handle.is_noop());
        assert_eq!(adapter.registry().total_subscribers(), 0);
    }

    #[test]
    fn test_evicts_least_recently_updated() {
        let adapter = MemoryAdapter::with_capacity(3);
        for id in ["a", "b", "c"] {
            adapter.create(id, StreamMetadata::default()).unwrap();
        }
        // Updating "a" makes "b" the least recently updated.
        adapter.append("a", json!(1)).unwrap();
        // Reads must not change eviction order.
        adapter.get_events("b").unwrap();

        adapter.create("d", StreamMetadata::default()).unwrap();

        assert_eq!(adapter.len(), 3);
        assert!(!adapter.exists("b").unwrap());
        assert_eq!(adapter.stream_ids(), vec!["d", "a", "c"]);
    }

    #[test]
    fn test_eviction_completes_listeners() {
        let adapter = MemoryAdapter::with_capacity(1);
        adapter.create("old", StreamMetadata::default()).unwrap();
        let (listener, _, completions) = counting_listener();
        let _sub = adapter.subscribe("old", listener).unwrap();

        adapter.create("new", StreamMetadata::default()).unwrap();

        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert!(!adapter.exists("old").unwrap());
    }

    #[test]
    fn test_recreated_id_keeps_its_own_listeners() {
        let adapter = MemoryAdapter::with_capacity(1);
        adapter.create("s1", StreamMetadata::default()).unwrap();
        let (old, _, old_completions) = counting_listener();
        let _old = adapter.subscribe("s1", old).unwrap();

        // Evict "s1", then bring the id back as a fresh stream.
        adapter.create("s2", StreamMetadata::default()).unwrap();
        adapter.create("s1", StreamMetadata::default()).unwrap();
        let (new, new_events, new_completions) = counting_listener();
        let _new = adapter.subscribe("s1", new).unwrap();

        let event = adapter.append("s1", json!("fresh")).unwrap().unwrap();
        adapter.publish("s1", &event);

        assert_eq!(old_completions.load(Ordering::SeqCst), 1);
        assert_eq!(new_completions.load(Ordering::SeqCst), 0);
        assert_eq!(new_events.load(Ordering::SeqCst), 1);

        adapter.remove("s1").unwrap();
        assert_eq!(new_completions.load(Ordering::SeqCst), 1);
        assert_eq!(old_completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_racing_remove_is_never_orphaned() {
        for _ in 0..200 {
            let adapter = Arc::new(MemoryAdapter::default());
            adapter.create("s1", StreamMetadata::default()).unwrap();
            let (listener, _, completions) = counting_listener();

            let subscriber = {
                let adapter = Arc::clone(&adapter);
                thread::spawn(move || adapter.subscribe("s1", listener).unwrap())
            };
            adapter.remove("s1").unwrap();
            let handle = subscriber.join().unwrap();

            // A listener that got registered was completed by the removal.
            assert_eq!(adapter.registry().total_subscribers(), 0);
            if !handle.is_noop() {
                assert_eq!(completions.load(Ordering::SeqCst), 1);
            }
            assert!(completions.load(Ordering::SeqCst) <= 1);
        }
    }

    #[test]
    fn test_reject_policy_refuses_new_streams() {
        let config = BrokerConfig::default()
            .with_max_streams(2)
            .with_capacity_policy(CapacityPolicy::Reject);
        let adapter = MemoryAdapter::new(&config);
        adapter.create("a", StreamMetadata::default()).unwrap();
        adapter.create("b", StreamMetadata::default()).unwrap();

        let err = adapter.create("c", StreamMetadata::default()).unwrap_err();
        assert_eq!(err, BrokerError::CapacityExceeded { max_streams: 2 });

        let err = adapter.append("c", json!(1)).unwrap_err();
        assert!(err.is_capacity());

        // Existing streams keep working at capacity.
        assert!(adapter.append("a", json!(1)).unwrap().is_some());
        assert_eq!(adapter.len(), 2);
    }

    #[test]
    fn test_mark_completed_is_idempotent() {
        let adapter = MemoryAdapter::default();
        adapter.create("s1", StreamMetadata::default()).unwrap();
        let (listener, _, completions) = counting_listener();
        let _sub = adapter.subscribe("s1", listener).unwrap();

        adapter.mark_completed("s1").unwrap();
        adapter.mark_completed("s1").unwrap();

        assert!(adapter.is_completed("s1").unwrap());
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert!(matches!(
            adapter.append("s1", json!(1)),
            Err(BrokerError::StreamCompleted(_))
        ));
    }

    #[test]
    fn test_subscribe_after_completion_completes_immediately() {
        let adapter = MemoryAdapter::default();
        adapter.create("s1", StreamMetadata::default()).unwrap();
        adapter.mark_completed("s1").unwrap();

        let (listener, _, completions) = counting_listener();
        let handle = adapter.subscribe("s1", listener).unwrap();

        assert!(handle.is_noop());
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let adapter = MemoryAdapter::default();
        adapter.create("s1", StreamMetadata::default()).unwrap();
        let (listener, _, completions) = counting_listener();
        let _sub = adapter.subscribe("s1", listener).unwrap();

        adapter.remove("s1").unwrap();
        adapter.remove("s1").unwrap();

        assert!(!adapter.exists("s1").unwrap());
        assert!(!adapter.is_completed("s1").unwrap());
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cleanup_removes_stale_streams() {
        let adapter = MemoryAdapter::default();
        adapter.create("s1", StreamMetadata::default()).unwrap();
        adapter.append("s1", json!("x")).unwrap();

        thread::sleep(Duration::from_millis(150));
        adapter.create("fresh", StreamMetadata::default()).unwrap();

        let removed = adapter.cleanup(Duration::from_millis(100)).unwrap();
        assert_eq!(removed, 1);
        assert!(!adapter.exists("s1").unwrap());
        assert!(adapter.exists("fresh").unwrap());
    }

    #[test]
    fn test_stats() {
        let adapter = MemoryAdapter::default();
        adapter.create("a", StreamMetadata::default()).unwrap();
        adapter.create("b", StreamMetadata::default()).unwrap();
        adapter.append("a", json!(1)).unwrap();
        adapter.append("a", json!(2)).unwrap();
        adapter.append("b", json!(3)).unwrap();
        adapter.mark_completed("b").unwrap();
        let (listener, _, _) = counting_listener();
        let _sub = adapter.subscribe("a", listener).unwrap();

        let stats = adapter.stats();
        assert_eq!(
            stats,
            AdapterStats {
                streams: 2,
                completed: 1,
                events: 3,
                subscribers: 1,
            }
        );
    }
}
