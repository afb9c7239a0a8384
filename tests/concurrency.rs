//! Concurrent writers and readers, including a slow storage backend.

use proptest::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use stream_broker::{
    BrokerConfig, CancellationSignal, CollectingSink, GenerationContext, GenerationHooks,
    MemoryAdapter, ReplayOutcome, StreamAdapter, StreamBroker, StreamEntry, StreamEvent,
    StreamListener, StreamMetadata, Unsubscribe, WriteSerializer,
};

/// Adapter whose appends take a variable amount of time.
struct SlowAppends {
    inner: MemoryAdapter,
    calls: AtomicU64,
}

impl SlowAppends {
    fn new() -> Self {
        Self {
            inner: MemoryAdapter::default(),
            calls: AtomicU64::new(0),
        }
    }
}

impl StreamAdapter for SlowAppends {
    fn exists(&self, stream_id: &str) -> stream_broker::Result<bool> {
        self.inner.exists(stream_id)
    }

    fn create(&self, stream_id: &str, metadata: StreamMetadata) -> stream_broker::Result<()> {
        self.inner.create(stream_id, metadata)
    }

    fn append(
        &self,
        stream_id: &str,
        payload: serde_json::Value,
    ) -> stream_broker::Result<Option<StreamEvent>> {
        // Later calls are sometimes faster than earlier ones.
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis((7 * n) % 5));
        self.inner.append(stream_id, payload)
    }

    fn mark_completed(&self, stream_id: &str) -> stream_broker::Result<()> {
        self.inner.mark_completed(stream_id)
    }

    fn is_completed(&self, stream_id: &str) -> stream_broker::Result<bool> {
        self.inner.is_completed(stream_id)
    }

    fn get_events(&self, stream_id: &str) -> stream_broker::Result<Option<Vec<StreamEvent>>> {
        self.inner.get_events(stream_id)
    }

    fn get_stream(&self, stream_id: &str) -> stream_broker::Result<Option<StreamEntry>> {
        self.inner.get_stream(stream_id)
    }

    fn subscribe(
        &self,
        stream_id: &str,
        listener: Arc<dyn StreamListener>,
    ) -> stream_broker::Result<Unsubscribe> {
        self.inner.subscribe(stream_id, listener)
    }

    fn publish(&self, stream_id: &str, event: &StreamEvent) {
        self.inner.publish(stream_id, event)
    }

    fn remove(&self, stream_id: &str) -> stream_broker::Result<()> {
        self.inner.remove(stream_id)
    }

    fn cleanup(&self, max_age: Duration) -> stream_broker::Result<usize> {
        self.inner.cleanup(max_age)
    }
}

#[test]
fn test_many_readers_see_every_event_once() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let adapter: Arc<dyn StreamAdapter> = Arc::new(SlowAppends::new());
    let broker = Arc::new(StreamBroker::with_adapter(BrokerConfig::default(), adapter));
    let ctx = broker.begin("s1", StreamMetadata::new("m", "p")).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|i| {
            let broker = Arc::clone(&broker);
            thread::spawn(move || {
                // Stagger attach times across the producer's run.
                thread::sleep(Duration::from_millis(i * 15));
                let mut sink = CollectingSink::new();
                let outcome = broker.resume("s1", &mut sink, &CancellationSignal::new());
                (outcome, sink)
            })
        })
        .collect();

    for i in 0..40 {
        broker.push(&ctx, json!(i));
        if i % 10 == 0 {
            thread::sleep(Duration::from_millis(5));
        }
    }
    broker.finish(&ctx).unwrap();

    for reader in readers {
        let (outcome, sink) = reader.join().unwrap();
        assert_eq!(outcome, ReplayOutcome::Completed { delivered: 40 });
        assert_eq!(sink.cursors(), (0..40).collect::<Vec<_>>());
        assert_eq!(sink.data().last().map(String::as_str), Some("[DONE]"));
        assert_eq!(sink.end_calls(), 1);
    }
}

#[test]
fn test_parallel_streams_keep_their_own_order() {
    let adapter = Arc::new(MemoryAdapter::default());
    let writer = Arc::new(WriteSerializer::new(adapter.clone()));
    let ids: Vec<String> = (0..8).map(|i| format!("stream-{i}")).collect();
    for id in &ids {
        adapter.create(id, StreamMetadata::default()).unwrap();
    }

    let producers: Vec<_> = ids
        .iter()
        .cloned()
        .map(|id| {
            let writer = Arc::clone(&writer);
            thread::spawn(move || {
                for n in 0..50 {
                    writer.enqueue(&id, json!(n)).unwrap();
                }
                writer.wait_for_drain(&id).unwrap();
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    for id in &ids {
        let events = adapter.get_events(id).unwrap().unwrap();
        let payloads: Vec<_> = events.iter().map(|e| e.payload.as_u64().unwrap()).collect();
        assert_eq!(payloads, (0..50).collect::<Vec<_>>());
    }
}

#[test]
fn test_lifecycle_drains_slow_writes_before_completion() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let config = BrokerConfig::default();
    let slow = Arc::new(SlowAppends::new());
    let broker = StreamBroker::with_adapter(config, slow.clone());

    let mut ctx = GenerationContext::new("s1");
    broker.lifecycle().on_start(&mut ctx);
    broker.lifecycle().on_request(&ctx).unwrap();
    for i in 0..20 {
        broker.lifecycle().on_stream_event(json!(i), &ctx);
    }
    broker.lifecycle().on_stream_end(&ctx).unwrap();

    let entry = slow.get_stream("s1").unwrap().unwrap();
    assert!(entry.completed);
    assert_eq!(entry.len(), 20);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_appends_are_gap_free_and_ordered(payloads in prop::collection::vec(any::<i64>(), 0..64)) {
        let adapter = Arc::new(MemoryAdapter::default());
        adapter.create("p", StreamMetadata::default()).unwrap();
        let writer = WriteSerializer::new(adapter.clone());

        for p in &payloads {
            writer.enqueue("p", json!(p)).unwrap();
        }
        writer.wait_for_drain("p").unwrap();

        let events = adapter.get_events("p").unwrap().unwrap();
        prop_assert_eq!(events.len(), payloads.len());
        for (i, (event, payload)) in events.iter().zip(&payloads).enumerate() {
            prop_assert_eq!(event.cursor.0, i as u64);
            prop_assert_eq!(&event.payload, &json!(payload));
        }
    }

    #[test]
    fn prop_replay_delivers_each_cursor_once(
        buffered in 0usize..20,
        live in 0usize..20,
    ) {
        let adapter = Arc::new(MemoryAdapter::default());
        let broker = Arc::new(StreamBroker::with_adapter(BrokerConfig::default(), adapter.clone()));
        let ctx = broker.begin("p", StreamMetadata::default()).unwrap();
        for i in 0..buffered {
            broker.push(&ctx, json!(i));
        }

        let reader = {
            let broker = Arc::clone(&broker);
            thread::spawn(move || {
                let mut sink = CollectingSink::new();
                broker.resume("p", &mut sink, &CancellationSignal::new());
                sink
            })
        };

        for i in 0..live {
            broker.push(&ctx, json!(buffered + i));
        }
        broker.finish(&ctx).unwrap();

        let sink = reader.join().unwrap();
        let expected: Vec<u64> = (0..(buffered + live) as u64).collect();
        prop_assert_eq!(sink.cursors(), expected);
        prop_assert_eq!(sink.end_calls(), 1);
    }
}
