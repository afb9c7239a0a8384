//! # Stream Broker
//!
//! Buffers in-flight event streams (for example a model generation) under a
//! stream id, fans new events out to live subscribers, and lets a client that
//! reconnects mid-stream replay everything it missed before joining the live
//! tail, without gaps or duplicates.
//!
//! ## Core Concepts
//!
//! - **Adapters**: Pluggable storage for buffered streams, with an in-memory
//!   reference implementation bounded by capacity and age
//! - **Broadcast**: Per-stream live listeners isolated from each other
//! - **Writer**: Per-stream ordering; every event is stored before it is published
//! - **Replay**: Snapshot plus live tail, deduplicated by cursor, cancellable
//! - **Lifecycle**: Producer hooks that create, ingest and finalize streams
//!
//! ## Example
//!
//! ```ignore
//! use stream_broker::{BrokerConfig, CancellationSignal, CollectingSink, StreamBroker, StreamMetadata};
//!
//! let broker = StreamBroker::new(BrokerConfig::default());
//!
//! // Producer side
//! let ctx = broker.begin("chat-42", StreamMetadata::new("gpt-4o", "openai"))?;
//! broker.push(&ctx, json!({"delta": "Hello"}));
//! broker.finish(&ctx)?;
//!
//! // A client reconnects
//! let mut sink = CollectingSink::new();
//! broker.resume("chat-42", &mut sink, &CancellationSignal::new());
//! ```

pub mod adapter;
pub mod broadcast;
pub mod broker;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod replay;
pub mod types;
pub mod writer;

// Re-exports
pub use adapter::{MemoryAdapter, StreamAdapter};
pub use broadcast::{BroadcastRegistry, FnListener, StreamListener, SubscriptionId, Unsubscribe};
pub use broker::StreamBroker;
pub use config::{BrokerConfig, CapacityPolicy, CreationPolicy, FinalizePolicy};
pub use error::{BrokerError, Result};
pub use lifecycle::{GenerationContext, GenerationHooks, StreamLifecycle};
pub use replay::{
    CancellationSignal, CollectingSink, ReplayEngine, ReplayOutcome, SseFormat, StreamSink,
    WireFormat,
};
pub use types::*;
pub use writer::WriteSerializer;
