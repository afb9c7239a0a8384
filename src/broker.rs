//! Main broker struct tying all components together.

use crate::adapter::{MemoryAdapter, StreamAdapter};
use crate::config::BrokerConfig;
use crate::error::Result;
use crate::lifecycle::{GenerationContext, GenerationHooks, StreamLifecycle};
use crate::replay::{CancellationSignal, ReplayEngine, ReplayOutcome, StreamSink, WireFormat};
use crate::types::{StreamEntry, StreamMetadata};
use std::sync::Arc;

/// The resumable stream broker.
///
/// Provides a unified interface for:
/// - Starting a buffered generation and feeding it events
/// - Finalizing it on end, error or abort
/// - Reconnecting consumers through replay
pub struct StreamBroker {
    config: BrokerConfig,
    adapter: Arc<dyn StreamAdapter>,
    lifecycle: StreamLifecycle,
    replay: ReplayEngine,
}

impl StreamBroker {
    /// Broker backed by an in-memory adapter.
    pub fn new(config: BrokerConfig) -> Self {
        let adapter: Arc<dyn StreamAdapter> = Arc::new(MemoryAdapter::new(&config));
        Self::with_adapter(config, adapter)
    }

    /// Broker backed by a custom adapter.
    ///
    /// The adapter enforces its own capacity and creation policies; `config`
    /// supplies the lifecycle settings.
    pub fn with_adapter(config: BrokerConfig, adapter: Arc<dyn StreamAdapter>) -> Self {
        let lifecycle = StreamLifecycle::new(Arc::clone(&adapter), &config);
        let replay = ReplayEngine::new(Arc::clone(&adapter));
        Self {
            config,
            adapter,
            lifecycle,
            replay,
        }
    }

    /// Replace the wire format used by `resume`.
    pub fn with_format(mut self, format: Arc<dyn WireFormat>) -> Self {
        self.replay = ReplayEngine::with_format(Arc::clone(&self.adapter), format);
        self
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn adapter(&self) -> &Arc<dyn StreamAdapter> {
        &self.adapter
    }

    /// Producer-side hooks.
    pub fn lifecycle(&self) -> &StreamLifecycle {
        &self.lifecycle
    }

    pub fn replay_engine(&self) -> &ReplayEngine {
        &self.replay
    }

    // --- Producer Operations ---

    /// Start a buffered generation: runs the start and request hooks.
    pub fn begin(&self, stream_id: &str, metadata: StreamMetadata) -> Result<GenerationContext> {
        let mut ctx = GenerationContext::new(stream_id).with_metadata(metadata);
        self.lifecycle.on_start(&mut ctx);
        self.lifecycle.on_request(&ctx)?;
        Ok(ctx)
    }

    /// Queue one event for the generation. Never blocks.
    pub fn push(&self, ctx: &GenerationContext, event: serde_json::Value) {
        self.lifecycle.on_stream_event(event, ctx);
    }

    /// Finish the generation normally.
    pub fn finish(&self, ctx: &GenerationContext) -> Result<()> {
        self.lifecycle.on_stream_end(ctx)
    }

    // --- Consumer Operations ---

    /// Replay `stream_id` into `sink` and follow it live. Blocks.
    pub fn resume(
        &self,
        stream_id: &str,
        sink: &mut dyn StreamSink,
        cancel: &CancellationSignal,
    ) -> ReplayOutcome {
        self.replay.resume(stream_id, sink, cancel)
    }

    /// Snapshot of a buffered stream.
    pub fn stream(&self, stream_id: &str) -> Result<Option<StreamEntry>> {
        self.adapter.get_stream(stream_id)
    }
}

impl Default for StreamBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}
