//! Producer-side lifecycle: create, ingest, finalize.
//!
//! A generation pipeline drives a stream through `GenerationHooks`. Events
//! are queued on the write serializer without blocking the producer. All
//! three terminal paths (end, error, abort) drain pending writes before
//! finalizing, then release writer bookkeeping and opportunistically sweep
//! expired streams.

use crate::adapter::StreamAdapter;
use crate::config::{BrokerConfig, FinalizePolicy};
use crate::error::Result;
use crate::types::StreamMetadata;
use crate::writer::WriteSerializer;
use parking_lot::Mutex;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Per-generation state shared between the pipeline and the hooks.
#[derive(Clone, Default)]
pub struct GenerationContext {
    /// Resumable stream id; generations without one are not buffered.
    pub stream_id: Option<String>,
    /// Tags recorded when the stream is created.
    pub metadata: StreamMetadata,
    /// Whether the request produces a stream of events.
    pub streaming: bool,
    /// Adapter injected on start, for downstream collaborators.
    pub adapter: Option<Arc<dyn StreamAdapter>>,
}

impl GenerationContext {
    /// Context for a streaming generation buffered under `stream_id`.
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: Some(stream_id.into()),
            streaming: true,
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, metadata: StreamMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }
}

impl fmt::Debug for GenerationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationContext")
            .field("stream_id", &self.stream_id)
            .field("metadata", &self.metadata)
            .field("streaming", &self.streaming)
            .field("has_adapter", &self.adapter.is_some())
            .finish()
    }
}

/// Callbacks a generation pipeline invokes over one generation.
pub trait GenerationHooks: Send + Sync {
    fn on_start(&self, ctx: &mut GenerationContext);

    fn on_request(&self, ctx: &GenerationContext) -> Result<()>;

    /// Observe an event; the event is returned unchanged.
    fn on_stream_event(&self, event: serde_json::Value, ctx: &GenerationContext)
        -> serde_json::Value;

    fn on_stream_end(&self, ctx: &GenerationContext) -> Result<()>;

    fn on_error(&self, error: &dyn StdError, ctx: &GenerationContext) -> Result<()>;

    fn on_abort(&self, reason: &dyn StdError, ctx: &GenerationContext) -> Result<()>;
}

/// Drives buffered streams from the producer side.
pub struct StreamLifecycle {
    adapter: Arc<dyn StreamAdapter>,
    writer: WriteSerializer,
    finalize_policy: FinalizePolicy,
    max_age: Duration,
    cleanup_interval: Duration,
    /// When cleanup last ran; `None` until the first finalization.
    last_cleanup: Mutex<Option<Instant>>,
}

impl StreamLifecycle {
    pub fn new(adapter: Arc<dyn StreamAdapter>, config: &BrokerConfig) -> Self {
        Self {
            writer: WriteSerializer::with_threads(Arc::clone(&adapter), config.writer_threads),
            adapter,
            finalize_policy: config.finalize_policy,
            max_age: config.max_age,
            cleanup_interval: config.cleanup_interval,
            last_cleanup: Mutex::new(None),
        }
    }

    pub fn adapter(&self) -> &Arc<dyn StreamAdapter> {
        &self.adapter
    }

    pub fn writer(&self) -> &WriteSerializer {
        &self.writer
    }

    pub fn finalize_policy(&self) -> FinalizePolicy {
        self.finalize_policy
    }

    /// Flush pending writes for the context's stream and apply the
    /// finalization policy.
    ///
    /// Finalization runs even if the drain reports a capacity error; that
    /// error is returned afterwards.
    pub fn finalize(&self, ctx: &GenerationContext) -> Result<()> {
        let Some(stream_id) = ctx.stream_id.as_deref() else {
            return Ok(());
        };

        let drained = self.writer.wait_for_drain(stream_id);

        let finalized = match self.finalize_policy {
            FinalizePolicy::MarkCompleted => self.adapter.mark_completed(stream_id),
            FinalizePolicy::Remove => self.adapter.remove(stream_id),
        };
        self.writer.clear(stream_id);
        debug!(stream_id, policy = ?self.finalize_policy, "stream finalized");

        self.maybe_cleanup();
        drained.and(finalized)
    }

    /// Run adapter cleanup if `cleanup_interval` has passed since the last run.
    ///
    /// Returns the number of streams removed, or `None` if the sweep was skipped.
    pub fn maybe_cleanup(&self) -> Option<usize> {
        {
            let mut last = self.last_cleanup.lock();
            if last.is_some_and(|at| at.elapsed() < self.cleanup_interval) {
                return None;
            }
            *last = Some(Instant::now());
        }

        match self.adapter.cleanup(self.max_age) {
            Ok(removed) => {
                if removed > 0 {
                    info!(removed, "lifecycle cleanup removed expired streams");
                }
                Some(removed)
            }
            Err(e) => {
                warn!(error = %e, "lifecycle cleanup failed");
                None
            }
        }
    }
}

impl GenerationHooks for StreamLifecycle {
    fn on_start(&self, ctx: &mut GenerationContext) {
        ctx.adapter = Some(Arc::clone(&self.adapter));
        if let Some(stream_id) = ctx.stream_id.as_deref() {
            debug!(stream_id, "generation started");
        }
    }

    fn on_request(&self, ctx: &GenerationContext) -> Result<()> {
        let Some(stream_id) = ctx.stream_id.as_deref() else {
            return Ok(());
        };
        if !ctx.streaming || self.adapter.exists(stream_id)? {
            return Ok(());
        }
        self.adapter.create(stream_id, ctx.metadata.clone())
    }

    fn on_stream_event(
        &self,
        event: serde_json::Value,
        ctx: &GenerationContext,
    ) -> serde_json::Value {
        if let Some(stream_id) = ctx.stream_id.as_deref() {
            if let Err(e) = self.writer.enqueue(stream_id, event.clone()) {
                warn!(stream_id, error = %e, "failed to queue stream event");
            }
        }
        event
    }

    fn on_stream_end(&self, ctx: &GenerationContext) -> Result<()> {
        self.finalize(ctx)
    }

    fn on_error(&self, error: &dyn StdError, ctx: &GenerationContext) -> Result<()> {
        warn!(stream_id = ?ctx.stream_id, error = %error, "generation failed");
        self.finalize(ctx)
    }

    fn on_abort(&self, reason: &dyn StdError, ctx: &GenerationContext) -> Result<()> {
        debug!(stream_id = ?ctx.stream_id, reason = %reason, "generation aborted");
        self.finalize(ctx)
    }
}
