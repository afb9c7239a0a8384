//! Replay session driver.

use crate::adapter::StreamAdapter;
use crate::broadcast::StreamListener;
use crate::config::CreationPolicy;
use crate::error::{BrokerError, Result};
use crate::types::{Cursor, StreamEvent};
use crossbeam_channel::{select, unbounded, Sender};
use std::sync::Arc;
use tracing::{debug, warn};

use super::cancel::CancellationSignal;
use super::sink::{SseFormat, StreamSink, WireFormat};

/// How a replay session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The stream completed and the terminal marker was written.
    Completed { delivered: usize },
    /// The stream was unknown; a not-found payload was written.
    NotFound,
    /// The signal fired; nothing was written after it.
    Cancelled { delivered: usize },
    /// The session failed; an error payload was written if still possible.
    Failed { message: String },
}

enum LiveMessage {
    Event(StreamEvent),
    Complete,
}

/// Listener queueing live events for one session.
struct LiveQueue(Sender<LiveMessage>);

impl StreamListener for LiveQueue {
    fn on_event(&self, event: &StreamEvent) -> Result<()> {
        self.0
            .send(LiveMessage::Event(event.clone()))
            .map_err(|_| BrokerError::Sink("replay session closed".into()))
    }

    fn on_complete(&self) {
        let _ = self.0.send(LiveMessage::Complete);
    }
}

/// Per-session delivery state.
#[derive(Default)]
struct Progress {
    /// Last cursor written to the sink.
    last_sent: Option<Cursor>,
    delivered: usize,
}

/// Outcome of a single delivery attempt.
enum Delivery {
    Written,
    Duplicate,
    Cancelled,
}

/// Replays buffered events and follows the live tail of a stream.
pub struct ReplayEngine {
    adapter: Arc<dyn StreamAdapter>,
    format: Arc<dyn WireFormat>,
}

impl ReplayEngine {
    /// Engine writing server-sent-events chunks.
    pub fn new(adapter: Arc<dyn StreamAdapter>) -> Self {
        Self::with_format(adapter, Arc::new(SseFormat::default()))
    }

    pub fn with_format(adapter: Arc<dyn StreamAdapter>, format: Arc<dyn WireFormat>) -> Self {
        Self { adapter, format }
    }

    /// Stream everything buffered under `stream_id` into `sink`, then follow
    /// live events until the stream completes or `cancel` fires.
    ///
    /// Blocks the calling thread. Never fails: errors become an inline error
    /// payload. `sink.end()` is called exactly once.
    pub fn resume(
        &self,
        stream_id: &str,
        sink: &mut dyn StreamSink,
        cancel: &CancellationSignal,
    ) -> ReplayOutcome {
        if cancel.is_cancelled() {
            sink.end();
            return ReplayOutcome::Cancelled { delivered: 0 };
        }

        debug!(stream_id, "replay session started");
        let mut progress = Progress::default();

        let outcome = match self.run(stream_id, sink, cancel, &mut progress) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(stream_id, error = %e, delivered = progress.delivered, "replay failed");
                if !cancel.is_cancelled() {
                    let _ = sink.write(&self.format.error(&e.to_string()));
                }
                ReplayOutcome::Failed {
                    message: e.to_string(),
                }
            }
        };

        sink.end();
        debug!(stream_id, ?outcome, "replay session finished");
        outcome
    }

    fn run(
        &self,
        stream_id: &str,
        sink: &mut dyn StreamSink,
        cancel: &CancellationSignal,
        progress: &mut Progress,
    ) -> Result<ReplayOutcome> {
        let lazy = self.adapter.creation_policy() == CreationPolicy::Lazy;
        if !lazy && !self.adapter.exists(stream_id)? {
            return self.not_found(stream_id, sink, cancel);
        }
        if cancel.is_cancelled() {
            return Ok(cancelled(progress));
        }

        // Subscribe before reading the snapshot so events published while it
        // is fetched are queued rather than lost.
        let (tx, rx) = unbounded();
        let subscription = self.adapter.subscribe(stream_id, Arc::new(LiveQueue(tx)))?;
        if cancel.is_cancelled() {
            return Ok(cancelled(progress));
        }

        let Some(snapshot) = self.adapter.get_events(stream_id)? else {
            return self.not_found(stream_id, sink, cancel);
        };
        for event in &snapshot {
            if let Delivery::Cancelled = self.deliver(event, sink, cancel, progress)? {
                return Ok(cancelled(progress));
            }
        }

        if !self.adapter.is_completed(stream_id)? {
            loop {
                select! {
                    recv(rx) -> message => match message {
                        Ok(LiveMessage::Event(event)) => {
                            if let Delivery::Cancelled = self.deliver(&event, sink, cancel, progress)? {
                                return Ok(cancelled(progress));
                            }
                        }
                        // A dropped queue means the listener was released by
                        // the adapter, which only happens on completion.
                        Ok(LiveMessage::Complete) | Err(_) => break,
                    },
                    recv(cancel.receiver()) -> _ => return Ok(cancelled(progress)),
                }
            }
        }

        // Final drain: anything queued before completion that is not yet written.
        for message in rx.try_iter() {
            if let LiveMessage::Event(event) = message {
                if let Delivery::Cancelled = self.deliver(&event, sink, cancel, progress)? {
                    return Ok(cancelled(progress));
                }
            }
        }

        if cancel.is_cancelled() {
            return Ok(cancelled(progress));
        }
        sink.write(&self.format.done())?;
        subscription.unsubscribe();

        Ok(ReplayOutcome::Completed {
            delivered: progress.delivered,
        })
    }

    /// Write `event` unless it was already written or the session is cancelled.
    fn deliver(
        &self,
        event: &StreamEvent,
        sink: &mut dyn StreamSink,
        cancel: &CancellationSignal,
        progress: &mut Progress,
    ) -> Result<Delivery> {
        if cancel.is_cancelled() {
            return Ok(Delivery::Cancelled);
        }
        if progress.last_sent.is_some_and(|last| event.cursor <= last) {
            return Ok(Delivery::Duplicate);
        }

        sink.write(&self.format.event(event)?)?;
        progress.last_sent = Some(event.cursor);
        progress.delivered += 1;
        Ok(Delivery::Written)
    }

    fn not_found(
        &self,
        stream_id: &str,
        sink: &mut dyn StreamSink,
        cancel: &CancellationSignal,
    ) -> Result<ReplayOutcome> {
        if cancel.is_cancelled() {
            return Ok(ReplayOutcome::Cancelled { delivered: 0 });
        }
        debug!(stream_id, "replay requested for unknown stream");
        sink.write(&self.format.not_found(stream_id))?;
        Ok(ReplayOutcome::NotFound)
    }
}

fn cancelled(progress: &Progress) -> ReplayOutcome {
    ReplayOutcome::Cancelled {
        delivered: progress.delivered,
    }
}
