//! Per-stream ordered write pipeline.
//!
//! Appends run on a small fixed pool of worker threads. Each stream id is
//! routed to one worker by hash, and a worker handles its queue strictly in
//! arrival order, so writes to one stream never reorder while thousands of
//! streams share a handful of threads. A payload is appended to the adapter
//! and only then published to live listeners, so anything a listener sees is
//! already retrievable by replay. Producers never block on enqueue;
//! `wait_for_drain` is the only way to observe completion.
//!
//! A slow append delays the other streams routed to the same worker.

use crate::adapter::StreamAdapter;
use crate::config::DEFAULT_WRITER_THREADS;
use crate::error::{BrokerError, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

enum WriteCommand {
    Append(serde_json::Value),
    /// Acknowledged once every command queued before it has been handled.
    Drain(Sender<Result<()>>),
    /// Forget any failure still held for the stream.
    Release,
}

struct WriteJob {
    stream_id: String,
    command: WriteCommand,
}

struct PoolState {
    /// Worker queues, spawned on first use.
    workers: Vec<Option<Sender<WriteJob>>>,
    /// Streams with writes queued since their last release.
    active: HashSet<String>,
}

/// Orders appends per stream and publishes after each durable write.
pub struct WriteSerializer {
    adapter: Arc<dyn StreamAdapter>,
    state: Mutex<PoolState>,
}

impl WriteSerializer {
    pub fn new(adapter: Arc<dyn StreamAdapter>) -> Self {
        Self::with_threads(adapter, DEFAULT_WRITER_THREADS)
    }

    /// Serializer backed by at most `threads` workers (at least one).
    pub fn with_threads(adapter: Arc<dyn StreamAdapter>, threads: usize) -> Self {
        Self {
            adapter,
            state: Mutex::new(PoolState {
                workers: (0..threads.max(1)).map(|_| None).collect(),
                active: HashSet::new(),
            }),
        }
    }

    /// Queue `payload` for `stream_id`. Never blocks.
    ///
    /// Failures are absorbed by the worker; capacity failures are reported by
    /// the next `wait_for_drain`.
    pub fn enqueue(&self, stream_id: &str, payload: serde_json::Value) -> Result<()> {
        let sender = {
            let mut state = self.state.lock();
            state.active.insert(stream_id.to_string());
            self.worker_for(&mut state, stream_id)?
        };
        Self::send(&sender, stream_id, WriteCommand::Append(payload))
    }

    /// Block until every append queued so far for `stream_id` has been written
    /// and published.
    ///
    /// Returns the first capacity error hit since the previous drain.
    pub fn wait_for_drain(&self, stream_id: &str) -> Result<()> {
        let sender = {
            let mut state = self.state.lock();
            if !state.active.contains(stream_id) {
                return Ok(());
            }
            self.worker_for(&mut state, stream_id)?
        };

        let (ack_tx, ack_rx) = bounded(1);
        Self::send(&sender, stream_id, WriteCommand::Drain(ack_tx))?;
        ack_rx
            .recv()
            .map_err(|_| BrokerError::WriterUnavailable(stream_id.to_string()))?
    }

    /// Drop bookkeeping for `stream_id`.
    ///
    /// Commands already queued are still handled.
    pub fn clear(&self, stream_id: &str) {
        let sender = {
            let mut state = self.state.lock();
            if !state.active.remove(stream_id) {
                return;
            }
            let slot = slot_for(stream_id, state.workers.len());
            state.workers[slot].clone()
        };
        if let Some(sender) = sender {
            let _ = Self::send(&sender, stream_id, WriteCommand::Release);
        }
        debug!(stream_id, "writer released");
    }

    /// Number of streams with writes queued since their last release.
    pub fn active_writers(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Number of worker threads started so far.
    pub fn worker_threads(&self) -> usize {
        self.state.lock().workers.iter().flatten().count()
    }

    fn send(sender: &Sender<WriteJob>, stream_id: &str, command: WriteCommand) -> Result<()> {
        sender
            .send(WriteJob {
                stream_id: stream_id.to_string(),
                command,
            })
            .map_err(|_| BrokerError::WriterUnavailable(stream_id.to_string()))
    }

    fn worker_for(&self, state: &mut PoolState, stream_id: &str) -> Result<Sender<WriteJob>> {
        let slot = slot_for(stream_id, state.workers.len());
        if let Some(sender) = &state.workers[slot] {
            return Ok(sender.clone());
        }
        let sender = self.spawn_worker(slot)?;
        state.workers[slot] = Some(sender.clone());
        Ok(sender)
    }

    fn spawn_worker(&self, slot: usize) -> Result<Sender<WriteJob>> {
        let (tx, rx) = unbounded();
        let adapter = Arc::clone(&self.adapter);
        let span = tracing::Span::current();

        thread::Builder::new()
            .name(format!("stream-writer-{slot}"))
            .spawn(move || span.in_scope(|| run_worker(slot, adapter.as_ref(), rx)))
            .map_err(|e| BrokerError::WriterUnavailable(format!("worker {slot}: {e}")))?;

        debug!(slot, "writer worker started");
        Ok(tx)
    }
}

fn slot_for(stream_id: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    stream_id.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

fn run_worker(slot: usize, adapter: &dyn StreamAdapter, jobs: Receiver<WriteJob>) {
    // First capacity failure per stream, held until the next drain.
    let mut pending_failures: HashMap<String, BrokerError> = HashMap::new();

    for WriteJob { stream_id, command } in jobs.iter() {
        match command {
            WriteCommand::Append(payload) => match adapter.append(&stream_id, payload) {
                Ok(Some(event)) => adapter.publish(&stream_id, &event),
                Ok(None) => {}
                Err(e) => {
                    warn!(stream_id = %stream_id, error = %e, "append failed, continuing stream");
                    if e.is_capacity() {
                        pending_failures.entry(stream_id).or_insert(e);
                    }
                }
            },
            WriteCommand::Drain(ack) => {
                let _ = ack.send(pending_failures.remove(&stream_id).map_or(Ok(()), Err));
            }
            WriteCommand::Release => {
                pending_failures.remove(&stream_id);
            }
        }
    }

    debug!(slot, "writer worker stopped");
}
