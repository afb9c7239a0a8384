//! Broker configuration.

use std::time::Duration;

/// What an adapter does when a new stream would exceed `max_streams`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CapacityPolicy {
    /// Evict the least recently updated stream to make room.
    #[default]
    EvictLeastRecent,
    /// Refuse the new stream with `BrokerError::CapacityExceeded`.
    Reject,
}

/// When stream entries come into existence.
///
/// The two variants change what "not found" means for a reconnecting client,
/// so a deployment picks exactly one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CreationPolicy {
    /// Entries exist only after `create`. Appends to unknown ids are dropped
    /// and reconnects to unknown ids get a not-found payload.
    #[default]
    Explicit,
    /// The first `append` or `subscribe` creates the entry.
    Lazy,
}

/// What the lifecycle controller does once a producer is done.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FinalizePolicy {
    /// Keep the buffered events so clients can reconnect after completion.
    #[default]
    MarkCompleted,
    /// Notify subscribers and free the entry immediately.
    Remove,
}

/// Default size of the write worker pool.
pub const DEFAULT_WRITER_THREADS: usize = 4;

/// Broker configuration.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// Maximum number of concurrently buffered streams.
    /// Default: 1000
    pub max_streams: usize,

    /// Behaviour when `max_streams` is reached.
    pub capacity_policy: CapacityPolicy,

    /// Explicit or lazy stream creation.
    pub creation_policy: CreationPolicy,

    /// Streams not updated for this long are swept by cleanup.
    /// Default: 10 minutes
    pub max_age: Duration,

    /// Minimum time between two cleanup sweeps triggered by finalization.
    /// Default: 1 minute
    pub cleanup_interval: Duration,

    /// Finalization action for finished streams.
    pub finalize_policy: FinalizePolicy,

    /// Worker threads shared by all streams for ordered appends.
    /// Default: 4
    pub writer_threads: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_streams: 1000,
            capacity_policy: CapacityPolicy::default(),
            creation_policy: CreationPolicy::default(),
            max_age: Duration::from_secs(10 * 60),
            cleanup_interval: Duration::from_secs(60),
            finalize_policy: FinalizePolicy::default(),
            writer_threads: DEFAULT_WRITER_THREADS,
        }
    }
}

impl BrokerConfig {
    pub fn with_max_streams(mut self, max_streams: usize) -> Self {
        self.max_streams = max_streams;
        self
    }

    pub fn with_capacity_policy(mut self, policy: CapacityPolicy) -> Self {
        self.capacity_policy = policy;
        self
    }

    pub fn with_creation_policy(mut self, policy: CreationPolicy) -> Self {
        self.creation_policy = policy;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_finalize_policy(mut self, policy: FinalizePolicy) -> Self {
        self.finalize_policy = policy;
        self
    }

    pub fn with_writer_threads(mut self, threads: usize) -> Self {
        self.writer_threads = threads;
        self
    }

    /// `max_streams`, never less than one.
    pub fn effective_max_streams(&self) -> usize {
        self.max_streams.max(1)
    }
}
