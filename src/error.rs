//! Error types for the stream broker.

use thiserror::Error;

/// Main error type for broker operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("Stream capacity exceeded (max {max_streams} streams)")]
    CapacityExceeded { max_streams: usize },

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Stream already completed: {0}")]
    StreamCompleted(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Writer unavailable for stream: {0}")]
    WriterUnavailable(String),

    #[error("Adapter error: {0}")]
    Adapter(String),
}

impl BrokerError {
    /// Capacity errors must reach the producer; everything else on the write
    /// path is absorbed by the writer chain.
    pub fn is_capacity(&self) -> bool {
        matches!(self, BrokerError::CapacityExceeded { .. })
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        BrokerError::Serialization(e.to_string())
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
