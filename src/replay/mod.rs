//! Reconnect and replay of buffered streams.
//!
//! A reconnecting client gets every buffered event of a stream in cursor
//! order, then the live tail, without gaps or duplicates:
//!
//! 1. A live listener is attached *before* the buffered snapshot is read, so
//!    nothing published during the read is lost. Live events are queued.
//! 2. The snapshot is written to the sink and the last written cursor is
//!    recorded.
//! 3. Queued and later live events are written only if their cursor is past
//!    the last written one.
//! 4. Completion writes the terminal marker; cancellation stops silently.
//!
//! The sink is ended exactly once on every path, and no error escapes
//! `ReplayEngine::resume`.
//!
//! # Example
//!
//! ```ignore
//! let engine = ReplayEngine::new(adapter);
//! let cancel = CancellationSignal::new();
//! let mut sink = CollectingSink::new();
//!
//! match engine.resume("s1", &mut sink, &cancel) {
//!     ReplayOutcome::Completed { delivered } => println!("{delivered} events"),
//!     ReplayOutcome::NotFound => println!("expired"),
//!     other => println!("{other:?}"),
//! }
//! ```

mod cancel;
mod engine;
mod sink;

pub use cancel::CancellationSignal;
pub use engine::{ReplayEngine, ReplayOutcome};
pub use sink::{CollectingSink, SseFormat, StreamSink, WireFormat};
