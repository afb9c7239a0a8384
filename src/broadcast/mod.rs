//! Live fan-out of stream events to in-process listeners.
//!
//! Every stream id owns a set of listeners, each tagged with the generation
//! of the stream it attached to. Publishing delivers an event to each
//! listener of that generation registered at that moment; a listener that fails or panics
//! is logged and skipped without affecting the others. Completing a stream
//! removes its listeners and calls `on_complete` on each exactly once.
//!
//! # Example
//!
//! ```ignore
//! let registry = Arc::new(BroadcastRegistry::new());
//!
//! let subscription = registry.subscribe("s1", generation, Arc::new(FnListener::new(
//!     |event| { println!("{}: {}", event.cursor, event.payload); Ok(()) },
//!     || println!("done"),
//! )));
//!
//! registry.publish("s1", generation, &event);
//! registry.complete("s1", generation);
//! subscription.unsubscribe();
//! ```

mod registry;
mod types;

pub use registry::BroadcastRegistry;
pub use types::{FnListener, StreamListener, SubscriptionId, Unsubscribe};
