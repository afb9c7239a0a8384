//! Listener and handle types for live broadcasts.

use crate::error::Result;
use crate::types::StreamEvent;
use std::fmt;

/// Receives live events for one stream.
pub trait StreamListener: Send + Sync {
    /// Called once per published event, in publish order.
    fn on_event(&self, event: &StreamEvent) -> Result<()>;

    /// Called once when the stream is completed, removed or evicted.
    fn on_complete(&self) {}
}

type EventFn = dyn Fn(&StreamEvent) -> Result<()> + Send + Sync;
type CompleteFn = dyn Fn() + Send + Sync;

/// Listener built from a pair of closures.
pub struct FnListener {
    on_event: Box<EventFn>,
    on_complete: Box<CompleteFn>,
}

impl FnListener {
    pub fn new<E, C>(on_event: E, on_complete: C) -> Self
    where
        E: Fn(&StreamEvent) -> Result<()> + Send + Sync + 'static,
        C: Fn() + Send + Sync + 'static,
    {
        Self {
            on_event: Box::new(on_event),
            on_complete: Box::new(on_complete),
        }
    }

    /// Listener that only cares about events.
    pub fn events<E>(on_event: E) -> Self
    where
        E: Fn(&StreamEvent) -> Result<()> + Send + Sync + 'static,
    {
        Self::new(on_event, || {})
    }
}

impl StreamListener for FnListener {
    fn on_event(&self, event: &StreamEvent) -> Result<()> {
        (self.on_event)(event)
    }

    fn on_complete(&self) {
        (self.on_complete)()
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle that removes a listener when consumed or dropped.
#[must_use = "dropping an Unsubscribe handle removes the listener immediately"]
pub struct Unsubscribe {
    action: Option<Box<dyn FnOnce() + Send>>,
}

impl Unsubscribe {
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            action: Some(Box::new(action)),
        }
    }

    /// Handle for a subscription that was never registered.
    pub fn noop() -> Self {
        Self { action: None }
    }

    /// True if dropping this handle does nothing.
    pub fn is_noop(&self) -> bool {
        self.action.is_none()
    }

    /// Remove the listener now.
    pub fn unsubscribe(mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }

    /// Keep the listener registered until the stream completes.
    pub fn detach(mut self) {
        self.action = None;
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("noop", &self.is_noop())
            .finish()
    }
}
