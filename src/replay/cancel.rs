//! Cooperative cancellation for replay sessions.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct SignalState {
    cancelled: AtomicBool,
    /// Dropped on cancel, which disconnects every receiver.
    trigger: Mutex<Option<Sender<()>>>,
}

/// One-shot cancellation signal shared between a transport and a session.
///
/// Cancelling never fails and is idempotent. Besides polling
/// `is_cancelled`, waiters can block on `receiver()` inside a
/// `crossbeam_channel::select!`; it becomes ready (disconnected) once the
/// signal fires.
#[derive(Clone)]
pub struct CancellationSignal {
    state: Arc<SignalState>,
    fired: Receiver<()>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        let (trigger, fired) = bounded(0);
        Self {
            state: Arc::new(SignalState {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
            }),
            fired,
        }
    }

    /// A signal that has already fired.
    pub fn cancelled() -> Self {
        let signal = Self::new();
        signal.cancel();
        signal
    }

    /// Fire the signal.
    pub fn cancel(&self) {
        if !self.state.cancelled.swap(true, Ordering::SeqCst) {
            self.state.trigger.lock().take();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Channel that disconnects when the signal fires. Nothing is ever sent on it.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.fired
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
