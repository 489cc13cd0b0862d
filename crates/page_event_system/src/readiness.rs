//! One-shot readiness latch.

use parking_lot::Mutex;
use std::future::Future;
use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct LatchState {
    resolved: bool,
    /// Pending waiters in attachment order
    waiters: Vec<oneshot::Sender<()>>,
}

/// A latch that flips from "not ready" to "ready" exactly once.
///
/// Any number of waiters may await it, before or after it is resolved.
/// Waiters attached before resolution are woken in the order they were
/// attached. Resolving twice is a no-op and there is no rejection path: if
/// the latch is dropped unresolved, outstanding waiters simply never
/// complete.
#[derive(Debug)]
pub struct ReadinessLatch {
    state: Mutex<LatchState>,
}

impl ReadinessLatch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LatchState::default()),
        }
    }

    /// Marks the latch ready. Returns `true` only for the call that actually
    /// flipped it.
    pub fn resolve(&self) -> bool {
        let waiters = {
            let mut state = self.state.lock();
            if state.resolved {
                return false;
            }
            state.resolved = true;
            std::mem::take(&mut state.waiters)
        };

        for waiter in waiters {
            // A dropped waiter is not an error.
            let _ = waiter.send(());
        }
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.state.lock().resolved
    }

    /// Returns a future that completes once the latch is resolved.
    ///
    /// The waiter is registered when this is called, not when the future is
    /// first polled. The future owns its receiver, so it can be moved into a
    /// spawned task and outlive the borrow of the latch.
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let receiver = {
            let mut state = self.state.lock();
            if state.resolved {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Some(rx)
            }
        };

        async move {
            if let Some(receiver) = receiver {
                if receiver.await.is_err() {
                    // Latch dropped without resolving: stay pending forever.
                    futures::future::pending::<()>().await;
                }
            }
        }
    }
}

impl Default for ReadinessLatch {
    fn default() -> Self {
        Self::new()
    }
}
