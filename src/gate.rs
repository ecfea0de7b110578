//! FIFO counting gate bounding the number of in-flight task actions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

/// Counting gate with a first-waiter-first-served queue.
///
/// A released permit is handed directly to the longest-waiting acquirer
/// instead of passing through the free count, so waiters are neither starved
/// nor woken en masse. Capacity is fixed for the lifetime of the gate.
pub(crate) struct Gate {
    inner: Arc<GateInner>,
}

struct GateInner {
    state: Mutex<GateState>,
}

struct GateState {
    available: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

impl Gate {
    pub fn new(permits: usize) -> Self {
        debug_assert!(permits >= 1);
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState {
                    available: permits,
                    waiters: VecDeque::new(),
                }),
            }),
        }
    }

    /// Suspends until a permit is available. Dropping the returned [`Permit`]
    /// releases it.
    ///
    /// Dropping an acquire future after it has been handed a permit forfeits
    /// that permit; the driver never cancels acquires.
    pub async fn acquire(&self) -> Permit {
        let waiter = {
            let mut state = self.inner.state.lock().expect("gate lock poisoned");
            if state.available > 0 {
                state.available -= 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            }
        };

        if let Some(rx) = waiter {
            // Senders are only dropped after a send attempt, so this resolves
            // as long as the acquiring future is alive.
            rx.await.expect("gate dropped a queued waiter");
        }

        Permit {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// One unit of gate capacity, released on drop.
pub(crate) struct Permit {
    inner: Arc<GateInner>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().expect("gate lock poisoned");
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                return;
            }
            // Waiter gave up; try the next one.
        }
        state.available += 1;
    }
}
