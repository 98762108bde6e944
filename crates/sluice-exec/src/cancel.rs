//! Batch-wide cancellation
//!
//! Every batch owns one `CancelToken`. It is set when the caller cancels the
//! batch or when the first tasklet fails. Cooperative workers poll it between
//! calls; blocking tasklets can also sleep on it, which is how an
//! interruption reaches a thread blocked inside `call`.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CancelInner {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    condvar: Condvar,
}

/// Monotonic, cloneable cancellation flag
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                lock: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Request cancellation and wake every waiter.
    ///
    /// Returns `true` if this call flipped the flag.
    pub fn cancel(&self) -> bool {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Notify under the lock so a waiter between its flag check and
        // its wait cannot miss the wakeup.
        let _guard = self.inner.lock.lock();
        self.inner.condvar.notify_all();
        true
    }

    /// Check whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Block until cancelled
    pub fn wait(&self) {
        let mut guard = self.inner.lock.lock();
        while !self.is_cancelled() {
            self.inner.condvar.wait(&mut guard);
        }
    }

    /// Block until cancelled or `timeout` elapses.
    ///
    /// Returns `true` if the token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        while !self.is_cancelled() {
            if self
                .inner
                .condvar
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                break;
            }
        }
        self.is_cancelled()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
