//! Aggregate completion of a submitted batch
//!
//! A batch of N tasklets resolves after exactly N outcomes have been
//! reported. The outcome is decided by a single-assignment latch: the first
//! observed failure or a caller cancellation, whichever lands first. If the
//! latch is still empty when the countdown reaches zero, the batch succeeded.

use crate::cancel::CancelToken;
use crate::service::Counters;
use crate::tasklet::TaskletId;
use crate::{ExecError, ExecResult};
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Unique identifier for a submitted batch
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BatchId(u64);

static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(1);

impl BatchId {
    pub(crate) fn new() -> Self {
        BatchId(NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a single tasklet ended
#[derive(Debug)]
pub(crate) enum TaskletOutcome {
    /// `call` returned `Done`
    Done,
    /// `init` or `call` returned an error or panicked
    Failed(anyhow::Error),
    /// Stopped early because the batch was cancelled
    Cancelled,
}

enum Terminal {
    Failed(Arc<anyhow::Error>),
    Cancelled,
}

/// Shared completion state of one batch
pub(crate) struct BatchCompletion {
    id: BatchId,
    total: usize,
    remaining: AtomicUsize,
    terminal: OnceCell<Terminal>,
    cancel: CancelToken,
    result: Mutex<Option<ExecResult<()>>>,
    resolved: Condvar,
    counters: Arc<Counters>,
}

impl BatchCompletion {
    pub(crate) fn new(total: usize, counters: Arc<Counters>) -> Arc<Self> {
        let batch = Arc::new(Self {
            id: BatchId::new(),
            total,
            remaining: AtomicUsize::new(total),
            terminal: OnceCell::new(),
            cancel: CancelToken::new(),
            result: Mutex::new(None),
            resolved: Condvar::new(),
            counters,
        });
        if total == 0 {
            batch.resolve();
        }
        batch
    }

    pub(crate) fn id(&self) -> BatchId {
        self.id
    }

    pub(crate) fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record the outcome of one tasklet. Must be called exactly once per
    /// tasklet, after the tasklet has been dropped.
    pub(crate) fn report(&self, tasklet: TaskletId, outcome: TaskletOutcome) {
        match outcome {
            TaskletOutcome::Done => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            TaskletOutcome::Cancelled => {
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            }
            TaskletOutcome::Failed(err) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                let message = format!("{err:#}");
                if self.terminal.set(Terminal::Failed(Arc::new(err))).is_ok() {
                    warn!(
                        batch = %self.id,
                        %tasklet,
                        error = %message,
                        "tasklet failed, cancelling batch"
                    );
                    self.cancel.cancel();
                } else {
                    debug!(
                        batch = %self.id,
                        %tasklet,
                        error = %message,
                        "tasklet failed after batch outcome was decided"
                    );
                }
            }
        }

        let previous = self.remaining.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "more outcomes reported than tasklets submitted");
        if previous == 1 {
            self.resolve();
        }
    }

    /// Record a caller cancellation and signal every tasklet to stop
    pub(crate) fn cancel(&self) -> bool {
        let recorded = {
            let slot = self.result.lock();
            // Every outcome is in once the countdown hits zero, even if
            // `resolve` has not stored the result yet
            if slot.is_some() || self.remaining.load(Ordering::Acquire) == 0 {
                return false;
            }
            self.terminal.set(Terminal::Cancelled).is_ok()
        };
        self.cancel.cancel();
        if recorded {
            debug!(batch = %self.id, "batch cancelled by caller");
        }
        recorded
    }

    fn resolve(&self) {
        let mut slot = self.result.lock();
        let result = match self.terminal.get() {
            Some(Terminal::Failed(err)) => Err(ExecError::TaskletFailed(err.clone())),
            Some(Terminal::Cancelled) => Err(ExecError::Cancelled),
            None => Ok(()),
        };
        debug!(batch = %self.id, tasklets = self.total, ok = result.is_ok(), "batch resolved");
        *slot = Some(result);
        self.resolved.notify_all();
    }
}

/// Handle to the aggregate outcome of one `execute` call.
///
/// Cloning the handle does not clone the batch: every clone observes the
/// same single outcome.
#[derive(Clone)]
pub struct CompletionHandle {
    batch: Arc<BatchCompletion>,
}

impl CompletionHandle {
    pub(crate) fn new(batch: Arc<BatchCompletion>) -> Self {
        Self { batch }
    }

    /// Identifier of the batch
    pub fn batch_id(&self) -> BatchId {
        self.batch.id
    }

    /// Number of tasklets in the batch
    pub fn len(&self) -> usize {
        self.batch.total
    }

    /// Whether the batch had no tasklets
    pub fn is_empty(&self) -> bool {
        self.batch.total == 0
    }

    /// Block until every tasklet in the batch has stopped
    pub fn wait(&self) -> ExecResult<()> {
        let mut slot = self.batch.result.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            self.batch.resolved.wait(&mut slot);
        }
    }

    /// Block until the batch resolves or `timeout` elapses.
    ///
    /// Returns `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExecResult<()>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.batch.result.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return Some(result.clone());
            }
            if self
                .batch
                .resolved
                .wait_until(&mut slot, deadline)
                .timed_out()
            {
                return slot.as_ref().cloned();
            }
        }
    }

    /// The outcome, if the batch has resolved
    pub fn try_result(&self) -> Option<ExecResult<()>> {
        self.batch.result.lock().clone()
    }

    /// Whether the batch has resolved
    pub fn is_done(&self) -> bool {
        self.batch.result.lock().is_some()
    }

    /// Cancel every tasklet in the batch.
    ///
    /// Returns `true` if the batch will resolve as cancelled, `false` if it
    /// had already resolved or already failed. Tasklets stop at their next
    /// scheduling point; wait on the handle to observe that.
    pub fn cancel(&self) -> bool {
        self.batch.cancel()
    }

    /// Whether cancellation was requested, by the caller or by a failure
    pub fn is_cancelled(&self) -> bool {
        self.batch.is_cancelled()
    }
}

impl std::fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("batch", &self.batch.id)
            .field("tasklets", &self.batch.total)
            .field("done", &self.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn batch(total: usize) -> Arc<BatchCompletion> {
        BatchCompletion::new(total, Arc::new(Counters::default()))
    }

    #[test]
    fn test_empty_batch_resolves_immediately() {
        let handle = CompletionHandle::new(batch(0));
        assert!(handle.is_empty());
        assert!(handle.is_done());
        assert!(handle.wait().is_ok());
    }

    #[test]
    fn test_resolves_only_after_all_outcomes() {
        let batch = batch(3);
        let handle = CompletionHandle::new(batch.clone());

        batch.report(TaskletId::new(), TaskletOutcome::Done);
        batch.report(TaskletId::new(), TaskletOutcome::Done);
        assert!(!handle.is_done());
        assert!(handle.wait_timeout(Duration::from_millis(10)).is_none());

        batch.report(TaskletId::new(), TaskletOutcome::Done);
        assert!(handle.is_done());
        assert!(handle.wait().is_ok());
    }

    #[test]
    fn test_first_failure_wins_and_cancels() {
        let batch = batch(3);
        let handle = CompletionHandle::new(batch.clone());

        batch.report(TaskletId::new(), TaskletOutcome::Failed(anyhow::anyhow!("first")));
        assert!(handle.is_cancelled());
        assert!(!handle.is_done());

        batch.report(TaskletId::new(), TaskletOutcome::Failed(anyhow::anyhow!("second")));
        batch.report(TaskletId::new(), TaskletOutcome::Cancelled);

        let err = handle.wait().unwrap_err();
        assert_eq!(err.tasklet_failure().unwrap().to_string(), "first");
    }

    #[test]
    fn test_cancel_outcome() {
        let batch = batch(2);
        let handle = CompletionHandle::new(batch.clone());

        assert!(handle.cancel());
        assert!(handle.is_cancelled());
        // Only the first cancel records the outcome
        assert!(!handle.cancel());

        // A failure after the cancel does not change the outcome
        batch.report(TaskletId::new(), TaskletOutcome::Failed(anyhow::anyhow!("late")));
        batch.report(TaskletId::new(), TaskletOutcome::Cancelled);

        assert!(handle.wait().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_cancel_after_resolution_is_rejected() {
        let batch = batch(1);
        let handle = CompletionHandle::new(batch.clone());
        batch.report(TaskletId::new(), TaskletOutcome::Done);

        assert!(!handle.cancel());
        assert!(handle.wait().is_ok());
    }

    #[test]
    fn test_cancel_rejected_once_all_outcomes_are_in() {
        let batch = batch(1);
        let handle = CompletionHandle::new(batch.clone());

        // Last outcome counted, result not stored yet
        batch.counters.completed.fetch_add(1, Ordering::Relaxed);
        batch.remaining.fetch_sub(1, Ordering::AcqRel);
        assert!(!handle.is_done());

        assert!(!handle.cancel());
        batch.resolve();
        assert!(handle.wait().is_ok());
    }

    #[test]
    fn test_cancel_after_failure_keeps_failure() {
        let batch = batch(2);
        let handle = CompletionHandle::new(batch.clone());
        batch.report(TaskletId::new(), TaskletOutcome::Failed(anyhow::anyhow!("boom")));

        assert!(!handle.cancel());
        batch.report(TaskletId::new(), TaskletOutcome::Cancelled);

        assert!(matches!(handle.wait(), Err(ExecError::TaskletFailed(_))));
    }

    #[test]
    fn test_concurrent_reports_resolve_once() {
        let batch = batch(800);
        let handle = CompletionHandle::new(batch.clone());

        let reporters: Vec<_> = (0..8)
            .map(|_| {
                let batch = batch.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        batch.report(TaskletId::new(), TaskletOutcome::Done);
                    }
                })
            })
            .collect();

        for reporter in reporters {
            reporter.join().unwrap();
        }

        assert!(handle.wait().is_ok());
        assert_eq!(batch.counters.completed.load(Ordering::Relaxed), 800);
    }

    #[test]
    fn test_clones_observe_same_outcome() {
        let batch = batch(1);
        let handle = CompletionHandle::new(batch.clone());
        let clone = handle.clone();

        let waiter = thread::spawn(move || clone.wait());
        thread::sleep(Duration::from_millis(10));
        batch.report(TaskletId::new(), TaskletOutcome::Cancelled);

        assert!(waiter.join().unwrap().is_ok());
        assert!(handle.wait().is_ok());
    }
}
