//! Dedicated threads for blocking tasklets
//!
//! Each blocking tasklet gets its own OS thread for its whole lifetime. The
//! thread runs `init` and then calls `call` back to back until the tasklet
//! is done, fails, or its batch is cancelled. There is no backoff: a
//! blocking tasklet is expected to block inside `call` rather than poll.
//!
//! Cancellation is observed between calls. A tasklet blocked inside `call`
//! only returns early if it waits on its `CancelToken`; one blocked on
//! something else delays cancellation until that wait ends.

use crate::completion::TaskletOutcome;
use crate::scheduler::tracker::{Step, TaskletTracker};
use crate::service::Counters;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Keeps the live blocking-thread count accurate however the thread ends
struct LiveGuard(Arc<Counters>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.blocking_threads.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Run one blocking tasklet on a new named thread.
///
/// If the thread cannot be spawned the tasklet is reported as failed, so
/// the batch still resolves.
pub(crate) fn spawn_runner(tracker: TaskletTracker, thread_name: String, counters: &Arc<Counters>) {
    let batch = tracker.batch().clone();
    let id = tracker.id();

    counters.blocking_threads.fetch_add(1, Ordering::AcqRel);
    let guard = LiveGuard(counters.clone());

    let spawned = thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let _guard = guard;
            run(tracker);
        });

    if let Err(err) = spawned {
        warn!(
            tasklet = %id,
            thread = %thread_name,
            error = %err,
            "failed to spawn blocking runner"
        );
        let err = anyhow::Error::new(err)
            .context(format!("spawning thread `{thread_name}` for blocking tasklet {id}"));
        batch.report(id, TaskletOutcome::Failed(err));
    }
}

fn run(mut tracker: TaskletTracker) {
    debug!(tasklet = %tracker.id(), "blocking runner started");
    loop {
        if let Step::Finished(outcome) = tracker.step() {
            debug!(tasklet = %tracker.id(), ?outcome, "blocking runner finished");
            tracker.finish(outcome);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{BatchCompletion, CompletionHandle};
    use crate::progress::ProgressState;
    use crate::tasklet::{Tasklet, TaskletContext};
    use crate::CancelToken;
    use std::time::Duration;

    /// Blocks in `call` until the batch is cancelled
    struct Sleeper {
        cancel: Option<CancelToken>,
    }

    impl Tasklet for Sleeper {
        fn is_blocking(&self) -> bool {
            true
        }

        fn init(&mut self, ctx: &TaskletContext) -> anyhow::Result<()> {
            self.cancel = Some(ctx.cancel_token().clone());
            Ok(())
        }

        fn call(&mut self) -> anyhow::Result<ProgressState> {
            if let Some(cancel) = &self.cancel {
                cancel.wait();
            }
            Ok(ProgressState::Done)
        }
    }

    struct Steps(u32);

    impl Tasklet for Steps {
        fn is_blocking(&self) -> bool {
            true
        }

        fn call(&mut self) -> anyhow::Result<ProgressState> {
            if self.0 == 0 {
                return Ok(ProgressState::Done);
            }
            self.0 -= 1;
            Ok(ProgressState::NoProgress)
        }
    }

    fn start(tasklet: impl Tasklet, counters: &Arc<Counters>) -> CompletionHandle {
        let batch = BatchCompletion::new(1, counters.clone());
        let handle = CompletionHandle::new(batch.clone());
        let tracker = TaskletTracker::new(Box::new(tasklet), batch);
        assert!(tracker.is_blocking());
        spawn_runner(tracker, "test-blocking".to_string(), counters);
        handle
    }

    #[test]
    fn test_runner_completes_tasklet() {
        let counters = Arc::new(Counters::default());
        let handle = start(Steps(100), &counters);

        assert!(handle.wait().is_ok());
        assert_eq!(counters.completed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_cancel_interrupts_blocked_call() {
        let counters = Arc::new(Counters::default());
        let handle = start(Sleeper { cancel: None }, &counters);

        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_done());
        assert_eq!(counters.blocking_threads.load(Ordering::Acquire), 1);

        assert!(handle.cancel());
        let result = handle.wait_timeout(Duration::from_secs(10));
        assert!(result.unwrap().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_live_count_drops_after_exit() {
        let counters = Arc::new(Counters::default());
        let handle = start(Steps(1), &counters);
        assert!(handle.wait().is_ok());

        // The guard is dropped right after the outcome is reported
        for _ in 0..1000 {
            if counters.blocking_threads.load(Ordering::Acquire) == 0 {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("blocking runner thread still counted as live");
    }
}
