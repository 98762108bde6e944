//! Per-tasklet execution state carried between scheduling points

use crate::completion::{BatchCompletion, TaskletOutcome};
use crate::progress::ProgressState;
use crate::tasklet::{Tasklet, TaskletContext, TaskletId};
use anyhow::anyhow;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Result of visiting a tracker once
#[derive(Debug)]
pub(crate) enum Step {
    /// The tasklet stays scheduled
    Continue {
        /// Whether the visit did useful work
        made_progress: bool,
    },
    /// The tasklet must be removed and its outcome reported
    Finished(TaskletOutcome),
}

/// A tasklet together with the batch it belongs to
pub(crate) struct TaskletTracker {
    id: TaskletId,
    tasklet: Box<dyn Tasklet>,
    batch: Arc<BatchCompletion>,
    blocking: bool,
    initialized: bool,
}

impl TaskletTracker {
    pub(crate) fn new(tasklet: Box<dyn Tasklet>, batch: Arc<BatchCompletion>) -> Self {
        let blocking = tasklet.is_blocking();
        Self {
            id: TaskletId::new(),
            tasklet,
            batch,
            blocking,
            initialized: false,
        }
    }

    pub(crate) fn id(&self) -> TaskletId {
        self.id
    }

    pub(crate) fn batch(&self) -> &Arc<BatchCompletion> {
        &self.batch
    }

    pub(crate) fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Advance the tasklet by one scheduling point: `init` on the first
    /// visit, `call` afterwards. Never invokes the tasklet once its batch is
    /// cancelled.
    pub(crate) fn step(&mut self) -> Step {
        if self.batch.is_cancelled() {
            return Step::Finished(TaskletOutcome::Cancelled);
        }

        if !self.initialized {
            self.initialized = true;
            let ctx = TaskletContext::new(self.id, self.batch.cancel_token().clone());
            let tasklet = &mut self.tasklet;
            return match guarded(|| tasklet.init(&ctx)) {
                Ok(()) => Step::Continue {
                    made_progress: true,
                },
                Err(err) => Step::Finished(TaskletOutcome::Failed(err.context(format!(
                    "tasklet `{}` ({}) failed to initialize",
                    self.display_name(),
                    self.id
                )))),
            };
        }

        let tasklet = &mut self.tasklet;
        match guarded(|| tasklet.call()) {
            Ok(ProgressState::Done) => Step::Finished(TaskletOutcome::Done),
            Ok(state) => Step::Continue {
                made_progress: state.is_made_progress(),
            },
            Err(err) => Step::Finished(TaskletOutcome::Failed(err.context(format!(
                "tasklet `{}` ({}) failed",
                self.display_name(),
                self.id
            )))),
        }
    }

    /// Drop the tasklet, then report its outcome to the batch.
    ///
    /// A panic while dropping turns a `Done` outcome into a failure; an
    /// outcome that is already a failure or a cancellation is kept.
    pub(crate) fn finish(self, outcome: TaskletOutcome) {
        let TaskletTracker {
            id, tasklet, batch, ..
        } = self;

        let outcome = match panic::catch_unwind(AssertUnwindSafe(move || drop(tasklet))) {
            Ok(()) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref()).to_string();
                warn!(tasklet = %id, panic = %message, "tasklet panicked while being dropped");
                match outcome {
                    TaskletOutcome::Done => TaskletOutcome::Failed(anyhow!(
                        "tasklet {id} panicked while being dropped: {message}"
                    )),
                    kept => kept,
                }
            }
        };
        batch.report(id, outcome);
    }

    /// The tasklet's name for error messages. Falls back to the id if
    /// `name` panics.
    fn display_name(&self) -> String {
        let tasklet = &self.tasklet;
        panic::catch_unwind(AssertUnwindSafe(|| tasklet.name().into_owned()))
            .unwrap_or_else(|_| format!("tasklet-{}", self.id))
    }
}

/// Run tasklet code, turning a panic into an error
fn guarded<T>(f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Counters;
    use crate::CompletionHandle;
    use crate::ExecError;
    use std::borrow::Cow;

    struct Scripted {
        init_fails: bool,
        panics: bool,
        calls_before_done: u32,
    }

    impl Tasklet for Scripted {
        fn init(&mut self, _ctx: &TaskletContext) -> anyhow::Result<()> {
            if self.init_fails {
                anyhow::bail!("mock init failure");
            }
            Ok(())
        }

        fn call(&mut self) -> anyhow::Result<ProgressState> {
            if self.panics {
                panic!("mock panic");
            }
            if self.calls_before_done == 0 {
                return Ok(ProgressState::Done);
            }
            self.calls_before_done -= 1;
            Ok(ProgressState::NoProgress)
        }
    }

    fn tracker(tasklet: Scripted) -> (TaskletTracker, CompletionHandle) {
        let batch = BatchCompletion::new(1, Arc::new(Counters::default()));
        let handle = CompletionHandle::new(batch.clone());
        (TaskletTracker::new(Box::new(tasklet), batch), handle)
    }

    fn run_to_end(mut tracker: TaskletTracker) -> usize {
        let mut visits = 0;
        loop {
            visits += 1;
            if let Step::Finished(outcome) = tracker.step() {
                tracker.finish(outcome);
                return visits;
            }
        }
    }

    #[test]
    fn test_init_then_calls_until_done() {
        let (tracker, handle) = tracker(Scripted {
            init_fails: false,
            panics: false,
            calls_before_done: 2,
        });

        // init + 2 no-progress calls + done
        assert_eq!(run_to_end(tracker), 4);
        assert!(handle.wait().is_ok());
    }

    #[test]
    fn test_no_progress_is_reported() {
        let (mut tracker, _handle) = tracker(Scripted {
            init_fails: false,
            panics: false,
            calls_before_done: 5,
        });

        assert!(matches!(tracker.step(), Step::Continue { made_progress: true }));
        assert!(matches!(tracker.step(), Step::Continue { made_progress: false }));
    }

    #[test]
    fn test_init_failure_skips_call() {
        let (tracker, handle) = tracker(Scripted {
            init_fails: true,
            panics: true,
            calls_before_done: 0,
        });

        // A call would panic; init failure must stop before it
        assert_eq!(run_to_end(tracker), 1);
        let err = handle.wait().unwrap_err();
        let message = format!("{:#}", err.tasklet_failure().unwrap());
        assert!(message.contains("failed to initialize"));
        assert!(message.contains("mock init failure"));
    }

    #[test]
    fn test_panic_becomes_failure() {
        let (tracker, handle) = tracker(Scripted {
            init_fails: false,
            panics: true,
            calls_before_done: 0,
        });

        run_to_end(tracker);
        match handle.wait() {
            Err(ExecError::TaskletFailed(err)) => {
                assert!(format!("{:#}", err).contains("mock panic"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_batch_is_not_stepped() {
        let (mut tracker, handle) = tracker(Scripted {
            init_fails: false,
            panics: true,
            calls_before_done: 0,
        });
        tracker.step();
        handle.cancel();

        match tracker.step() {
            Step::Finished(outcome) => {
                assert!(matches!(outcome, TaskletOutcome::Cancelled));
                tracker.finish(outcome);
            }
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert!(handle.wait().unwrap_err().is_cancelled());
    }

    /// Fails in `call` and panics when asked for its name
    struct Nameless;

    impl Tasklet for Nameless {
        fn call(&mut self) -> anyhow::Result<ProgressState> {
            anyhow::bail!("call failed")
        }

        fn name(&self) -> Cow<'_, str> {
            panic!("name panic")
        }
    }

    /// Done on the first call, panics when dropped
    struct PanicsOnDrop;

    impl Tasklet for PanicsOnDrop {
        fn call(&mut self) -> anyhow::Result<ProgressState> {
            Ok(ProgressState::Done)
        }
    }

    impl Drop for PanicsOnDrop {
        fn drop(&mut self) {
            panic!("drop panic");
        }
    }

    fn boxed_tracker(tasklet: Box<dyn Tasklet>) -> (TaskletTracker, CompletionHandle) {
        let batch = BatchCompletion::new(1, Arc::new(Counters::default()));
        let handle = CompletionHandle::new(batch.clone());
        (TaskletTracker::new(tasklet, batch), handle)
    }

    #[test]
    fn test_panicking_name_falls_back_to_id() {
        let (tracker, handle) = boxed_tracker(Box::new(Nameless));
        let id = tracker.id();

        run_to_end(tracker);
        let err = handle.wait().unwrap_err();
        let message = format!("{:#}", err.tasklet_failure().unwrap());
        assert!(message.contains(&format!("tasklet-{id}")));
        assert!(message.contains("call failed"));
    }

    #[test]
    fn test_drop_panic_turns_done_into_failure() {
        let (tracker, handle) = boxed_tracker(Box::new(PanicsOnDrop));

        run_to_end(tracker);
        let err = handle.wait().unwrap_err();
        let message = format!("{:#}", err.tasklet_failure().unwrap());
        assert!(message.contains("panicked while being dropped"));
        assert!(message.contains("drop panic"));
    }

    #[test]
    fn test_drop_panic_keeps_cancellation() {
        let (mut tracker, handle) = boxed_tracker(Box::new(PanicsOnDrop));
        handle.cancel();

        match tracker.step() {
            Step::Finished(outcome) => tracker.finish(outcome),
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert!(handle.wait().unwrap_err().is_cancelled());
    }
}
