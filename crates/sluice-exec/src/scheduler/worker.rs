//! Cooperative worker thread
//!
//! A worker round-robins `call` over its local set of non-blocking
//! tasklets. Between passes it takes in newly assigned or stolen tasklets
//! and serves steal requests; when a whole pass made no progress, or it has
//! nothing to run, it parks with exponential backoff.

use crate::scheduler::backoff::IdleBackoff;
use crate::scheduler::pool::WorkerPool;
use crate::scheduler::steal;
use crate::scheduler::tracker::{Step, TaskletTracker};
use std::io;
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace};

/// Worker state, for diagnostics
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum WorkerState {
    /// No tasklets; waiting for an assignment or a steal
    Idle,
    /// Running a pass
    Stepping,
    /// Last pass made no progress; backing off
    Stalled,
    /// Service shut down and no work left anywhere
    ShuttingDown,
}

/// Worker thread that steps non-blocking tasklets
pub(crate) struct CooperativeWorker {
    /// Worker ID, also its index in the load table
    id: usize,

    /// Shared load table
    pool: Arc<WorkerPool>,

    /// Tasklets this worker owns and is stepping
    local: Vec<TaskletTracker>,

    /// Idle park durations
    backoff: IdleBackoff,

    state: WorkerState,
}

impl CooperativeWorker {
    fn new(id: usize, pool: Arc<WorkerPool>) -> Self {
        let (min_idle, max_idle) = pool.idle_bounds();
        Self {
            id,
            pool,
            local: Vec::new(),
            backoff: IdleBackoff::new(min_idle, max_idle),
            state: WorkerState::Idle,
        }
    }

    /// Start the worker on a new named thread
    pub(crate) fn spawn(
        id: usize,
        pool: Arc<WorkerPool>,
        thread_name: String,
    ) -> io::Result<thread::JoinHandle<()>> {
        thread::Builder::new().name(thread_name).spawn(move || {
            let mut worker = CooperativeWorker::new(id, pool);
            worker.run_loop();
        })
    }

    /// Worker thread main loop
    fn run_loop(&mut self) {
        debug!(worker = self.id, "cooperative worker started");

        loop {
            let slot = self.pool.slot(self.id);
            slot.drain_inbox(&mut self.local);
            steal::serve_steal(&self.pool, self.id, &mut self.local);

            if self.local.is_empty() {
                if self.pool.is_drained() {
                    break;
                }
                self.state = WorkerState::Idle;
                steal::request_steal(&self.pool, self.id);
                self.park();
                continue;
            }

            self.state = WorkerState::Stepping;
            if self.run_pass() {
                self.backoff.reset();
            } else {
                self.state = WorkerState::Stalled;
                self.park();
            }
        }

        self.state = WorkerState::ShuttingDown;
        debug!(worker = self.id, state = ?self.state, "cooperative worker exiting");
    }

    /// Visit every local tasklet once. Returns whether anything progressed.
    fn run_pass(&mut self) -> bool {
        let mut progressed = false;
        let mut index = 0;
        while index < self.local.len() {
            match self.local[index].step() {
                Step::Continue { made_progress } => {
                    progressed |= made_progress;
                    index += 1;
                }
                Step::Finished(outcome) => {
                    // swap_remove moves the last tasklet into `index`; it is
                    // visited next, so the pass still covers every tasklet.
                    let tracker = self.local.swap_remove(index);
                    self.pool.tasklet_finished(self.id);
                    tracker.finish(outcome);
                    progressed = true;
                }
            }
        }
        progressed
    }

    fn park(&mut self) {
        let timeout = self.backoff.next_park();
        trace!(
            worker = self.id,
            state = ?self.state,
            timeout_us = timeout.as_micros() as u64,
            "parking"
        );
        self.pool.slot(self.id).parker.park_timeout(timeout);
    }
}
