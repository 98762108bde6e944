//! Worker load table
//!
//! One slot per cooperative worker. A slot is touched by its owning worker,
//! by submitters pushing new tasklets into its inbox, and by the stealing
//! protocol. There is no lock shared by all workers: the inbox is a
//! lock-free injector and the rest are per-slot atomics.

use crate::scheduler::tracker::TaskletTracker;
use crate::service::Counters;
use crossbeam_deque::{Injector, Steal};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Marker for "no steal request pending"
pub(crate) const NO_THIEF: usize = usize::MAX;

/// Lets an idle worker sleep until new work arrives or a timeout expires
pub(crate) struct Parker {
    notified: Mutex<bool>,
    condvar: Condvar,
}

impl Parker {
    fn new() -> Self {
        Self {
            notified: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Sleep for at most `timeout`. Returns early if `unpark` was called,
    /// including before this call.
    pub(crate) fn park_timeout(&self, timeout: Duration) {
        let mut notified = self.notified.lock();
        if !*notified {
            self.condvar.wait_for(&mut notified, timeout);
        }
        *notified = false;
    }

    pub(crate) fn unpark(&self) {
        let mut notified = self.notified.lock();
        *notified = true;
        self.condvar.notify_one();
    }
}

/// Load table entry of one cooperative worker
pub(crate) struct WorkerSlot {
    inbox: Injector<TaskletTracker>,
    /// Tasklets owned by the worker: its local set plus its inbox
    load: AtomicUsize,
    /// Id of a worker waiting for tasklets from this one, or `NO_THIEF`
    pub(crate) steal_request: AtomicUsize,
    pub(crate) parker: Parker,
}

impl WorkerSlot {
    fn new() -> Self {
        Self {
            inbox: Injector::new(),
            load: AtomicUsize::new(0),
            steal_request: AtomicUsize::new(NO_THIEF),
            parker: Parker::new(),
        }
    }

    /// Hand a tasklet to this worker. Does not wake it.
    pub(crate) fn accept(&self, tracker: TaskletTracker) {
        self.load.fetch_add(1, Ordering::AcqRel);
        self.inbox.push(tracker);
    }

    /// Move everything from the inbox into the worker's local set
    pub(crate) fn drain_inbox(&self, local: &mut Vec<TaskletTracker>) -> usize {
        let mut drained = 0;
        loop {
            match self.inbox.steal() {
                Steal::Success(tracker) => {
                    local.push(tracker);
                    drained += 1;
                }
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }
        drained
    }

    /// Record that `count` tasklets left this worker
    pub(crate) fn release(&self, count: usize) {
        self.load.fetch_sub(count, Ordering::AcqRel);
    }

    pub(crate) fn load(&self) -> usize {
        self.load.load(Ordering::Acquire)
    }
}

/// The cooperative tier: load table plus pool-wide lifecycle state
pub(crate) struct WorkerPool {
    slots: Vec<WorkerSlot>,
    /// Cooperative tasklets accepted and not yet finished, pool-wide
    live: AtomicUsize,
    shutdown: AtomicBool,
    /// Round-robin start for the next batch
    cursor: AtomicUsize,
    min_idle: Duration,
    max_idle: Duration,
    pub(crate) counters: Arc<Counters>,
}

impl WorkerPool {
    pub(crate) fn new(
        parallelism: usize,
        min_idle: Duration,
        max_idle: Duration,
        counters: Arc<Counters>,
    ) -> Arc<Self> {
        Arc::new(Self {
            slots: (0..parallelism).map(|_| WorkerSlot::new()).collect(),
            live: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            cursor: AtomicUsize::new(0),
            min_idle,
            max_idle,
            counters,
        })
    }

    pub(crate) fn slots(&self) -> &[WorkerSlot] {
        &self.slots
    }

    pub(crate) fn slot(&self, worker: usize) -> &WorkerSlot {
        &self.slots[worker]
    }

    pub(crate) fn idle_bounds(&self) -> (Duration, Duration) {
        (self.min_idle, self.max_idle)
    }

    /// Distribute a batch's cooperative tasklets round-robin, continuing
    /// where the previous batch stopped.
    pub(crate) fn assign_round_robin(&self, trackers: Vec<TaskletTracker>) {
        if trackers.is_empty() {
            return;
        }
        let workers = self.slots.len();
        let start = self.cursor.fetch_add(trackers.len(), Ordering::Relaxed);
        self.live.fetch_add(trackers.len(), Ordering::AcqRel);

        let touched = trackers.len().min(workers);
        for (i, tracker) in trackers.into_iter().enumerate() {
            self.slots[(start + i) % workers].accept(tracker);
        }
        for i in 0..touched {
            self.slots[(start + i) % workers].parker.unpark();
        }
    }

    /// Give every tasklet to one worker, bypassing round-robin
    #[cfg(test)]
    pub(crate) fn assign_to(&self, worker: usize, trackers: Vec<TaskletTracker>) {
        self.live.fetch_add(trackers.len(), Ordering::AcqRel);
        for tracker in trackers {
            self.slots[worker].accept(tracker);
        }
        self.slots[worker].parker.unpark();
    }

    /// Bookkeeping for a cooperative tasklet that reached its outcome
    pub(crate) fn tasklet_finished(&self, worker: usize) {
        self.slots[worker].release(1);
        let previous = self.live.fetch_sub(1, Ordering::AcqRel);
        if previous == 1 && self.shutdown.load(Ordering::Acquire) {
            self.unpark_all();
        }
    }

    pub(crate) fn live_tasklets(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Let workers exit once no cooperative tasklet is left
    pub(crate) fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.unpark_all();
    }

    /// Shut down and nothing left to run: workers may exit
    pub(crate) fn is_drained(&self) -> bool {
        self.shutdown.load(Ordering::Acquire) && self.live.load(Ordering::Acquire) == 0
    }

    fn unpark_all(&self) {
        for slot in &self.slots {
            slot.parker.unpark();
        }
    }
}
