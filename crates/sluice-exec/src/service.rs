//! Execution service: the entry point for running tasklet batches

use crate::completion::{BatchCompletion, CompletionHandle};
use crate::config::ExecConfig;
use crate::scheduler::blocking;
use crate::scheduler::pool::WorkerPool;
use crate::scheduler::tracker::TaskletTracker;
use crate::scheduler::worker::CooperativeWorker;
use crate::tasklet::Tasklet;
use crate::{ExecError, ExecResult};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Service-wide counters, updated from every worker and runner thread
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) batches: AtomicU64,
    pub(crate) submitted: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) cancelled: AtomicU64,
    pub(crate) steals: AtomicU64,
    pub(crate) blocking_threads: AtomicUsize,
}

/// Execution statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    /// Batches accepted by `execute`
    pub batches_submitted: u64,

    /// Tasklets accepted by `execute`
    pub tasklets_submitted: u64,

    /// Tasklets that returned `Done`
    pub tasklets_completed: u64,

    /// Tasklets that failed in `init` or `call`
    pub tasklets_failed: u64,

    /// Tasklets stopped early by cancellation
    pub tasklets_cancelled: u64,

    /// Steal requests served between cooperative workers
    pub steals: u64,

    /// Cooperative tasklets currently scheduled
    pub live_cooperative_tasklets: usize,

    /// Blocking-runner threads currently alive
    pub live_blocking_threads: usize,
}

/// Runs batches of tasklets on a fixed cooperative pool plus one thread per
/// blocking tasklet
pub struct ExecutionService {
    /// Service name, used in logs
    name: String,

    config: ExecConfig,

    /// Cooperative tier
    pool: Arc<WorkerPool>,

    /// Cooperative worker threads, joined by `await_termination`
    workers: Mutex<Vec<thread::JoinHandle<()>>>,

    /// `true` while `execute` is accepted. Held for reading across a whole
    /// submission so `shutdown` cannot interleave with one.
    accepting: RwLock<bool>,

    /// Sequence for blocking thread names
    blocking_seq: AtomicU64,

    counters: Arc<Counters>,
}

impl ExecutionService {
    /// Create a service and start its cooperative workers
    pub fn new(name: impl Into<String>, config: ExecConfig) -> ExecResult<Self> {
        config.validate()?;
        let name = name.into();
        let counters = Arc::new(Counters::default());
        let pool = WorkerPool::new(
            config.parallelism,
            config.min_idle,
            config.max_idle,
            counters.clone(),
        );

        let mut workers = Vec::with_capacity(config.parallelism);
        for id in 0..config.parallelism {
            let thread_name = format!("{}-cooperative-{}", config.thread_name_prefix, id);
            match CooperativeWorker::spawn(id, pool.clone(), thread_name) {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    // Nothing was submitted yet, so started workers exit at once
                    pool.begin_shutdown();
                    return Err(ExecError::Spawn(Arc::new(err)));
                }
            }
        }

        info!(service = %name, parallelism = config.parallelism, "execution service started");

        Ok(Self {
            name,
            config,
            pool,
            workers: Mutex::new(workers),
            accepting: RwLock::new(true),
            blocking_seq: AtomicU64::new(0),
            counters,
        })
    }

    /// Create a service with the default configuration
    pub fn with_parallelism(name: impl Into<String>, parallelism: usize) -> ExecResult<Self> {
        Self::new(name, ExecConfig::default().with_parallelism(parallelism))
    }

    /// Submit a batch of tasklets.
    ///
    /// Non-blocking tasklets are spread round-robin over the cooperative
    /// workers; each blocking tasklet gets its own thread. The returned
    /// handle resolves once every tasklet has stopped: `Ok` if all were
    /// done, the first observed failure if any failed, or `Cancelled` if
    /// the handle was cancelled first.
    ///
    /// Fails with `ServiceStopped` after `shutdown`.
    pub fn execute<I>(&self, tasklets: I) -> ExecResult<CompletionHandle>
    where
        I: IntoIterator<Item = Box<dyn Tasklet>>,
    {
        let accepting = self.accepting.read();
        if !*accepting {
            return Err(ExecError::ServiceStopped);
        }

        let tasklets: Vec<_> = tasklets.into_iter().collect();
        let batch = BatchCompletion::new(tasklets.len(), self.counters.clone());
        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        self.counters
            .submitted
            .fetch_add(tasklets.len() as u64, Ordering::Relaxed);

        let (blocking, cooperative): (Vec<_>, Vec<_>) = tasklets
            .into_iter()
            .map(|tasklet| TaskletTracker::new(tasklet, batch.clone()))
            .partition(TaskletTracker::is_blocking);

        debug!(
            service = %self.name,
            batch = %batch.id(),
            cooperative = cooperative.len(),
            blocking = blocking.len(),
            "batch submitted"
        );

        self.pool.assign_round_robin(cooperative);
        for tracker in blocking {
            let seq = self.blocking_seq.fetch_add(1, Ordering::Relaxed);
            let thread_name = format!("{}-blocking-{}", self.config.thread_name_prefix, seq);
            blocking::spawn_runner(tracker, thread_name, &self.counters);
        }

        Ok(CompletionHandle::new(batch))
    }

    /// Stop accepting batches. Batches already submitted run to completion.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        let mut accepting = self.accepting.write();
        if !*accepting {
            return;
        }
        *accepting = false;
        self.pool.begin_shutdown();
        info!(
            service = %self.name,
            live_tasklets = self.pool.live_tasklets(),
            "execution service shutting down"
        );
    }

    /// Check whether `shutdown` was called
    pub fn is_shutdown(&self) -> bool {
        !*self.accepting.read()
    }

    /// Wait, after `shutdown`, until all in-flight work has finished and the
    /// worker threads have exited.
    ///
    /// Returns `false` on timeout; always times out if the service was not
    /// shut down.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        loop {
            let finished = {
                let workers = self.workers.lock();
                workers.iter().all(|handle| handle.is_finished())
            } && self.counters.blocking_threads.load(Ordering::Acquire) == 0;

            if finished {
                for handle in self.workers.lock().drain(..) {
                    if handle.join().is_err() {
                        warn!(service = %self.name, "cooperative worker panicked");
                    }
                }
                return true;
            }

            if Instant::now() >= deadline {
                return false;
            }

            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Service name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of cooperative workers
    pub fn parallelism(&self) -> usize {
        self.config.parallelism
    }

    /// Configuration the service was started with
    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Get execution statistics
    pub fn stats(&self) -> ExecutionStats {
        let counters = &self.counters;
        ExecutionStats {
            batches_submitted: counters.batches.load(Ordering::Relaxed),
            tasklets_submitted: counters.submitted.load(Ordering::Relaxed),
            tasklets_completed: counters.completed.load(Ordering::Relaxed),
            tasklets_failed: counters.failed.load(Ordering::Relaxed),
            tasklets_cancelled: counters.cancelled.load(Ordering::Relaxed),
            steals: counters.steals.load(Ordering::Relaxed),
            live_cooperative_tasklets: self.pool.live_tasklets(),
            live_blocking_threads: counters.blocking_threads.load(Ordering::Acquire),
        }
    }
}

impl Drop for ExecutionService {
    fn drop(&mut self) {
        // Workers exit on their own once in-flight batches finish
        self.shutdown();
    }
}

impl std::fmt::Debug for ExecutionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionService")
            .field("name", &self.name)
            .field("parallelism", &self.config.parallelism)
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}
