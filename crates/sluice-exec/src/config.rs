//! Execution engine configuration

use crate::{ExecError, ExecResult};
use std::time::Duration;

/// Default shortest park of an idle cooperative worker
pub const DEFAULT_MIN_IDLE: Duration = Duration::from_micros(25);

/// Default longest park of an idle cooperative worker
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_millis(1);

/// Configuration for an `ExecutionService`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecConfig {
    /// Number of cooperative worker threads
    pub parallelism: usize,

    /// First park duration after a pass with no progress
    pub min_idle: Duration,

    /// Cap for the exponential idle backoff
    pub max_idle: Duration,

    /// Prefix for the names of threads spawned by the service
    pub thread_name_prefix: String,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            parallelism: num_cpus::get(),
            min_idle: DEFAULT_MIN_IDLE,
            max_idle: DEFAULT_MAX_IDLE,
            thread_name_prefix: "sluice".to_string(),
        }
    }
}

impl ExecConfig {
    /// Set the number of cooperative workers
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Set the idle backoff bounds
    pub fn with_idle_backoff(mut self, min_idle: Duration, max_idle: Duration) -> Self {
        self.min_idle = min_idle;
        self.max_idle = max_idle;
        self
    }

    /// Set the thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> ExecResult<()> {
        if self.parallelism == 0 {
            return Err(ExecError::InvalidConfig(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if self.min_idle.is_zero() {
            return Err(ExecError::InvalidConfig(
                "min_idle must be greater than zero".to_string(),
            ));
        }
        if self.min_idle > self.max_idle {
            return Err(ExecError::InvalidConfig(format!(
                "min_idle ({:?}) exceeds max_idle ({:?})",
                self.min_idle, self.max_idle
            )));
        }
        Ok(())
    }
}
