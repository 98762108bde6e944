//! Sluice execution engine
//!
//! This crate runs batches of tasklets to completion:
//! - Cooperative worker pool (fixed size, round-robin stepping)
//! - Dedicated threads for blocking tasklets
//! - Work stealing between cooperative workers
//! - Batch-wide failure propagation and cooperative cancellation

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cancel;
pub mod completion;
pub mod config;
pub mod progress;
pub mod scheduler;
pub mod service;
pub mod tasklet;

use std::sync::Arc;

pub use cancel::CancelToken;
pub use completion::{BatchId, CompletionHandle};
pub use config::ExecConfig;
pub use progress::{ProgressState, ProgressTracker};
pub use service::{ExecutionService, ExecutionStats};
pub use tasklet::{Tasklet, TaskletContext, TaskletId};

/// Execution engine errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecError {
    /// `execute` was called after `shutdown`
    #[error("execution service is stopped")]
    ServiceStopped,

    /// A tasklet in the batch failed during `init` or `call`
    #[error("tasklet failed: {0:#}")]
    TaskletFailed(Arc<anyhow::Error>),

    /// The batch was cancelled before it completed
    #[error("batch was cancelled")]
    Cancelled,

    /// Invalid engine configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An OS thread could not be spawned
    #[error("failed to spawn thread: {0}")]
    Spawn(Arc<std::io::Error>),
}

impl ExecError {
    /// The tasklet failure carried by this error, if any
    pub fn tasklet_failure(&self) -> Option<&anyhow::Error> {
        match self {
            ExecError::TaskletFailed(err) => Some(err),
            _ => None,
        }
    }

    /// Whether this error is a cancellation outcome
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecError::Cancelled)
    }
}

/// Execution engine result
pub type ExecResult<T> = Result<T, ExecError>;
