//! `sluice run`: execute one synthetic batch and report what happened.

use crate::synthetic::LoadSpec;
use anyhow::{Context, Result};
use sluice_exec::{ExecConfig, ExecError, ExecutionService, ExecutionStats};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How long to wait for worker threads after the batch resolved
const TERMINATION_TIMEOUT: Duration = Duration::from_secs(10);

/// How a run ended, if it did not fail
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Done,
    /// Stopped by `--cancel-after-ms`
    Cancelled,
}

impl RunOutcome {
    pub fn exit_code(self) -> ExitCode {
        match self {
            RunOutcome::Done => ExitCode::SUCCESS,
            RunOutcome::Cancelled => ExitCode::from(2),
        }
    }
}

pub fn execute(
    config: ExecConfig,
    load: LoadSpec,
    cancel_after: Option<Duration>,
) -> Result<RunOutcome> {
    let service =
        ExecutionService::new("sluice-run", config).context("starting execution service")?;

    let start = Instant::now();
    let handle = service.execute(load.build())?;
    info!(
        batch = %handle.batch_id(),
        cooperative = load.cooperative,
        blocking = load.blocking,
        steps = load.steps,
        "batch submitted"
    );

    let result = match cancel_after {
        Some(after) => match handle.wait_timeout(after) {
            Some(result) => result,
            None => {
                info!(
                    batch = %handle.batch_id(),
                    after_ms = after.as_millis() as u64,
                    "cancelling batch"
                );
                handle.cancel();
                handle.wait()
            }
        },
        None => handle.wait(),
    };
    let elapsed = start.elapsed();

    service.shutdown();
    if !service.await_termination(TERMINATION_TIMEOUT) {
        warn!("worker threads still running after {:?}", TERMINATION_TIMEOUT);
    }

    let outcome = match &result {
        Ok(()) => "done",
        Err(ExecError::Cancelled) => "cancelled",
        Err(_) => "failed",
    };
    println!("Outcome:      {}", outcome);
    println!("Elapsed:      {:?}", elapsed);
    print_stats(&service.stats());

    match result {
        Ok(()) => Ok(RunOutcome::Done),
        Err(ExecError::Cancelled) => Ok(RunOutcome::Cancelled),
        Err(err) => Err(err.into()),
    }
}

fn print_stats(stats: &ExecutionStats) {
    println!("Batches:      {}", stats.batches_submitted);
    println!(
        "Tasklets:     {} submitted, {} done, {} failed, {} cancelled",
        stats.tasklets_submitted,
        stats.tasklets_completed,
        stats.tasklets_failed,
        stats.tasklets_cancelled
    );
    println!("Steals:       {}", stats.steals);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(cooperative: usize, blocking: usize, fail_after: Option<u64>) -> LoadSpec {
        LoadSpec {
            cooperative,
            blocking,
            steps: 50,
            block_time: Duration::from_micros(10),
            fail_after,
        }
    }

    fn config() -> ExecConfig {
        ExecConfig::default().with_parallelism(2)
    }

    #[test]
    fn test_run_to_completion() {
        let outcome = execute(config(), load(4, 1, None), None).unwrap();
        assert_eq!(outcome, RunOutcome::Done);
    }

    #[test]
    fn test_failure_is_an_error() {
        let err = execute(config(), load(4, 1, Some(3)), None).unwrap_err();
        assert!(format!("{err:#}").contains("synthetic failure"));
    }

    #[test]
    fn test_cancel_after_timeout() {
        let long = LoadSpec {
            steps: u64::MAX,
            ..load(2, 1, None)
        };
        let outcome = execute(config(), long, Some(Duration::from_millis(20))).unwrap();
        assert_eq!(outcome, RunOutcome::Cancelled);
    }
}
