//! Synthetic tasklets for load runs

use anyhow::bail;
use sluice_exec::{CancelToken, ProgressState, Tasklet, TaskletContext};
use std::borrow::Cow;
use std::time::Duration;

/// Shape of a synthetic batch
#[derive(Debug, Clone)]
pub struct LoadSpec {
    pub cooperative: usize,
    pub blocking: usize,
    pub steps: u64,
    /// Time a blocking tasklet blocks per step
    pub block_time: Duration,
    /// The first tasklet fails after this many steps
    pub fail_after: Option<u64>,
}

impl LoadSpec {
    /// Build the batch: cooperative tasklets first, then blocking ones
    pub fn build(&self) -> Vec<Box<dyn Tasklet>> {
        let total = self.cooperative + self.blocking;
        (0..total)
            .map(|index| {
                let blocking = index >= self.cooperative;
                let fail_after = if index == 0 { self.fail_after } else { None };
                Box::new(SyntheticTasklet {
                    index,
                    steps: self.steps,
                    taken: 0,
                    blocking,
                    block_time: self.block_time,
                    fail_after,
                    cancel: None,
                }) as Box<dyn Tasklet>
            })
            .collect()
    }
}

/// Counts steps up to a target. Cooperative ones make progress on every
/// other step; blocking ones wait on their cancel token for each step.
pub struct SyntheticTasklet {
    index: usize,
    steps: u64,
    taken: u64,
    blocking: bool,
    block_time: Duration,
    fail_after: Option<u64>,
    cancel: Option<CancelToken>,
}

impl Tasklet for SyntheticTasklet {
    fn is_blocking(&self) -> bool {
        self.blocking
    }

    fn init(&mut self, ctx: &TaskletContext) -> anyhow::Result<()> {
        self.cancel = Some(ctx.cancel_token().clone());
        Ok(())
    }

    fn call(&mut self) -> anyhow::Result<ProgressState> {
        if self.fail_after == Some(self.taken) {
            bail!("synthetic failure after {} steps", self.taken);
        }
        if self.taken >= self.steps {
            return Ok(ProgressState::Done);
        }
        self.taken += 1;

        if self.blocking {
            if let Some(cancel) = &self.cancel {
                cancel.wait_timeout(self.block_time);
            }
            return Ok(ProgressState::MadeProgress);
        }
        Ok(ProgressState::from_flags(self.taken % 2 == 0, false))
    }

    fn name(&self) -> Cow<'_, str> {
        let kind = if self.blocking { "blocking" } else { "cooperative" };
        Cow::Owned(format!("synthetic-{kind}-{}", self.index))
    }
}
