//! The tasklet contract consumed by the scheduler

use crate::cancel::CancelToken;
use crate::progress::ProgressState;
use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for an accepted tasklet
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskletId(u64);

static NEXT_TASKLET_ID: AtomicU64 = AtomicU64::new(1);

impl TaskletId {
    /// Generate a new unique TaskletId
    pub fn new() -> Self {
        TaskletId(NEXT_TASKLET_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for TaskletId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskletId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the scheduler hands to a tasklet during `init`
#[derive(Debug, Clone)]
pub struct TaskletContext {
    id: TaskletId,
    cancel: CancelToken,
}

impl TaskletContext {
    pub(crate) fn new(id: TaskletId, cancel: CancelToken) -> Self {
        Self { id, cancel }
    }

    /// Identifier the scheduler assigned to this tasklet
    pub fn id(&self) -> TaskletId {
        self.id
    }

    /// The batch's cancellation token.
    ///
    /// Blocking tasklets should wait on this instead of sleeping
    /// unconditionally so that cancellation interrupts them.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

/// A unit of incremental, resumable work.
///
/// The scheduler calls `init` exactly once and then `call` until it returns
/// `Done` or an error, or the batch is cancelled. Calls on one tasklet are
/// always sequential. All state needed to resume lives in the tasklet
/// itself; the scheduler keeps no call stack between calls.
///
/// A non-blocking tasklet must return from `call` promptly. One that does
/// not will starve every other tasklet on its worker.
pub trait Tasklet: Send + 'static {
    /// Whether `call` may block its thread. Queried once, at assignment.
    fn is_blocking(&self) -> bool {
        false
    }

    /// One-time setup before the first `call`. An error here fails the
    /// tasklet without any `call`.
    fn init(&mut self, _ctx: &TaskletContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Perform one step of work
    fn call(&mut self) -> anyhow::Result<ProgressState>;

    /// Name used in log events
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed(std::any::type_name::<Self>())
    }
}

impl<T: Tasklet + ?Sized> Tasklet for Box<T> {
    fn is_blocking(&self) -> bool {
        (**self).is_blocking()
    }

    fn init(&mut self, ctx: &TaskletContext) -> anyhow::Result<()> {
        (**self).init(ctx)
    }

    fn call(&mut self) -> anyhow::Result<ProgressState> {
        (**self).call()
    }

    fn name(&self) -> Cow<'_, str> {
        (**self).name()
    }
}
