//! Tasklet scheduler - cooperative workers, blocking runners, work stealing
//!
//! Non-blocking tasklets run on a fixed pool of cooperative workers, each
//! round-robinning over its own set. Blocking tasklets each get a dedicated
//! thread. Idle workers steal from loaded ones through the load table.

mod backoff;
pub(crate) mod blocking;
pub(crate) mod pool;
pub(crate) mod steal;
pub(crate) mod tracker;
pub(crate) mod worker;

pub use backoff::IdleBackoff;
