//! Work-stealing coordinator
//!
//! A worker whose local set ran empty posts a steal request at the most
//! loaded other worker. The victim serves it at the top of its next pass,
//! when none of its tasklets is inside a call, by moving half of its set
//! (rounded up) into the thief's inbox. A moved tasklet leaves the victim
//! before it is pushed to the thief, so it is never owned by both.

use crate::scheduler::pool::{WorkerPool, NO_THIEF};
use crate::scheduler::tracker::TaskletTracker;
use rand::Rng;
use std::sync::atomic::Ordering;
use tracing::debug;

/// Ask the most loaded other worker to give `thief` some tasklets.
///
/// Returns the victim's id if a request was posted. Workers with fewer than
/// two tasklets are never chosen: moving their only tasklet would not
/// improve balance.
pub(crate) fn request_steal(pool: &WorkerPool, thief: usize) -> Option<usize> {
    let slots = pool.slots();
    if slots.len() < 2 {
        return None;
    }

    // Random scan start so equally loaded victims share the requests
    let start = rand::thread_rng().gen_range(0..slots.len());
    let mut victim = None;
    let mut max_load = 1;
    for i in 0..slots.len() {
        let index = (start + i) % slots.len();
        if index == thief {
            continue;
        }
        let load = slots[index].load();
        if load > max_load {
            max_load = load;
            victim = Some(index);
        }
    }

    let victim = victim?;
    slots[victim]
        .steal_request
        .compare_exchange(NO_THIEF, thief, Ordering::AcqRel, Ordering::Acquire)
        .ok()
        .map(|_| victim)
}

/// Serve a pending steal request against the victim's local set.
///
/// Must be called by the victim's own thread between passes. Returns the
/// number of tasklets moved.
pub(crate) fn serve_steal(
    pool: &WorkerPool,
    victim: usize,
    local: &mut Vec<TaskletTracker>,
) -> usize {
    let thief = pool.slot(victim).steal_request.swap(NO_THIEF, Ordering::AcqRel);
    if thief == NO_THIEF || local.len() < 2 {
        return 0;
    }

    let count = local.len().div_ceil(2);
    let moved = local.split_off(local.len() - count);
    pool.slot(victim).release(count);

    let thief_slot = pool.slot(thief);
    for tracker in moved {
        thief_slot.accept(tracker);
    }
    thief_slot.parker.unpark();

    pool.counters.steals.fetch_add(1, Ordering::Relaxed);
    debug!(victim, thief, moved = count, kept = local.len(), "tasklets stolen");
    count
}
