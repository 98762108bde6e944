//! Idle backoff for cooperative workers

use std::time::Duration;

/// Capped exponential park durations.
///
/// Each idle pass parks for the current duration and doubles it, up to
/// `max`. Any progress resets it to `min`.
#[derive(Debug, Clone)]
pub struct IdleBackoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl IdleBackoff {
    /// Create a backoff starting at `min` and saturating at `max`
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Duration to park for this idle pass; advances the backoff
    pub fn next_park(&mut self) -> Duration {
        let park = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        park
    }

    /// Back to the shortest park
    pub fn reset(&mut self) {
        self.current = self.min;
    }

    /// Whether the next park is already at the cap
    pub fn is_saturated(&self) -> bool {
        self.current >= self.max
    }
}
