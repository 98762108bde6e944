//! Progress reported by a single tasklet call

/// Result of one `Tasklet::call`
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ProgressState {
    /// Nothing could be done (e.g. waiting on upstream data)
    NoProgress,
    /// Some work was done, more remains
    MadeProgress,
    /// The tasklet is finished; it will not be called again
    Done,
}

impl ProgressState {
    /// Build a state from its two underlying flags
    pub fn from_flags(made_progress: bool, is_done: bool) -> Self {
        match (made_progress, is_done) {
            (_, true) => ProgressState::Done,
            (true, false) => ProgressState::MadeProgress,
            (false, false) => ProgressState::NoProgress,
        }
    }

    /// Whether this is the terminal state
    pub fn is_done(self) -> bool {
        self == ProgressState::Done
    }

    /// Whether the call did useful work. `Done` counts as progress.
    pub fn is_made_progress(self) -> bool {
        !matches!(self, ProgressState::NoProgress)
    }
}

/// Accumulates progress across the sub-steps of one `call`.
///
/// A fresh tracker is "done without progress": any sub-step that is not
/// done clears the done flag, any sub-step that made progress sets the
/// progress flag.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    made_progress: bool,
    is_done: bool,
}

impl ProgressTracker {
    /// Create a tracker in its initial state
    pub fn new() -> Self {
        Self {
            made_progress: false,
            is_done: true,
        }
    }

    /// Return to the initial state
    pub fn reset(&mut self) {
        self.made_progress = false;
        self.is_done = true;
    }

    /// Fold in the result of one sub-step
    pub fn update(&mut self, state: ProgressState) {
        self.made_progress |= state.is_made_progress();
        self.is_done &= state.is_done();
    }

    /// Record whether a sub-step made progress
    pub fn made_progress(&mut self, made_progress: bool) {
        self.made_progress |= made_progress;
    }

    /// Mark that work remains
    pub fn not_done(&mut self) {
        self.is_done = false;
    }

    /// Whether every sub-step so far was done
    pub fn is_done(&self) -> bool {
        self.is_done
    }

    /// Whether any sub-step so far made progress
    pub fn is_made_progress(&self) -> bool {
        self.made_progress
    }

    /// Collapse into a single state
    pub fn to_progress_state(&self) -> ProgressState {
        ProgressState::from_flags(self.made_progress, self.is_done)
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_flags() {
        assert_eq!(ProgressState::from_flags(false, false), ProgressState::NoProgress);
        assert_eq!(ProgressState::from_flags(true, false), ProgressState::MadeProgress);
        assert_eq!(ProgressState::from_flags(true, true), ProgressState::Done);
        assert_eq!(ProgressState::from_flags(false, true), ProgressState::Done);
    }

    #[test]
    fn test_done_counts_as_progress() {
        assert!(ProgressState::Done.is_made_progress());
        assert!(ProgressState::MadeProgress.is_made_progress());
        assert!(!ProgressState::NoProgress.is_made_progress());
        assert!(ProgressState::Done.is_done());
        assert!(!ProgressState::MadeProgress.is_done());
    }

    #[test]
    fn test_tracker_initial_state() {
        let tracker = ProgressTracker::new();
        assert!(tracker.is_done());
        assert!(!tracker.is_made_progress());
        assert_eq!(tracker.to_progress_state(), ProgressState::Done);
    }

    #[test]
    fn test_tracker_accumulates() {
        let mut tracker = ProgressTracker::new();
        tracker.update(ProgressState::NoProgress);
        assert_eq!(tracker.to_progress_state(), ProgressState::NoProgress);

        tracker.update(ProgressState::Done);
        assert_eq!(tracker.to_progress_state(), ProgressState::MadeProgress);

        tracker.reset();
        tracker.made_progress(true);
        tracker.not_done();
        assert_eq!(tracker.to_progress_state(), ProgressState::MadeProgress);
    }
}
