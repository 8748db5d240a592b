//! Count-based sliding window of call outcomes
//!
//! The window keeps the last `capacity` outcomes in arrival order and a
//! running failure count, so recording and rate queries are O(1).
//! It does no locking of its own; the owning circuit serializes access.

use crate::Outcome;
use std::collections::VecDeque;

// Larger windows grow on demand
const PREALLOCATED_OUTCOMES: usize = 1024;

/// Fixed-capacity ring of recent outcomes
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    outcomes: VecDeque<Outcome>,
    capacity: usize,
    failures: usize,
}

impl SlidingWindow {
    /// Create an empty window holding at most `capacity` outcomes
    ///
    /// A capacity of zero is raised to one; `Config::validate` rejects it
    /// before a circuit ever gets here.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            outcomes: VecDeque::with_capacity(capacity.min(PREALLOCATED_OUTCOMES)),
            capacity,
            failures: 0,
        }
    }

    /// Append an outcome, evicting the oldest one when full
    pub fn record(&mut self, outcome: Outcome) {
        if self.outcomes.len() == self.capacity
            && let Some(evicted) = self.outcomes.pop_front()
            && evicted.is_failure()
        {
            self.failures -= 1;
        }

        if outcome.is_failure() {
            self.failures += 1;
        }
        self.outcomes.push_back(outcome);
    }

    /// Failure percentage (0.0-100.0) over the outcomes currently held
    pub fn failure_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        self.failures as f64 * 100.0 / self.outcomes.len() as f64
    }

    /// Number of outcomes currently held
    pub fn size(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Drop every held outcome
    pub fn clear(&mut self) {
        self.outcomes.clear();
        self.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_has_zero_rate() {
        let window = SlidingWindow::new(10);

        assert_eq!(window.size(), 0);
        assert!(window.is_empty());
        assert_eq!(window.failure_rate(), 0.0);
    }

    #[test]
    fn test_failure_rate_over_held_entries() {
        let mut window = SlidingWindow::new(10);

        window.record(Outcome::Failure);
        window.record(Outcome::Success);
        window.record(Outcome::Failure);
        window.record(Outcome::Success);
        window.record(Outcome::Failure);

        assert_eq!(window.size(), 5);
        assert_eq!(window.failures(), 3);
        assert_eq!(window.failure_rate(), 60.0);
    }

    #[test]
    fn test_oldest_entry_evicted_at_capacity() {
        let mut window = SlidingWindow::new(3);

        window.record(Outcome::Failure);
        window.record(Outcome::Success);
        window.record(Outcome::Success);
        assert_eq!(window.failures(), 1);

        // Pushes the leading failure out
        window.record(Outcome::Success);
        assert_eq!(window.size(), 3);
        assert_eq!(window.failures(), 0);
        assert_eq!(window.failure_rate(), 0.0);

        window.record(Outcome::Failure);
        assert_eq!(window.size(), 3);
        assert_eq!(window.failures(), 1);
    }

    #[test]
    fn test_clear_resets_counts() {
        let mut window = SlidingWindow::new(4);

        window.record(Outcome::Failure);
        window.record(Outcome::Failure);
        window.clear();

        assert!(window.is_empty());
        assert_eq!(window.failures(), 0);
        assert_eq!(window.capacity(), 4);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let mut window = SlidingWindow::new(0);

        window.record(Outcome::Failure);
        window.record(Outcome::Success);

        assert_eq!(window.capacity(), 1);
        assert_eq!(window.size(), 1);
        assert_eq!(window.failure_rate(), 0.0);
    }

    #[test]
    fn test_huge_capacity_grows_on_demand() {
        let mut window = SlidingWindow::new(usize::MAX);

        window.record(Outcome::Failure);
        window.record(Outcome::Success);

        assert_eq!(window.capacity(), usize::MAX);
        assert_eq!(window.size(), 2);
        assert_eq!(window.failure_rate(), 50.0);
    }
}
