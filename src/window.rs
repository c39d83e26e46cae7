//! Count-based sliding window of recent call outcomes.

use smallvec::SmallVec;
use std::time::{Duration, Instant};

/// The result of one completed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOutcome {
    /// Whether the operation succeeded.
    pub succeeded: bool,
    /// Wall time the operation took.
    pub duration: Duration,
    /// When the operation completed.
    pub timestamp: Instant,
}

impl CallOutcome {
    /// A successful outcome.
    pub fn success(duration: Duration, timestamp: Instant) -> Self {
        Self {
            succeeded: true,
            duration,
            timestamp,
        }
    }

    /// A failed outcome.
    pub fn failure(duration: Duration, timestamp: Instant) -> Self {
        Self {
            succeeded: false,
            duration,
            timestamp,
        }
    }
}

/// Aggregates of a window at one point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSnapshot {
    /// Outcomes currently held.
    pub size: usize,
    /// Maximum outcomes held.
    pub capacity: usize,
    /// Failed outcomes currently held.
    pub failures: usize,
    /// Slow outcomes currently held.
    pub slow_calls: usize,
    /// Failed outcomes as a percentage of `size`.
    pub failure_rate: f64,
    /// Slow outcomes as a percentage of `size`.
    pub slow_call_rate: f64,
}

/// Fixed-capacity ring buffer of the most recent outcomes.
///
/// Failure and slow counters are kept in step with insertions and evictions,
/// so both rates are O(1).
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    slots: SmallVec<[CallOutcome; 16]>,
    // Index of the oldest outcome once the buffer is full.
    head: usize,
    capacity: usize,
    slow_call_threshold: Duration,
    failures: usize,
    slow_calls: usize,
}

impl SlidingWindow {
    /// Creates an empty window. A zero capacity is treated as one.
    pub fn new(capacity: usize, slow_call_threshold: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: SmallVec::with_capacity(capacity),
            head: 0,
            capacity,
            slow_call_threshold,
            failures: 0,
            slow_calls: 0,
        }
    }

    /// Appends an outcome, evicting the oldest one when full.
    pub fn record(&mut self, outcome: CallOutcome) {
        if self.slots.len() < self.capacity {
            self.slots.push(outcome);
        } else {
            let evicted = std::mem::replace(&mut self.slots[self.head], outcome);
            self.head = (self.head + 1) % self.capacity;
            self.uncount(&evicted);
        }
        self.count(&outcome);
    }

    /// Percentage of held outcomes that failed, 0 when empty.
    pub fn failure_rate(&self) -> f64 {
        self.percentage(self.failures)
    }

    /// Percentage of held outcomes slower than the slow-call threshold, 0 when empty.
    pub fn slow_call_rate(&self) -> f64 {
        self.percentage(self.slow_calls)
    }

    /// Number of outcomes held.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Maximum number of outcomes held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of failed outcomes held.
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Number of slow outcomes held.
    pub fn slow_calls(&self) -> usize {
        self.slow_calls
    }

    /// True when `outcome` counts as slow for this window.
    pub fn is_slow(&self, outcome: &CallOutcome) -> bool {
        outcome.duration > self.slow_call_threshold
    }

    /// Drops every outcome, starting a fresh measurement period.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = 0;
        self.failures = 0;
        self.slow_calls = 0;
    }

    /// Outcomes from oldest to newest.
    pub fn outcomes(&self) -> impl Iterator<Item = &CallOutcome> + '_ {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter())
    }

    /// Current aggregates.
    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            size: self.size(),
            capacity: self.capacity,
            failures: self.failures,
            slow_calls: self.slow_calls,
            failure_rate: self.failure_rate(),
            slow_call_rate: self.slow_call_rate(),
        }
    }

    fn count(&mut self, outcome: &CallOutcome) {
        if !outcome.succeeded {
            self.failures += 1;
        }
        if self.is_slow(outcome) {
            self.slow_calls += 1;
        }
    }

    fn uncount(&mut self, outcome: &CallOutcome) {
        if !outcome.succeeded {
            self.failures -= 1;
        }
        if self.is_slow(outcome) {
            self.slow_calls -= 1;
        }
    }

    fn percentage(&self, count: usize) -> f64 {
        if self.slots.is_empty() {
            return 0.0;
        }
        count as f64 * 100.0 / self.slots.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SLOW: Duration = Duration::from_millis(500);

    fn outcome(succeeded: bool, millis: u64) -> CallOutcome {
        let duration = Duration::from_millis(millis);
        if succeeded {
            CallOutcome::success(duration, Instant::now())
        } else {
            CallOutcome::failure(duration, Instant::now())
        }
    }

    #[test]
    fn empty_window_reports_zero_rates() {
        let window = SlidingWindow::new(6, SLOW);
        assert_eq!(window.size(), 0);
        assert_eq!(window.failure_rate(), 0.0);
        assert_eq!(window.slow_call_rate(), 0.0);
    }

    #[test]
    fn full_window_evicts_oldest() {
        let mut window = SlidingWindow::new(6, SLOW);
        window.record(outcome(false, 10));
        for _ in 0..5 {
            window.record(outcome(true, 10));
        }
        assert_eq!(window.size(), 6);
        assert_eq!(window.failures(), 1);

        // The failure is the oldest entry and goes first.
        window.record(outcome(true, 10));
        assert_eq!(window.size(), 6);
        assert_eq!(window.failures(), 0);
        assert!(window.outcomes().all(|o| o.succeeded));
    }

    #[test]
    fn failure_rate_over_current_size() {
        let mut window = SlidingWindow::new(6, SLOW);
        window.record(outcome(false, 10));
        window.record(outcome(false, 10));
        window.record(outcome(true, 10));
        let rate = window.failure_rate();
        assert!((rate - 66.666).abs() < 0.01, "rate was {rate}");
    }

    #[test]
    fn slow_calls_count_regardless_of_success() {
        let mut window = SlidingWindow::new(4, SLOW);
        window.record(outcome(true, 501));
        window.record(outcome(false, 900));
        window.record(outcome(true, 500));
        window.record(outcome(true, 1));
        assert_eq!(window.slow_calls(), 2);
        assert_eq!(window.slow_call_rate(), 50.0);
        assert_eq!(window.failure_rate(), 25.0);
    }

    #[test]
    fn outcomes_iterate_oldest_first_after_wrap() {
        let mut window = SlidingWindow::new(3, SLOW);
        for millis in 1..=5 {
            window.record(outcome(true, millis));
        }
        let order: Vec<u64> = window
            .outcomes()
            .map(|o| o.duration.as_millis() as u64)
            .collect();
        assert_eq!(order, vec![3, 4, 5]);
    }

    #[test]
    fn clear_resets_counters() {
        let mut window = SlidingWindow::new(3, SLOW);
        window.record(outcome(false, 800));
        window.clear();
        assert_eq!(window.snapshot().size, 0);
        assert_eq!(window.failures(), 0);
        assert_eq!(window.slow_calls(), 0);
    }

    proptest! {
        #[test]
        fn counters_match_contents(
            capacity in 1usize..12,
            calls in proptest::collection::vec((any::<bool>(), 0u64..1_000), 0..64),
        ) {
            let mut window = SlidingWindow::new(capacity, SLOW);
            for (succeeded, millis) in &calls {
                window.record(outcome(*succeeded, *millis));
            }

            prop_assert!(window.size() <= capacity);
            prop_assert_eq!(window.size(), calls.len().min(capacity));

            let held: Vec<_> = window.outcomes().copied().collect();
            let expected = &calls[calls.len() - held.len()..];
            for (got, (succeeded, millis)) in held.iter().zip(expected) {
                prop_assert_eq!(got.succeeded, *succeeded);
                prop_assert_eq!(got.duration, Duration::from_millis(*millis));
            }

            let failures = held.iter().filter(|o| !o.succeeded).count();
            let slow = held.iter().filter(|o| o.duration > SLOW).count();
            prop_assert_eq!(window.failures(), failures);
            prop_assert_eq!(window.slow_calls(), slow);
            prop_assert!((0.0..=100.0).contains(&window.failure_rate()));
            prop_assert!((0.0..=100.0).contains(&window.slow_call_rate()));
        }
    }
}
