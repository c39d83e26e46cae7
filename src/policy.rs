//! Policy engine for breaker trip and reset decisions.

use crate::config::BreakerConfig;
use crate::window::WindowSnapshot;

/// Decides when a breaker trips and when it recovers.
pub trait BreakerPolicy: Send + Sync + 'static {
    /// Whether a closed breaker should open, given its current window.
    fn should_trip(&self, window: &WindowSnapshot) -> bool;

    /// Whether a half-open breaker should close once its trial calls completed.
    fn should_reset(&self, trials: &WindowSnapshot) -> bool;
}

/// Trips on failure rate or slow-call rate once enough calls were seen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateThresholdPolicy {
    minimum_number_of_calls: usize,
    failure_rate_threshold: f64,
    slow_call_rate_threshold: f64,
}

impl RateThresholdPolicy {
    /// Creates a policy from explicit thresholds, both in percent.
    pub fn new(
        minimum_number_of_calls: usize,
        failure_rate_threshold: f64,
        slow_call_rate_threshold: f64,
    ) -> Self {
        Self {
            minimum_number_of_calls,
            failure_rate_threshold,
            slow_call_rate_threshold,
        }
    }

    /// Creates a policy from a breaker configuration.
    pub fn from_config(config: &BreakerConfig) -> Self {
        Self::new(
            config.minimum_number_of_calls(),
            config.failure_rate_threshold(),
            config.slow_call_rate_threshold(),
        )
    }

    fn breaches(&self, window: &WindowSnapshot) -> bool {
        window.failure_rate >= self.failure_rate_threshold
            || window.slow_call_rate >= self.slow_call_rate_threshold
    }
}

impl BreakerPolicy for RateThresholdPolicy {
    fn should_trip(&self, window: &WindowSnapshot) -> bool {
        // Rates over fewer calls than the minimum are noise.
        window.size >= self.minimum_number_of_calls && self.breaches(window)
    }

    fn should_reset(&self, trials: &WindowSnapshot) -> bool {
        !self.breaches(trials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(size: usize, failures: usize, slow_calls: usize) -> WindowSnapshot {
        let pct = |n: usize| {
            if size == 0 {
                0.0
            } else {
                n as f64 * 100.0 / size as f64
            }
        };
        WindowSnapshot {
            size,
            capacity: 6,
            failures,
            slow_calls,
            failure_rate: pct(failures),
            slow_call_rate: pct(slow_calls),
        }
    }

    #[test]
    fn waits_for_minimum_number_of_calls() {
        let policy = RateThresholdPolicy::new(3, 60.0, 50.0);
        assert!(!policy.should_trip(&snapshot(2, 2, 0)));
        assert!(policy.should_trip(&snapshot(3, 2, 0)));
    }

    #[test]
    fn slow_rate_trips_on_its_own() {
        let policy = RateThresholdPolicy::new(3, 60.0, 50.0);
        assert!(policy.should_trip(&snapshot(4, 0, 2)));
        assert!(!policy.should_trip(&snapshot(4, 1, 1)));
    }

    #[test]
    fn resets_only_below_both_thresholds() {
        let policy = RateThresholdPolicy::new(3, 60.0, 50.0);
        assert!(policy.should_reset(&snapshot(2, 0, 0)));
        assert!(!policy.should_reset(&snapshot(2, 0, 1)));
    }
}
