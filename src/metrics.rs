//! Metric sinks receiving breaker and circuit events.

use crate::state::State;
use crate::window::CallOutcome;

/// Write-only receiver of circuit metrics.
///
/// Call, rejection and fallback events are keyed by the circuit's metrics key;
/// transitions by the breaker name.
pub trait MetricSink: Send + Sync + 'static {
    /// Records a completed call.
    fn record_call(&self, key: &str, outcome: &CallOutcome, slow: bool);

    /// Records a call refused while the breaker was in `state`.
    fn record_rejection(&self, key: &str, state: State);

    /// Records a degraded result produced by a fallback.
    fn record_fallback(&self, key: &str);

    /// Records a state transition event.
    fn record_state_transition(&self, name: &str, from: State, to: State);
}

/// A null metrics sink that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetricSink;

impl MetricSink for NullMetricSink {
    fn record_call(&self, _key: &str, _outcome: &CallOutcome, _slow: bool) {}
    fn record_rejection(&self, _key: &str, _state: State) {}
    fn record_fallback(&self, _key: &str) {}
    fn record_state_transition(&self, _name: &str, _from: State, _to: State) {}
}

#[cfg(feature = "prometheus")]
pub use self::prometheus::PrometheusMetricSink;

#[cfg(feature = "prometheus")]
mod prometheus {
    use super::MetricSink;
    use crate::state::State;
    use crate::window::CallOutcome;
    use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
    use prometheus_client::metrics::counter::Counter;
    use prometheus_client::metrics::family::Family;
    use prometheus_client::metrics::gauge::Gauge;
    use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
    use prometheus_client::registry::Registry;

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
    enum CallKind {
        Success,
        Failure,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct CallLabels {
        circuit: String,
        outcome: CallKind,
        slow: String,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct CircuitLabels {
        circuit: String,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct RejectionLabels {
        circuit: String,
        state: String,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct TransitionLabels {
        circuit: String,
        from: String,
        to: String,
    }

    /// Exports circuit events as Prometheus metrics.
    ///
    /// Metrics are registered under the given prefix:
    /// `<prefix>_calls`, `<prefix>_call_duration_seconds`, `<prefix>_rejections`,
    /// `<prefix>_fallbacks`, `<prefix>_transitions` and `<prefix>_state`
    /// (0 closed, 1 open, 2 half-open).
    #[derive(Clone)]
    pub struct PrometheusMetricSink {
        calls: Family<CallLabels, Counter>,
        durations: Family<CircuitLabels, Histogram, fn() -> Histogram>,
        rejections: Family<RejectionLabels, Counter>,
        fallbacks: Family<CircuitLabels, Counter>,
        transitions: Family<TransitionLabels, Counter>,
        state: Family<CircuitLabels, Gauge>,
    }

    fn duration_histogram() -> Histogram {
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    impl PrometheusMetricSink {
        /// Creates the metric families and registers them in `registry`.
        pub fn register(registry: &mut Registry, prefix: &str) -> Self {
            let sink = Self {
                calls: Family::default(),
                durations: Family::new_with_constructor(duration_histogram),
                rejections: Family::default(),
                fallbacks: Family::default(),
                transitions: Family::default(),
                state: Family::default(),
            };

            registry.register(
                format!("{prefix}_calls"),
                "Calls that reached the protected operation",
                sink.calls.clone(),
            );
            registry.register(
                format!("{prefix}_call_duration_seconds"),
                "Duration of protected calls",
                sink.durations.clone(),
            );
            registry.register(
                format!("{prefix}_rejections"),
                "Calls refused by an open or saturated half-open breaker",
                sink.rejections.clone(),
            );
            registry.register(
                format!("{prefix}_fallbacks"),
                "Degraded results produced by a fallback",
                sink.fallbacks.clone(),
            );
            registry.register(
                format!("{prefix}_transitions"),
                "Breaker state transitions",
                sink.transitions.clone(),
            );
            registry.register(
                format!("{prefix}_state"),
                "Current breaker state (0 closed, 1 open, 2 half-open)",
                sink.state.clone(),
            );

            sink
        }
    }

    impl MetricSink for PrometheusMetricSink {
        fn record_call(&self, key: &str, outcome: &CallOutcome, slow: bool) {
            let kind = if outcome.succeeded {
                CallKind::Success
            } else {
                CallKind::Failure
            };
            self.calls
                .get_or_create(&CallLabels {
                    circuit: key.to_owned(),
                    outcome: kind,
                    slow: slow.to_string(),
                })
                .inc();
            self.durations
                .get_or_create(&CircuitLabels {
                    circuit: key.to_owned(),
                })
                .observe(outcome.duration.as_secs_f64());
        }

        fn record_rejection(&self, key: &str, state: State) {
            self.rejections
                .get_or_create(&RejectionLabels {
                    circuit: key.to_owned(),
                    state: state.as_str().to_owned(),
                })
                .inc();
        }

        fn record_fallback(&self, key: &str) {
            self.fallbacks
                .get_or_create(&CircuitLabels {
                    circuit: key.to_owned(),
                })
                .inc();
        }

        fn record_state_transition(&self, name: &str, from: State, to: State) {
            self.transitions
                .get_or_create(&TransitionLabels {
                    circuit: name.to_owned(),
                    from: from.as_str().to_owned(),
                    to: to.as_str().to_owned(),
                })
                .inc();
            self.state
                .get_or_create(&CircuitLabels {
                    circuit: name.to_owned(),
                })
                .set(to.as_gauge());
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use prometheus_client::encoding::text::encode;
        use std::time::{Duration, Instant};

        #[test]
        fn exports_calls_and_transitions() {
            let mut registry = Registry::default();
            let sink = PrometheusMetricSink::register(&mut registry, "circuit_breaker");

            let outcome = CallOutcome::failure(Duration::from_millis(20), Instant::now());
            sink.record_call("get_categories", &outcome, false);
            sink.record_state_transition("get-categories", State::Closed, State::Open);

            let mut text = String::new();
            encode(&mut text, &registry).unwrap();
            assert!(text.contains("circuit_breaker_calls_total"));
            assert!(text.contains("circuit=\"get_categories\""));
            assert!(text.contains("outcome=\"Failure\""));
            assert!(text.contains("circuit_breaker_state{circuit=\"get-categories\"} 1"));
        }
    }
}
