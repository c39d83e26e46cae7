//! # tripwire
//!
//! Circuit protection for fallible asynchronous operations: a count-based
//! sliding window of call outcomes, a breaker state machine, fallback
//! policies and a named circuit registry.
//!
//! ## States
//!
//! - **Closed**: calls flow through; each outcome lands in a window of the
//!   last `slidingWindowSize` calls. Once `minimumNumberOfCalls` outcomes are
//!   held and either the failure rate or the slow-call rate reaches its
//!   threshold, the breaker opens.
//! - **Open**: calls are refused without touching the backend until
//!   `openStateDelay` has passed.
//! - **Half-Open**: `permittedNumberOfCallsInHalfOpenState` trial calls are
//!   admitted. Any failed trial reopens the breaker; once all trials
//!   completed below both thresholds it closes again. A half-open breaker
//!   that does not finish its trials within `halfOpenStateMaxDelay` reopens.
//!
//! Timers are evaluated lazily on admission, there is no background task.
//!
//! ## Usage
//!
//! ```rust
//! use tripwire::{CircuitRegistry, Degradation};
//!
//! # tokio_test::block_on(async {
//! let registry = CircuitRegistry::default();
//!
//! let circuit = registry
//!     .build_circuit::<Vec<String>, String>("get-categories", "get_categories")
//!     .func(|| async { Err("connection refused".to_string()) });
//!
//! let result = circuit.execute().await;
//! assert!(result.is_degraded());
//! assert!(result.value().is_empty());
//!
//! // The breaker is still closed: report "service unavailable, retry".
//! assert_eq!(result.degradation(), Some(Degradation::Unavailable));
//! # });
//! ```
//!
//! ## Features
//!
//! - `std` - Standard library support (default)
//! - `prometheus` - Prometheus metrics through `PrometheusMetricSink`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod breaker;
mod circuit;
mod clock;
mod config;
mod error;
mod fallback;
mod hook;
mod metrics;
mod policy;
pub mod prelude;
mod registry;
mod state;
mod window;

// Re-exports
pub use breaker::{Breaker, BreakerBuilder, Permit};
pub use circuit::Circuit;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BreakerConfig, BreakerConfigBuilder, BreakerSettings, RegistryConfig};
pub use error::{CircuitError, CircuitResult, ConfigError, Refusal};
pub use fallback::{
    DefaultFallback, Degradation, Fallback, FallbackResult, FnFallback, MessageFallback,
    ValueFallback,
};
pub use hook::HookRegistry;
#[cfg(feature = "prometheus")]
pub use metrics::PrometheusMetricSink;
pub use metrics::{MetricSink, NullMetricSink};
pub use policy::{BreakerPolicy, RateThresholdPolicy};
pub use registry::CircuitRegistry;
pub use state::State;
pub use window::{CallOutcome, SlidingWindow, WindowSnapshot};
