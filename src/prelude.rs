//! Re-exports the types most callers need.
//!
//! # Example
//! ```rust,no_run
//! use tripwire::prelude::*;
//! ```

pub use crate::{
    Breaker, BreakerConfig, Circuit, CircuitError, CircuitRegistry, Degradation, Fallback,
    FallbackResult, State,
};
