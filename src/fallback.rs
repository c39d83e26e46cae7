//! Fallback policies and the discriminated result of a protected call.

use std::fmt::Display;

use crate::error::CircuitError;
use crate::state::State;

/// Produces a substitute value when a protected call fails or is refused.
///
/// Implementations must not panic and must not touch breaker state. A panic
/// in `recover` is not absorbed by [`Circuit::execute`](crate::Circuit::execute).
pub trait Fallback<T, E>: Send + Sync {
    /// Substitute value for `error`.
    fn recover(&self, error: &CircuitError<E>) -> T;
}

/// Falls back to `T::default()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFallback;

impl<T: Default, E> Fallback<T, E> for DefaultFallback {
    fn recover(&self, _error: &CircuitError<E>) -> T {
        T::default()
    }
}

/// Falls back to a clone of a fixed value.
#[derive(Debug, Clone)]
pub struct ValueFallback<T>(pub T);

impl<T, E> Fallback<T, E> for ValueFallback<T>
where
    T: Clone + Send + Sync,
{
    fn recover(&self, _error: &CircuitError<E>) -> T {
        self.0.clone()
    }
}

/// Falls back to the rendered error message.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageFallback;

impl<E: Display> Fallback<String, E> for MessageFallback {
    fn recover(&self, error: &CircuitError<E>) -> String {
        error.to_string()
    }
}

/// Falls back to whatever a closure computes from the error.
#[derive(Clone)]
pub struct FnFallback<F>(pub F);

impl<T, E, F> Fallback<T, E> for FnFallback<F>
where
    F: Fn(&CircuitError<E>) -> T + Send + Sync,
{
    fn recover(&self, error: &CircuitError<E>) -> T {
        (self.0)(error)
    }
}

/// How a degraded result should be surfaced to the caller's own clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degradation {
    /// The breaker is still closed: the backend is failing but calls are
    /// flowing, retrying later is reasonable ("service unavailable").
    Unavailable,

    /// The breaker is open or probing: calls are being refused ("internal
    /// error", do not retry right away).
    Exhausted,
}

impl Degradation {
    /// Classifies a degraded result by the breaker state observed after it.
    pub fn from_state(state: State) -> Self {
        match state {
            State::Closed => Degradation::Unavailable,
            State::Open | State::HalfOpen => Degradation::Exhausted,
        }
    }

    /// Whether the caller may retry soon.
    pub fn is_retryable(self) -> bool {
        self == Degradation::Unavailable
    }
}

/// Result of [`Circuit::execute`](crate::Circuit::execute): either the
/// operation's own value or a fallback value tagged with its cause.
#[derive(Debug)]
pub enum FallbackResult<T, E> {
    /// The operation succeeded.
    Success(T),

    /// The operation failed or was refused and the fallback supplied `value`.
    Degraded {
        /// Value produced by the fallback.
        value: T,
        /// Why the primary path did not produce a value.
        error: CircuitError<E>,
        /// Breaker state observed once the call finished.
        state: State,
    },
}

impl<T, E> FallbackResult<T, E> {
    /// True for the operation's own value.
    pub fn is_success(&self) -> bool {
        matches!(self, FallbackResult::Success(_))
    }

    /// True for a fallback value.
    pub fn is_degraded(&self) -> bool {
        !self.is_success()
    }

    /// The value, whichever path produced it.
    pub fn value(&self) -> &T {
        match self {
            FallbackResult::Success(value) | FallbackResult::Degraded { value, .. } => value,
        }
    }

    /// Consumes the result, returning the value whichever path produced it.
    pub fn into_value(self) -> T {
        match self {
            FallbackResult::Success(value) | FallbackResult::Degraded { value, .. } => value,
        }
    }

    /// The cause of a degraded result.
    pub fn error(&self) -> Option<&CircuitError<E>> {
        match self {
            FallbackResult::Success(_) => None,
            FallbackResult::Degraded { error, .. } => Some(error),
        }
    }

    /// Breaker state recorded with a degraded result.
    pub fn breaker_state(&self) -> Option<State> {
        match self {
            FallbackResult::Success(_) => None,
            FallbackResult::Degraded { state, .. } => Some(*state),
        }
    }

    /// How a degraded result should be reported.
    pub fn degradation(&self) -> Option<Degradation> {
        self.breaker_state().map(Degradation::from_state)
    }

    /// Discards the fallback value and returns the cause instead.
    pub fn into_result(self) -> Result<T, CircuitError<E>> {
        match self {
            FallbackResult::Success(value) => Ok(value),
            FallbackResult::Degraded { error, .. } => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_error() -> CircuitError<String> {
        CircuitError::Open {
            circuit: "get-categories".into(),
        }
    }

    #[test]
    fn default_fallback_yields_default() {
        let value: Vec<u32> = DefaultFallback.recover(&open_error());
        assert!(value.is_empty());
    }

    #[test]
    fn message_fallback_renders_error() {
        let message = MessageFallback.recover(&CircuitError::Operation("db down".to_string()));
        assert_eq!(message, "operation failed: db down");
    }

    #[test]
    fn fn_fallback_sees_the_cause() {
        let fallback = FnFallback(|e: &CircuitError<String>| if e.is_refusal() { -1 } else { 0 });
        assert_eq!(fallback.recover(&open_error()), -1);
        assert_eq!(fallback.recover(&CircuitError::Operation("x".into())), 0);
    }

    #[test]
    fn degraded_results_carry_state() {
        let result: FallbackResult<u32, String> = FallbackResult::Degraded {
            value: 0,
            error: CircuitError::Operation("timeout".into()),
            state: State::Closed,
        };
        assert!(result.is_degraded());
        assert_eq!(result.degradation(), Some(Degradation::Unavailable));
        assert!(result.degradation().unwrap().is_retryable());
        assert!(matches!(result.into_result(), Err(CircuitError::Operation(_))));

        let success: FallbackResult<u32, String> = FallbackResult::Success(0);
        assert!(success.is_success());
        assert_eq!(success.degradation(), None);
        assert_eq!(Degradation::from_state(State::HalfOpen), Degradation::Exhausted);
    }
}
