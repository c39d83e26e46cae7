//! The circuit facade: breaker admission, operation, outcome recording and fallback.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::breaker::Breaker;
use crate::error::CircuitError;
use crate::fallback::{DefaultFallback, Fallback, FallbackResult};
use crate::state::State;

type Operation<T, E> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;
type Classifier<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// A named, request-scoped wrapper around a shared [`Breaker`].
///
/// ```rust
/// use std::sync::Arc;
/// use tripwire::{Breaker, BreakerConfig, Circuit};
///
/// # tokio_test::block_on(async {
/// let breaker = Arc::new(Breaker::new("get-categories", BreakerConfig::default()));
/// let circuit: Circuit<u64, String> = Circuit::new(breaker, "get_categories")
///     .func(|| async { Ok(42) });
///
/// let result = circuit.execute().await;
/// assert!(result.is_success());
/// assert_eq!(result.into_value(), 42);
/// # });
/// ```
pub struct Circuit<T, E> {
    breaker: Arc<Breaker>,
    metrics_key: String,
    fallback: Arc<dyn Fallback<T, E>>,
    operation: Option<Operation<T, E>>,
    classifier: Option<Classifier<E>>,
}

impl<T, E> Clone for Circuit<T, E> {
    fn clone(&self) -> Self {
        Self {
            breaker: Arc::clone(&self.breaker),
            metrics_key: self.metrics_key.clone(),
            fallback: Arc::clone(&self.fallback),
            operation: self.operation.clone(),
            classifier: self.classifier.clone(),
        }
    }
}

impl<T, E> Circuit<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Creates a circuit over `breaker` falling back to `T::default()`.
    pub fn new(breaker: Arc<Breaker>, metrics_key: impl Into<String>) -> Self
    where
        T: Default,
    {
        Self::with_fallback(breaker, metrics_key, DefaultFallback)
    }

    /// Creates a circuit over `breaker` with an explicit fallback.
    pub fn with_fallback<F>(
        breaker: Arc<Breaker>,
        metrics_key: impl Into<String>,
        fallback: F,
    ) -> Self
    where
        F: Fallback<T, E> + 'static,
    {
        Self {
            breaker,
            metrics_key: metrics_key.into(),
            fallback: Arc::new(fallback),
            operation: None,
            classifier: None,
        }
    }

    /// Attaches the operation run by [`execute`](Self::execute).
    pub fn func<F, Fut>(mut self, operation: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.operation = Some(Arc::new(move || operation().boxed()));
        self
    }

    /// Replaces the fallback.
    pub fn fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fallback<T, E> + 'static,
    {
        self.fallback = Arc::new(fallback);
        self
    }

    /// Decides which operation errors count against the breaker.
    ///
    /// Errors for which `is_failure` returns false are recorded as successful
    /// calls (a "not found" is not an outage) but still reach the fallback.
    pub fn classify<F>(mut self, is_failure: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.classifier = Some(Arc::new(is_failure));
        self
    }

    /// Name of the underlying breaker.
    pub fn name(&self) -> &str {
        self.breaker.name()
    }

    /// Key under which call metrics are reported.
    pub fn metrics_key(&self) -> &str {
        &self.metrics_key
    }

    /// Current state of the underlying breaker.
    pub fn state(&self) -> State {
        self.breaker.state()
    }

    /// The shared breaker.
    pub fn breaker(&self) -> &Arc<Breaker> {
        &self.breaker
    }

    /// Runs the attached operation under protection.
    ///
    /// Never fails: errors, refusals and operation panics all come back as
    /// [`FallbackResult::Degraded`]. This relies on the [`Fallback`] contract;
    /// a fallback that panics propagates its panic after the call outcome was
    /// already recorded.
    pub async fn execute(&self) -> FallbackResult<T, E> {
        match &self.operation {
            Some(operation) => {
                let operation = Arc::clone(operation);
                self.call(move || operation()).await
            }
            None => self.degrade(CircuitError::MissingOperation {
                circuit: self.name().to_owned(),
            }),
        }
    }

    /// Runs `operation` under protection, like [`execute`](Self::execute).
    pub async fn call<F, Fut>(&self, operation: F) -> FallbackResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = match self.breaker.acquire_for(&self.metrics_key) {
            Ok(permit) => permit,
            Err(refusal) => return self.degrade(refusal.into()),
        };

        // A panic while building the future and one while polling it are
        // both plain failures of this call.
        let completed = match std::panic::catch_unwind(AssertUnwindSafe(operation)) {
            Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
            Err(payload) => Err(payload),
        };

        match completed {
            Ok(Ok(value)) => {
                self.breaker.complete_for(&self.metrics_key, permit, true);
                debug!(circuit = %self.name(), state = %self.state(), "circuit call succeeded");
                FallbackResult::Success(value)
            }
            Ok(Err(error)) => {
                let counts = self
                    .classifier
                    .as_ref()
                    .is_none_or(|is_failure| is_failure(&error));
                self.breaker.complete_for(&self.metrics_key, permit, !counts);
                self.degrade(CircuitError::Operation(error))
            }
            Err(payload) => {
                self.breaker.complete_for(&self.metrics_key, permit, false);
                self.degrade(CircuitError::Panicked {
                    circuit: self.name().to_owned(),
                    message: panic_message(payload.as_ref()),
                })
            }
        }
    }

    fn degrade(&self, error: CircuitError<E>) -> FallbackResult<T, E> {
        let state = self.breaker.state();
        let cause = match &error {
            CircuitError::Open { .. } => "open",
            CircuitError::HalfOpenQuotaExhausted { .. } => "half-open quota exhausted",
            CircuitError::Operation(_) => "operation error",
            CircuitError::Panicked { .. } => "operation panicked",
            CircuitError::MissingOperation { .. } => "no operation",
        };
        if error.is_refusal() {
            debug!(circuit = %self.name(), state = %state, cause, "serving fallback");
        } else {
            warn!(circuit = %self.name(), state = %state, cause, "serving fallback");
        }

        let value = self.fallback.recover(&error);
        self.breaker.metric_sink().record_fallback(&self.metrics_key);
        FallbackResult::Degraded {
            value,
            error,
            state,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
