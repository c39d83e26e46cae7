//! Error types for circuits and their configuration.

use thiserror::Error;

/// Result type for breaker-protected operations.
pub type CircuitResult<T, E> = Result<T, CircuitError<E>>;

/// Why a protected call did not produce the operation's value.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The breaker is open, the operation was not invoked.
    #[error("circuit '{circuit}' is open")]
    Open {
        /// Name of the refusing circuit.
        circuit: String,
    },

    /// The breaker is half-open and every trial slot is taken.
    #[error("circuit '{circuit}' is half-open and its trial calls are exhausted")]
    HalfOpenQuotaExhausted {
        /// Name of the refusing circuit.
        circuit: String,
    },

    /// The underlying operation failed.
    #[error("operation failed: {0}")]
    Operation(E),

    /// The underlying operation panicked.
    #[error("operation on circuit '{circuit}' panicked: {message}")]
    Panicked {
        /// Name of the circuit running the operation.
        circuit: String,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// `execute` was called before an operation was attached.
    #[error("circuit '{circuit}' has no operation attached")]
    MissingOperation {
        /// Name of the circuit.
        circuit: String,
    },
}

impl<E> CircuitError<E> {
    /// True when the breaker refused the call without invoking the operation.
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            CircuitError::Open { .. } | CircuitError::HalfOpenQuotaExhausted { .. }
        )
    }

    /// The operation's own error, if that is what this is.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            CircuitError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

/// Admission refusal reported by a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Refusal {
    /// The breaker is open.
    #[error("circuit '{circuit}' is open")]
    Open {
        /// Name of the refusing circuit.
        circuit: String,
    },

    /// The breaker is half-open and every trial slot is taken.
    #[error("circuit '{circuit}' is half-open and its trial calls are exhausted")]
    HalfOpenQuotaExhausted {
        /// Name of the refusing circuit.
        circuit: String,
    },
}

impl<E> From<Refusal> for CircuitError<E> {
    fn from(refusal: Refusal) -> Self {
        match refusal {
            Refusal::Open { circuit } => CircuitError::Open { circuit },
            Refusal::HalfOpenQuotaExhausted { circuit } => {
                CircuitError::HalfOpenQuotaExhausted { circuit }
            }
        }
    }
}

/// Errors raised while building or loading breaker configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting is out of its accepted range.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// The offending setting.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The configuration document could not be parsed.
    #[error("failed to parse circuit configuration: {0}")]
    Toml(#[from] toml::de::Error),
}
