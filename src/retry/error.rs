//! Error types for retry operations.

use std::time::Duration;

use thiserror::Error;

use crate::error::{AppError, RawError};

/// Metadata about a retry sequence that ended in failure.
///
/// Contains the final error along with how many attempts were made and how long
/// the whole sequence took.
///
/// # Examples
///
/// ```rust
/// use breakwater::RetryExhausted;
/// use std::time::Duration;
///
/// let exhausted = RetryExhausted::new("connection reset", 3, Duration::from_secs(3));
/// assert_eq!(exhausted.attempts, 3);
/// assert_eq!(exhausted.into_error(), "connection reset");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    /// The error from the final attempt.
    pub final_error: E,
    /// Total number of attempts made.
    pub attempts: u32,
    /// Total time spent, including backoff sleeps.
    pub total_duration: Duration,
}

impl<E> RetryExhausted<E> {
    /// Create a new RetryExhausted error.
    pub fn new(final_error: E, attempts: u32, total_duration: Duration) -> Self {
        Self {
            final_error,
            attempts,
            total_duration,
        }
    }

    /// Extract the final error, discarding metadata.
    pub fn into_error(self) -> E {
        self.final_error
    }

    /// Get a reference to the final error.
    pub fn error(&self) -> &E {
        &self.final_error
    }
}

impl<E: std::fmt::Display> std::fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "gave up after {} attempts ({:?}): {}",
            self.attempts, self.total_duration, self.final_error
        )
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryExhausted<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.final_error)
    }
}

/// Why [`RetryExecutor::run`](crate::RetryExecutor::run) failed.
#[derive(Debug, Error)]
pub enum RetryError {
    /// The breaker for this operation is open. The operation was not invoked.
    ///
    /// Synthetic: never classified, never logged to the error log, and never
    /// counted against the breaker.
    #[error("service temporarily disabled: circuit open for `{operation_id}` (retry in {retry_after:?})")]
    CircuitOpen {
        /// Operation whose breaker is open.
        operation_id: String,
        /// Time left in the cooldown window.
        retry_after: Duration,
    },

    /// The operation failed and will not be retried further.
    #[error("{error}")]
    Failed {
        /// Classified final error, as recorded in the error log.
        error: AppError,
        /// Whether the retry predicate still considered the final error
        /// retryable, meaning attempts ran out rather than a terminal error.
        retryable: bool,
        /// Attempt metadata and the raw final error.
        #[source]
        exhausted: RetryExhausted<RawError>,
    },
}

impl RetryError {
    /// Returns true for the synthetic circuit-open failure.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// The classified error, unless the circuit was open.
    pub fn app_error(&self) -> Option<&AppError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            Self::CircuitOpen { .. } => None,
        }
    }

    /// Attempts made before giving up. Zero when the circuit was open.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Failed { exhausted, .. } => exhausted.attempts,
            Self::CircuitOpen { .. } => 0,
        }
    }

    /// Message suitable for end users.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Failed { error, .. } => error.user_message(),
            Self::CircuitOpen { .. } => {
                "This service is temporarily disabled after repeated failures. Please try again shortly."
            }
        }
    }
}
