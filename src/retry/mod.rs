//! Retry with bounded exponential backoff, guarded by circuit breakers.
//!
//! - **Pure Core**: [`RetryPolicy`] is just data: no side effects, easily testable
//! - **Imperative Shell**: [`RetryExecutor`] sleeps, calls, records, and logs
//!
//! # Quick Start
//!
//! ```rust
//! use breakwater::{ErrorLogger, RawError, RetryExecutor, RetryOptions};
//! use breakwater::circuit::CircuitBreakers;
//!
//! # tokio_test::block_on(async {
//! let executor = RetryExecutor::new(CircuitBreakers::default(), ErrorLogger::in_memory());
//!
//! let result = executor
//!     .run(|| async { Err::<(), _>(RawError::new("dup").with_code("23505")) }, &RetryOptions::new())
//!     .await;
//!
//! // terminal codes are not retried
//! assert_eq!(result.unwrap_err().attempts(), 1);
//! # });
//! ```
//!
//! # Schedule
//!
//! With the default policy (3 attempts, 1s base, factor 2, 30s cap) an operation
//! that always fails is attempted at t=0, t=1s and t=3s, then reported.
//!
//! # Retry authority
//!
//! Whether a failure is retried is decided only by the predicate on
//! [`RetryOptions`] (or [`default_should_retry`]). The `retryable` flag on a
//! classified [`AppError`](crate::AppError) is a hint for UI layers and is not
//! consulted here.
//!
//! # Error Types
//!
//! - [`RetryError`]: circuit-open or terminal failure
//! - [`RetryExhausted`]: attempt count and duration of a failed sequence

mod error;
mod executor;
mod policy;

pub use error::{RetryError, RetryExhausted};
pub use executor::{default_should_retry, Deferred, Outcome, RetryExecutor, RetryOptions};
pub use policy::{JitterStrategy, RetryEvent, RetryPolicy, DEFAULT_MAX_DELAY};
