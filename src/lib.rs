//! # Breakwater
//!
//! > *"Calm water behind the wall"*
//!
//! Client-side failure handling for applications that talk to flaky backends
//! over flaky networks.
//!
//! ## Philosophy
//!
//! **Breakwater** keeps the **pure core, imperative shell** split:
//! - **Pure** = classification rules, retry schedules and breaker transitions
//!   (plain data, deterministic, testable without a runtime)
//! - **Shell** = the executor, monitor, queue and logger that sleep, persist and
//!   notify
//!
//! ## Components
//!
//! | Component | Does |
//! |-----------|------|
//! | [`ErrorClassifier`] | turns any [`RawError`] into a structured [`AppError`] |
//! | [`CircuitBreakers`] | per-operation Closed/Open/HalfOpen breakers |
//! | [`RetryExecutor`] | bounded exponential backoff behind a breaker |
//! | [`NetworkMonitor`] | connectivity state and change notifications |
//! | [`OfflineQueue`] | persisted deferred work, replayed on reconnect |
//! | [`with_fallback`] | primary-or-substitute degradation |
//! | [`ErrorLogger`] | bounded, persisted error history with stats |
//! | [`Resilience`] | owns one of each and wires them together |
//!
//! ## Quick Example
//!
//! ```rust
//! use breakwater::{ErrorContext, RawError, Resilience, RetryOptions};
//!
//! # tokio_test::block_on(async {
//! let resilience = Resilience::builder().build();
//!
//! // Classify a failure without running anything
//! let error = resilience.classify(
//!     &RawError::new("duplicate key").with_code("23505"),
//!     &ErrorContext::for_operation("create_project"),
//! );
//! assert!(!error.is_retryable());
//!
//! // Run work through the breaker and backoff loop
//! let value = resilience
//!     .executor()
//!     .run(|| async { Ok::<_, RawError>(42) }, &RetryOptions::new().operation_id("answer"))
//!     .await
//!     .unwrap();
//! assert_eq!(value, 42);
//! # });
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod circuit;
pub mod classify;
pub mod clock;
pub mod config;
pub mod degrade;
pub mod error;
pub mod logger;
pub mod network;
pub mod queue;
pub mod resilience;
pub mod retry;
pub mod store;
pub mod testing;

// Re-exports
pub use circuit::{BreakerConfig, CircuitBreakers};
pub use classify::{classify, ErrorClassifier};
pub use clock::{Clock, SystemClock};
pub use config::{ConfigError, ResilienceConfig};
pub use degrade::{with_fallback, with_fallback_value};
pub use error::{AppError, ErrorContext, ErrorKind, RawError, Severity};
pub use logger::{ErrorLogger, ErrorSink, ErrorStats};
pub use network::{ConnectivityState, NetworkMonitor, Quality};
pub use queue::{OfflineQueue, Priority};
pub use resilience::Resilience;
pub use retry::{
    Deferred, Outcome, RetryError, RetryExecutor, RetryExhausted, RetryOptions, RetryPolicy,
};
pub use store::{FileStore, KeyValueStore, MemoryStore};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{AppError, ErrorContext, ErrorKind, RawError, Severity};
    pub use crate::queue::Priority;
    pub use crate::resilience::Resilience;
    pub use crate::retry::{Deferred, Outcome, RetryError, RetryOptions, RetryPolicy};
    pub use crate::{with_fallback, with_fallback_value};
}
