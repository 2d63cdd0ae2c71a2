//! The retry loop: breaker check, attempt, classify, back off.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::time::Instant;

use crate::circuit::CircuitBreakers;
use crate::classify::{self, codes, ErrorClassifier};
use crate::error::{ErrorContext, RawError, OPERATION_ID_KEY, VALIDATION_ERROR};
use crate::logger::ErrorLogger;
use crate::network::ConnectivityReader;
use crate::queue::{OfflineQueue, Priority};

use super::error::{RetryError, RetryExhausted};
use super::policy::{RetryEvent, RetryPolicy};

type Predicate = Arc<dyn Fn(&RawError) -> bool + Send + Sync>;
type Hook = Arc<dyn Fn(&RetryEvent<'_, RawError>) + Send + Sync>;

/// Default retry predicate.
///
/// Gives up on known terminal machine codes, validation and authentication
/// failures, and 4xx statuses. Everything else is retried.
///
/// # Examples
///
/// ```rust
/// use breakwater::{retry::default_should_retry, RawError};
///
/// assert!(default_should_retry(&RawError::new("Failed to fetch")));
/// assert!(default_should_retry(&RawError::new("bad gateway").with_status(502)));
/// assert!(!default_should_retry(&RawError::new("dup").with_code("23505")));
/// assert!(!default_should_retry(&RawError::new("JWT expired")));
/// assert!(!default_should_retry(&RawError::new("gone").with_status(404)));
/// assert!(!default_should_retry(&RawError::validation("required", "email")));
/// ```
pub fn default_should_retry(error: &RawError) -> bool {
    if error.code.as_deref().is_some_and(codes::is_terminal) {
        return false;
    }
    if error.is_named(VALIDATION_ERROR) || classify::looks_like_auth(error) {
        return false;
    }
    !error.is_client_error()
}

/// Per-call retry options.
///
/// # Examples
///
/// ```rust
/// use breakwater::{RetryOptions, RetryPolicy};
/// use std::time::Duration;
///
/// let options = RetryOptions::new()
///     .operation_id("fetch_reports")
///     .policy(RetryPolicy::default().with_max_attempts(5))
///     .should_retry(|err| err.status != Some(429));
///
/// assert_eq!(options.operation_id_ref(), Some("fetch_reports"));
/// ```
#[derive(Clone, Default)]
pub struct RetryOptions {
    policy: Option<RetryPolicy>,
    operation_id: Option<String>,
    should_retry: Option<Predicate>,
    on_retry: Option<Hook>,
    context: ErrorContext,
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("policy", &self.policy)
            .field("operation_id", &self.operation_id)
            .field("should_retry", &self.should_retry.as_ref().map(|_| "<fn>"))
            .field("on_retry", &self.on_retry.as_ref().map(|_| "<fn>"))
            .field("context", &self.context)
            .finish()
    }
}

impl RetryOptions {
    /// Options using the executor's default policy and predicate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the policy for this call.
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Guard this call with the breaker for `id`.
    pub fn operation_id(mut self, id: impl Into<String>) -> Self {
        self.operation_id = Some(id.into());
        self
    }

    /// Replace the default retry predicate.
    ///
    /// The predicate is the only thing that decides whether a failure is
    /// retried; the classifier's `retryable` hint is not consulted.
    pub fn should_retry<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&RawError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// Observe each failed attempt.
    ///
    /// The hook runs synchronously before each backoff sleep, and once more for
    /// the final failure with `next_delay == None`.
    pub fn on_retry<H>(mut self, hook: H) -> Self
    where
        H: Fn(&RetryEvent<'_, RawError>) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Context merged into the classified error on terminal failure.
    pub fn context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    /// The configured operation id.
    pub fn operation_id_ref(&self) -> Option<&str> {
        self.operation_id.as_deref()
    }

    fn retries(&self, error: &RawError) -> bool {
        match &self.should_retry {
            Some(predicate) => predicate(error),
            None => default_should_retry(error),
        }
    }
}

/// Work to enqueue for later replay if a call ultimately fails.
#[derive(Debug, Clone, PartialEq)]
pub struct Deferred {
    /// Tag used to look up the replay executor.
    pub operation: String,
    /// Payload handed to the replay executor.
    pub data: Value,
    /// Queue priority.
    pub priority: Priority,
}

impl Deferred {
    /// Describe deferred work.
    pub fn new(operation: impl Into<String>, data: Value, priority: Priority) -> Self {
        Self {
            operation: operation.into(),
            data,
            priority,
        }
    }
}

/// Result of [`RetryExecutor::run_or_enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation succeeded.
    Completed(T),
    /// The operation failed and was queued under this id.
    Queued(String),
}

impl<T> Outcome<T> {
    /// The value, if the operation completed.
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Queued(_) => None,
        }
    }

    /// Returns true if the work was queued.
    pub fn is_queued(&self) -> bool {
        matches!(self, Outcome::Queued(_))
    }
}

/// Runs units of work with bounded exponential backoff.
///
/// Each attempt is preceded by a breaker check when an operation id is given.
/// Failures are recorded against the breaker, judged by the retry predicate, and
/// either retried after a backoff sleep or classified and logged as terminal.
///
/// # Examples
///
/// ```rust
/// use breakwater::{ErrorLogger, RawError, RetryExecutor, RetryOptions, RetryPolicy};
/// use breakwater::circuit::CircuitBreakers;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let executor = RetryExecutor::new(CircuitBreakers::default(), ErrorLogger::in_memory())
///     .with_policy(RetryPolicy::exponential(Duration::from_millis(1)));
///
/// let mut calls = 0;
/// let value = executor
///     .run(
///         || {
///             calls += 1;
///             let n = calls;
///             async move {
///                 if n < 2 { Err(RawError::new("Failed to fetch")) } else { Ok(n) }
///             }
///         },
///         &RetryOptions::new().operation_id("demo"),
///     )
///     .await
///     .unwrap();
///
/// assert_eq!(value, 2);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    breakers: CircuitBreakers,
    logger: ErrorLogger,
    classifier: ErrorClassifier,
    connectivity: ConnectivityReader,
    queue: Option<OfflineQueue>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Executor with the default policy, assuming connectivity is always up.
    pub fn new(breakers: CircuitBreakers, logger: ErrorLogger) -> Self {
        Self {
            breakers,
            logger,
            classifier: ErrorClassifier::default(),
            connectivity: ConnectivityReader::always_online(),
            queue: None,
            policy: RetryPolicy::default(),
        }
    }

    /// Use a custom classifier for terminal failures.
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Read connectivity from a network monitor.
    pub fn with_connectivity(mut self, connectivity: ConnectivityReader) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Enable [`run_or_enqueue`](Self::run_or_enqueue).
    pub fn with_queue(mut self, queue: OfflineQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Default policy for calls that do not override it.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The breaker registry consulted by this executor.
    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    /// Run `operation` until it succeeds, fails terminally, or runs out of attempts.
    ///
    /// `operation` is called once per attempt and must produce a fresh future
    /// each time.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F, options: &RetryOptions) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<RawError>,
    {
        let policy = options.policy.as_ref().unwrap_or(&self.policy);
        let operation_id = options.operation_id.as_deref();
        let start = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            if let Some(id) = operation_id {
                if self.breakers.is_open(id) {
                    let retry_after = self.breakers.retry_after(id);
                    tracing::warn!(operation_id = id, ?retry_after, "circuit open, failing fast");
                    return Err(RetryError::CircuitOpen {
                        operation_id: id.to_string(),
                        retry_after,
                    });
                }
            }

            let error: RawError = match operation().await {
                Ok(value) => {
                    if let Some(id) = operation_id {
                        self.breakers.record_success(id);
                    }
                    if attempt > 1 {
                        tracing::debug!(operation_id, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error.into(),
            };

            if let Some(id) = operation_id {
                self.breakers.record_failure(id);
            }

            let retryable = options.retries(&error);
            let delay = if retryable {
                policy.delay_with_jitter(attempt)
            } else {
                None
            };

            if let Some(hook) = &options.on_retry {
                let event = RetryEvent {
                    attempt,
                    error: &error,
                    next_delay: delay,
                    elapsed: start.elapsed(),
                };
                hook(&event);
            }

            match delay {
                Some(d) => {
                    tracing::debug!(operation_id, attempt, delay_ms = d.as_millis() as u64, error = %error, "attempt failed, backing off");
                    tokio::time::sleep(d).await;
                }
                None => {
                    let exhausted = RetryExhausted::new(error, attempt, start.elapsed());
                    return Err(self.give_up(exhausted, retryable, options));
                }
            }
        }
    }

    /// Like [`run`](Self::run), but a terminal failure that was still retryable
    /// is converted into a queued item instead of being surfaced.
    ///
    /// Non-retryable failures (validation, authentication, terminal codes) and
    /// circuit-open failures are always surfaced. Without a configured queue this
    /// behaves exactly like `run`.
    pub async fn run_or_enqueue<T, E, F, Fut>(
        &self,
        operation: F,
        options: &RetryOptions,
        deferred: Deferred,
    ) -> Result<Outcome<T>, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<RawError>,
    {
        match (self.run(operation, options).await, &self.queue) {
            (Ok(value), _) => Ok(Outcome::Completed(value)),
            (Err(RetryError::Failed { retryable: true, .. }), Some(queue)) => {
                let id = queue.enqueue(deferred.operation, deferred.data, deferred.priority);
                Ok(Outcome::Queued(id))
            }
            (Err(err), _) => Err(err),
        }
    }

    fn give_up(
        &self,
        exhausted: RetryExhausted<RawError>,
        retryable: bool,
        options: &RetryOptions,
    ) -> RetryError {
        let mut run = ErrorContext::new().with("attempts", exhausted.attempts);
        if let Some(id) = &options.operation_id {
            run.insert(OPERATION_ID_KEY, id.clone());
        }
        let context = options.context.clone().merged(&run);

        let error = self.classifier.classify(
            exhausted.error(),
            &context,
            self.connectivity.is_online(),
        );
        tracing::debug!(
            operation_id = options.operation_id.as_deref(),
            attempts = exhausted.attempts,
            kind = %error.kind(),
            "giving up"
        );
        self.logger.log(error.clone());

        RetryError::Failed {
            error,
            retryable,
            exhausted,
        }
    }
}
