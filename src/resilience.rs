//! The process-wide context owning one instance of every component.
//!
//! Build one [`Resilience`] at startup and pass clones of it around. Building
//! subscribes the network monitor, restores the offline queue and connects the
//! two, so every offline→online transition schedules exactly one replay pass
//! from the moment the context exists. Replays are spawned on the runtime that
//! was current at build time (or the one given to
//! [`ResilienceBuilder::runtime`]), whichever thread delivers the signal.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use breakwater::{RawError, Resilience};
//! use breakwater::queue::Priority;
//! use breakwater::testing::SimulatedConnectivity;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let network = SimulatedConnectivity::new(false);
//! let resilience = Resilience::builder()
//!     .connectivity(Arc::new(network.clone()))
//!     .build();
//!
//! resilience.queue().register_executor("save", |_| async { Ok::<_, RawError>(()) });
//! resilience.queue().enqueue("save", json!({ "id": 7 }), Priority::High);
//!
//! network.set_online(true);
//! let report = resilience.queue().wait_idle().await.unwrap();
//! assert_eq!(report.succeeded, 1);
//! # });
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::circuit::CircuitBreakers;
use crate::classify::ErrorClassifier;
use crate::clock::{Clock, SystemClock};
use crate::config::ResilienceConfig;
use crate::error::{AppError, ErrorContext, RawError};
use crate::logger::{ErrorLogger, ErrorSink};
use crate::network::{ConnectivitySource, NetworkMonitor, StaticConnectivity};
use crate::queue::OfflineQueue;
use crate::retry::RetryExecutor;
use crate::store::{KeyValueStore, MemoryStore};

/// Shared resilience context. Cheap to clone; clones share every component.
#[derive(Clone)]
pub struct Resilience {
    inner: Arc<Inner>,
}

struct Inner {
    config: ResilienceConfig,
    classifier: ErrorClassifier,
    breakers: CircuitBreakers,
    logger: ErrorLogger,
    network: NetworkMonitor,
    queue: OfflineQueue,
}

impl fmt::Debug for Resilience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resilience")
            .field("config", &self.inner.config)
            .field("network", &self.inner.network)
            .field("queue", &self.inner.queue)
            .finish_non_exhaustive()
    }
}

impl Resilience {
    /// Start configuring a context.
    pub fn builder() -> ResilienceBuilder {
        ResilienceBuilder::default()
    }

    /// The configuration this context was built with.
    pub fn config(&self) -> &ResilienceConfig {
        &self.inner.config
    }

    /// Error classifier using the configured provider rotation.
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.inner.classifier
    }

    /// Circuit breakers keyed by operation id.
    pub fn breakers(&self) -> &CircuitBreakers {
        &self.inner.breakers
    }

    /// Error log.
    pub fn logger(&self) -> &ErrorLogger {
        &self.inner.logger
    }

    /// Network monitor.
    pub fn network(&self) -> &NetworkMonitor {
        &self.inner.network
    }

    /// Offline queue, replayed on every reconnect.
    pub fn queue(&self) -> &OfflineQueue {
        &self.inner.queue
    }

    /// Retry executor sharing this context's breakers, log, connectivity and queue.
    pub fn executor(&self) -> RetryExecutor {
        RetryExecutor::new(self.inner.breakers.clone(), self.inner.logger.clone())
            .with_classifier(self.inner.classifier.clone())
            .with_connectivity(self.network().reader())
            .with_queue(self.queue().clone())
            .with_policy(self.inner.config.retry.clone())
    }

    /// Classify a failure against current connectivity.
    pub fn classify(&self, raw: &RawError, context: &ErrorContext) -> AppError {
        self.inner
            .classifier
            .classify(raw, context, self.network().is_online())
    }

    /// Classify a failure and record it in the error log.
    pub fn report(&self, raw: &RawError, context: &ErrorContext) -> AppError {
        let error = self.classify(raw, context);
        self.inner.logger.log(error.clone());
        error
    }
}

/// Builder for [`Resilience`].
///
/// Every collaborator has a default: an in-memory store, the system clock, a
/// connectivity source that is always online, no error sink, and the runtime
/// current at [`build`](Self::build).
#[derive(Default)]
pub struct ResilienceBuilder {
    config: ResilienceConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    clock: Option<Arc<dyn Clock>>,
    source: Option<Arc<dyn ConnectivitySource>>,
    sink: Option<Arc<dyn ErrorSink>>,
    runtime: Option<Handle>,
}

impl fmt::Debug for ResilienceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilienceBuilder")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("clock", &self.clock)
            .field("source", &self.source)
            .field("sink", &self.sink)
            .field("runtime", &self.runtime)
            .finish()
    }
}

impl ResilienceBuilder {
    /// Use these settings.
    pub fn config(mut self, config: ResilienceConfig) -> Self {
        self.config = config;
        self
    }

    /// Durable storage for the error log and offline queue.
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Wall clock for timestamps and breaker cooldowns.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Platform connectivity signal.
    pub fn connectivity(mut self, source: Arc<dyn ConnectivitySource>) -> Self {
        self.source = Some(source);
        self
    }

    /// External reporter for High and Critical errors.
    pub fn sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Runtime for replay passes and sink reports.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the context, restoring the error log and offline queue and
    /// subscribing to connectivity.
    pub fn build(self) -> Resilience {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let source = self
            .source
            .unwrap_or_else(|| Arc::new(StaticConnectivity::online()) as Arc<dyn ConnectivitySource>);

        let runtime = self.runtime.or_else(|| Handle::try_current().ok());

        let mut logger = ErrorLogger::builder(store.clone()).config(self.config.logger.clone());
        if let Some(sink) = self.sink {
            logger = logger.sink(sink);
        }
        if let Some(runtime) = &runtime {
            logger = logger.runtime(runtime.clone());
        }
        let logger = logger.build();

        let classifier =
            ErrorClassifier::with_rotation(self.config.rotation()).with_clock(clock.clone());
        let network = NetworkMonitor::new(source);
        let mut queue = OfflineQueue::builder(store)
            .connectivity(network.reader())
            .logger(logger.clone())
            .clock(clock.clone())
            .classifier(classifier.clone())
            .config(self.config.queue.clone());
        if let Some(runtime) = runtime {
            queue = queue.runtime(runtime);
        }
        let queue = queue.build();

        let replay = queue.clone();
        network.set_reconnect_hook(move || replay.schedule_processing());

        Resilience {
            inner: Arc::new(Inner {
                breakers: CircuitBreakers::with_clock(self.config.breaker.clone(), clock),
                config: self.config,
                classifier,
                logger,
                network,
                queue,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, Severity};
    use crate::queue::Priority;
    use crate::retry::{Deferred, Outcome, RetryOptions};
    use crate::testing::{ManualClock, RecordingSink, SimulatedConnectivity};
    use serde_json::json;

    #[test]
    fn test_clones_share_components() {
        let resilience = Resilience::builder().build();
        let clone = resilience.clone();
        assert!(std::ptr::eq(resilience.network(), clone.network()));
        assert!(std::ptr::eq(resilience.queue(), clone.queue()));
    }

    #[test]
    fn test_classify_uses_connectivity() {
        let network = SimulatedConnectivity::new(false);
        let resilience = Resilience::builder()
            .connectivity(Arc::new(network.clone()))
            .build();

        let raw = RawError::new("Failed to fetch");
        assert_eq!(resilience.classify(&raw, &ErrorContext::new()).severity(), Severity::Medium);
        network.set_online(true);
        assert_eq!(resilience.classify(&raw, &ErrorContext::new()).severity(), Severity::High);
    }

    #[test]
    fn test_configured_rotation_reaches_classifier() {
        let resilience = Resilience::builder()
            .config(ResilienceConfig::default().with_providers(["gemini", "anthropic"]))
            .build();
        let error = resilience.classify(
            &RawError::new("gemini overloaded"),
            &ErrorContext::new(),
        );
        assert_eq!(error.kind(), ErrorKind::ProviderUnavailable);
        assert_eq!(
            error.fallback().and_then(|f| f.next_provider()),
            Some("anthropic".to_string())
        );
    }

    #[test]
    fn test_reported_errors_use_injected_clock() {
        let clock = ManualClock::default();
        clock.advance(std::time::Duration::from_secs(90));
        let resilience = Resilience::builder().clock(Arc::new(clock.clone())).build();

        let error = resilience.report(&RawError::new("Failed to fetch"), &ErrorContext::new());
        assert_eq!(error.timestamp(), clock.now());
        assert_eq!(resilience.logger().recent(1)[0].timestamp(), clock.now());
    }

    #[tokio::test]
    async fn test_report_logs_and_forwards() {
        let sink = RecordingSink::new();
        let resilience = Resilience::builder().sink(Arc::new(sink.clone())).build();

        resilience.report(&RawError::new("JWT expired"), &ErrorContext::new());
        let forwarded = sink.wait_for(1).await;

        assert_eq!(resilience.logger().len(), 1);
        assert_eq!(forwarded[0].kind(), ErrorKind::Authentication);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_is_queued_and_replayed_on_reconnect() {
        let network = SimulatedConnectivity::new(true);
        let clock = ManualClock::default();
        let resilience = Resilience::builder()
            .connectivity(Arc::new(network.clone()))
            .clock(Arc::new(clock))
            .build();
        let executor = resilience.executor();
        resilience
            .queue()
            .register_executor("save_draft", |_| async { Ok::<_, RawError>(()) });

        let outcome = executor
            .run_or_enqueue(
                || async { Err::<(), _>(RawError::new("Failed to fetch")) },
                &RetryOptions::new().operation_id("save_draft"),
                Deferred::new("save_draft", json!({ "title": "t" }), Priority::High),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Queued(_)));
        assert_eq!(resilience.queue().len(), 1);
        assert_eq!(resilience.logger().len(), 1);

        network.set_online(false);
        network.set_online(true);
        let report = resilience.queue().wait_idle().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(resilience.queue().is_empty());
    }
}
