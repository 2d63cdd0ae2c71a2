//! Bounded, persisted log of classified errors.
//!
//! The [`ErrorLogger`] keeps the most recent errors in memory, newest first, and
//! writes a shorter window of them to a [`KeyValueStore`] on every call so the
//! log survives restarts. High and Critical errors are also forwarded to an
//! optional [`ErrorSink`].
//!
//! Forwarding is fire-and-forget: the report runs on a detached tokio task whose
//! result is dropped after a debug trace. A failing sink never produces another
//! logged error. Reports are spawned on the runtime captured when the logger
//! was built (or set with [`ErrorLoggerBuilder::runtime`]), so errors logged
//! from plain OS threads are still forwarded. Without any runtime nothing is
//! forwarded.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;

use crate::error::{AppError, ErrorKind, Severity};
use crate::store::{self, KeyValueStore, MemoryStore};

/// Failure reported by an [`ErrorSink`].
#[derive(Debug, Error)]
#[error("error sink failed: {0}")]
pub struct SinkError(pub String);

/// External reporter for serious errors.
pub trait ErrorSink: Send + Sync + fmt::Debug {
    /// Report one error. Called only for High and Critical severities.
    fn report(&self, error: AppError) -> BoxFuture<'static, Result<(), SinkError>>;
}

/// Logger tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// In-memory capacity.
    pub capacity: usize,
    /// How many of the newest entries are persisted.
    pub persisted: usize,
    /// Store key for the persisted window.
    pub storage_key: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            persisted: 20,
            storage_key: "error_logs".to_string(),
        }
    }
}

impl LoggerConfig {
    /// Set the in-memory capacity (at least 1).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Set how many entries are persisted.
    pub fn with_persisted(mut self, persisted: usize) -> Self {
        self.persisted = persisted;
        self
    }

    /// Set the store key.
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }
}

/// Aggregate counts over the in-memory log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStats {
    /// Number of records.
    pub total: usize,
    /// Count per severity. Severities with no records are absent.
    pub by_severity: BTreeMap<Severity, usize>,
    /// Count per kind. Kinds with no records are absent.
    pub by_kind: BTreeMap<ErrorKind, usize>,
}

impl ErrorStats {
    /// Count for one severity.
    pub fn severity(&self, severity: Severity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }

    /// Count for one kind.
    pub fn kind(&self, kind: ErrorKind) -> usize {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}

/// Ring buffer of [`AppError`] records, newest first.
///
/// Cheap to clone; clones share the same buffer.
///
/// # Examples
///
/// ```rust
/// use breakwater::{AppError, ErrorKind, ErrorLogger, Severity};
///
/// let logger = ErrorLogger::in_memory();
/// logger.log(AppError::builder(ErrorKind::Network, "offline").severity(Severity::High).build());
/// logger.log(AppError::builder(ErrorKind::Validation, "bad email").severity(Severity::Low).build());
///
/// let stats = logger.stats();
/// assert_eq!(stats.total, 2);
/// assert_eq!(stats.severity(Severity::High), 1);
/// assert_eq!(logger.recent(1)[0].kind(), ErrorKind::Validation);
/// ```
#[derive(Clone)]
pub struct ErrorLogger {
    inner: Arc<LoggerInner>,
}

struct LoggerInner {
    config: LoggerConfig,
    store: Arc<dyn KeyValueStore>,
    sink: Option<Arc<dyn ErrorSink>>,
    runtime: Option<Handle>,
    entries: Mutex<VecDeque<AppError>>,
}

impl fmt::Debug for ErrorLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorLogger")
            .field("config", &self.inner.config)
            .field("len", &self.len())
            .field("sink", &self.inner.sink)
            .finish()
    }
}

impl ErrorLogger {
    /// Logger persisting to `store` with default settings and no sink.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::builder(store).build()
    }

    /// Logger backed by a private in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Start configuring a logger.
    pub fn builder(store: Arc<dyn KeyValueStore>) -> ErrorLoggerBuilder {
        ErrorLoggerBuilder {
            store,
            sink: None,
            runtime: None,
            config: LoggerConfig::default(),
        }
    }

    /// Record an error.
    ///
    /// Never fails: persistence problems are traced and otherwise ignored.
    pub fn log(&self, error: AppError) {
        trace_record(&error);

        let forward = error.severity().is_forwarded().then(|| error.clone());
        let window: Vec<AppError> = {
            let mut entries = self.lock();
            entries.push_front(error);
            entries.truncate(self.inner.config.capacity);
            entries
                .iter()
                .take(self.inner.config.persisted)
                .cloned()
                .collect()
        };

        if let Err(err) = store::save_json(
            self.inner.store.as_ref(),
            &self.inner.config.storage_key,
            &window,
        ) {
            tracing::warn!(error = %err, "failed to persist error log");
        }

        if let (Some(error), Some(sink)) = (forward, &self.inner.sink) {
            self.forward(sink.clone(), error);
        }
    }

    /// Counts by severity and kind.
    pub fn stats(&self) -> ErrorStats {
        let entries = self.lock();
        let mut stats = ErrorStats {
            total: entries.len(),
            ..ErrorStats::default()
        };
        for entry in entries.iter() {
            *stats.by_severity.entry(entry.severity()).or_default() += 1;
            *stats.by_kind.entry(entry.kind()).or_default() += 1;
        }
        stats
    }

    /// The newest `n` records, newest first.
    pub fn recent(&self, n: usize) -> Vec<AppError> {
        self.lock().iter().take(n).cloned().collect()
    }

    /// All records, newest first.
    pub fn entries(&self) -> Vec<AppError> {
        self.lock().iter().cloned().collect()
    }

    /// Number of records held in memory.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing has been logged.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Empty the buffer and delete the persisted copy.
    pub fn clear(&self) {
        self.lock().clear();
        if let Err(err) = self.inner.store.remove(&self.inner.config.storage_key) {
            tracing::warn!(error = %err, "failed to remove persisted error log");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<AppError>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn forward(&self, sink: Arc<dyn ErrorSink>, error: AppError) {
        let Some(handle) = self
            .inner
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
        else {
            tracing::debug!("no runtime, error not forwarded");
            return;
        };
        handle.spawn(async move {
            if let Err(err) = sink.report(error).await {
                tracing::debug!(error = %err, "error sink rejected report");
            }
        });
    }
}

/// Builder for [`ErrorLogger`].
#[derive(Debug)]
pub struct ErrorLoggerBuilder {
    store: Arc<dyn KeyValueStore>,
    sink: Option<Arc<dyn ErrorSink>>,
    runtime: Option<Handle>,
    config: LoggerConfig,
}

impl ErrorLoggerBuilder {
    /// Spawn sink reports on `runtime`. Defaults to the runtime current at
    /// [`build`](Self::build), if any.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Forward High and Critical errors to `sink`.
    pub fn sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the default settings.
    pub fn config(mut self, config: LoggerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the logger, restoring any persisted window.
    pub fn build(self) -> ErrorLogger {
        let mut restored: VecDeque<AppError> =
            store::load_json::<Vec<AppError>>(self.store.as_ref(), &self.config.storage_key)
                .unwrap_or_default()
                .into();
        restored.truncate(self.config.capacity);
        if !restored.is_empty() {
            tracing::debug!(count = restored.len(), "restored error log");
        }

        ErrorLogger {
            inner: Arc::new(LoggerInner {
                config: self.config,
                store: self.store,
                sink: self.sink,
                runtime: self.runtime.or_else(|| Handle::try_current().ok()),
                entries: Mutex::new(restored),
            }),
        }
    }
}

fn trace_record(error: &AppError) {
    let kind = error.kind();
    let code = error.code();
    let message = error.message();
    match error.severity() {
        Severity::Low => tracing::info!(%kind, code, "{message}"),
        Severity::Medium => tracing::warn!(%kind, code, "{message}"),
        Severity::High | Severity::Critical => {
            tracing::error!(%kind, severity = %error.severity(), code, "{message}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;

    fn error(kind: ErrorKind, severity: Severity, message: &str) -> AppError {
        AppError::builder(kind, message).severity(severity).build()
    }

    #[test]
    fn test_capacity_keeps_newest() {
        let logger = ErrorLogger::builder(Arc::new(MemoryStore::new()))
            .config(LoggerConfig::default().with_capacity(3))
            .build();
        for i in 0..5 {
            logger.log(error(ErrorKind::Unknown, Severity::Low, &format!("e{i}")));
        }

        let messages: Vec<String> = logger
            .entries()
            .iter()
            .map(|e| e.message().to_string())
            .collect();
        assert_eq!(messages, vec!["e4", "e3", "e2"]);
    }

    #[test]
    fn test_persisted_window_is_truncated_and_restored() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let logger = ErrorLogger::new(store.clone());
        for i in 0..30 {
            logger.log(error(ErrorKind::Storage, Severity::Medium, &format!("e{i}")));
        }
        assert_eq!(logger.len(), 30);

        let restored = ErrorLogger::new(store);
        assert_eq!(restored.len(), 20);
        assert_eq!(restored.recent(1)[0].message(), "e29");
        assert_eq!(restored.recent(20)[19].message(), "e10");
    }

    #[test]
    fn test_stats_single_pass() {
        let logger = ErrorLogger::in_memory();
        logger.log(error(ErrorKind::Network, Severity::High, "a"));
        logger.log(error(ErrorKind::Network, Severity::Low, "b"));
        logger.log(error(ErrorKind::Validation, Severity::Low, "c"));

        let stats = logger.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.severity(Severity::Low), 2);
        assert_eq!(stats.severity(Severity::Critical), 0);
        assert_eq!(stats.kind(ErrorKind::Network), 2);
        assert_eq!(stats.kind(ErrorKind::Validation), 1);
    }

    #[test]
    fn test_clear_removes_persisted_copy() {
        let store = Arc::new(MemoryStore::new());
        let logger = ErrorLogger::new(store.clone());
        logger.log(error(ErrorKind::Unknown, Severity::Low, "x"));
        assert_eq!(store.len(), 1);

        logger.clear();
        assert!(logger.is_empty());
        assert!(store.is_empty());
        assert!(ErrorLogger::new(store).is_empty());
    }

    #[test]
    fn test_corrupted_window_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        store.set("error_logs", "{not json").unwrap();
        assert!(ErrorLogger::new(store).is_empty());
    }

    #[tokio::test]
    async fn test_only_serious_errors_are_forwarded() {
        let sink = RecordingSink::new();
        let logger = ErrorLogger::builder(Arc::new(MemoryStore::new()))
            .sink(Arc::new(sink.clone()))
            .build();

        logger.log(error(ErrorKind::Validation, Severity::Low, "low"));
        logger.log(error(ErrorKind::Storage, Severity::Medium, "medium"));
        logger.log(error(ErrorKind::Network, Severity::High, "high"));
        logger.log(error(ErrorKind::Unknown, Severity::Critical, "critical"));

        let reported = sink.wait_for(2).await;
        let messages: Vec<&str> = reported.iter().map(|e| e.message()).collect();
        assert_eq!(messages.len(), 2);
        assert!(messages.contains(&"high"));
        assert!(messages.contains(&"critical"));
    }

    #[tokio::test]
    async fn test_failing_sink_is_swallowed() {
        let sink = RecordingSink::failing();
        let logger = ErrorLogger::builder(Arc::new(MemoryStore::new()))
            .sink(Arc::new(sink.clone()))
            .build();

        logger.log(error(ErrorKind::Network, Severity::Critical, "down"));
        sink.wait_for(1).await;
        tokio::task::yield_now().await;

        assert_eq!(logger.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_errors_logged_off_runtime_are_still_forwarded() {
        let sink = RecordingSink::new();
        let logger = ErrorLogger::builder(Arc::new(MemoryStore::new()))
            .sink(Arc::new(sink.clone()))
            .build();

        let background = logger.clone();
        std::thread::spawn(move || {
            background.log(error(ErrorKind::Network, Severity::Critical, "from os thread"));
        })
        .join()
        .unwrap();

        let reported = sink.wait_for(1).await;
        assert_eq!(reported[0].message(), "from os thread");
    }

    #[test]
    fn test_no_runtime_does_not_panic() {
        let sink = RecordingSink::new();
        let logger = ErrorLogger::builder(Arc::new(MemoryStore::new()))
            .sink(Arc::new(sink.clone()))
            .build();
        logger.log(error(ErrorKind::Network, Severity::Critical, "down"));
        assert!(sink.reports().is_empty());
    }
}
