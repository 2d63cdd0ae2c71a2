//! Durable queue of work deferred until connectivity returns.
//!
//! Work is enqueued under an operation tag with a JSON payload. When the device
//! is online, [`OfflineQueue::process_queue`] replays items one at a time
//! through the executor registered for their tag: highest priority first, then
//! oldest first. A successful replay removes the item. A failed replay bumps
//! its retry count; once the count reaches the ceiling (3 by default) the item
//! is dropped and a Critical error carrying its payload is logged.
//!
//! Every mutation rewrites the whole queue to the [`KeyValueStore`], and a new
//! queue restores whatever was persisted. Unreadable state is treated as empty.
//!
//! Only one pass runs at a time. A pass requested while another is running is
//! folded into it: the running pass takes a fresh snapshot before it finishes,
//! so work enqueued mid-pass is not left waiting for the next reconnect.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use breakwater::queue::{OfflineQueue, Priority};
//! use breakwater::store::MemoryStore;
//! use breakwater::RawError;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let queue = OfflineQueue::builder(Arc::new(MemoryStore::new())).build();
//! queue.register_executor("save_note", |data| async move {
//!     assert_eq!(data["text"], "hello");
//!     Ok::<_, RawError>(())
//! });
//!
//! queue.enqueue("save_note", json!({ "text": "hello" }), Priority::High);
//! assert_eq!(queue.status().count, 1);
//!
//! let report = queue.process_queue().await;
//! assert_eq!(report.succeeded, 1);
//! assert!(queue.is_empty());
//! # });
//! ```

mod item;

pub use item::{Priority, QueueItem, QueueStatus, ReplayReport};

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures::future::{BoxFuture, FutureExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::classify::ErrorClassifier;
use crate::clock::{Clock, SystemClock};
use crate::error::{AppError, ErrorContext, RawError, Severity, PROCESSING_ERROR};
use crate::logger::ErrorLogger;
use crate::network::ConnectivityReader;
use crate::store::{self, KeyValueStore};

/// Replays one payload.
pub type ReplayFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<(), RawError>> + Send + Sync>;

/// Queue tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Failed replays after which an item is dropped.
    pub max_retries: u32,
    /// Store key for the persisted queue.
    pub storage_key: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            storage_key: "offline_queue".to_string(),
        }
    }
}

impl QueueConfig {
    /// Set the retry ceiling (at least 1).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Set the store key.
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }
}

/// Persistent queue of deferred work. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct OfflineQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    config: QueueConfig,
    store: Arc<dyn KeyValueStore>,
    connectivity: ConnectivityReader,
    logger: ErrorLogger,
    clock: Arc<dyn Clock>,
    classifier: ErrorClassifier,
    items: Mutex<Vec<QueueItem>>,
    executors: RwLock<HashMap<String, ReplayFn>>,
    processing: AtomicBool,
    rerun: AtomicBool,
    passes: AtomicU64,
    runtime: Option<Handle>,
    scheduled: Mutex<Option<JoinHandle<ReplayReport>>>,
}

impl fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}

impl OfflineQueue {
    /// Start configuring a queue persisted to `store`.
    pub fn builder(store: Arc<dyn KeyValueStore>) -> OfflineQueueBuilder {
        OfflineQueueBuilder {
            store,
            connectivity: None,
            logger: None,
            clock: None,
            classifier: None,
            runtime: None,
            config: QueueConfig::default(),
        }
    }

    /// Queue work for later replay and return its id.
    ///
    /// Never fails. If the queue cannot be persisted the item is still held in
    /// memory and the failure is traced.
    pub fn enqueue(&self, operation: impl Into<String>, data: Value, priority: Priority) -> String {
        let enqueued_at = self.inner.clock.now();
        let id = format!(
            "{}-{:08x}",
            enqueued_at.timestamp_millis(),
            rand::rng().random::<u32>()
        );
        let item = QueueItem {
            id: id.clone(),
            operation: operation.into(),
            data,
            enqueued_at,
            retry_count: 0,
            priority,
        };
        tracing::debug!(item_id = %id, tag = %item.operation, %priority, "queued for replay");

        let mut items = self.lock();
        items.push(item);
        self.persist(&items);
        id
    }

    /// Register the replay executor for `tag`, replacing any previous one.
    ///
    /// Items whose tag has no executor fail their replay.
    pub fn register_executor<F, Fut, E>(&self, tag: impl Into<String>, executor: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<RawError> + 'static,
    {
        let replay: ReplayFn = Arc::new(move |data| {
            let attempt = executor(data);
            async move { attempt.await.map_err(Into::<RawError>::into) }.boxed()
        });
        self.inner
            .executors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag.into(), replay);
    }

    /// Replay queued items.
    ///
    /// Does nothing while offline. Items are replayed sequentially against a
    /// snapshot taken at the start of the pass; the pass stops early if
    /// connectivity drops. If another pass is already running this returns
    /// [`ReplayReport::skipped_busy`] and the running pass replays once more
    /// before it finishes.
    pub async fn process_queue(&self) -> ReplayReport {
        if !self.inner.connectivity.is_online() {
            tracing::debug!("offline, replay skipped");
            return ReplayReport::offline();
        }

        // set before acquiring; the guard holder re-checks it after release
        self.inner.rerun.store(true, Ordering::SeqCst);
        let mut report = ReplayReport::default();
        let mut first = true;
        loop {
            let Some(guard) = PassGuard::acquire(&self.inner.processing) else {
                if first {
                    tracing::debug!("replay already running, rerun requested");
                    return ReplayReport::busy();
                }
                return report;
            };
            self.inner.rerun.store(false, Ordering::SeqCst);
            if !first {
                tracing::debug!("replay requested mid-pass, taking a fresh snapshot");
            }
            first = false;

            self.replay_snapshot(&mut report).await;
            drop(guard);

            if report.interrupted
                || !self.inner.rerun.load(Ordering::SeqCst)
                || !self.inner.connectivity.is_online()
            {
                break;
            }
        }

        tracing::info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            retained = report.retained,
            dropped = report.dropped,
            "replay pass finished"
        );
        report
    }

    /// Run [`process_queue`](Self::process_queue) on a detached task.
    ///
    /// The task is spawned on the runtime captured when the queue was built
    /// (or set with [`OfflineQueueBuilder::runtime`]), so this may be called
    /// from any thread. Without a runtime nothing is scheduled.
    pub fn schedule_processing(&self) {
        let Some(handle) = self
            .inner
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
        else {
            tracing::debug!("no runtime, replay not scheduled");
            return;
        };
        let queue = self.clone();
        let task = handle.spawn(async move { queue.process_queue().await });
        *self
            .inner
            .scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    /// Wait for the most recently scheduled pass, if any, and return its report.
    pub async fn wait_idle(&self) -> Option<ReplayReport> {
        let task = self
            .inner
            .scheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        task.await.ok()
    }

    /// Current counts.
    pub fn status(&self) -> QueueStatus {
        let items = self.lock();
        let mut status = QueueStatus {
            count: items.len(),
            processing: self.inner.processing.load(Ordering::SeqCst),
            passes: self.inner.passes.load(Ordering::SeqCst),
            ..QueueStatus::default()
        };
        for item in items.iter() {
            *status.by_priority.entry(item.priority).or_default() += 1;
        }
        status.oldest_enqueued_at = items.iter().map(|item| item.enqueued_at).min();
        status
    }

    /// Queued items in insertion order.
    pub fn items(&self) -> Vec<QueueItem> {
        self.lock().clone()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove an item without replaying it.
    pub fn remove(&self, id: &str) -> Option<QueueItem> {
        self.take(id)
    }

    /// Remove every item.
    pub fn clear(&self) {
        let mut items = self.lock();
        items.clear();
        self.persist(&items);
    }

    async fn replay_snapshot(&self, report: &mut ReplayReport) {
        self.inner.passes.fetch_add(1, Ordering::SeqCst);

        let mut snapshot = self.lock().clone();
        snapshot.sort_by_key(|item| (Reverse(item.priority), item.enqueued_at));
        let total = snapshot.len();

        for (done, item) in snapshot.into_iter().enumerate() {
            if !self.inner.connectivity.is_online() {
                tracing::info!(remaining = total - done, "connectivity lost, replay interrupted");
                report.interrupted = true;
                return;
            }
            report.attempted += 1;

            let executor = self
                .inner
                .executors
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&item.operation)
                .cloned();
            let result = match executor {
                Some(replay) => replay(item.data.clone()).await,
                None => Err(RawError::new(format!(
                    "no executor registered for `{}`",
                    item.operation
                ))
                .with_name(PROCESSING_ERROR)),
            };

            match result {
                Ok(()) => {
                    if self.take(&item.id).is_some() {
                        report.succeeded += 1;
                        tracing::debug!(item_id = %item.id, tag = %item.operation, "replayed");
                    }
                }
                Err(error) => match self.record_failure(&item.id) {
                    Some(FailedReplay::Retained(count)) => {
                        report.retained += 1;
                        tracing::warn!(item_id = %item.id, tag = %item.operation, retry_count = count, error = %error, "replay failed");
                    }
                    Some(FailedReplay::Dropped(dropped)) => {
                        report.dropped += 1;
                        self.report_dropped(&dropped, &error);
                    }
                    None => {}
                },
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueueItem>> {
        self.inner
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, items: &[QueueItem]) {
        if let Err(err) = store::save_json(self.inner.store.as_ref(), &self.inner.config.storage_key, items) {
            tracing::warn!(error = %err, "failed to persist offline queue");
        }
    }

    fn take(&self, id: &str) -> Option<QueueItem> {
        let mut items = self.lock();
        let index = items.iter().position(|item| item.id == id)?;
        let item = items.remove(index);
        self.persist(&items);
        Some(item)
    }

    fn record_failure(&self, id: &str) -> Option<FailedReplay> {
        let mut items = self.lock();
        let index = items.iter().position(|item| item.id == id)?;
        items[index].retry_count += 1;
        let outcome = if items[index].retry_count >= self.inner.config.max_retries {
            FailedReplay::Dropped(items.remove(index))
        } else {
            FailedReplay::Retained(items[index].retry_count)
        };
        self.persist(&items);
        Some(outcome)
    }

    fn report_dropped(&self, item: &QueueItem, error: &RawError) {
        let context = ErrorContext::for_operation(item.operation.clone())
            .with("item_id", item.id.clone())
            .with("retry_count", item.retry_count)
            .with("priority", item.priority.to_string())
            .with("payload", item.data.clone());
        let classified = self
            .inner
            .classifier
            .classify(error, &context, self.inner.connectivity.is_online());

        let dropped = AppError::builder(
            classified.kind(),
            format!(
                "dropped queued `{}` after {} failed replays: {}",
                item.operation,
                item.retry_count,
                error.description()
            ),
        )
        .severity(Severity::Critical)
        .user_message("Some changes could not be synced and were discarded.")
        .code(classified.code().map(str::to_string))
        .retryable(false)
        .timestamp(self.inner.clock.now())
        .context(classified.context().clone())
        .build();

        self.inner.logger.log(dropped);
    }
}

enum FailedReplay {
    Retained(u32),
    Dropped(QueueItem),
}

/// Clears the processing flag when a pass ends, even if its future is dropped.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Builder for [`OfflineQueue`].
#[derive(Debug)]
pub struct OfflineQueueBuilder {
    store: Arc<dyn KeyValueStore>,
    connectivity: Option<ConnectivityReader>,
    logger: Option<ErrorLogger>,
    clock: Option<Arc<dyn Clock>>,
    classifier: Option<ErrorClassifier>,
    runtime: Option<Handle>,
    config: QueueConfig,
}

impl OfflineQueueBuilder {
    /// Spawn scheduled passes on `runtime`. Defaults to the runtime current at
    /// [`build`](Self::build), if any.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Read connectivity from a monitor. Defaults to always online.
    pub fn connectivity(mut self, connectivity: ConnectivityReader) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Where dropped items are reported. Defaults to a private in-memory log.
    pub fn logger(mut self, logger: ErrorLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Clock for enqueue timestamps.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Classifier for dropped items.
    pub fn classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Replace the default settings.
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the queue, restoring persisted items.
    pub fn build(self) -> OfflineQueue {
        let items: Vec<QueueItem> =
            store::load_json(self.store.as_ref(), &self.config.storage_key).unwrap_or_default();
        if !items.is_empty() {
            tracing::info!(count = items.len(), "restored offline queue");
        }

        OfflineQueue {
            inner: Arc::new(QueueInner {
                config: self.config,
                store: self.store,
                connectivity: self
                    .connectivity
                    .unwrap_or_else(ConnectivityReader::always_online),
                logger: self.logger.unwrap_or_else(ErrorLogger::in_memory),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                classifier: self.classifier.unwrap_or_default(),
                items: Mutex::new(items),
                executors: RwLock::new(HashMap::new()),
                processing: AtomicBool::new(false),
                rerun: AtomicBool::new(false),
                passes: AtomicU64::new(0),
                runtime: self.runtime.or_else(|| Handle::try_current().ok()),
                scheduled: Mutex::new(None),
            }),
        }
    }
}

#[cfg(test)]
mod tests;
