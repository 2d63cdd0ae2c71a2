use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Replay priority. Higher priorities are replayed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Replay last.
    Low,
    /// Default.
    #[default]
    Medium,
    /// Replay first.
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        })
    }
}

/// A unit of deferred work.
///
/// Items are created by [`OfflineQueue::enqueue`](super::OfflineQueue::enqueue)
/// and only the queue changes their retry count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub(super) id: String,
    pub(super) operation: String,
    pub(super) data: Value,
    #[serde(rename = "timestamp")]
    pub(super) enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub(super) retry_count: u32,
    #[serde(default)]
    pub(super) priority: Priority,
}

impl QueueItem {
    /// Unique id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Operation tag used to find the replay executor.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Payload passed to the executor.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// When the item was queued.
    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Failed replays so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Replay priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }
}

/// Snapshot of the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// Items currently queued.
    pub count: usize,
    /// Items per priority. Priorities with no items are absent.
    pub by_priority: BTreeMap<Priority, usize>,
    /// Enqueue time of the oldest item.
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
    /// Whether a replay pass is running.
    pub processing: bool,
    /// Snapshots replayed since construction. A pass that picks up a rerun
    /// request counts twice.
    pub passes: u64,
}

/// Outcome of one [`OfflineQueue::process_queue`](super::OfflineQueue::process_queue) call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    /// Items handed to an executor (or found to have none).
    pub attempted: usize,
    /// Items replayed successfully and removed.
    pub succeeded: usize,
    /// Items that failed but stay queued.
    pub retained: usize,
    /// Items that reached the retry ceiling and were dropped.
    pub dropped: usize,
    /// The pass did nothing because the device was offline.
    pub skipped_offline: bool,
    /// The pass did nothing because another pass was running; that pass
    /// replays once more before finishing.
    pub skipped_busy: bool,
    /// Connectivity dropped mid-pass and the remaining items were left alone.
    pub interrupted: bool,
}

impl ReplayReport {
    pub(super) fn offline() -> Self {
        Self {
            skipped_offline: true,
            ..Self::default()
        }
    }

    pub(super) fn busy() -> Self {
        Self {
            skipped_busy: true,
            ..Self::default()
        }
    }

    /// Returns true if the pass actually ran.
    pub fn ran(&self) -> bool {
        !self.skipped_offline && !self.skipped_busy
    }
}
