use super::*;
use crate::error::{ErrorKind, Severity};
use crate::network::NetworkMonitor;
use crate::store::MemoryStore;
use crate::testing::{ManualClock, SimulatedConnectivity};
use serde_json::json;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

struct Harness {
    source: SimulatedConnectivity,
    _monitor: NetworkMonitor,
    clock: ManualClock,
    store: Arc<MemoryStore>,
    logger: ErrorLogger,
    queue: OfflineQueue,
}

fn harness(online: bool) -> Harness {
    let source = SimulatedConnectivity::new(online);
    let monitor = NetworkMonitor::new(Arc::new(source.clone()));
    let clock = ManualClock::default();
    let store = Arc::new(MemoryStore::new());
    let logger = ErrorLogger::in_memory();
    let queue = OfflineQueue::builder(store.clone())
        .connectivity(monitor.reader())
        .logger(logger.clone())
        .clock(Arc::new(clock.clone()))
        .build();
    Harness {
        source,
        _monitor: monitor,
        clock,
        store,
        logger,
        queue,
    }
}

fn record_order(queue: &OfflineQueue, tag: &'static str) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    queue.register_executor(tag, move |data: Value| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(data["name"].as_str().unwrap_or_default().to_string());
            Ok::<_, RawError>(())
        }
    });
    seen
}

#[tokio::test]
async fn test_enqueue_reports_status() {
    let h = harness(true);
    let id = h.queue.enqueue("upload", json!({ "name": "a" }), Priority::High);

    let status = h.queue.status();
    assert_eq!(status.count, 1);
    assert_eq!(status.by_priority.get(&Priority::High), Some(&1));
    assert_eq!(status.oldest_enqueued_at, Some(h.clock.now()));
    assert!(!status.processing);

    let (millis, suffix) = id.split_once('-').unwrap();
    assert_eq!(millis, h.clock.now().timestamp_millis().to_string());
    assert_eq!(suffix.len(), 8);
}

#[tokio::test]
async fn test_offline_pass_is_noop() {
    let h = harness(false);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    h.queue.register_executor("sync", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, RawError>(()) }
    });
    h.queue.enqueue("sync", json!(null), Priority::Medium);

    let report = h.queue.process_queue().await;
    assert!(report.skipped_offline);
    assert!(!report.ran());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.queue.len(), 1);
    assert_eq!(h.queue.status().passes, 0);
}

#[tokio::test]
async fn test_replay_order_priority_then_age() {
    let h = harness(true);
    let seen = record_order(&h.queue, "op");

    for (name, priority) in [
        ("low-old", Priority::Low),
        ("high-old", Priority::High),
        ("medium", Priority::Medium),
        ("high-new", Priority::High),
        ("low-new", Priority::Low),
    ] {
        h.queue.enqueue("op", json!({ "name": name }), priority);
        h.clock.advance(Duration::from_millis(10));
    }

    let report = h.queue.process_queue().await;
    assert_eq!(report.succeeded, 5);
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["high-old", "high-new", "medium", "low-old", "low-new"]
    );
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn test_always_failing_item_dropped_after_three_passes() {
    let h = harness(true);
    h.queue.register_executor("send", |_| async {
        Err::<(), _>(RawError::new("upstream exploded").with_status(500))
    });
    h.queue.enqueue("send", json!({ "body": "hi" }), Priority::High);

    for expected in 1..=2 {
        let report = h.queue.process_queue().await;
        assert_eq!(report.retained, 1);
        assert_eq!(h.queue.items()[0].retry_count(), expected);
        assert!(h.logger.is_empty());
    }

    let report = h.queue.process_queue().await;
    assert_eq!(report.dropped, 1);
    assert!(h.queue.is_empty());

    let logged = h.logger.recent(1);
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].severity(), Severity::Critical);
    assert!(!logged[0].is_retryable());
    assert_eq!(logged[0].context().get("payload"), Some(&json!({ "body": "hi" })));
    assert_eq!(logged[0].context().operation(), Some("send"));
    assert!(logged[0].message().contains("3 failed replays"));
}

#[tokio::test]
async fn test_missing_executor_counts_as_failure() {
    let h = harness(true);
    h.queue.enqueue("unknown", json!(1), Priority::Low);

    for _ in 0..3 {
        h.queue.process_queue().await;
    }

    assert!(h.queue.is_empty());
    let logged = h.logger.recent(1);
    assert_eq!(logged[0].kind(), ErrorKind::Processing);
    assert!(logged[0].message().contains("no executor registered"));
}

#[tokio::test]
async fn test_pass_stops_when_connectivity_drops() {
    let h = harness(true);
    let source = h.source.clone();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    h.queue.register_executor("op", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        source.set_online(false);
        async { Err::<(), _>(RawError::new("Failed to fetch")) }
    });
    h.queue.enqueue("op", json!(1), Priority::High);
    h.queue.enqueue("op", json!(2), Priority::Low);

    let report = h.queue.process_queue().await;
    assert!(report.interrupted);
    assert_eq!(report.attempted, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let items = h.queue.items();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].retry_count(), 1);
    assert_eq!(items[1].retry_count(), 0);
}

#[tokio::test]
async fn test_concurrent_pass_is_folded_into_running_one() {
    let h = harness(true);
    let gate = Arc::new(tokio::sync::Notify::new());
    let started = Arc::new(tokio::sync::Notify::new());
    let (gate_in, started_in) = (gate.clone(), started.clone());
    h.queue.register_executor("slow", move |_| {
        let (gate, started) = (gate_in.clone(), started_in.clone());
        async move {
            started.notify_one();
            gate.notified().await;
            Ok::<_, RawError>(())
        }
    });
    let fast = Arc::new(AtomicUsize::new(0));
    let counter = fast.clone();
    h.queue.register_executor("fast", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, RawError>(()) }
    });
    h.queue.enqueue("slow", json!(null), Priority::Medium);

    let queue = h.queue.clone();
    let first = tokio::spawn(async move { queue.process_queue().await });
    started.notified().await;

    // arrives after the running pass took its snapshot
    h.queue.enqueue("fast", json!(null), Priority::Low);
    assert!(h.queue.status().processing);
    let second = h.queue.process_queue().await;
    assert!(second.skipped_busy);
    assert_eq!(fast.load(Ordering::SeqCst), 0);

    gate.notify_one();
    let first = first.await.unwrap();
    assert_eq!(first.succeeded, 2);
    assert_eq!(fast.load(Ordering::SeqCst), 1);
    assert!(h.queue.is_empty());
    assert!(!h.queue.status().processing);
    assert_eq!(h.queue.status().passes, 2);
}

#[tokio::test]
async fn test_no_rerun_without_request() {
    let h = harness(true);
    h.queue.register_executor("op", |_| async { Ok::<_, RawError>(()) });
    h.queue.enqueue("op", json!(1), Priority::High);

    let report = h.queue.process_queue().await;
    assert_eq!(report.succeeded, 1);
    assert_eq!(h.queue.status().passes, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pass_scheduled_from_os_thread_runs_on_captured_runtime() {
    let h = harness(true);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    h.queue.register_executor("save", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, RawError>(()) }
    });
    h.queue.enqueue("save", json!({ "id": 1 }), Priority::High);

    let queue = h.queue.clone();
    std::thread::spawn(move || queue.schedule_processing())
        .join()
        .unwrap();

    let report = h.queue.wait_idle().await.expect("pass scheduled");
    assert_eq!(report.succeeded, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(h.queue.is_empty());
}

#[test]
fn test_explicit_runtime_is_used_outside_any_runtime() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .build()
        .unwrap();
    let queue = OfflineQueue::builder(Arc::new(MemoryStore::new()))
        .runtime(runtime.handle().clone())
        .build();
    queue.register_executor("save", |_| async { Ok::<_, RawError>(()) });
    queue.enqueue("save", json!(null), Priority::Medium);

    queue.schedule_processing();
    let report = runtime.block_on(queue.wait_idle()).expect("pass scheduled");
    assert_eq!(report.succeeded, 1);
}

#[tokio::test]
async fn test_persisted_queue_restores_identically() {
    let h = harness(true);
    h.queue.enqueue("a", json!({ "n": 1 }), Priority::Low);
    h.clock.advance(Duration::from_secs(1));
    h.queue.enqueue("b", json!([1, 2, 3]), Priority::High);
    h.queue.register_executor("a", |_| async { Err::<(), _>(RawError::new("nope")) });
    h.queue.register_executor("b", |_| async { Err::<(), _>(RawError::new("nope")) });
    h.queue.process_queue().await;

    let restored = OfflineQueue::builder(h.store.clone()).build();
    assert_eq!(restored.items(), h.queue.items());
    assert_eq!(restored.items()[0].retry_count(), 1);
}

#[test]
fn test_persisted_layout() {
    let h = harness(true);
    let id = h.queue.enqueue("save", json!({ "x": 1 }), Priority::High);

    let raw = h.store.get("offline_queue").unwrap();
    let value: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value[0]["id"], json!(id));
    assert_eq!(value[0]["operation"], json!("save"));
    assert_eq!(value[0]["data"], json!({ "x": 1 }));
    assert_eq!(value[0]["retryCount"], json!(0));
    assert_eq!(value[0]["priority"], json!("high"));
    assert_eq!(value[0]["timestamp"], json!("2024-01-01T00:00:00Z"));
}

#[test]
fn test_corrupted_state_is_empty() {
    let store = Arc::new(MemoryStore::new());
    store.set("offline_queue", "[{\"id\": 12").unwrap();
    let queue = OfflineQueue::builder(store).build();
    assert!(queue.is_empty());
}

#[test]
fn test_remove_and_clear_persist() {
    let h = harness(true);
    let first = h.queue.enqueue("a", json!(1), Priority::Low);
    h.queue.enqueue("b", json!(2), Priority::Low);

    assert_eq!(h.queue.remove(&first).map(|i| i.operation().to_string()), Some("a".to_string()));
    assert!(h.queue.remove(&first).is_none());
    assert_eq!(OfflineQueue::builder(h.store.clone()).build().len(), 1);

    h.queue.clear();
    assert!(OfflineQueue::builder(h.store.clone()).build().is_empty());
}

#[tokio::test]
async fn test_schedule_processing_then_wait_idle() {
    let h = harness(true);
    let seen = record_order(&h.queue, "op");
    h.queue.enqueue("op", json!({ "name": "one" }), Priority::Medium);

    assert!(h.queue.wait_idle().await.is_none());
    h.queue.schedule_processing();
    let report = h.queue.wait_idle().await.unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(*seen.lock().unwrap(), vec!["one"]);
}
