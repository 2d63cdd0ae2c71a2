//! Test doubles for the crate's collaborators.
//!
//! - [`ManualClock`]: a [`Clock`] that only moves when told to
//! - [`SimulatedConnectivity`]: a [`ConnectivitySource`] driven by the test
//! - [`RecordingSink`]: an [`ErrorSink`] that remembers what it was sent
//! - [`assert_classified!`](crate::assert_classified): check kind, severity and
//!   retryability of a classified error in one line
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use breakwater::circuit::{BreakerConfig, CircuitBreakers};
//! use breakwater::testing::ManualClock;
//!
//! let clock = ManualClock::default();
//! let breakers = CircuitBreakers::with_clock(
//!     BreakerConfig::default().with_failure_threshold(1),
//!     Arc::new(clock.clone()),
//! );
//!
//! breakers.record_failure("sync");
//! assert!(breakers.is_open("sync"));
//!
//! clock.advance(Duration::from_secs(61));
//! assert!(!breakers.is_open("sync"));
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::Notify;

use crate::clock::Clock;
use crate::error::AppError;
use crate::logger::{ErrorSink, SinkError};
use crate::network::{
    ConnectivitySignal, ConnectivitySource, QualityHint, SignalHandler, SubscriptionId,
};

/// A clock that starts at 2024-01-01T00:00:00Z and moves only via
/// [`advance`](ManualClock::advance) or [`set`](ManualClock::set).
///
/// Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        let epoch = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default();
        Self::at(epoch)
    }
}

impl ManualClock {
    /// A clock frozen at `now`.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now.checked_add_signed(by).unwrap_or(*now);
    }

    /// Jump to an absolute time.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A connectivity source the test flips by hand.
///
/// Signals are delivered synchronously to every subscriber, in subscription
/// order, on every call to [`set_online`](Self::set_online) or
/// [`set_hint`](Self::set_hint), whether or not anything changed.
#[derive(Debug, Clone)]
pub struct SimulatedConnectivity {
    inner: Arc<Mutex<Simulated>>,
}

struct Simulated {
    signal: ConnectivitySignal,
    next_id: u64,
    subscribers: BTreeMap<u64, SignalHandler>,
}

impl std::fmt::Debug for Simulated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulated")
            .field("signal", &self.signal)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl SimulatedConnectivity {
    /// Start online or offline, with no hint.
    pub fn new(online: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Simulated {
                signal: ConnectivitySignal {
                    online,
                    hint: None,
                },
                next_id: 1,
                subscribers: BTreeMap::new(),
            })),
        }
    }

    /// Change connectivity and notify subscribers.
    pub fn set_online(&self, online: bool) {
        self.emit(|signal| signal.online = online);
    }

    /// Change the quality hint and notify subscribers.
    pub fn set_hint(&self, hint: Option<QualityHint>) {
        self.emit(|signal| signal.hint = hint);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn emit(&self, update: impl FnOnce(&mut ConnectivitySignal)) {
        let (signal, handlers) = {
            let mut state = self.lock();
            update(&mut state.signal);
            let handlers: Vec<SignalHandler> = state.subscribers.values().cloned().collect();
            (state.signal.clone(), handlers)
        };
        for handler in handlers {
            handler(signal.clone());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Simulated> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConnectivitySource for SimulatedConnectivity {
    fn current(&self) -> ConnectivitySignal {
        self.lock().signal.clone()
    }

    fn subscribe(&self, handler: SignalHandler) -> SubscriptionId {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.insert(id, handler);
        SubscriptionId(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().subscribers.remove(&id.0);
    }
}

/// An [`ErrorSink`] that records every report.
///
/// Clones share the same recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    reports: Arc<Mutex<Vec<AppError>>>,
    notify: Arc<Notify>,
    fail: bool,
}

impl RecordingSink {
    /// A sink that accepts every report.
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that records every report and then rejects it.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Reports received so far.
    pub fn reports(&self) -> Vec<AppError> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait until at least `count` reports have arrived, then return them.
    pub async fn wait_for(&self, count: usize) -> Vec<AppError> {
        loop {
            let notified = self.notify.notified();
            let reports = self.reports();
            if reports.len() >= count {
                return reports;
            }
            notified.await;
        }
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, error: AppError) -> BoxFuture<'static, Result<(), SinkError>> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
        self.notify.notify_waiters();
        let fail = self.fail;
        async move {
            if fail {
                Err(SinkError("rejected".to_string()))
            } else {
                Ok(())
            }
        }
        .boxed()
    }
}

/// Assert the kind, severity and retryability of an [`AppError`].
///
/// # Example
///
/// ```rust
/// use breakwater::{assert_classified, classify, ErrorContext, RawError};
///
/// let error = classify(&RawError::new("dup").with_code("23505"), &ErrorContext::new(), true);
/// assert_classified!(error, Validation, Low, retryable = false);
/// ```
#[macro_export]
macro_rules! assert_classified {
    ($error:expr, $kind:ident, $severity:ident, retryable = $retryable:expr) => {{
        let error = &$error;
        assert_eq!(
            error.kind(),
            $crate::ErrorKind::$kind,
            "unexpected kind for {:?}",
            error
        );
        assert_eq!(
            error.severity(),
            $crate::Severity::$severity,
            "unexpected severity for {:?}",
            error
        );
        assert_eq!(
            error.is_retryable(),
            $retryable,
            "unexpected retryability for {:?}",
            error
        );
    }};
    ($error:expr, $kind:ident, $severity:ident) => {{
        let error = &$error;
        assert_eq!(error.kind(), $crate::ErrorKind::$kind, "unexpected kind for {:?}", error);
        assert_eq!(
            error.severity(),
            $crate::Severity::$severity,
            "unexpected severity for {:?}",
            error
        );
    }};
}
