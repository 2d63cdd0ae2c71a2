//! Connectivity tracking.
//!
//! A [`NetworkMonitor`] subscribes to a platform [`ConnectivitySource`], folds
//! each raw signal into a [`ConnectivityState`], and tells listeners about real
//! changes. Signals that leave the computed state unchanged are ignored.
//!
//! Listeners run synchronously, in registration order, on the thread that
//! delivered the signal. A separate reconnect hook runs once per offline→online
//! transition after the listeners; the [`Resilience`](crate::Resilience)
//! context uses it to kick off offline-queue replay.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use breakwater::network::{NetworkMonitor, Quality};
//! use breakwater::testing::SimulatedConnectivity;
//!
//! let source = SimulatedConnectivity::new(false);
//! let monitor = NetworkMonitor::new(Arc::new(source.clone()));
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! let subscription = monitor.on_status_change(move |state| sink.lock().unwrap().push(state.quality));
//!
//! source.set_online(true);
//! source.set_online(true); // duplicate, ignored
//! source.set_online(false);
//! subscription.unsubscribe();
//! source.set_online(true); // no longer observed
//!
//! assert_eq!(*seen.lock().unwrap(), vec![Quality::Fast, Quality::Offline]);
//! assert!(monitor.is_online());
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use serde::{Deserialize, Serialize};

/// Coarse link quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    /// Good enough for anything.
    Fast,
    /// Connected, but large transfers should be deferred.
    Slow,
    /// Not connected.
    Offline,
}

/// Process-wide connectivity view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
    /// Whether the platform reports a connection.
    pub is_online: bool,
    /// Coarse quality.
    pub quality: Quality,
}

impl ConnectivityState {
    /// Connected with good quality.
    pub const ONLINE: ConnectivityState = ConnectivityState {
        is_online: true,
        quality: Quality::Fast,
    };

    /// Disconnected.
    pub const OFFLINE: ConnectivityState = ConnectivityState {
        is_online: false,
        quality: Quality::Offline,
    };

    /// Fold a raw platform signal into a state.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use breakwater::network::{ConnectivitySignal, ConnectivityState, Quality, QualityHint};
    ///
    /// let signal = ConnectivitySignal::online().with_hint(QualityHint::effective_type("2g"));
    /// assert_eq!(ConnectivityState::from_signal(&signal).quality, Quality::Slow);
    ///
    /// let signal = ConnectivitySignal::offline().with_hint(QualityHint::effective_type("4g"));
    /// assert_eq!(ConnectivityState::from_signal(&signal).quality, Quality::Offline);
    /// ```
    pub fn from_signal(signal: &ConnectivitySignal) -> Self {
        if !signal.online {
            return Self::OFFLINE;
        }
        let quality = match &signal.hint {
            Some(hint) if hint.is_slow() => Quality::Slow,
            _ => Quality::Fast,
        };
        Self {
            is_online: true,
            quality,
        }
    }
}

/// Optional quality information some platforms provide.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityHint {
    /// Effective connection type, e.g. `4g`, `3g`, `2g`, `slow-2g`.
    pub effective_type: Option<String>,
    /// Estimated downlink bandwidth.
    pub downlink_mbps: Option<f64>,
}

const SLOW_DOWNLINK_MBPS: f64 = 1.0;

impl QualityHint {
    /// Hint carrying only an effective connection type.
    pub fn effective_type(kind: impl Into<String>) -> Self {
        Self {
            effective_type: Some(kind.into()),
            downlink_mbps: None,
        }
    }

    /// Hint carrying only a bandwidth estimate.
    pub fn downlink(mbps: f64) -> Self {
        Self {
            effective_type: None,
            downlink_mbps: Some(mbps),
        }
    }

    /// Returns true if the link should be treated as slow.
    pub fn is_slow(&self) -> bool {
        let slow_type = self
            .effective_type
            .as_deref()
            .is_some_and(|t| matches!(t.to_ascii_lowercase().as_str(), "slow-2g" | "2g"));
        let slow_link = self.downlink_mbps.is_some_and(|d| d < SLOW_DOWNLINK_MBPS);
        slow_type || slow_link
    }
}

/// One raw reading from the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectivitySignal {
    /// Whether the platform reports a connection.
    pub online: bool,
    /// Quality hint, where available.
    pub hint: Option<QualityHint>,
}

impl ConnectivitySignal {
    /// Connected, no hint.
    pub fn online() -> Self {
        Self {
            online: true,
            hint: None,
        }
    }

    /// Disconnected.
    pub fn offline() -> Self {
        Self {
            online: false,
            hint: None,
        }
    }

    /// Attach a quality hint.
    pub fn with_hint(mut self, hint: QualityHint) -> Self {
        self.hint = Some(hint);
        self
    }
}

/// Handle returned by [`ConnectivitySource::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Callback invoked by a source on every raw signal.
pub type SignalHandler = Arc<dyn Fn(ConnectivitySignal) + Send + Sync>;

/// Platform connectivity signal.
pub trait ConnectivitySource: Send + Sync + fmt::Debug {
    /// Current reading.
    fn current(&self) -> ConnectivitySignal;

    /// Start receiving signals.
    fn subscribe(&self, handler: SignalHandler) -> SubscriptionId;

    /// Stop receiving signals.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Source that always reports the same reading and never changes.
#[derive(Debug, Clone)]
pub struct StaticConnectivity {
    signal: ConnectivitySignal,
}

impl StaticConnectivity {
    /// Always online.
    pub fn online() -> Self {
        Self {
            signal: ConnectivitySignal::online(),
        }
    }

    /// Always offline.
    pub fn offline() -> Self {
        Self {
            signal: ConnectivitySignal::offline(),
        }
    }
}

impl ConnectivitySource for StaticConnectivity {
    fn current(&self) -> ConnectivitySignal {
        self.signal.clone()
    }

    fn subscribe(&self, _handler: SignalHandler) -> SubscriptionId {
        SubscriptionId(0)
    }

    fn unsubscribe(&self, _id: SubscriptionId) {}
}

/// Read-only view of the monitor's state, shared with other components.
#[derive(Debug, Clone)]
pub struct ConnectivityReader {
    state: Arc<RwLock<ConnectivityState>>,
}

impl ConnectivityReader {
    /// A reader that always reports online, for use without a monitor.
    pub fn always_online() -> Self {
        Self::fixed(ConnectivityState::ONLINE)
    }

    /// A reader pinned to `state`.
    pub fn fixed(state: ConnectivityState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Current state.
    pub fn current(&self) -> ConnectivityState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if currently online.
    pub fn is_online(&self) -> bool {
        self.current().is_online
    }
}

type Listener = Arc<dyn Fn(ConnectivityState) + Send + Sync>;
type ReconnectHook = Arc<dyn Fn() + Send + Sync>;

/// Observable connectivity, fed by a [`ConnectivitySource`].
///
/// Construct one per process (the [`Resilience`](crate::Resilience) context
/// builds one and exposes it through an accessor) and share clones of it.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    state: Arc<RwLock<ConnectivityState>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    on_reconnect: Mutex<Option<ReconnectHook>>,
    source: Arc<dyn ConnectivitySource>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("state", &self.current())
            .field("source", &self.inner.source)
            .finish()
    }
}

impl NetworkMonitor {
    /// Subscribe to `source` and take its current reading as the initial state.
    pub fn new(source: Arc<dyn ConnectivitySource>) -> Self {
        let initial = ConnectivityState::from_signal(&source.current());
        let inner = Arc::new(MonitorInner {
            state: Arc::new(RwLock::new(initial)),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            on_reconnect: Mutex::new(None),
            source: source.clone(),
            subscription: Mutex::new(None),
        });

        let weak: Weak<MonitorInner> = Arc::downgrade(&inner);
        let id = source.subscribe(Arc::new(move |signal| {
            if let Some(inner) = weak.upgrade() {
                inner.apply(&signal);
            }
        }));
        *inner
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(id);

        tracing::debug!(?initial, "network monitor started");
        Self { inner }
    }

    /// Current state.
    pub fn current(&self) -> ConnectivityState {
        *self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if currently online.
    pub fn is_online(&self) -> bool {
        self.current().is_online
    }

    /// A read-only view to hand to other components.
    pub fn reader(&self) -> ConnectivityReader {
        ConnectivityReader {
            state: self.inner.state.clone(),
        }
    }

    /// Feed a signal directly, bypassing the source.
    pub fn handle_signal(&self, signal: &ConnectivitySignal) {
        self.inner.apply(signal);
    }

    /// Register a listener for state changes.
    ///
    /// The listener stays registered until [`Unsubscribe::unsubscribe`] is
    /// called; dropping the handle does not unsubscribe.
    pub fn on_status_change<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(ConnectivityState) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        Unsubscribe {
            monitor: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Set the hook run once per offline→online transition, replacing any
    /// previous hook.
    pub fn set_reconnect_hook<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self
            .inner
            .on_reconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl MonitorInner {
    fn apply(&self, signal: &ConnectivitySignal) {
        let next = ConnectivityState::from_signal(signal);
        let previous = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if *state == next {
                return;
            }
            std::mem::replace(&mut *state, next)
        };

        tracing::info!(
            online = next.is_online,
            quality = ?next.quality,
            "connectivity changed"
        );

        // Snapshot so listeners may (un)subscribe while being notified.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(next);
        }

        if !previous.is_online && next.is_online {
            let hook = self
                .on_reconnect
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(hook) = hook {
                hook();
            }
        }
    }
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        let id = self
            .subscription
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = id {
            self.source.unsubscribe(id);
        }
    }
}

/// Handle that removes a status listener.
#[derive(Debug)]
#[must_use = "keep the handle to be able to unsubscribe later"]
pub struct Unsubscribe {
    monitor: Weak<MonitorInner>,
    id: u64,
}

impl Unsubscribe {
    /// Remove the listener. Safe to call after the monitor is gone.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.monitor.upgrade() {
            inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}
