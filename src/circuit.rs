//! Per-operation circuit breakers.
//!
//! Each operation id gets its own breaker, created on first use and kept for the
//! life of the process. State is never persisted; a restart closes every breaker.
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────▶ Open
//!     ▲                                │  is_open() after cooldown
//!     │ success                        ▼
//!     └────────────────────────── HalfOpen ──failure──▶ Open
//! ```
//!
//! The Open → HalfOpen step happens inside [`CircuitBreakers::is_open`]: the first
//! query after the cooldown window performs the transition. There is no timer.
//!
//! # Examples
//!
//! ```rust
//! use breakwater::circuit::{BreakerConfig, CircuitBreakers};
//!
//! let breakers = CircuitBreakers::new(BreakerConfig::default().with_failure_threshold(2));
//!
//! breakers.record_failure("fetch_reports");
//! assert!(!breakers.is_open("fetch_reports"));
//! breakers.record_failure("fetch_reports");
//! assert!(breakers.is_open("fetch_reports"));
//!
//! // other operations are unaffected
//! assert!(!breakers.is_open("upload_file"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};

/// Thresholds shared by every breaker in a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open a closed breaker.
    pub failure_threshold: u32,
    /// How long a breaker stays open before the next query probes half-open.
    #[serde(with = "crate::config::duration_ms", rename = "cooldown_ms")]
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl BreakerConfig {
    /// Set the failure threshold. Values below 1 are raised to 1.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the cooldown window.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls fail fast.
    Open,
    /// The next call is a probe.
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => f.write_str("closed"),
            BreakerState::Open => f.write_str("open"),
            BreakerState::HalfOpen => f.write_str("half-open"),
        }
    }
}

/// Health record for one operation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitState {
    /// Operation this breaker guards.
    pub operation_id: String,
    /// Consecutive failures since the last success.
    pub failure_count: u32,
    /// When the most recent failure was recorded.
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Current position.
    pub state: BreakerState,
}

impl CircuitState {
    fn new(operation_id: &str) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            failure_count: 0,
            last_failure_at: None,
            state: BreakerState::Closed,
        }
    }

    fn cooldown_elapsed(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        let window = TimeDelta::from_std(cooldown).unwrap_or(TimeDelta::MAX);
        match self.last_failure_at {
            Some(at) => now.signed_duration_since(at) > window,
            None => true,
        }
    }

    fn check(&mut self, now: DateTime<Utc>, config: &BreakerConfig) -> bool {
        if self.state == BreakerState::Open && self.cooldown_elapsed(now, config.cooldown) {
            self.state = BreakerState::HalfOpen;
            tracing::info!(operation_id = %self.operation_id, "circuit half-open, allowing probe");
        }
        self.state == BreakerState::Open
    }

    fn succeed(&mut self) {
        if self.state != BreakerState::Closed {
            tracing::info!(operation_id = %self.operation_id, "circuit closed after successful probe");
        }
        self.failure_count = 0;
        self.state = BreakerState::Closed;
    }

    fn fail(&mut self, now: DateTime<Utc>, config: &BreakerConfig) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_at = Some(now);

        let opens = match self.state {
            BreakerState::Closed => self.failure_count >= config.failure_threshold,
            BreakerState::HalfOpen => true,
            BreakerState::Open => false,
        };
        if opens {
            self.state = BreakerState::Open;
            tracing::warn!(
                operation_id = %self.operation_id,
                failures = self.failure_count,
                cooldown_ms = config.cooldown.as_millis() as u64,
                "circuit opened"
            );
        }
    }

    fn remaining_cooldown(&self, now: DateTime<Utc>, cooldown: Duration) -> Duration {
        let Some(at) = self.last_failure_at else {
            return Duration::ZERO;
        };
        let elapsed = now.signed_duration_since(at).to_std().unwrap_or(Duration::ZERO);
        cooldown.saturating_sub(elapsed)
    }
}

/// Registry of breakers keyed by operation id.
#[derive(Debug, Clone)]
pub struct CircuitBreakers {
    inner: Arc<Registry>,
}

#[derive(Debug)]
struct Registry {
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    states: Mutex<HashMap<String, CircuitState>>,
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreakers {
    /// Registry using the system clock.
    pub fn new(config: BreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Registry using a custom clock.
    pub fn with_clock(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Registry {
                config,
                clock,
                states: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Shared configuration.
    pub fn config(&self) -> &BreakerConfig {
        &self.inner.config
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, CircuitState>> {
        self.inner
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn with_state<R>(&self, operation_id: &str, f: impl FnOnce(&mut CircuitState) -> R) -> R {
        let mut states = self.states();
        let state = states
            .entry(operation_id.to_string())
            .or_insert_with(|| CircuitState::new(operation_id));
        f(state)
    }

    /// Returns true if calls for `operation_id` should fail fast.
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open during this
    /// call and reports `false`.
    pub fn is_open(&self, operation_id: &str) -> bool {
        let now = self.inner.clock.now();
        let config = &self.inner.config;
        self.with_state(operation_id, |state| state.check(now, config))
    }

    /// Record a successful call.
    pub fn record_success(&self, operation_id: &str) {
        self.with_state(operation_id, CircuitState::succeed);
    }

    /// Record a failed call.
    pub fn record_failure(&self, operation_id: &str) {
        let now = self.inner.clock.now();
        let config = &self.inner.config;
        self.with_state(operation_id, |state| state.fail(now, config));
    }

    /// Time left before an open breaker will probe. Zero unless open.
    pub fn retry_after(&self, operation_id: &str) -> Duration {
        let now = self.inner.clock.now();
        let cooldown = self.inner.config.cooldown;
        match self.states().get(operation_id) {
            Some(state) if state.state == BreakerState::Open => {
                state.remaining_cooldown(now, cooldown)
            }
            _ => Duration::ZERO,
        }
    }

    /// Snapshot of one breaker, if it has been used.
    pub fn state(&self, operation_id: &str) -> Option<CircuitState> {
        self.states().get(operation_id).cloned()
    }

    /// Snapshot of every breaker, sorted by operation id.
    pub fn snapshot(&self) -> Vec<CircuitState> {
        let mut all: Vec<_> = self.states().values().cloned().collect();
        all.sort_by(|a, b| a.operation_id.cmp(&b.operation_id));
        all
    }

    /// Forget a breaker so it starts closed on next use.
    pub fn reset(&self, operation_id: &str) {
        self.states().remove(operation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;

    fn breakers(clock: &ManualClock) -> CircuitBreakers {
        CircuitBreakers::with_clock(BreakerConfig::default(), Arc::new(clock.clone()))
    }

    #[test]
    fn test_opens_after_threshold() {
        let clock = ManualClock::default();
        let breakers = breakers(&clock);

        for _ in 0..4 {
            breakers.record_failure("op");
            assert!(!breakers.is_open("op"));
        }
        breakers.record_failure("op");
        assert!(breakers.is_open("op"));

        let state = breakers.state("op").unwrap();
        assert_eq!(state.failure_count, 5);
        assert_eq!(state.state, BreakerState::Open);
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let clock = ManualClock::default();
        let breakers = breakers(&clock);

        for _ in 0..4 {
            breakers.record_failure("op");
        }
        breakers.record_success("op");
        breakers.record_failure("op");
        assert!(!breakers.is_open("op"));
        assert_eq!(breakers.state("op").unwrap().failure_count, 1);
    }

    #[test]
    fn test_half_open_after_cooldown_then_close() {
        let clock = ManualClock::default();
        let breakers = breakers(&clock);

        for _ in 0..5 {
            breakers.record_failure("op");
        }
        clock.advance(Duration::from_secs(60));
        assert!(breakers.is_open("op"), "cooldown must be strictly exceeded");

        clock.advance(Duration::from_millis(1));
        assert!(!breakers.is_open("op"));
        assert_eq!(breakers.state("op").unwrap().state, BreakerState::HalfOpen);

        breakers.record_success("op");
        let state = breakers.state("op").unwrap();
        assert_eq!(state.state, BreakerState::Closed);
        assert_eq!(state.failure_count, 0);
    }

    #[test]
    fn test_transition_happens_on_query_not_elapsed_time() {
        let clock = ManualClock::default();
        let breakers = breakers(&clock);

        for _ in 0..5 {
            breakers.record_failure("op");
        }
        clock.advance(Duration::from_secs(120));
        assert_eq!(breakers.state("op").unwrap().state, BreakerState::Open);

        assert!(!breakers.is_open("op"));
        assert_eq!(breakers.state("op").unwrap().state, BreakerState::HalfOpen);
    }

    #[test]
    fn test_half_open_failure_reopens_and_restarts_cooldown() {
        let clock = ManualClock::default();
        let breakers = breakers(&clock);

        for _ in 0..5 {
            breakers.record_failure("op");
        }
        clock.advance(Duration::from_secs(61));
        assert!(!breakers.is_open("op"));

        breakers.record_failure("op");
        assert!(breakers.is_open("op"));
        assert_eq!(breakers.retry_after("op"), Duration::from_secs(60));

        clock.advance(Duration::from_secs(30));
        assert!(breakers.is_open("op"));
        assert_eq!(breakers.retry_after("op"), Duration::from_secs(30));
    }

    #[test]
    fn test_breakers_are_independent() {
        let clock = ManualClock::default();
        let breakers = breakers(&clock);

        for _ in 0..5 {
            breakers.record_failure("a");
        }
        assert!(breakers.is_open("a"));
        assert!(!breakers.is_open("b"));

        let ids: Vec<_> = breakers
            .snapshot()
            .into_iter()
            .map(|s| s.operation_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_reset_forgets_state() {
        let breakers = CircuitBreakers::new(BreakerConfig::default().with_failure_threshold(1));
        breakers.record_failure("op");
        assert!(breakers.is_open("op"));

        breakers.reset("op");
        assert!(breakers.state("op").is_none());
        assert!(!breakers.is_open("op"));
    }

    #[test]
    fn test_threshold_floor_is_one() {
        assert_eq!(BreakerConfig::default().with_failure_threshold(0).failure_threshold, 1);
    }
}
