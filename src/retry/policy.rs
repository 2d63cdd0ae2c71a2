//! Retry policy types and configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A retry policy describing how many attempts to make and how long to wait
/// between them.
///
/// Policies are pure data - they describe retry behavior but don't execute it.
/// This makes them easy to test, clone, and inspect.
///
/// The delay before attempt `n + 1` is `base_delay × backoff_factor^(n - 1)`,
/// capped at `max_delay`. With the defaults (3 attempts, 1s base, factor 2, 30s
/// cap) a failing operation is tried, then retried after 1s, then after 2s.
///
/// # Examples
///
/// ```rust
/// use breakwater::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default();
///
/// assert_eq!(policy.max_attempts(), 3);
/// assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(1000)));
/// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(2000)));
/// assert_eq!(policy.delay_for_attempt(3), None); // that was the last attempt
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    max_attempts: u32,
    #[serde(with = "crate::config::duration_ms", rename = "base_delay_ms")]
    base_delay: Duration,
    backoff_factor: f64,
    #[serde(with = "crate::config::duration_ms", rename = "max_delay_ms")]
    max_delay: Duration,
    jitter: JitterStrategy,
}

/// Strategy for adding randomness to delays.
///
/// Jitter is only applied when the `jitter` feature is enabled; otherwise every
/// strategy behaves like [`JitterStrategy::None`] and the schedule is exact.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter applied.
    #[default]
    None,
    /// Add ±percentage randomness to delay.
    Proportional(f64),
    /// Random delay between 0 and calculated delay.
    Full,
}

/// Information about a failed attempt, passed to retry hooks.
#[derive(Debug, Clone)]
pub struct RetryEvent<'a, E> {
    /// Which attempt just failed (1-indexed).
    pub attempt: u32,
    /// The error from the failed attempt.
    pub error: &'a E,
    /// Delay before next attempt, or `None` if this failure is final.
    pub next_delay: Option<Duration>,
    /// Total elapsed time since first attempt.
    pub elapsed: Duration,
}

/// Upper bound on any single backoff sleep.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with exponential backoff from `base_delay`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use breakwater::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::exponential(Duration::from_millis(100))
    ///     .with_max_attempts(5)
    ///     .with_backoff_factor(3.0);
    ///
    /// assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
    /// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(300)));
    /// assert_eq!(policy.delay_for_attempt(3), Some(Duration::from_millis(900)));
    /// ```
    pub fn exponential(base_delay: Duration) -> Self {
        Self {
            base_delay,
            ..Self::default()
        }
    }

    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Set the total number of attempts, including the first. Minimum 1.
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, d: Duration) -> Self {
        self.base_delay = d;
        self
    }

    /// Set the multiplier applied per attempt. Negative or non-finite values become 1.
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = if factor.is_finite() && factor >= 0.0 {
            factor
        } else {
            1.0
        };
        self
    }

    /// Set the maximum delay cap.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use breakwater::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::exponential(Duration::from_millis(100))
    ///     .with_max_attempts(10)
    ///     .with_max_delay(Duration::from_millis(500));
    ///
    /// assert_eq!(policy.delay_for_attempt(4), Some(Duration::from_millis(500)));
    /// ```
    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    /// Add proportional jitter to delays.
    ///
    /// The factor determines the range of randomness. For example, `0.25` means
    /// the actual delay will be ±25% of the calculated delay, still capped at
    /// the maximum delay.
    ///
    /// **Note**: Requires the `jitter` feature. Without it, this method does nothing.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = JitterStrategy::Proportional(factor.clamp(0.0, 1.0));
        self
    }

    /// Use full jitter: a random delay between zero and the calculated delay.
    ///
    /// **Note**: Requires the `jitter` feature. Without it, this method does nothing.
    pub fn with_full_jitter(mut self) -> Self {
        self.jitter = JitterStrategy::Full;
        self
    }

    /// Total attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Base delay.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Backoff multiplier.
    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Maximum delay cap.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Get the jitter strategy.
    pub fn jitter(&self) -> &JitterStrategy {
        &self.jitter
    }

    /// Delay to wait after attempt `attempt` (1-indexed) fails.
    ///
    /// Returns `None` when `attempt` was the last one allowed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let nanos = self.base_delay.as_nanos() as f64 * self.backoff_factor.powi(exponent);
        let cap = self.max_delay;

        if !nanos.is_finite() || nanos >= cap.as_nanos() as f64 {
            return Some(cap);
        }
        Some(Duration::from_nanos(nanos.round() as u64))
    }

    /// Calculate the delay with jitter applied.
    ///
    /// This is used internally by the retry executor.
    #[doc(hidden)]
    pub fn delay_with_jitter(&self, attempt: u32) -> Option<Duration> {
        let base_delay = self.delay_for_attempt(attempt)?;
        Some(self.jitter.apply(base_delay, self.max_delay))
    }
}

impl JitterStrategy {
    /// Apply jitter to a base delay, never exceeding `max_delay`.
    pub fn apply(&self, base_delay: Duration, max_delay: Duration) -> Duration {
        let jittered = match self {
            JitterStrategy::None => base_delay,
            #[cfg(feature = "jitter")]
            JitterStrategy::Proportional(factor) => {
                use rand::Rng;
                let base_millis = base_delay.as_millis() as f64;
                let jitter_range = base_millis * factor;
                let min = (base_millis - jitter_range).max(0.0);
                let max = base_millis + jitter_range;
                if max <= min {
                    base_delay
                } else {
                    Duration::from_millis(rand::rng().random_range(min..=max) as u64)
                }
            }
            #[cfg(not(feature = "jitter"))]
            JitterStrategy::Proportional(_) => base_delay,
            #[cfg(feature = "jitter")]
            JitterStrategy::Full => {
                use rand::Rng;
                let max_millis = base_delay.as_millis() as u64;
                if max_millis == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_millis(rand::rng().random_range(0..=max_millis))
                }
            }
            #[cfg(not(feature = "jitter"))]
            JitterStrategy::Full => base_delay,
        };

        jittered.min(max_delay)
    }
}
