//! Reconnection policy and the per-loop backoff state.

use std::time::Duration;

/// How long to wait between connection attempts, and how many to make.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReconnectPolicy {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Factor applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Attempts allowed per reconnect loop; `None` retries forever.
    pub max_retries: Option<u32>,
}

impl ReconnectPolicy {
    /// Creates an unbounded exponential policy with multiplier 2.
    ///
    /// # Arguments
    /// * `initial_delay` - Delay after the first failure (e.g., 1 second)
    /// * `max_delay` - Maximum delay cap (e.g., 30 seconds)
    pub fn exponential(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: 2.0,
            max_retries: None,
        }
    }

    /// Sets the multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Caps the number of attempts per reconnect loop.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Returns true once `attempt` attempts have used up the retry cap.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        self.max_retries.is_some_and(|max| attempt >= max)
    }

    /// Starts a fresh backoff sequence for one reconnect loop.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        // Default: 1s doubling up to 30s, unbounded attempts
        Self::exponential(Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Backoff state of one reconnect loop invocation.
///
/// Never shared between loops: every loop starts again at the initial delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
    multiplier: f64,
    attempt: u32,
}

impl Backoff {
    fn new(policy: &ReconnectPolicy) -> Self {
        // A multiplier below 1 (or NaN) would shrink delays; hold them flat instead.
        let multiplier = if policy.multiplier.is_finite() && policy.multiplier >= 1.0 {
            policy.multiplier
        } else {
            1.0
        };
        Self {
            current: policy.initial_delay.min(policy.max_delay),
            max: policy.max_delay,
            multiplier,
            attempt: 0,
        }
    }

    /// Counts a new attempt and returns its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt
    }

    /// Number of attempts made so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay the next call to [`Backoff::next_delay`] will return.
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    /// Returns the delay to sleep now and grows the next one.
    ///
    /// The next delay is `min(delay * multiplier, max_delay)`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown = (delay.as_nanos() as f64 * self.multiplier).round();
        self.current = if grown >= self.max.as_nanos() as f64 {
            self.max
        } else {
            Duration::from_nanos(grown as u64)
        };
        delay
    }
}
