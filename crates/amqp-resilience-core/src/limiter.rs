//! Rate limiting for error logs.
//!
//! A stuck downstream fails every message at arrival rate. [`ErrorLogLimiter`]
//! lets the first `burst` errors of each window through and counts the rest.
//!
//! The suppressed count is reported by the first error after the window rolls
//! over. If errors stop entirely there is no such error, so components call
//! [`ErrorLogLimiter::flush`] when they stop or close.

use crate::lock;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Default number of errors logged per window.
pub const DEFAULT_BURST: u32 = 10;

/// Outcome of asking the limiter whether an error may be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Whether the current error should be logged.
    pub log: bool,
    /// Set on the first error after a window that suppressed errors; holds
    /// how many were suppressed in that window.
    pub suppressed_summary: Option<u64>,
}

#[derive(Debug)]
struct Window {
    started: Instant,
    logged: u32,
    suppressed: u64,
}

/// Fixed-window limiter for error log lines.
#[derive(Debug)]
pub struct ErrorLogLimiter {
    window: Duration,
    burst: u32,
    state: Mutex<Window>,
}

impl ErrorLogLimiter {
    /// Creates a limiter allowing `burst` log lines per `window`.
    pub fn new(window: Duration, burst: u32) -> Self {
        Self {
            window,
            burst,
            state: Mutex::new(Window {
                started: Instant::now(),
                logged: 0,
                suppressed: 0,
            }),
        }
    }

    /// Returns the window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns the number of errors logged per window.
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Records an error occurring now.
    pub fn admit(&self) -> Admission {
        self.admit_at(Instant::now())
    }

    /// Records an error occurring at `now`.
    pub fn admit_at(&self, now: Instant) -> Admission {
        let mut window = lock(&self.state);

        let mut suppressed_summary = None;
        if now.saturating_duration_since(window.started) >= self.window {
            if window.suppressed > 0 {
                suppressed_summary = Some(window.suppressed);
            }
            window.started = now;
            window.logged = 0;
            window.suppressed = 0;
        }

        let log = if window.logged < self.burst {
            window.logged += 1;
            true
        } else {
            window.suppressed += 1;
            false
        };

        Admission {
            log,
            suppressed_summary,
        }
    }

    /// Number of errors suppressed so far in the current window.
    pub fn suppressed(&self) -> u64 {
        lock(&self.state).suppressed
    }

    /// Returns the suppressed count of the current window and clears it.
    ///
    /// The window keeps running: errors past the burst are still suppressed.
    pub fn take_suppressed(&self) -> u64 {
        std::mem::take(&mut lock(&self.state).suppressed)
    }

    /// Records an error and emits the rollover summary line if one is due.
    ///
    /// Returns whether the caller should log the error itself.
    pub fn should_log(&self, component: &str) -> bool {
        let admission = self.admit();
        if let Some(suppressed) = admission.suppressed_summary {
            self.log_summary(component, suppressed);
        }
        admission.log
    }

    /// Emits the summary line for errors suppressed in the current window, if any.
    pub fn flush(&self, component: &str) {
        let suppressed = self.take_suppressed();
        if suppressed > 0 {
            self.log_summary(component, suppressed);
        }
    }

    fn log_summary(&self, component: &str, suppressed: u64) {
        tracing::warn!(
            component,
            suppressed,
            window_secs = self.window.as_secs(),
            "suppressed {} error log lines in the previous window",
            suppressed
        );
    }
}

impl Default for ErrorLogLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_BURST)
    }
}
