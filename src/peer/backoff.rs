//! Exponential reconnect backoff with a bounded attempt count.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Delay before the first reconnect attempt.
pub const BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on any single reconnect delay.
pub const MAX_DELAY: Duration = Duration::from_secs(32);

/// Reconnect attempts before automatic recovery halts.
pub const MAX_ATTEMPTS: u32 = 5;

// ============================================================================
// Backoff
// ============================================================================

/// Reconnect schedule: `delay = min(base * 2^(attempt-1), cap)`.
///
/// Attempts are numbered from 1. Once the attempt bound is exceeded the
/// schedule is exhausted and stays exhausted until [`Backoff::reset`]; the
/// caller is expected to stop retrying at that point.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    /// Creates a schedule with the default constants (1s base, 32s cap,
    /// 5 attempts).
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(BASE_DELAY, MAX_DELAY, MAX_ATTEMPTS)
    }

    /// Creates a schedule with explicit limits.
    ///
    /// Tests compress the timings through this constructor.
    #[must_use]
    pub fn with_limits(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
            attempt: 0,
        }
    }

    /// Returns the delay before the next attempt, or `None` once the
    /// attempt bound is exceeded.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt > self.max_attempts {
            return None;
        }
        let exponent = self.attempt - 1;
        let delay = self
            .base
            .checked_mul(1u32.checked_shl(exponent).unwrap_or(u32::MAX))
            .unwrap_or(self.cap);
        Some(delay.min(self.cap))
    }

    /// Resets the schedule after a successful connection.
    #[inline]
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Returns the number of attempts consumed so far.
    #[inline]
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns `true` once the attempt bound has been exceeded.
    #[inline]
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.attempt > self.max_attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
