//! Retry-with-backoff for unit downloads and vendor discovery.
//!
//! Exponential backoff with jitter and a max delay cap. The caller's error
//! type decides what is worth another attempt.

use std::{
    thread,
    time::{Duration, Instant},
};

use tracing::warn;

use crate::{
    result::{Error, FetchError},
    utils::CancelToken,
};

/// Longest uninterrupted sleep, so cancellation is noticed while backing off
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Errors that can tell whether another attempt may succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    fn cancelled() -> Self;
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        FetchError::is_retryable(self)
    }

    fn cancelled() -> Self {
        FetchError::Cancelled
    }
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        matches!(self, Error::Discovery { transient: true, .. })
    }

    fn cancelled() -> Self {
        Error::Cancelled
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Base delay between attempts. Actual delay = base * 2^attempt + jitter.
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// Adds random jitter of [0, base_delay/2) so workers do not retry in lockstep.
    pub jitter: bool,
}

impl RetryPolicy {
    /// No waiting between attempts
    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Compute the delay after a failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // 2^attempt saturates for silly attempt numbers
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exp_delay = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        let capped = exp_delay.min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
        if jitter_limit_ms == 0 {
            return capped;
        }

        let jitter_ms = fastrand::u64(0..jitter_limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// Execute an operation with retry-and-backoff.
///
/// The `operation` closure receives the current attempt number (0-indexed).
/// Non-retryable errors are returned immediately, retryable ones once the
/// attempts are exhausted.
pub fn retry_with_backoff<T, E, F>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut operation: F,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(E::cancelled());
        }

        let err = match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_retryable() || attempt + 1 >= max_attempts {
            return Err(err);
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            "Attempt {}/{max_attempts} failed ({err}). Retrying in {}ms",
            attempt + 1,
            delay.as_millis()
        );
        if !sleep_unless_cancelled(delay, cancel) {
            return Err(E::cancelled());
        }
        attempt += 1;
    }
}

/// Sleep for the given duration, return false if cancelled in the meantime
fn sleep_unless_cancelled(duration: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn delay_respects_max_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(64), Duration::from_secs(5));
    }

    #[test]
    fn delay_without_jitter_doubles() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_in_range() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
        };
        for _ in 0..32 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(150));
        }
    }

    #[test]
    fn transient_errors_are_retried_until_success() {
        let calls = Cell::new(0);
        let res = retry_with_backoff(&RetryPolicy::immediate(4), &CancelToken::new(), |_| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(FetchError::Timeout)
            } else {
                Ok(42)
            }
        });
        assert_eq!(res, Ok(42));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn attempts_are_bounded() {
        let calls = Cell::new(0);
        let res: Result<(), _> =
            retry_with_backoff(&RetryPolicy::immediate(3), &CancelToken::new(), |_| {
                calls.set(calls.get() + 1);
                Err(FetchError::Status(503))
            });
        assert_eq!(res, Err(FetchError::Status(503)));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let calls = Cell::new(0);
        let res: Result<(), _> =
            retry_with_backoff(&RetryPolicy::immediate(3), &CancelToken::new(), |_| {
                calls.set(calls.get() + 1);
                Err(FetchError::Status(404))
            });
        assert_eq!(res, Err(FetchError::Status(404)));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn cancelled_before_first_attempt() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let res: Result<(), FetchError> =
            retry_with_backoff(&RetryPolicy::immediate(3), &cancel, |_| Ok(()));
        assert_eq!(res, Err(FetchError::Cancelled));
    }
}
