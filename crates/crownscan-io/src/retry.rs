//! Bounded exponential-backoff retry for remote calls.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors that may succeed when the same call is repeated.
pub trait Transient {
    /// Returns `true` if retrying could help.
    fn is_transient(&self) -> bool;
}

/// How often and how patiently to retry a failing call.
///
/// The delay after attempt `n` is
/// `initial_delay_ms * multiplier^(n - 1)`, capped at `max_delay_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first; `0` behaves like `1`.
    pub max_attempts: u32,
    /// Delay after the first failure, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays.
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            multiplier: 2,
        }
    }
}

/// The last error of a call that did not succeed, with how many attempts
/// were made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<E> {
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Error from the final attempt.
    pub error: E,
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier).saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(
            self.initial_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }

    /// Call `op` until it succeeds, fails permanently, or the attempt
    /// budget runs out. `what` names the call in log messages.
    ///
    /// # Errors
    ///
    /// Returns the last error together with the number of attempts made.
    pub fn run<T, E, F>(&self, what: &str, mut op: F) -> Result<T, Attempted<E>>
    where
        E: Transient + std::fmt::Display,
        F: FnMut() -> Result<T, E>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < max_attempts => {
                    let delay = self.delay(attempt);
                    log::warn!(
                        "{what}: attempt {attempt} of {max_attempts} failed ({error}), retrying in {delay:?}"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(error) => {
                    return Err(Attempted {
                        attempts: attempt,
                        error,
                    });
                }
            }
        }
    }
}
