//! Retrying transient object-store failures.

use crate::metrics::metric_defs;
use canopy_common::TaskContext;
use canopy_store::StoreError;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// How often and how patiently to retry a store call.
///
/// Attempt `n` (1-based) that fails transiently waits `n * backoff_ms`
/// before the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Base delay between attempts in milliseconds.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub const fn none() -> Self {
        Self {
            attempts: 1,
            backoff_ms: 0,
        }
    }

    /// Delay after the given failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Stops early, returning the last error, once `ctx` is interrupted.
    pub fn run<T>(
        &self,
        what: &str,
        ctx: &TaskContext,
        mut op: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts && ctx.check().is_ok() => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(what, attempt, ?delay, error = %e, "Transient store error, retrying");
                    metrics::counter!(metric_defs::STORE_RETRIES.name).increment(1);
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn transient() -> StoreError {
        StoreError::HttpStatus {
            method: "GET",
            key: "tiles/a.laz".to_string(),
            status: 503,
        }
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy {
            attempts: 4,
            backoff_ms: 100,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(3), Duration::from_millis(300));
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let calls = Cell::new(0);
        let policy = RetryPolicy {
            attempts: 3,
            backoff_ms: 1,
        };
        let result = policy.run("get", &TaskContext::unbounded(), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(transient())
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::default().run("get", &TaskContext::unbounded(), || {
            calls.set(calls.get() + 1);
            Err(StoreError::NotFound("tiles/a.laz".to_string()))
        });
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_attempts_are_bounded() {
        let calls = Cell::new(0);
        let policy = RetryPolicy {
            attempts: 2,
            backoff_ms: 1,
        };
        let result: Result<(), _> = policy.run("put", &TaskContext::unbounded(), || {
            calls.set(calls.get() + 1);
            Err(transient())
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 2);
    }
}
