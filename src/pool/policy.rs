// src/pool/policy.rs

//! Fault-handling primitives: a per-host circuit breaker and the pool's global retry
//! policy. Hand-rolled rather than pulled from an external crate, matching this
//! codebase's own established style of inline backoff rather than an unverified
//! dependency.

use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::ClientError;

#[derive(Debug)]
enum BreakerState {
    Closed { consecutive_failures: usize },
    Open { until: Instant },
}

/// Opens after `threshold` consecutive recoverable failures, short-circuiting further
/// calls for `open_duration` without invoking the wrapped function.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: usize,
    open_duration: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(threshold: usize, open_duration: Duration) -> Self {
        CircuitBreaker {
            threshold,
            open_duration,
            state: Mutex::new(BreakerState::Closed { consecutive_failures: 0 }),
        }
    }

    /// Returns `Err` without invoking anything when the circuit is currently open.
    fn check(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        if let BreakerState::Open { until } = *state {
            if Instant::now() < until {
                return Err(ClientError::Unavailable("circuit breaker is open".into()));
            }
            // Grace period elapsed: half-open, allow one probe through.
            *state = BreakerState::Closed { consecutive_failures: 0 };
        }
        Ok(())
    }

    fn record_success(&self) {
        *self.state.lock() = BreakerState::Closed { consecutive_failures: 0 };
    }

    fn record_failure(&self) {
        let mut state = self.state.lock();
        let next_failures = match *state {
            BreakerState::Closed { consecutive_failures } => consecutive_failures + 1,
            BreakerState::Open { .. } => 1,
        };
        if next_failures >= self.threshold {
            warn!(failures = next_failures, "circuit breaker tripped, opening");
            *state = BreakerState::Open { until: Instant::now() + self.open_duration };
        } else {
            *state = BreakerState::Closed { consecutive_failures: next_failures };
        }
    }

    /// Runs `f` under this breaker's policy. Only recoverable errors count toward the
    /// trip threshold; non-recoverable errors pass through without affecting state.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, ClientError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        self.check()?;
        match f().await {
            Ok(v) => {
                self.record_success();
                Ok(v)
            }
            Err(e) => {
                if e.recoverable() {
                    self.record_failure();
                }
                Err(e)
            }
        }
    }
}

/// The pool's global retry policy: retries recoverable errors up to `max_retries`
/// additional times, re-iterating the host set on each attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
}

impl RetryPolicy {
    pub fn new(max_retries: usize) -> Self {
        RetryPolicy { max_retries }
    }

    /// Invokes `attempt(attempt_index)` up to `1 + max_retries` times. Stops
    /// immediately on a non-recoverable error; otherwise returns the last error once
    /// retries are exhausted.
    pub async fn execute<F, Fut, T>(&self, mut attempt: F) -> Result<T, ClientError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut last_err = None;
        for attempt_index in 0..=self.max_retries {
            match attempt(attempt_index).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if !e.recoverable() {
                        return Err(e);
                    }
                    debug!(attempt_index, error = %e, "recoverable error, retrying");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("loop runs at least once"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_short_circuits() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(5));
        for _ in 0..3 {
            let _ = breaker
                .call(|| async { Err::<(), _>(ClientError::Unavailable("x".into())) })
                .await;
        }
        let result = breaker.call(|| async { Ok::<_, ClientError>(()) }).await;
        assert!(matches!(result, Err(ClientError::Unavailable(_))));
    }

    #[tokio::test]
    async fn breaker_resets_on_success() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(5));
        let _ = breaker
            .call(|| async { Err::<(), _>(ClientError::Unavailable("x".into())) })
            .await;
        let _ = breaker.call(|| async { Ok::<_, ClientError>(()) }).await;
        // two more failures shouldn't trip it since the streak was reset
        for _ in 0..2 {
            let _ = breaker
                .call(|| async { Err::<(), _>(ClientError::Unavailable("x".into())) })
                .await;
        }
        let result = breaker.call(|| async { Ok::<_, ClientError>(()) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn retry_policy_gives_up_on_non_recoverable() {
        let policy = RetryPolicy::new(3);
        let calls = AtomicUsize::new(0);
        let result = policy
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ClientError::NotFound) }
            })
            .await;
        assert!(matches!(result, Err(ClientError::NotFound)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_policy_retries_recoverable_up_to_budget() {
        let policy = RetryPolicy::new(2);
        let calls = AtomicUsize::new(0);
        let result = policy
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ClientError::Unavailable("x".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
