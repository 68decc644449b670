//! Exponential-backoff retry for individual remote operations.
//!
//! Only [`ReplicationError::Transient`] failures are retried. The delay before
//! attempt `k` (k >= 2) is `base_delay * backoff_multiplier^(k-2)`, capped at
//! [`MAX_RETRY_DELAY`]; there is no jitter, so schedules are deterministic.

use futures::future::BoxFuture;
use std::{future::Future, time::Duration};
use tracing::warn;

use crate::{
    errors::{ReplicationError, ReplicationResult},
    models::job::Operation,
};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
/// Upper bound on any single backoff sleep.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total tries, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_multiplier,
        }
    }

    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    /// Delay to wait before issuing `attempt` (1-based).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }
}

/// Runs fallible operations under a [`RetryPolicy`].
#[derive(Clone, Debug)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `f` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget runs out.
    pub async fn execute<T, F, Fut>(&self, op: Operation, f: F) -> ReplicationResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ReplicationResult<T>>,
    {
        let mut attempts = 0;
        self.execute_counted(op, &mut attempts, f).await
    }

    /// Like [`execute`](Self::execute) but adds every attempt issued to `attempts`.
    pub async fn execute_counted<T, F, Fut>(
        &self,
        op: Operation,
        attempts: &mut u32,
        mut f: F,
    ) -> ReplicationResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ReplicationResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            *attempts += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) => self.after_failure(op, attempt, err).await?,
            }
        }
    }

    /// Retry an operation that needs exclusive access to `state`, such as a
    /// source stream or a destination write handle.
    pub async fn execute_on<S, T, F>(
        &self,
        op: Operation,
        attempts: &mut u32,
        state: &mut S,
        mut f: F,
    ) -> ReplicationResult<T>
    where
        S: ?Sized + Send,
        F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, ReplicationResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            *attempts += 1;
            match f(state).await {
                Ok(value) => return Ok(value),
                Err(err) => self.after_failure(op, attempt, err).await?,
            }
        }
    }

    /// Decide what happens after attempt `attempt` failed with `err`: either
    /// surface a final error or sleep until the next attempt is due.
    async fn after_failure(
        &self,
        op: Operation,
        attempt: u32,
        err: ReplicationError,
    ) -> ReplicationResult<()> {
        if !err.is_retryable() {
            return Err(err);
        }
        let max = self.policy.max_attempts.max(1);
        if attempt >= max {
            warn!(operation = %op, attempts = attempt, error = %err, "retries exhausted");
            return Err(ReplicationError::RetryExhausted {
                last_error: Box::new(err),
                attempts: attempt,
            });
        }
        let delay = self.policy.delay_before(attempt + 1);
        warn!(
            operation = %op,
            attempt,
            max_attempts = max,
            error = %err,
            "attempt failed, retrying in {:.2}s",
            delay.as_secs_f64()
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    };
    use tokio::time::Instant;

    fn controller() -> RetryController {
        RetryController::new(RetryPolicy::new(3, Duration::from_secs(1), 2.0))
    }

    #[test]
    fn delays_grow_geometrically() {
        let policy = RetryPolicy::new(5, Duration::from_millis(500), 3.0);
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(500));
        assert_eq!(policy.delay_before(3), Duration::from_millis(1500));
        assert_eq!(policy.delay_before(4), Duration::from_millis(4500));
    }

    #[test]
    fn delays_saturate_instead_of_overflowing() {
        let steep = RetryPolicy::new(100, Duration::from_secs(10), 1e300);
        assert_eq!(steep.delay_before(3), MAX_RETRY_DELAY);
        assert_eq!(steep.delay_before(u32::MAX), MAX_RETRY_DELAY);

        let long = RetryPolicy::new(100, Duration::from_secs(u64::MAX), 2.0);
        assert_eq!(long.delay_before(2), MAX_RETRY_DELAY);

        let default = RetryPolicy::default();
        assert_eq!(default.delay_before(40), MAX_RETRY_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_backoff_sleeps_at_most_the_cap() {
        let controller = RetryController::new(RetryPolicy::new(3, Duration::from_secs(1), 1e300));
        let start = Instant::now();
        let err = controller
            .execute(Operation::ReadChunk, || async {
                Err::<(), _>(ReplicationError::transient("reset"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::RetryExhausted { attempts: 3, .. }));
        assert_eq!(start.elapsed(), Duration::from_secs(1) + MAX_RETRY_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_backoff() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();
        let mut attempts = 0;

        let value = controller()
            .execute_counted(Operation::ReadChunk, &mut attempts, || {
                let calls = calls.clone();
                async move {
                    let mut calls = calls.lock().unwrap();
                    calls.push(start.elapsed());
                    if calls.len() < 3 {
                        Err(ReplicationError::transient("timeout"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(attempts, 3);
        let calls = calls.lock().unwrap();
        assert_eq!(calls[0], Duration::ZERO);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(1));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let err = controller()
            .execute(Operation::WriteChunk, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ReplicationError::transient("503 slow down"))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            ReplicationError::RetryExhausted {
                last_error,
                attempts,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(*last_error, ReplicationError::transient("503 slow down"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        for fatal in [
            ReplicationError::NotFound("s3://b/k".into()),
            ReplicationError::access_denied("s3://b/k", "forbidden"),
        ] {
            let calls = AtomicU32::new(0);
            let start = Instant::now();
            let err = controller()
                .execute(Operation::Open, || {
                    let fatal = fatal.clone();
                    let calls = &calls;
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(fatal)
                    }
                })
                .await
                .unwrap_err();
            assert_eq!(err, fatal);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(start.elapsed(), Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn execute_on_retries_with_exclusive_state() {
        let mut failures_left = 2u32;
        let mut attempts = 0;
        let result = controller()
            .execute_on(Operation::WriteChunk, &mut attempts, &mut failures_left, |left| {
                Box::pin(async move {
                    if *left > 0 {
                        *left -= 1;
                        Err(ReplicationError::transient("reset"))
                    } else {
                        Ok("done")
                    }
                })
            })
            .await
            .unwrap();
        assert_eq!(result, "done");
        assert_eq!(attempts, 3);
    }
}
