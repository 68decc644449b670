//! Per-job execution context: cancellation, deadline and retry policy.

use futures::future::BoxFuture;
use std::{future::Future, time::Duration};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::{
    errors::{ReplicationError, ReplicationResult},
    models::job::{AttemptCounters, Operation},
    services::retry::RetryController,
};

/// Deadline horizon used when `now + timeout` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Everything a job needs to issue remote operations.
///
/// Every remote call goes through [`call`](JobContext::call) or
/// [`call_on`](JobContext::call_on), which race the call (including its
/// retry sleeps) against cancellation and the job deadline.
#[derive(Clone, Debug)]
pub struct JobContext {
    cancel: CancellationToken,
    deadline: Instant,
    timeout: Duration,
    retry: RetryController,
}

impl JobContext {
    pub fn new(cancel: CancellationToken, timeout: Duration, retry: RetryController) -> Self {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        Self {
            cancel,
            deadline,
            timeout,
            retry,
        }
    }

    pub fn retry(&self) -> &RetryController {
        &self.retry
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive `fut` unless the job is cancelled or runs past its deadline.
    pub async fn guard<T>(
        &self,
        fut: impl Future<Output = ReplicationResult<T>>,
    ) -> ReplicationResult<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ReplicationError::Cancelled),
            _ = sleep_until(self.deadline) => Err(ReplicationError::DeadlineExceeded(self.timeout)),
            result = fut => result,
        }
    }

    /// Run a retried remote operation and record its attempts.
    pub async fn call<T, F, Fut>(
        &self,
        counters: &mut AttemptCounters,
        op: Operation,
        f: F,
    ) -> ReplicationResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ReplicationResult<T>>,
    {
        let mut attempts = 0;
        let result = self
            .guard(self.retry.execute_counted(op, &mut attempts, f))
            .await;
        counters.record(op, attempts);
        result
    }

    /// Like [`call`](Self::call) for operations on exclusively owned state.
    pub async fn call_on<S, T, F>(
        &self,
        counters: &mut AttemptCounters,
        op: Operation,
        state: &mut S,
        f: F,
    ) -> ReplicationResult<T>
    where
        S: ?Sized + Send,
        F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, ReplicationResult<T>>,
    {
        let mut attempts = 0;
        let result = self
            .guard(self.retry.execute_on(op, &mut attempts, state, f))
            .await;
        counters.record(op, attempts);
        result
    }
}
