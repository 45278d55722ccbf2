//! Bounded-concurrency executor for network-bound batch work.

use super::{duration_ms, panic_message, AsyncJob, BatchReport, FanOut, RetryPolicy, TaskOutcome};
use crate::cancellation::CancellationToken;
use crate::config::FanOutConfig;
use crate::errors::TaskFailure;
use async_trait::async_trait;
use futures::{stream, FutureExt, StreamExt};
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Runs async jobs with at most `concurrency_limit` in flight.
///
/// Failed attempts are retried per the [`RetryPolicy`]. When a cancellation
/// token fires, queued tasks are reported as [`TaskFailure::Cancelled`] and
/// running tasks finish their current attempt without starting another.
#[derive(Debug, Clone)]
pub struct BoundedExecutor {
    concurrency_limit: usize,
    retry: RetryPolicy,
    cancel: Option<Arc<CancellationToken>>,
}

impl Default for BoundedExecutor {
    fn default() -> Self {
        Self::from_config(&FanOutConfig::default())
    }
}

impl BoundedExecutor {
    /// Creates an executor. A limit of zero is treated as one.
    #[must_use]
    pub fn new(concurrency_limit: usize, retry: RetryPolicy) -> Self {
        Self {
            concurrency_limit: concurrency_limit.max(1),
            retry,
            cancel: None,
        }
    }

    /// Creates an executor from configuration.
    #[must_use]
    pub fn from_config(config: &FanOutConfig) -> Self {
        Self::new(config.concurrency_limit, config.retry)
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The concurrency ceiling.
    #[must_use]
    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// The retry policy applied to each task.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Runs `job` over every item and waits for all of them.
    ///
    /// The next queued item starts as soon as a running one reaches its
    /// terminal state. Never fails as a whole.
    pub async fn submit_batch<I, T, J>(&self, items: Vec<I>, job: &J) -> BatchReport<T>
    where
        I: Send + Sync,
        T: Send,
        J: AsyncJob<I, T> + ?Sized,
    {
        let started = Instant::now();
        let total = items.len();

        let outcomes: Vec<TaskOutcome<T>> = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| async move { self.run_task(index, &item, job).await })
            .buffer_unordered(self.concurrency_limit)
            .collect()
            .await;

        let report = BatchReport::from_unordered(outcomes, duration_ms(started.elapsed()));
        debug!(
            total,
            succeeded = report.success_count(),
            failed = report.failed_indices().len(),
            limit = self.concurrency_limit,
            elapsed_ms = report.elapsed_ms(),
            "Bounded batch finished"
        );
        report
    }

    /// Binds a job, producing a reusable [`FanOut`].
    #[must_use]
    pub fn bind<I, T, J>(&self, job: J) -> BoundedFanOut<I, T, J>
    where
        J: AsyncJob<I, T>,
    {
        BoundedFanOut {
            executor: self.clone(),
            job,
            _marker: PhantomData,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }

    async fn run_task<I, T, J>(&self, index: usize, item: &I, job: &J) -> TaskOutcome<T>
    where
        I: Send + Sync,
        T: Send,
        J: AsyncJob<I, T> + ?Sized,
    {
        if self.is_cancelled() {
            return TaskOutcome::cancelled(index);
        }

        let started = Instant::now();
        let max_attempts = self.retry.attempts();
        let mut attempts = 0;

        let result = loop {
            attempts += 1;
            match AssertUnwindSafe(job.run(index, item)).catch_unwind().await {
                Ok(Ok(value)) => break Ok(value),
                Ok(Err(err)) => {
                    let last_error = format!("{err:#}");
                    if attempts >= max_attempts || self.is_cancelled() {
                        warn!(index, attempts, error = %last_error, "Batch task exhausted retries");
                        break Err(TaskFailure::Exhausted {
                            attempts,
                            last_error,
                        });
                    }
                    let delay = self.retry.delay_for(attempts - 1);
                    debug!(
                        index,
                        attempt = attempts,
                        delay_ms = duration_ms(delay),
                        error = %last_error,
                        "Retrying batch task"
                    );
                    tokio::time::sleep(delay).await;
                    if self.is_cancelled() {
                        warn!(index, attempts, error = %last_error, "Batch task cancelled during backoff");
                        break Err(TaskFailure::Exhausted {
                            attempts,
                            last_error,
                        });
                    }
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(index, attempts, panic = %message, "Batch task panicked");
                    break Err(TaskFailure::Panicked { message });
                }
            }
        };

        TaskOutcome {
            index,
            attempts,
            elapsed_ms: duration_ms(started.elapsed()),
            result,
        }
    }
}

/// A [`BoundedExecutor`] bound to one job.
pub struct BoundedFanOut<I, T, J> {
    executor: BoundedExecutor,
    job: J,
    _marker: PhantomData<fn(I) -> T>,
}

impl<I, T, J> std::fmt::Debug for BoundedFanOut<I, T, J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedFanOut")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<I, T, J> FanOut<I, T> for BoundedFanOut<I, T, J>
where
    I: Send + Sync + 'static,
    T: Send + 'static,
    J: AsyncJob<I, T>,
{
    async fn submit(&self, items: Vec<I>) -> BatchReport<T> {
        self.executor.submit_batch(items, &self.job).await
    }
}
