//! Worker-pool executor for CPU-bound batch work.

use super::{duration_ms, panic_message, BatchReport, BlockingJob, FanOut, TaskOutcome};
use crate::cancellation::CancellationToken;
use crate::config::ParallelConfig;
use crate::errors::TaskFailure;
use async_trait::async_trait;
use futures::future::join_all;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Runs blocking jobs on at most `worker_count` threads at a time.
///
/// Each task is bounded by `task_timeout`. A task that exceeds it is reported
/// as [`TaskFailure::TimedOut`] and its result is dropped. The abandoned
/// computation keeps its worker slot until it returns, so no more than
/// `worker_count` jobs ever run at once.
#[derive(Debug, Clone)]
pub struct ParallelExecutor {
    worker_count: usize,
    task_timeout: Duration,
    cancel: Option<Arc<CancellationToken>>,
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::from_config(&ParallelConfig::default())
    }
}

impl ParallelExecutor {
    /// Creates an executor. A worker count of zero is treated as one.
    #[must_use]
    pub fn new(worker_count: usize, task_timeout: Duration) -> Self {
        Self {
            worker_count: worker_count.max(1),
            task_timeout,
            cancel: None,
        }
    }

    /// Creates an executor from configuration.
    #[must_use]
    pub fn from_config(config: &ParallelConfig) -> Self {
        Self::new(config.worker_count, config.task_timeout())
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Maximum concurrently running tasks.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// The per-task timeout.
    #[must_use]
    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    /// Runs `job` over every item on the blocking pool and waits for all of
    /// them. Never fails as a whole.
    pub async fn submit_batch<I, T, J>(&self, items: Vec<I>, job: Arc<J>) -> BatchReport<T>
    where
        I: Send + 'static,
        T: Send + 'static,
        J: BlockingJob<I, T> + ?Sized,
    {
        let started = Instant::now();
        let total = items.len();
        let workers = Arc::new(Semaphore::new(self.worker_count));

        let tasks = items.into_iter().enumerate().map(|(index, item)| {
            self.run_task(index, item, Arc::clone(&job), Arc::clone(&workers))
        });
        let outcomes = join_all(tasks).await;

        let report = BatchReport::from_unordered(outcomes, duration_ms(started.elapsed()));
        debug!(
            total,
            succeeded = report.success_count(),
            failed = report.failed_indices().len(),
            workers = self.worker_count,
            elapsed_ms = report.elapsed_ms(),
            "Parallel batch finished"
        );
        report
    }

    /// Binds a job, producing a reusable [`FanOut`].
    #[must_use]
    pub fn bind<I, T, J>(&self, job: J) -> ParallelFanOut<I, T, J>
    where
        J: BlockingJob<I, T>,
    {
        ParallelFanOut {
            executor: self.clone(),
            job: Arc::new(job),
            _marker: PhantomData,
        }
    }

    async fn run_task<I, T, J>(
        &self,
        index: usize,
        item: I,
        job: Arc<J>,
        workers: Arc<Semaphore>,
    ) -> TaskOutcome<T>
    where
        I: Send + 'static,
        T: Send + 'static,
        J: BlockingJob<I, T> + ?Sized,
    {
        // The semaphore is never closed, so acquisition only fails if it was.
        let Ok(permit) = workers.acquire_owned().await else {
            return TaskOutcome::cancelled(index);
        };
        if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return TaskOutcome::cancelled(index);
        }

        let started = Instant::now();
        // The permit lives on the worker thread, so a timed-out task keeps
        // its slot until the thread actually returns.
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job.run(index, item)
        });

        let result = match tokio::time::timeout(self.task_timeout, handle).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(TaskFailure::Exhausted {
                attempts: 1,
                last_error: format!("{err:#}"),
            }),
            Ok(Err(join_err)) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic().as_ref());
                warn!(index, panic = %message, "Worker task panicked");
                Err(TaskFailure::Panicked { message })
            }
            Ok(Err(_)) => Err(TaskFailure::Cancelled),
            Err(_) => {
                let timeout_ms = duration_ms(self.task_timeout);
                warn!(index, timeout_ms, "Worker task timed out");
                Err(TaskFailure::TimedOut { timeout_ms })
            }
        };

        TaskOutcome {
            index,
            attempts: 1,
            elapsed_ms: duration_ms(started.elapsed()),
            result,
        }
    }
}

/// A [`ParallelExecutor`] bound to one job.
pub struct ParallelFanOut<I, T, J> {
    executor: ParallelExecutor,
    job: Arc<J>,
    _marker: PhantomData<fn(I) -> T>,
}

impl<I, T, J> std::fmt::Debug for ParallelFanOut<I, T, J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelFanOut")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<I, T, J> FanOut<I, T> for ParallelFanOut<I, T, J>
where
    I: Send + 'static,
    T: Send + 'static,
    J: BlockingJob<I, T>,
{
    async fn submit(&self, items: Vec<I>) -> BatchReport<T> {
        self.executor
            .submit_batch(items, Arc::clone(&self.job))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_results_preserve_input_order() {
        let executor = ParallelExecutor::new(4, Duration::from_secs(5));
        let job = Arc::new(|_index: usize, n: u64| -> anyhow::Result<u64> {
            Ok((1..=n).product())
        });

        let report = executor.submit_batch(vec![5, 1, 3, 4], job).await;
        assert_eq!(report.into_results(), vec![Ok(120), Ok(1), Ok(6), Ok(24)]);
    }

    #[tokio::test]
    async fn test_worker_count_bounds_concurrency() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let executor = ParallelExecutor::new(2, Duration::from_secs(5));

        let job = {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            Arc::new(move |index: usize, _item: ()| -> anyhow::Result<usize> {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(15));
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(index)
            })
        };

        let report = executor.submit_batch(vec![(); 6], job).await;
        assert!(report.all_succeeded());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_timeout_affects_only_its_slot() {
        let executor = ParallelExecutor::new(3, Duration::from_millis(50));
        let job = Arc::new(|index: usize, _item: ()| -> anyhow::Result<usize> {
            if index == 1 {
                std::thread::sleep(Duration::from_millis(200));
            }
            Ok(index)
        });

        let report = executor.submit_batch(vec![(); 3], job).await;
        assert_eq!(report.failed_indices(), vec![1]);
        assert_eq!(
            report.failure(1),
            Some(&TaskFailure::TimedOut { timeout_ms: 50 })
        );
        assert!(report.outcomes()[0].is_ok());
        assert!(report.outcomes()[2].is_ok());
    }

    #[tokio::test]
    async fn test_timed_out_job_keeps_its_worker_until_it_returns() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let executor = ParallelExecutor::new(1, Duration::from_millis(20));

        let job = {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            Arc::new(move |index: usize, _item: ()| -> anyhow::Result<usize> {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(index)
            })
        };

        let report = executor.submit_batch(vec![(); 3], job).await;
        assert_eq!(report.failed_indices(), vec![0, 1, 2]);
        assert!((0..3).all(|i| report.failure(i).is_some_and(TaskFailure::is_timeout)));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_and_panics_are_reported_per_item() {
        let executor = ParallelExecutor::new(2, Duration::from_secs(5));
        let job = Arc::new(|index: usize, _item: ()| -> anyhow::Result<usize> {
            match index {
                0 => anyhow::bail!("malformed layout"),
                1 => panic!("renderer crashed"),
                _ => Ok(index),
            }
        });

        let report = executor.submit_batch(vec![(); 3], job).await;
        assert_eq!(
            report.failure(0),
            Some(&TaskFailure::Exhausted {
                attempts: 1,
                last_error: "malformed layout".to_string(),
            })
        );
        assert_eq!(
            report.failure(1),
            Some(&TaskFailure::Panicked {
                message: "renderer crashed".to_string(),
            })
        );
        assert!(report.outcomes()[2].is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let token = Arc::new(CancellationToken::new());
        token.cancel("shutdown");
        let executor =
            ParallelExecutor::new(2, Duration::from_secs(1)).with_cancellation(Arc::clone(&token));
        let job = Arc::new(|index: usize, _item: ()| -> anyhow::Result<usize> { Ok(index) });

        let report = executor.submit_batch(vec![(); 3], job).await;
        assert_eq!(report.failed_indices(), vec![0, 1, 2]);
        assert!(report.outcomes().iter().all(|o| o.attempts == 0));
    }

    #[tokio::test]
    async fn test_bound_fan_out() {
        let fan_out = ParallelExecutor::new(2, Duration::from_secs(1))
            .bind(|_index: usize, text: String| -> anyhow::Result<usize> { Ok(text.len()) });
        let report = fan_out.submit(vec!["a".into(), "bcd".into()]).await;
        assert_eq!(report.into_results(), vec![Ok(1), Ok(3)]);
    }
}
