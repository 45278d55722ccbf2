//! Fan-out executors for stages that process many independent items.
//!
//! Two executors share one result model:
//!
//! - [`BoundedExecutor`] runs async, network-bound jobs with a concurrency
//!   ceiling and per-task retry with exponential backoff.
//! - [`ParallelExecutor`] runs blocking, CPU-bound jobs on a fixed number of
//!   worker threads with a per-task timeout.
//!
//! Neither fails as a whole. Every submitted item gets a [`TaskOutcome`] at
//! its own index in the returned [`BatchReport`], and the calling stage
//! decides whether partial failure is acceptable.

mod bounded;
mod parallel;
mod retry;

pub use bounded::{BoundedExecutor, BoundedFanOut};
pub use parallel::{ParallelExecutor, ParallelFanOut};
pub use retry::{JitterStrategy, RetryPolicy};

use crate::errors::{StageFailure, TaskFailure};
use async_trait::async_trait;
use std::any::Any;
use std::future::Future;
use std::time::Duration;

/// An async unit of batch work, run once per attempt.
#[async_trait]
pub trait AsyncJob<I, T>: Send + Sync {
    /// Processes the item at `index`.
    async fn run(&self, index: usize, item: &I) -> anyhow::Result<T>;
}

#[async_trait]
impl<I, T, F, Fut> AsyncJob<I, T> for F
where
    F: Fn(usize, I) -> Fut + Send + Sync,
    I: Clone + Send + Sync + 'static,
    T: Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    async fn run(&self, index: usize, item: &I) -> anyhow::Result<T> {
        (self)(index, item.clone()).await
    }
}

/// A blocking unit of batch work, run on a worker thread.
pub trait BlockingJob<I, T>: Send + Sync + 'static {
    /// Processes the item at `index`.
    fn run(&self, index: usize, item: I) -> anyhow::Result<T>;
}

impl<I, T, F> BlockingJob<I, T> for F
where
    F: Fn(usize, I) -> anyhow::Result<T> + Send + Sync + 'static,
{
    fn run(&self, index: usize, item: I) -> anyhow::Result<T> {
        (self)(index, item)
    }
}

/// The terminal state of one batch item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome<T> {
    /// Position of the item in the submitted batch.
    pub index: usize,
    /// Attempts made; zero if the task never started.
    pub attempts: u32,
    /// Time from the first attempt to the terminal state.
    pub elapsed_ms: u64,
    /// The value or the typed failure.
    pub result: Result<T, TaskFailure>,
}

impl<T> TaskOutcome<T> {
    /// Returns true if the task produced a value.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub(crate) fn cancelled(index: usize) -> Self {
        Self {
            index,
            attempts: 0,
            elapsed_ms: 0,
            result: Err(TaskFailure::Cancelled),
        }
    }
}

/// Per-item results of a batch, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport<T> {
    outcomes: Vec<TaskOutcome<T>>,
    elapsed_ms: u64,
}

impl<T> BatchReport<T> {
    /// Builds a report from outcomes completed in any order.
    #[must_use]
    pub fn from_unordered(mut outcomes: Vec<TaskOutcome<T>>, elapsed_ms: u64) -> Self {
        outcomes.sort_by_key(|o| o.index);
        Self {
            outcomes,
            elapsed_ms,
        }
    }

    /// All outcomes, indexed like the input.
    #[must_use]
    pub fn outcomes(&self) -> &[TaskOutcome<T>] {
        &self.outcomes
    }

    /// Number of items in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns true for an empty batch.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Wall time of the whole batch.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Number of items that produced a value.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    /// Indices of failed items, ascending.
    #[must_use]
    pub fn failed_indices(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_ok())
            .map(|o| o.index)
            .collect()
    }

    /// Returns true if every item succeeded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(TaskOutcome::is_ok)
    }

    /// Returns the failure at an index, if that item failed.
    #[must_use]
    pub fn failure(&self, index: usize) -> Option<&TaskFailure> {
        self.outcomes
            .get(index)
            .and_then(|o| o.result.as_ref().err())
    }

    /// Consumes the report into per-item results.
    #[must_use]
    pub fn into_results(self) -> Vec<Result<T, TaskFailure>> {
        self.outcomes.into_iter().map(|o| o.result).collect()
    }

    /// Fails unless at least `min` items succeeded.
    pub fn require_successes(self, min: usize) -> Result<Self, StageFailure> {
        let succeeded = self.success_count();
        if succeeded >= min {
            Ok(self)
        } else {
            Err(StageFailure::InsufficientBatch {
                succeeded,
                total: self.len(),
                required: min,
                failed: self.failed_indices(),
            })
        }
    }
}

/// Executor-agnostic fan-out bound to a job.
///
/// Stage code depends on this instead of a concrete executor.
#[async_trait]
pub trait FanOut<I, T>: Send + Sync {
    /// Runs the bound job over every item.
    async fn submit(&self, items: Vec<I>) -> BatchReport<T>;
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(index: usize, result: Result<u32, TaskFailure>) -> TaskOutcome<u32> {
        TaskOutcome {
            index,
            attempts: 1,
            elapsed_ms: 0,
            result,
        }
    }

    #[test]
    fn test_report_is_sorted_by_index() {
        let report = BatchReport::from_unordered(
            vec![
                outcome(2, Ok(20)),
                outcome(0, Ok(0)),
                outcome(1, Err(TaskFailure::Cancelled)),
            ],
            5,
        );
        let indices: Vec<usize> = report.outcomes().iter().map(|o| o.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(report.failed_indices(), vec![1]);
        assert_eq!(report.failure(1), Some(&TaskFailure::Cancelled));
        assert_eq!(report.success_count(), 2);
        assert!(!report.all_succeeded());
    }

    #[test]
    fn test_require_successes() {
        let report = BatchReport::from_unordered(
            vec![
                outcome(0, Ok(1)),
                outcome(1, Err(TaskFailure::TimedOut { timeout_ms: 10 })),
            ],
            0,
        );
        assert!(report.clone().require_successes(1).is_ok());

        let err = report.require_successes(2).unwrap_err();
        assert_eq!(
            err,
            StageFailure::InsufficientBatch {
                succeeded: 1,
                total: 2,
                required: 2,
                failed: vec![1],
            }
        );
    }

    #[test]
    fn test_panic_message_downcasts() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
