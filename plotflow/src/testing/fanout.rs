//! Synchronous fan-out stand-in.

use crate::errors::TaskFailure;
use crate::executor::{BatchReport, FanOut, TaskOutcome};
use async_trait::async_trait;
use std::time::Instant;

/// Runs a closure over every item in order on the calling task.
///
/// No retries, timeouts or concurrency: each item is attempted once and an
/// error becomes [`TaskFailure::Exhausted`].
#[derive(Debug, Clone)]
pub struct InlineFanOut<F> {
    job: F,
}

impl<F> InlineFanOut<F> {
    /// Wraps a job closure.
    pub fn new(job: F) -> Self {
        Self { job }
    }
}

#[async_trait]
impl<I, T, F> FanOut<I, T> for InlineFanOut<F>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(usize, I) -> anyhow::Result<T> + Send + Sync,
{
    async fn submit(&self, items: Vec<I>) -> BatchReport<T> {
        let started = Instant::now();
        let outcomes = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let item_started = Instant::now();
                let result = (self.job)(index, item).map_err(|e| TaskFailure::Exhausted {
                    attempts: 1,
                    last_error: format!("{e:#}"),
                });
                TaskOutcome {
                    index,
                    attempts: 1,
                    elapsed_ms: crate::executor::duration_ms(item_started.elapsed()),
                    result,
                }
            })
            .collect();
        BatchReport::from_unordered(outcomes, crate::executor::duration_ms(started.elapsed()))
    }
}
