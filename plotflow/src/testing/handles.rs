//! Handle factory doubles.

use crate::cache::HandleFactory;
use crate::core::Tier;
use crate::errors::ResourceError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The handle produced by [`CountingHandleFactory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestHandle {
    /// The tier it was built for.
    pub tier: Tier,
    /// Construction number across all tiers, starting at 1.
    pub serial: usize,
}

#[derive(Debug, Default)]
struct Counts {
    per_tier: Mutex<HashMap<Tier, usize>>,
    serial: AtomicUsize,
}

/// A handle factory that counts constructions per tier.
///
/// Clones share their counters, so a test can keep one clone while the
/// cache owns another.
#[derive(Debug, Clone, Default)]
pub struct CountingHandleFactory {
    counts: Arc<Counts>,
    delay: Duration,
    failing_first: usize,
}

impl CountingHandleFactory {
    /// Creates a factory that succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps for `delay` inside every construction.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fails the first `n` constructions of each tier.
    #[must_use]
    pub fn failing_first(mut self, n: usize) -> Self {
        self.failing_first = n;
        self
    }

    /// Constructions started for a tier, failed ones included.
    #[must_use]
    pub fn constructions(&self, tier: &Tier) -> usize {
        self.counts.per_tier.lock().get(tier).copied().unwrap_or(0)
    }

    /// Constructions started across all tiers.
    #[must_use]
    pub fn total_constructions(&self) -> usize {
        self.counts.per_tier.lock().values().sum()
    }
}

#[async_trait]
impl HandleFactory<TestHandle> for CountingHandleFactory {
    async fn construct(&self, tier: &Tier) -> Result<TestHandle, ResourceError> {
        let nth = {
            let mut per_tier = self.counts.per_tier.lock();
            let count = per_tier.entry(tier.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if nth <= self.failing_first {
            return Err(ResourceError::handle(
                tier,
                format!("scripted failure {nth} of {}", self.failing_first),
            ));
        }
        Ok(TestHandle {
            tier: tier.clone(),
            serial: self.counts.serial.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }
}
