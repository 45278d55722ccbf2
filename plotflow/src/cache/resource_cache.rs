//! The two-table resource cache.

use super::single_flight::{clear_pair, SingleFlight};
use crate::core::{StageId, Tier};
use crate::errors::ResourceError;
use crate::stages::{StageExecutor, StageFactory, StageResources};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds the shared handle of a tier, such as a remote-service client.
#[async_trait]
pub trait HandleFactory<H>: Send + Sync {
    /// Constructs a new handle. Called at most once per tier per cache
    /// generation, unless an earlier construction failed.
    async fn construct(&self, tier: &Tier) -> Result<H, ResourceError>;
}

/// Counters and contents of one cache table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    /// Lookups served without constructing, including joins of an
    /// in-progress construction.
    pub hits: u64,
    /// Lookups that started a construction.
    pub misses: u64,
    /// Constructed entries currently held.
    pub entries: usize,
    /// Keys of the constructed entries, sorted.
    pub keys: Vec<String>,
}

/// Statistics of both cache tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// The handle table, keyed by tier.
    pub handles: TableStats,
    /// The executor table, keyed by stage id.
    pub executors: TableStats,
}

impl CacheStats {
    /// Hits across both tables.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.handles.hits + self.executors.hits
    }

    /// Misses across both tables.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.handles.misses + self.executors.misses
    }

    /// Entries across both tables.
    #[must_use]
    pub fn entries(&self) -> usize {
        self.handles.entries + self.executors.entries
    }
}

struct Inner<H> {
    factory: Arc<dyn HandleFactory<H>>,
    handles: SingleFlight<Tier, Arc<H>, ResourceError>,
    executors: SingleFlight<StageId, StageExecutor, ResourceError>,
}

/// Lazily constructed, memoized handles and stage executors.
///
/// Cheap to clone; clones share the same tables. Entries live until
/// [`reset`](Self::reset). Cached executors may reference the cache itself
/// through their [`StageResources`], so a cache whose executors do that is
/// only released after a reset.
pub struct ResourceCache<H> {
    inner: Arc<Inner<H>>,
}

impl<H> Clone for ResourceCache<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H> std::fmt::Debug for ResourceCache<H>
where
    H: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("ResourceCache")
            .field("handles", &stats.handles.keys)
            .field("executors", &stats.executors.keys)
            .finish()
    }
}

impl<H> ResourceCache<H>
where
    H: Send + Sync + 'static,
{
    /// Creates an empty cache using `factory` for handle construction.
    #[must_use]
    pub fn new(factory: impl HandleFactory<H> + 'static) -> Self {
        Self::from_factory(Arc::new(factory))
    }

    /// Creates an empty cache from a shared factory.
    #[must_use]
    pub fn from_factory(factory: Arc<dyn HandleFactory<H>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                handles: SingleFlight::default(),
                executors: SingleFlight::default(),
            }),
        }
    }

    /// Returns the handle of a tier, constructing it on first use.
    ///
    /// Concurrent first calls share one construction and receive the same
    /// `Arc`. A failed construction is reported to every waiting caller and
    /// not cached.
    pub async fn handle(&self, tier: &Tier) -> Result<Arc<H>, ResourceError> {
        let factory = Arc::clone(&self.inner.factory);
        let key = tier.clone();
        let result = self
            .inner
            .handles
            .get_or_try_init(tier, move || async move {
                info!(tier = %key, "Constructing handle");
                factory.construct(&key).await.map(Arc::new)
            })
            .await;
        if let Err(e) = &result {
            warn!(tier = %tier, error = %e, "Handle construction failed");
        }
        result
    }

    /// Returns the executor of a stage, building it with `factory` on first
    /// use. Later calls, including retries of the stage, reuse the instance.
    ///
    /// A failed build is reported as [`ResourceError::Executor`] naming the
    /// stage, with the factory's error as its message.
    ///
    /// An executor that keeps the `resources` it was built from holds a
    /// strong reference back to this cache. Such a cycle, and any flight
    /// abandoned by all of its callers, is freed by [`reset`](Self::reset),
    /// not by dropping the last outside clone of the cache.
    pub async fn executor(
        &self,
        stage: &StageId,
        factory: &Arc<dyn StageFactory<H>>,
        resources: &StageResources<H>,
    ) -> Result<StageExecutor, ResourceError> {
        let factory = Arc::clone(factory);
        let resources = resources.clone();
        let key = stage.clone();
        let result = self
            .inner
            .executors
            .get_or_try_init(stage, move || async move {
                debug!(stage = %key, "Building stage executor");
                factory.build(&resources).await.map_err(|e| match e {
                    ResourceError::Executor { .. } => e,
                    other => ResourceError::executor(&key, other.to_string()),
                })
            })
            .await;
        if let Err(e) = &result {
            warn!(stage = %stage, error = %e, "Stage executor build failed");
        }
        result
    }

    /// Current statistics of both tables.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            handles: self.inner.handles.stats(),
            executors: self.inner.executors.stats(),
        }
    }

    /// Empties both tables atomically and zeroes their counters.
    ///
    /// Constructions in progress still complete for their callers but are
    /// not stored; the next lookup constructs afresh.
    pub fn reset(&self) {
        clear_pair(&self.inner.handles, &self.inner.executors);
        info!("Resource cache reset");
    }
}
