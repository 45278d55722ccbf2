//! Stage traits and implementations.
//!
//! Stages are the units of work the orchestrator drives. A work stage
//! transforms the context; a gate additionally judges it. Stages are built
//! by a [`StageFactory`] from the shared [`StageResources`] and cached, so a
//! retried stage reuses its instance.

use crate::cache::ResourceCache;
use crate::context::PipelineContext;
use crate::core::{Tier, ValidatorResult};
use crate::errors::{ResourceError, StageFailure};
use crate::executor::{BoundedExecutor, ParallelExecutor};
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

/// A unit of work that transforms the context.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Executes the stage, returning the updated context.
    ///
    /// Outputs are written with [`PipelineContext::record`], which targets
    /// this stage's own slot.
    async fn execute(&self, ctx: PipelineContext) -> Result<PipelineContext, StageFailure>;
}

/// A stage that judges the context and may send the run back.
#[async_trait]
pub trait Gate: Send + Sync + Debug {
    /// Returns the name of the gate.
    fn name(&self) -> &str;

    /// Evaluates the context and returns it with a verdict.
    async fn evaluate(
        &self,
        ctx: PipelineContext,
    ) -> Result<(PipelineContext, ValidatorResult), StageFailure>;
}

/// A built, cacheable stage instance.
#[derive(Debug, Clone)]
pub enum StageExecutor {
    /// A work stage.
    Work(Arc<dyn Stage>),
    /// A gate.
    Gate(Arc<dyn Gate>),
}

impl StageExecutor {
    /// Wraps a work stage.
    pub fn work(stage: impl Stage + 'static) -> Self {
        Self::Work(Arc::new(stage))
    }

    /// Wraps a gate.
    pub fn gate(gate: impl Gate + 'static) -> Self {
        Self::Gate(Arc::new(gate))
    }

    /// Returns the stage or gate name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Work(stage) => stage.name(),
            Self::Gate(gate) => gate.name(),
        }
    }

    /// Returns true for gates.
    #[must_use]
    pub fn is_gate(&self) -> bool {
        matches!(self, Self::Gate(_))
    }
}

/// Everything a factory may draw on when building a stage.
pub struct StageResources<H> {
    cache: ResourceCache<H>,
    bounded: BoundedExecutor,
    parallel: ParallelExecutor,
}

impl<H> Clone for StageResources<H> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            bounded: self.bounded.clone(),
            parallel: self.parallel.clone(),
        }
    }
}

impl<H> Debug for StageResources<H>
where
    H: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageResources")
            .field("cache", &self.cache)
            .field("bounded", &self.bounded)
            .field("parallel", &self.parallel)
            .finish()
    }
}

impl<H> StageResources<H>
where
    H: Send + Sync + 'static,
{
    /// Bundles the shared resources.
    #[must_use]
    pub fn new(
        cache: ResourceCache<H>,
        bounded: BoundedExecutor,
        parallel: ParallelExecutor,
    ) -> Self {
        Self {
            cache,
            bounded,
            parallel,
        }
    }

    /// The resource cache.
    #[must_use]
    pub fn cache(&self) -> &ResourceCache<H> {
        &self.cache
    }

    /// The executor for network-bound fan-out.
    #[must_use]
    pub fn bounded(&self) -> &BoundedExecutor {
        &self.bounded
    }

    /// The executor for CPU-bound fan-out.
    #[must_use]
    pub fn parallel(&self) -> &ParallelExecutor {
        &self.parallel
    }

    /// Shortcut for [`ResourceCache::handle`].
    pub async fn handle(&self, tier: &Tier) -> Result<Arc<H>, ResourceError> {
        self.cache.handle(tier).await
    }
}

/// Builds the executor of one stage.
#[async_trait]
pub trait StageFactory<H>: Send + Sync {
    /// Builds the executor. Called once per cache generation.
    async fn build(&self, resources: &StageResources<H>) -> Result<StageExecutor, ResourceError>;
}

/// A prebuilt executor is its own factory.
#[async_trait]
impl<H> StageFactory<H> for StageExecutor
where
    H: Send + Sync + 'static,
{
    async fn build(&self, _resources: &StageResources<H>) -> Result<StageExecutor, ResourceError> {
        Ok(self.clone())
    }
}

/// A factory backed by an async closure.
pub struct FnFactory<F> {
    func: F,
}

impl<F> FnFactory<F> {
    /// Creates a factory from a closure receiving the shared resources.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnFactory<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnFactory").finish_non_exhaustive()
    }
}

#[async_trait]
impl<H, F, Fut> StageFactory<H> for FnFactory<F>
where
    H: Send + Sync + 'static,
    F: Fn(StageResources<H>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StageExecutor, ResourceError>> + Send,
{
    async fn build(&self, resources: &StageResources<H>) -> Result<StageExecutor, ResourceError> {
        (self.func)(resources.clone()).await
    }
}

/// A simple function-based work stage.
pub struct FnStage<F>
where
    F: Fn(&mut PipelineContext) -> Result<(), StageFailure> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&mut PipelineContext) -> Result<(), StageFailure> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&mut PipelineContext) -> Result<(), StageFailure> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&mut PipelineContext) -> Result<(), StageFailure> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, mut ctx: PipelineContext) -> Result<PipelineContext, StageFailure> {
        (self.func)(&mut ctx)?;
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageId;
    use crate::testing::{CountingHandleFactory, TestHandle};

    fn resources() -> StageResources<TestHandle> {
        StageResources::new(
            ResourceCache::new(CountingHandleFactory::new()),
            BoundedExecutor::default(),
            ParallelExecutor::default(),
        )
    }

    #[tokio::test]
    async fn test_fn_stage_records_output() {
        let stage = FnStage::new("world", |ctx: &mut PipelineContext| {
            ctx.record(&"a snowbound manor")?;
            Ok(())
        });
        assert_eq!(stage.name(), "world");

        let mut ctx = PipelineContext::new();
        ctx.enter(&StageId::new("world"));
        let ctx = stage.execute(ctx).await.unwrap();
        assert_eq!(ctx.output_as::<String>("world").unwrap().as_deref(), Some("a snowbound manor"));
    }

    #[tokio::test]
    async fn test_fn_factory_reaches_handles() {
        let factory = FnFactory::new(|resources: StageResources<TestHandle>| async move {
            let handle = resources.handle(&Tier::logic()).await?;
            let tier = handle.tier.clone();
            Ok::<_, ResourceError>(StageExecutor::work(FnStage::new(
                format!("uses-{tier}"),
                |_ctx: &mut PipelineContext| Ok(()),
            )))
        });

        let executor = factory.build(&resources()).await.unwrap();
        assert_eq!(executor.name(), "uses-logic");
        assert!(!executor.is_gate());
    }

    #[tokio::test]
    async fn test_prebuilt_executor_is_its_own_factory() {
        let executor = StageExecutor::work(FnStage::new("noop", |_ctx: &mut PipelineContext| Ok(())));
        let built = StageFactory::<TestHandle>::build(&executor, &resources()).await.unwrap();
        assert_eq!(built.name(), "noop");
    }
}
