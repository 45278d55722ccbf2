//! Mock stages and gates.

use crate::context::PipelineContext;
use crate::core::{ValidatorResult, Verdict};
use crate::errors::{ResourceError, StageFailure};
use crate::stages::{Gate, Stage, StageExecutor, StageFactory, StageResources};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Wraps a work stage as a shared factory.
pub fn stage_factory<H>(stage: impl Stage + 'static) -> Arc<dyn StageFactory<H>>
where
    H: Send + Sync + 'static,
{
    Arc::new(StageExecutor::work(stage))
}

/// Wraps a gate as a shared factory.
pub fn gate_factory<H>(gate: impl Gate + 'static) -> Arc<dyn StageFactory<H>>
where
    H: Send + Sync + 'static,
{
    Arc::new(StageExecutor::gate(gate))
}

/// A work stage that counts its executions and records a deterministic
/// output: `{"stage": <name>, "execution": <n>}`.
///
/// Clones share the counter.
#[derive(Debug, Clone)]
pub struct RecordingStage {
    name: String,
    executions: Arc<AtomicUsize>,
}

impl RecordingStage {
    /// Creates a new recording stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the number of executions so far.
    #[must_use]
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, mut ctx: PipelineContext) -> Result<PipelineContext, StageFailure> {
        let execution = self.executions.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.record(&serde_json::json!({
            "stage": self.name,
            "execution": execution,
        }))?;
        Ok(ctx)
    }
}

/// A work stage that always fails.
#[derive(Debug, Clone)]
pub struct FailingStage {
    name: String,
    message: String,
}

impl FailingStage {
    /// Creates a new failing stage.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: PipelineContext) -> Result<PipelineContext, StageFailure> {
        Err(StageFailure::fatal(self.message.clone()))
    }
}

/// A gate that replays a fixed sequence of results.
///
/// Once the script is used up the last entry repeats. Clones share the
/// evaluation counter.
#[derive(Debug, Clone)]
pub struct ScriptedGate {
    name: String,
    script: Arc<Vec<ValidatorResult>>,
    evaluations: Arc<AtomicUsize>,
}

impl ScriptedGate {
    /// Creates a gate from explicit results.
    pub fn new(name: impl Into<String>, script: impl IntoIterator<Item = ValidatorResult>) -> Self {
        Self {
            name: name.into(),
            script: Arc::new(script.into_iter().collect()),
            evaluations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates a gate from bare verdicts, with generated reasons.
    pub fn from_verdicts(
        name: impl Into<String>,
        verdicts: impl IntoIterator<Item = Verdict>,
    ) -> Self {
        let script = verdicts.into_iter().enumerate().map(|(i, verdict)| match verdict {
            Verdict::Pass => ValidatorResult::pass(format!("evaluation {} passed", i + 1)),
            Verdict::Fail => ValidatorResult::fail(format!("evaluation {} failed", i + 1)),
        });
        Self::new(name, script)
    }

    /// A gate that always passes.
    pub fn always_pass(name: impl Into<String>) -> Self {
        Self::new(name, [ValidatorResult::pass("scripted pass")])
    }

    /// A gate that always fails with `reason`.
    pub fn always_fail(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(name, [ValidatorResult::fail(reason)])
    }

    /// Returns the number of evaluations so far.
    #[must_use]
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Gate for ScriptedGate {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(
        &self,
        ctx: PipelineContext,
    ) -> Result<(PipelineContext, ValidatorResult), StageFailure> {
        let index = self.evaluations.fetch_add(1, Ordering::SeqCst);
        let result = self
            .script
            .get(index)
            .or_else(|| self.script.last())
            .cloned()
            .ok_or_else(|| StageFailure::fatal(format!("gate '{}' has an empty script", self.name)))?;
        Ok((ctx, result))
    }
}

/// Wraps a prebuilt executor and counts how often it is built.
#[derive(Debug, Clone)]
pub struct CountingStageFactory {
    executor: StageExecutor,
    builds: Arc<AtomicUsize>,
}

impl CountingStageFactory {
    /// Creates a factory handing out `executor`.
    #[must_use]
    pub fn new(executor: StageExecutor) -> Self {
        Self {
            executor,
            builds: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the number of builds so far.
    #[must_use]
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<H> StageFactory<H> for CountingStageFactory
where
    H: Send + Sync + 'static,
{
    async fn build(&self, _resources: &StageResources<H>) -> Result<StageExecutor, ResourceError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.executor.clone())
    }
}
