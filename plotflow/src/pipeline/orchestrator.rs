//! Sequential driver of a stage graph.

use super::{RouteDecision, Router, StageGraph};
use crate::cache::{CacheStats, ResourceCache};
use crate::cancellation::CancellationToken;
use crate::config::PipelineConfig;
use crate::context::PipelineContext;
use crate::core::{StageId, ValidatorResult, Verdict};
use crate::errors::{AbortReason, PlotflowError, StageFailure};
use crate::events::{EventSink, NoOpEventSink, PipelineEvent};
use crate::executor::{duration_ms, BoundedExecutor, ParallelExecutor};
use crate::stages::{StageExecutor, StageResources};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One execution of one stage within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageVisit {
    /// The stage executed.
    pub stage: StageId,
    /// 1-based execution count of the stage within the run.
    pub attempt: u32,
    /// Wall time of the execution.
    pub duration_ms: u64,
    /// The verdict, for gates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
}

/// The result of a run that reached the success terminal.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The run id.
    pub run_id: Uuid,
    /// The final context.
    pub context: PipelineContext,
    /// Every stage execution in order.
    pub visits: Vec<StageVisit>,
    /// Failed batch indices recorded by fan-out stages.
    pub partial_failures: BTreeMap<StageId, Vec<usize>>,
    /// Wall time of the run.
    pub duration_ms: u64,
}

impl RunReport {
    /// How many times a stage executed.
    #[must_use]
    pub fn executions_of(&self, stage: &str) -> usize {
        self.visits.iter().filter(|v| v.stage.as_str() == stage).count()
    }

    /// Retries a gate triggered.
    #[must_use]
    pub fn retries(&self, gate: &str) -> u32 {
        self.context.retry_counter(gate).map_or(0, |c| c.count())
    }

    /// Total stage executions.
    #[must_use]
    pub fn executions(&self) -> usize {
        self.visits.len()
    }
}

/// Drives a [`StageGraph`] from its entry stage to a terminal.
///
/// Owns the resource cache and the fan-out executors handed to stage
/// factories. `run` takes `&self`, so an orchestrator behind an `Arc` can
/// serve several runs; they share the cache.
pub struct Orchestrator<H> {
    graph: StageGraph<H>,
    resources: StageResources<H>,
    events: Arc<dyn EventSink>,
    cancel: Option<Arc<CancellationToken>>,
}

impl<H> std::fmt::Debug for Orchestrator<H>
where
    H: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("graph", &self.graph)
            .field("resources", &self.resources)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder<H> {
    graph: StageGraph<H>,
    cache: ResourceCache<H>,
    config: PipelineConfig,
    events: Arc<dyn EventSink>,
    cancel: Option<Arc<CancellationToken>>,
}

impl<H> OrchestratorBuilder<H>
where
    H: Send + Sync + 'static,
{
    /// Applies gate overrides and executor settings from a configuration.
    #[must_use]
    pub fn config(mut self, config: &PipelineConfig) -> Self {
        self.config = config.clone();
        self
    }

    /// Sets the sink receiving run events.
    #[must_use]
    pub fn events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Attaches a cancellation token to runs and fan-out executors.
    #[must_use]
    pub fn cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Validates the configuration and builds the orchestrator.
    pub fn build(self) -> Result<Orchestrator<H>, PlotflowError> {
        let Self {
            mut graph,
            cache,
            config,
            events,
            cancel,
        } = self;

        config.validate()?;
        graph.override_policies(&config.gates)?;

        let mut bounded = BoundedExecutor::from_config(&config.fanout);
        let mut parallel = ParallelExecutor::from_config(&config.parallel);
        if let Some(token) = &cancel {
            bounded = bounded.with_cancellation(Arc::clone(token));
            parallel = parallel.with_cancellation(Arc::clone(token));
        }

        debug!(
            pipeline = graph.name(),
            concurrency = bounded.concurrency_limit(),
            workers = parallel.worker_count(),
            "Orchestrator built"
        );

        Ok(Orchestrator {
            graph,
            resources: StageResources::new(cache, bounded, parallel),
            events,
            cancel,
        })
    }
}

impl<H> Orchestrator<H>
where
    H: Send + Sync + 'static,
{
    /// Starts building an orchestrator with default configuration.
    #[must_use]
    pub fn builder(graph: StageGraph<H>, cache: ResourceCache<H>) -> OrchestratorBuilder<H> {
        OrchestratorBuilder {
            graph,
            cache,
            config: PipelineConfig::default(),
            events: Arc::new(NoOpEventSink),
            cancel: None,
        }
    }

    /// The stage graph, with configured gate policies applied.
    #[must_use]
    pub fn graph(&self) -> &StageGraph<H> {
        &self.graph
    }

    /// The resources handed to stage factories.
    #[must_use]
    pub fn resources(&self) -> &StageResources<H> {
        &self.resources
    }

    /// Statistics of the resource cache.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.resources.cache().stats()
    }

    /// Clears every cached handle and executor.
    pub fn cache_reset(&self) {
        self.resources.cache().reset();
    }

    /// Runs the graph to completion.
    ///
    /// Gate counters are armed from the graph's policies unless the context
    /// already carries one for the gate. Non-gate stages are never retried:
    /// the first stage failure aborts the run.
    pub async fn run(&self, mut ctx: PipelineContext) -> Result<RunReport, AbortReason> {
        let run_id = ctx.run_id();
        let started = Instant::now();
        let mut visits: Vec<StageVisit> = Vec::new();
        let mut executions: HashMap<StageId, u32> = HashMap::new();

        for (gate, policy) in self.graph.gates() {
            ctx.arm_counter(gate, policy.max_retries);
        }

        info!(
            run_id = %run_id,
            pipeline = self.graph.name(),
            stages = self.graph.len(),
            "Run started"
        );
        self.events
            .emit(&PipelineEvent::RunStarted {
                run_id,
                stages: self.graph.len(),
            })
            .await;

        let mut cursor = 0;
        while let Some(node) = self.graph.node(cursor) {
            let stage = &node.id;

            if let Some(token) = self.cancel.as_ref().filter(|t| t.is_cancelled()) {
                let reason = AbortReason::Cancelled {
                    stage: stage.clone(),
                    reason: token.reason().unwrap_or_default(),
                };
                return Err(self.abort(run_id, reason).await);
            }

            let attempt = {
                let count = executions.entry(stage.clone()).or_insert(0);
                *count += 1;
                *count
            };
            debug!(run_id = %run_id, stage = %stage, attempt, "Stage started");
            self.events
                .emit(&PipelineEvent::StageStarted {
                    run_id,
                    stage: stage.clone(),
                    attempt,
                })
                .await;

            let executor = match self
                .resources
                .cache()
                .executor(stage, &node.factory, &self.resources)
                .await
            {
                Ok(executor) => executor,
                Err(e) => return Err(self.fail_stage(run_id, stage, e.into()).await),
            };

            let stage_start = Instant::now();
            ctx.enter(stage);
            let outcome = match (executor, node.gate.is_some()) {
                (StageExecutor::Work(work), false) => work.execute(ctx).await.map(|c| (c, None)),
                (StageExecutor::Gate(gate), true) => gate
                    .evaluate(ctx)
                    .await
                    .map(|(c, result)| (c, Some(result))),
                (StageExecutor::Work(_), true) => Err(StageFailure::fatal(format!(
                    "stage '{stage}' is declared as a gate but its factory built a work stage"
                ))),
                (StageExecutor::Gate(_), false) => Err(StageFailure::fatal(format!(
                    "stage '{stage}' is declared as a work stage but its factory built a gate"
                ))),
            };
            let (next, verdict) = match outcome {
                Ok((next, _)) if next.run_id() != run_id => {
                    let failure = StageFailure::fatal(format!(
                        "stage '{stage}' returned the context of run {}",
                        next.run_id()
                    ));
                    return Err(self.fail_stage(run_id, stage, failure).await);
                }
                Ok(done) => done,
                Err(failure) => return Err(self.fail_stage(run_id, stage, failure).await),
            };
            ctx = next;
            ctx.leave();

            let elapsed = duration_ms(stage_start.elapsed());
            debug!(run_id = %run_id, stage = %stage, duration_ms = elapsed, "Stage completed");
            self.events
                .emit(&PipelineEvent::StageCompleted {
                    run_id,
                    stage: stage.clone(),
                    duration_ms: elapsed,
                })
                .await;

            visits.push(StageVisit {
                stage: stage.clone(),
                attempt,
                duration_ms: elapsed,
                verdict: verdict.as_ref().map(ValidatorResult::verdict),
            });

            let (Some(result), Some(policy)) = (verdict, node.gate.as_ref()) else {
                cursor += 1;
                continue;
            };

            let counter = ctx.arm_counter(stage, policy.max_retries);
            self.events
                .emit(&PipelineEvent::GateVerdict {
                    run_id,
                    gate: stage.clone(),
                    verdict: result.verdict(),
                    reason: result.reason().to_string(),
                })
                .await;
            let decision = Router::decide(&result, counter, stage, &policy.retry_target);
            if let Err(e) = ctx.store_verdict(stage, result) {
                return Err(self.fail_stage(run_id, stage, e.into()).await);
            }

            match decision {
                RouteDecision::Advance => cursor += 1,
                RouteDecision::RetryTo(target) => {
                    let Some(position) = self.graph.position(target.as_str()) else {
                        let failure =
                            StageFailure::fatal(format!("retry target '{target}' is not in the graph"));
                        return Err(self.fail_stage(run_id, stage, failure).await);
                    };
                    let retry = ctx.bump_retry(stage, counter.max());
                    info!(
                        run_id = %run_id,
                        gate = %stage,
                        target = %target,
                        retry,
                        max_retries = counter.max(),
                        "Gate failed, retrying"
                    );
                    self.events
                        .emit(&PipelineEvent::RetryScheduled {
                            run_id,
                            gate: stage.clone(),
                            target,
                            retry,
                            max_retries: counter.max(),
                        })
                        .await;
                    cursor = position;
                }
                RouteDecision::Abort(reason) => return Err(self.abort(run_id, reason).await),
            }
        }

        let duration = duration_ms(started.elapsed());
        info!(
            run_id = %run_id,
            executions = visits.len(),
            duration_ms = duration,
            "Run completed"
        );
        self.events
            .emit(&PipelineEvent::RunCompleted {
                run_id,
                executions: visits.len(),
                duration_ms: duration,
            })
            .await;

        Ok(RunReport {
            run_id,
            partial_failures: ctx.partial_failures().clone(),
            context: ctx,
            visits,
            duration_ms: duration,
        })
    }

    async fn fail_stage(&self, run_id: Uuid, stage: &StageId, failure: StageFailure) -> AbortReason {
        self.events
            .emit(&PipelineEvent::StageFailed {
                run_id,
                stage: stage.clone(),
                error: failure.to_string(),
            })
            .await;
        self.abort(
            run_id,
            AbortReason::StageFailed {
                stage: stage.clone(),
                failure,
            },
        )
        .await
    }

    async fn abort(&self, run_id: Uuid, reason: AbortReason) -> AbortReason {
        warn!(run_id = %run_id, stage = %reason.stage(), reason = %reason, "Run aborted");
        self.events
            .emit(&PipelineEvent::RunAborted {
                run_id,
                stage: reason.stage().clone(),
                reason: reason.to_string(),
            })
            .await;
        reason
    }
}
