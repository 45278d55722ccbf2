//! Mutable pipeline context.

use super::ContextSnapshot;
use crate::core::{StageId, ValidatorResult};
use crate::errors::ContextError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Retry bookkeeping for one gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryCounter {
    count: u32,
    max: u32,
}

impl RetryCounter {
    /// Creates a counter at zero with the given maximum.
    #[must_use]
    pub const fn new(max: u32) -> Self {
        Self { count: 0, max }
    }

    /// Retries performed so far.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// The retry budget.
    #[must_use]
    pub const fn max(&self) -> u32 {
        self.max
    }

    /// Returns true once no retries remain.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.count >= self.max
    }

    /// Retries still available.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.count)
    }

    pub(crate) fn increment(&mut self) -> u32 {
        self.count = self.count.saturating_add(1);
        self.count
    }
}

/// The single mutable value threaded through every stage of a run.
///
/// Holds one optional output slot per stage. A slot is written only through
/// [`record`](Self::record), which targets the stage the orchestrator marked
/// active before the call, so a stage can never overwrite another stage's
/// output. Re-running a stage replaces its own slot.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    settings: serde_json::Value,
    slots: BTreeMap<StageId, serde_json::Value>,
    verdicts: BTreeMap<StageId, ValidatorResult>,
    counters: BTreeMap<StageId, RetryCounter>,
    partial_failures: BTreeMap<StageId, Vec<usize>>,
    active: Option<StageId>,
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineContext {
    /// Creates an empty context for a new run.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            started_at: Utc::now(),
            settings: serde_json::Value::Null,
            slots: BTreeMap::new(),
            verdicts: BTreeMap::new(),
            counters: BTreeMap::new(),
            partial_failures: BTreeMap::new(),
            active: None,
        }
    }

    /// Sets the run configuration visible to stages.
    #[must_use]
    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }

    /// Overrides the retry budget of a gate for this run.
    ///
    /// Takes precedence over the graph's configured policy.
    #[must_use]
    pub fn with_retry_max(mut self, gate: impl Into<StageId>, max: u32) -> Self {
        self.counters.insert(gate.into(), RetryCounter::new(max));
        self
    }

    /// The run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// When the context was created.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// The run configuration.
    #[must_use]
    pub fn settings(&self) -> &serde_json::Value {
        &self.settings
    }

    /// Reads a typed setting by key, if present and well-formed.
    #[must_use]
    pub fn setting<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.settings
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// The stage currently executing, if any.
    #[must_use]
    pub fn active_stage(&self) -> Option<&StageId> {
        self.active.as_ref()
    }

    /// Records the active stage's output, replacing any earlier output of the
    /// same stage.
    pub fn record<T: Serialize>(&mut self, value: &T) -> Result<(), ContextError> {
        let stage = self.active.clone().ok_or(ContextError::NoActiveStage)?;
        let value = serde_json::to_value(value).map_err(|e| ContextError::Serialize {
            stage: stage.clone(),
            message: e.to_string(),
        })?;
        self.slots.insert(stage, value);
        Ok(())
    }

    /// Records an already-serialized output for the active stage.
    pub fn record_value(&mut self, value: serde_json::Value) -> Result<(), ContextError> {
        let stage = self.active.clone().ok_or(ContextError::NoActiveStage)?;
        self.slots.insert(stage, value);
        Ok(())
    }

    /// Records which items of the active stage's fan-out batch failed.
    ///
    /// An empty list clears earlier failures of the stage.
    pub fn note_partial_failures(&mut self, indices: Vec<usize>) -> Result<(), ContextError> {
        let stage = self.active.clone().ok_or(ContextError::NoActiveStage)?;
        if indices.is_empty() {
            self.partial_failures.remove(&stage);
        } else {
            self.partial_failures.insert(stage, indices);
        }
        Ok(())
    }

    /// Returns a stage's raw output.
    #[must_use]
    pub fn output(&self, stage: &str) -> Option<&serde_json::Value> {
        self.slots.get(stage)
    }

    /// Returns a stage's output deserialized into `T`.
    ///
    /// `Ok(None)` means the stage has not run yet.
    pub fn output_as<T: DeserializeOwned>(&self, stage: &str) -> Result<Option<T>, ContextError> {
        self.slots
            .get(stage)
            .map(|v| {
                serde_json::from_value(v.clone()).map_err(|e| ContextError::Deserialize {
                    stage: StageId::new(stage),
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    /// Returns true if the stage has recorded output.
    #[must_use]
    pub fn has_output(&self, stage: &str) -> bool {
        self.slots.contains_key(stage)
    }

    /// Stages with a populated slot, in id order.
    #[must_use]
    pub fn populated_stages(&self) -> Vec<&StageId> {
        self.slots.keys().collect()
    }

    /// The last verdict produced by a gate.
    #[must_use]
    pub fn verdict(&self, gate: &str) -> Option<&ValidatorResult> {
        self.verdicts.get(gate)
    }

    /// The retry counter of a gate.
    #[must_use]
    pub fn retry_counter(&self, gate: &str) -> Option<RetryCounter> {
        self.counters.get(gate).copied()
    }

    /// Failed batch indices per stage.
    #[must_use]
    pub fn partial_failures(&self) -> &BTreeMap<StageId, Vec<usize>> {
        &self.partial_failures
    }

    /// Captures the run-independent contents of the context.
    #[must_use]
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            settings: self.settings.clone(),
            slots: self.slots.clone(),
            verdicts: self.verdicts.clone(),
            counters: self.counters.clone(),
            partial_failures: self.partial_failures.clone(),
        }
    }

    pub(crate) fn enter(&mut self, stage: &StageId) {
        self.active = Some(stage.clone());
    }

    pub(crate) fn leave(&mut self) {
        self.active = None;
    }

    /// Keeps a gate's result as its verdict and as its slot output.
    pub(crate) fn store_verdict(
        &mut self,
        gate: &StageId,
        result: ValidatorResult,
    ) -> Result<(), ContextError> {
        let value = serde_json::to_value(&result).map_err(|e| ContextError::Serialize {
            stage: gate.clone(),
            message: e.to_string(),
        })?;
        self.slots.insert(gate.clone(), value);
        self.verdicts.insert(gate.clone(), result);
        Ok(())
    }

    /// Installs a gate's counter unless the caller already preset one.
    pub(crate) fn arm_counter(&mut self, gate: &StageId, max: u32) -> RetryCounter {
        *self
            .counters
            .entry(gate.clone())
            .or_insert_with(|| RetryCounter::new(max))
    }

    /// Counts one retry of a gate and returns the new count.
    pub(crate) fn bump_retry(&mut self, gate: &StageId, max: u32) -> u32 {
        self.counters
            .entry(gate.clone())
            .or_insert_with(|| RetryCounter::new(max))
            .increment()
    }
}
