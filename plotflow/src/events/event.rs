//! Typed run events.

use crate::core::{StageId, Verdict};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Something observable that happened during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A run began.
    RunStarted {
        /// The run id.
        run_id: Uuid,
        /// Number of stages in the graph.
        stages: usize,
    },
    /// A stage began executing.
    StageStarted {
        /// The run id.
        run_id: Uuid,
        /// The stage.
        stage: StageId,
        /// 1-based execution count of this stage within the run.
        attempt: u32,
    },
    /// A stage returned successfully.
    StageCompleted {
        /// The run id.
        run_id: Uuid,
        /// The stage.
        stage: StageId,
        /// Wall time spent in the stage.
        duration_ms: u64,
    },
    /// A stage reported a fatal failure.
    StageFailed {
        /// The run id.
        run_id: Uuid,
        /// The stage.
        stage: StageId,
        /// The failure message.
        error: String,
    },
    /// A gate produced a verdict.
    GateVerdict {
        /// The run id.
        run_id: Uuid,
        /// The gate.
        gate: StageId,
        /// The verdict.
        verdict: Verdict,
        /// The validator's reason.
        reason: String,
    },
    /// A failed gate sent the run back to an earlier stage.
    RetryScheduled {
        /// The run id.
        run_id: Uuid,
        /// The gate that failed.
        gate: StageId,
        /// The stage the run resumes from.
        target: StageId,
        /// Retry number, starting at 1.
        retry: u32,
        /// The gate's retry budget.
        max_retries: u32,
    },
    /// A run reached the success terminal.
    RunCompleted {
        /// The run id.
        run_id: Uuid,
        /// Total stage executions.
        executions: usize,
        /// Wall time of the run.
        duration_ms: u64,
    },
    /// A run reached the failure terminal.
    RunAborted {
        /// The run id.
        run_id: Uuid,
        /// The stage the abort originated from.
        stage: StageId,
        /// The abort reason.
        reason: String,
    },
}

impl PipelineEvent {
    /// Returns the dotted event type, such as `stage.started`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run.started",
            Self::StageStarted { .. } => "stage.started",
            Self::StageCompleted { .. } => "stage.completed",
            Self::StageFailed { .. } => "stage.failed",
            Self::GateVerdict { .. } => "gate.verdict",
            Self::RetryScheduled { .. } => "gate.retry_scheduled",
            Self::RunCompleted { .. } => "run.completed",
            Self::RunAborted { .. } => "run.aborted",
        }
    }

    /// Returns the stage this event concerns, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&StageId> {
        match self {
            Self::StageStarted { stage, .. }
            | Self::StageCompleted { stage, .. }
            | Self::StageFailed { stage, .. }
            | Self::RunAborted { stage, .. } => Some(stage),
            Self::GateVerdict { gate, .. } | Self::RetryScheduled { gate, .. } => Some(gate),
            Self::RunStarted { .. } | Self::RunCompleted { .. } => None,
        }
    }
}
