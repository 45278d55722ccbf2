//! Error types for plotflow.
//!
//! The taxonomy follows how far a failure travels:
//!
//! - [`TaskFailure`] stays inside a batch and is reported as data.
//! - [`StageFailure`] is fatal to the stage that raised it and aborts the run.
//! - [`AbortReason`] is the terminal payload of a run that could not finish.
//! - [`GraphError`] and [`ConfigError`] are raised before a run starts.

use crate::core::{StageId, Tier};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for plotflow operations.
#[derive(Debug, Error)]
pub enum PlotflowError {
    /// The stage graph is invalid.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// The configuration could not be loaded or is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A run aborted.
    #[error("{0}")]
    Aborted(#[from] AbortReason),

    /// The logging subscriber could not be installed.
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Failure to construct a cached handle or stage executor.
///
/// Cloneable so a single failed construction can be delivered to every
/// caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// A tier handle could not be built.
    #[error("Failed to construct handle for tier '{tier}': {message}")]
    Handle {
        /// The tier being constructed.
        tier: Tier,
        /// The underlying failure.
        message: String,
    },

    /// A stage executor could not be built.
    #[error("Failed to build executor for stage '{stage}': {message}")]
    Executor {
        /// The stage being built.
        stage: StageId,
        /// The underlying failure.
        message: String,
    },
}

impl ResourceError {
    /// Creates a handle construction error.
    pub fn handle(tier: &Tier, message: impl Into<String>) -> Self {
        Self::Handle {
            tier: tier.clone(),
            message: message.into(),
        }
    }

    /// Creates an executor construction error.
    pub fn executor(stage: &StageId, message: impl Into<String>) -> Self {
        Self::Executor {
            stage: stage.clone(),
            message: message.into(),
        }
    }

    /// Wraps an arbitrary handle construction failure, keeping its cause chain.
    pub fn from_error(tier: &Tier, err: impl Into<anyhow::Error>) -> Self {
        Self::handle(tier, format!("{:#}", err.into()))
    }
}

/// Errors raised while reading or writing context slots.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// A write was attempted while no stage was active.
    #[error("No active stage: outputs can only be recorded while a stage is executing")]
    NoActiveStage,

    /// A value could not be serialized into a slot.
    #[error("Failed to record output of stage '{stage}': {message}")]
    Serialize {
        /// The stage whose slot was written.
        stage: StageId,
        /// The serializer message.
        message: String,
    },

    /// A slot could not be deserialized into the requested type.
    #[error("Failed to read output of stage '{stage}': {message}")]
    Deserialize {
        /// The stage whose slot was read.
        stage: StageId,
        /// The deserializer message.
        message: String,
    },
}

/// A non-recoverable stage failure.
///
/// The orchestrator never retries a failed stage; it aborts the run with the
/// failure attached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageFailure {
    /// The stage could not do its work.
    #[error("{message}")]
    Fatal {
        /// Description of the failure.
        message: String,
    },

    /// A required shared resource could not be constructed.
    #[error("{0}")]
    Resource(#[from] ResourceError),

    /// Reading or writing the context failed.
    #[error("{0}")]
    Context(#[from] ContextError),

    /// Too few items of a fan-out batch succeeded for the stage to continue.
    #[error("Only {succeeded} of {total} batch items succeeded (required {required}); failed indices: {failed:?}")]
    InsufficientBatch {
        /// Items that succeeded.
        succeeded: usize,
        /// Items submitted.
        total: usize,
        /// Minimum required successes.
        required: usize,
        /// Indices of failed items.
        failed: Vec<usize>,
    },
}

impl StageFailure {
    /// Creates a fatal failure with a message.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Wraps an arbitrary error, keeping its cause chain in the message.
    pub fn from_error(err: impl Into<anyhow::Error>) -> Self {
        Self::fatal(format!("{:#}", err.into()))
    }
}

/// Per-item failure inside a fan-out batch.
///
/// Never aborts the batch: it occupies the failed item's slot in the results.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskFailure {
    /// Every attempt failed.
    #[error("Task failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last_error: String,
    },

    /// The task ran longer than the per-task timeout.
    #[error("Task timed out after {timeout_ms}ms")]
    TimedOut {
        /// The timeout that was exceeded.
        timeout_ms: u64,
    },

    /// The task panicked on its worker.
    #[error("Task panicked: {message}")]
    Panicked {
        /// The panic payload, if it was a string.
        message: String,
    },

    /// The batch was cancelled before the task started.
    #[error("Task cancelled before it started")]
    Cancelled,
}

impl TaskFailure {
    /// Returns true for timeout failures.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Errors found while assembling a stage graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The graph has no stages.
    #[error("Pipeline '{0}' has no stages")]
    Empty(String),

    /// Two stages share an id.
    #[error("Duplicate stage id '{0}'")]
    DuplicateStage(StageId),

    /// A gate's retry target is not in the graph.
    #[error("Gate '{gate}' retries to unknown stage '{target}'")]
    UnknownRetryTarget {
        /// The gate.
        gate: StageId,
        /// The missing target.
        target: StageId,
    },

    /// A gate's retry target does not come before the gate.
    #[error("Gate '{gate}' must retry to an earlier stage, but '{target}' does not precede it")]
    RetryTargetNotEarlier {
        /// The gate.
        gate: StageId,
        /// The offending target.
        target: StageId,
    },

    /// A gate policy names a stage that is not a gate.
    #[error("Gate policy given for '{0}', which is not a gate in this graph")]
    UnknownGate(StageId),

    /// A stage in the blueprint has no registered factory.
    #[error("No factory registered for stage '{0}'")]
    MissingFactory(StageId),

    /// A factory was registered for a stage the blueprint does not contain.
    #[error("Factory registered for unknown stage '{0}'")]
    UnknownStage(StageId),
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        /// The file path.
        path: String,
        /// The IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be parsed.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// An environment override has an invalid value.
    #[error("Invalid value '{value}' for environment variable {var}")]
    Env {
        /// The variable name.
        var: String,
        /// The rejected value.
        value: String,
    },

    /// The configuration parsed but is not usable.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// The terminal payload of a run that could not reach the success terminal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortReason {
    /// A gate kept failing after its retry budget was spent.
    #[error("Gate '{gate}' failed after {retries} retr{}: {reason}", if *.retries == 1 { "y" } else { "ies" })]
    GateExhausted {
        /// The gate that gave up.
        gate: StageId,
        /// Retries attempted before giving up.
        retries: u32,
        /// The last validator reason.
        reason: String,
        /// The last validator issues.
        issues: Vec<String>,
    },

    /// A stage reported a fatal failure.
    #[error("Stage '{stage}' failed: {failure}")]
    StageFailed {
        /// The failing stage.
        stage: StageId,
        /// The failure.
        failure: StageFailure,
    },

    /// The run was cancelled between stages.
    #[error("Run cancelled before stage '{stage}': {reason}")]
    Cancelled {
        /// The stage that would have run next.
        stage: StageId,
        /// The cancellation reason.
        reason: String,
    },
}

impl AbortReason {
    /// Returns the stage the abort originated from.
    #[must_use]
    pub fn stage(&self) -> &StageId {
        match self {
            Self::GateExhausted { gate, .. } => gate,
            Self::StageFailed { stage, .. } | Self::Cancelled { stage, .. } => stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_exhausted_message() {
        let reason = AbortReason::GateExhausted {
            gate: StageId::new("logic_validation"),
            retries: 3,
            reason: "timeline contradicts alibi".to_string(),
            issues: Vec::new(),
        };
        assert_eq!(
            reason.to_string(),
            "Gate 'logic_validation' failed after 3 retries: timeline contradicts alibi"
        );
        assert_eq!(reason.stage().as_str(), "logic_validation");

        let single = AbortReason::GateExhausted {
            gate: StageId::new("world_validation"),
            retries: 1,
            reason: "incoherent".to_string(),
            issues: Vec::new(),
        };
        assert!(single.to_string().contains("1 retry:"));
    }

    #[test]
    fn test_stage_failure_from_error_keeps_chain() {
        let err = anyhow::anyhow!("connection reset").context("calling content tier");
        let failure = StageFailure::from_error(err);
        assert_eq!(failure.to_string(), "calling content tier: connection reset");
    }

    #[test]
    fn test_resource_error_converts_to_stage_failure() {
        let failure: StageFailure = ResourceError::handle(&Tier::logic(), "missing api key").into();
        assert!(matches!(failure, StageFailure::Resource(_)));
        assert!(failure.to_string().contains("tier 'logic'"));
    }

    #[test]
    fn test_task_failure_serialization() {
        let failure = TaskFailure::TimedOut { timeout_ms: 250 };
        assert!(failure.is_timeout());
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "timed_out", "timeout_ms": 250}));
    }
}
