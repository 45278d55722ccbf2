//! # Plotflow
//!
//! Stage orchestration for multi-stage creative content generation.
//!
//! A plotflow run threads one [`PipelineContext`](context::PipelineContext)
//! through a fixed sequence of stages. Two kinds of stages exist:
//!
//! - **Work stages** transform the context and record their output.
//! - **Gates** additionally emit a pass/fail verdict. A failing gate sends the
//!   run back to an earlier stage until its retry budget is spent.
//!
//! Stages that need to process many independent items fan out through one of
//! two executors: the [`BoundedExecutor`](executor::BoundedExecutor) for
//! network-bound work and the [`ParallelExecutor`](executor::ParallelExecutor)
//! for CPU-bound work. Expensive shared handles and stage instances live in the
//! [`ResourceCache`](cache::ResourceCache), so retries are cheap.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use plotflow::prelude::*;
//!
//! let graph = GraphBuilder::new("mystery")
//!     .stage("world", world_factory)
//!     .gate("world_validation", validator_factory, GatePolicy::new("world"))
//!     .stage("characters", characters_factory)
//!     .build()?;
//!
//! let orchestrator = Orchestrator::builder(graph, ResourceCache::new(clients))
//!     .config(&PipelineConfig::default())
//!     .build()?;
//!
//! let report = orchestrator.run(PipelineContext::new()).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{CacheStats, HandleFactory, ResourceCache, TableStats};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{FanOutConfig, ParallelConfig, PipelineConfig};
    pub use crate::context::{ContextSnapshot, PipelineContext, RetryCounter};
    pub use crate::core::{StageId, Tier, ValidatorResult, Verdict};
    pub use crate::errors::{
        AbortReason, ConfigError, ContextError, GraphError, PlotflowError, ResourceError,
        StageFailure, TaskFailure,
    };
    pub use crate::events::{
        CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent,
    };
    pub use crate::executor::{
        AsyncJob, BatchReport, BlockingJob, BoundedExecutor, FanOut, ParallelExecutor,
        RetryPolicy, TaskOutcome,
    };
    pub use crate::observability::{init_logging, LogFormat, LoggingConfig};
    pub use crate::pipeline::{
        GatePolicy, GraphBuilder, Orchestrator, RouteDecision, Router, RunReport, StageCatalog,
        StageGraph, StageVisit,
    };
    pub use crate::stages::{
        FnFactory, FnStage, Gate, Stage, StageExecutor, StageFactory, StageResources,
    };
}
