//! The context threaded through every stage of a run.
//!
//! This module provides:
//! - [`PipelineContext`], the single mutable value owned by a run
//! - [`RetryCounter`], one per gate
//! - [`ContextSnapshot`], a run-independent view used for comparisons

#[cfg(test)]
mod context_tests;
mod pipeline_context;
mod snapshot;

pub use pipeline_context::{PipelineContext, RetryCounter};
pub use snapshot::ContextSnapshot;
