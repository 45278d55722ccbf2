//! Run events for observability.
//!
//! The orchestrator reports progress as [`PipelineEvent`]s through an
//! [`EventSink`]. Sinks never fail the run: emission errors are theirs to
//! swallow.

mod event;
mod sink;

pub use event::PipelineEvent;
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
