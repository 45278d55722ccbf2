//! Test doubles for plotflow pipelines.
//!
//! This module provides:
//! - Scripted gates and recording or failing stages
//! - A handle factory that counts constructions
//! - An in-process [`FanOut`](crate::executor::FanOut) stand-in

mod fanout;
mod handles;
mod mocks;

pub use fanout::InlineFanOut;
pub use handles::{CountingHandleFactory, TestHandle};
pub use mocks::{
    gate_factory, stage_factory, CountingStageFactory, FailingStage, RecordingStage, ScriptedGate,
};
