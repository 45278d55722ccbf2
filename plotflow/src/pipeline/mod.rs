//! Stage graph, routing and orchestration.
//!
//! A [`StageGraph`] is built once with a [`GraphBuilder`] (or from the
//! standard [`blueprint`]) and driven by an [`Orchestrator`]. After every
//! gate the [`Router`] decides whether the run advances, jumps back to the
//! gate's retry target, or aborts.

pub mod blueprint;
mod graph;
mod orchestrator;
mod router;


pub use blueprint::StageCatalog;
pub use graph::{GraphBuilder, StageGraph};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, RunReport, StageVisit};
pub use router::{GatePolicy, RouteDecision, Router};
