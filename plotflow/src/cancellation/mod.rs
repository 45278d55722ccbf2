//! Cooperative cancellation for pipeline runs.
//!
//! A single [`CancellationToken`] is shared by the orchestrator and both
//! fan-out executors. Cancellation drains: the orchestrator stops at the next
//! stage boundary and executors stop starting new tasks, while work already
//! in flight runs to completion.

mod token;

pub use token::CancellationToken;
