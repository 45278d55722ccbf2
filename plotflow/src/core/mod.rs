//! Core domain model types for plotflow.
//!
//! This module contains the identifiers and verdicts shared by every layer:
//! - Stage and tier identifiers
//! - Validator results emitted by gates

mod ids;
mod verdict;

pub use ids::{StageId, Tier};
pub use verdict::{ValidatorResult, Verdict};
