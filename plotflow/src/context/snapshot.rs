//! Run-independent context snapshots.

use super::RetryCounter;
use crate::core::{StageId, ValidatorResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// The contents of a context without its run identity.
///
/// Two runs over deterministic stages produce equal snapshots, which is how
/// reproducibility is checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Run configuration.
    pub settings: serde_json::Value,
    /// Stage outputs.
    pub slots: BTreeMap<StageId, serde_json::Value>,
    /// Last verdict per gate.
    pub verdicts: BTreeMap<StageId, ValidatorResult>,
    /// Retry counters per gate.
    pub counters: BTreeMap<StageId, RetryCounter>,
    /// Failed batch indices per stage.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub partial_failures: BTreeMap<StageId, Vec<usize>>,
}

impl ContextSnapshot {
    /// Returns a stable SHA-256 digest of the snapshot.
    #[must_use]
    pub fn fingerprint(&self) -> Option<String> {
        let serialized = serde_json::to_vec(self).ok()?;
        let mut hasher = Sha256::new();
        hasher.update(&serialized);
        Some(hex::encode(hasher.finalize()))
    }
}
