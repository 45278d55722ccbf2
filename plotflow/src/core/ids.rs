//! Stage and tier identifiers.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Identifier of a stage in the pipeline graph.
///
/// Also used as the key of the executor table in the resource cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(String);

impl StageId {
    /// Creates a new stage id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for StageId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for StageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A named class of shared resource configuration.
///
/// Tiers key the handle table of the resource cache. The standard pipeline
/// uses three: a logic tier for reasoning-heavy stages, a content tier for
/// bulk generation and a validation tier for cheap checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tier(String);

impl Tier {
    /// Creates a new tier key.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The tier used by world building, validation and other logic stages.
    #[must_use]
    pub fn logic() -> Self {
        Self::new("logic")
    }

    /// The tier used for bulk content generation.
    #[must_use]
    pub fn content() -> Self {
        Self::new("content")
    }

    /// The low-cost tier used for simple checks and auxiliary calls.
    #[must_use]
    pub fn validation() -> Self {
        Self::new("validation")
    }

    /// Returns the tier name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Tier {
    fn from(value: String) -> Self {
        Self(value)
    }
}
