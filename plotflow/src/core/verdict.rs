//! Validator results produced by gate stages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The pass/fail outcome of a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The checked content is acceptable.
    Pass,
    /// The checked content must be regenerated.
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// A gate's verdict plus its diagnostic reason.
///
/// Immutable once produced. The router consumes it exactly once; the
/// orchestrator also keeps it in the gate's slot of the context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorResult {
    verdict: Verdict,
    reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    issues: Vec<String>,
}

impl ValidatorResult {
    /// Creates a passing result.
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Pass,
            reason: reason.into(),
            issues: Vec::new(),
        }
    }

    /// Creates a failing result.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Fail,
            reason: reason.into(),
            issues: Vec::new(),
        }
    }

    /// Adds a single issue.
    #[must_use]
    pub fn with_issue(mut self, issue: impl Into<String>) -> Self {
        self.issues.push(issue.into());
        self
    }

    /// Adds several issues.
    #[must_use]
    pub fn with_issues<I, S>(mut self, issues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issues.extend(issues.into_iter().map(Into::into));
        self
    }

    /// Returns the verdict.
    #[must_use]
    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    /// Returns true if the verdict is a pass.
    #[must_use]
    pub fn is_pass(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// Returns the diagnostic reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Returns the individual issues found.
    #[must_use]
    pub fn issues(&self) -> &[String] {
        &self.issues
    }
}
