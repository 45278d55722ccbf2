//! Transition decisions after a gate.

use crate::context::RetryCounter;
use crate::core::{StageId, ValidatorResult};
use crate::errors::AbortReason;
use serde::{Deserialize, Serialize};

/// How a gate retries when it fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatePolicy {
    /// The earlier stage to re-run when the gate fails.
    pub retry_target: StageId,
    /// Retries allowed before the run aborts (default: 2).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    2
}

impl GatePolicy {
    /// Creates a policy retrying to `retry_target` with the default budget.
    pub fn new(retry_target: impl Into<StageId>) -> Self {
        Self {
            retry_target: retry_target.into(),
            max_retries: default_max_retries(),
        }
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// The transition chosen after a gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Continue with the next stage.
    Advance,
    /// Resume execution from an earlier stage.
    RetryTo(StageId),
    /// Stop the run.
    Abort(AbortReason),
}

/// Decides the transition after a gate from its verdict and retry counter.
///
/// Pure: the orchestrator applies the decision, including incrementing the
/// counter on [`RouteDecision::RetryTo`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Router;

impl Router {
    /// Pass advances. A failure retries while `counter.count() < counter.max()`,
    /// and aborts with the validator's reason once the budget is spent.
    #[must_use]
    pub fn decide(
        result: &ValidatorResult,
        counter: RetryCounter,
        gate: &StageId,
        retry_target: &StageId,
    ) -> RouteDecision {
        if result.is_pass() {
            return RouteDecision::Advance;
        }
        if counter.is_exhausted() {
            RouteDecision::Abort(AbortReason::GateExhausted {
                gate: gate.clone(),
                retries: counter.count(),
                reason: result.reason().to_string(),
                issues: result.issues().to_vec(),
            })
        } else {
            RouteDecision::RetryTo(retry_target.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (StageId, StageId) {
        (StageId::new("world_validation"), StageId::new("world"))
    }

    fn counter(count: u32, max: u32) -> RetryCounter {
        let mut counter = RetryCounter::new(max);
        for _ in 0..count {
            counter.increment();
        }
        counter
    }

    #[test]
    fn test_pass_advances_regardless_of_counter() {
        let (gate, target) = ids();
        let pass = ValidatorResult::pass("coherent");
        assert_eq!(Router::decide(&pass, counter(0, 2), &gate, &target), RouteDecision::Advance);
        assert_eq!(Router::decide(&pass, counter(2, 2), &gate, &target), RouteDecision::Advance);
    }

    #[test]
    fn test_fail_under_budget_retries() {
        let (gate, target) = ids();
        let fail = ValidatorResult::fail("incoherent geography");
        assert_eq!(
            Router::decide(&fail, counter(1, 2), &gate, &target),
            RouteDecision::RetryTo(target.clone())
        );
    }

    #[test]
    fn test_fail_at_budget_aborts_with_reason() {
        let (gate, target) = ids();
        let fail = ValidatorResult::fail("incoherent geography").with_issue("river flows uphill");
        let decision = Router::decide(&fail, counter(2, 2), &gate, &target);
        assert_eq!(
            decision,
            RouteDecision::Abort(AbortReason::GateExhausted {
                gate,
                retries: 2,
                reason: "incoherent geography".to_string(),
                issues: vec!["river flows uphill".to_string()],
            })
        );
    }

    #[test]
    fn test_zero_budget_aborts_immediately() {
        let (gate, target) = ids();
        let decision = Router::decide(&ValidatorResult::fail("no"), counter(0, 0), &gate, &target);
        assert!(matches!(decision, RouteDecision::Abort(_)));
    }

    #[test]
    fn test_policy_defaults() {
        let policy: GatePolicy = toml::from_str("retry_target = \"crime\"").unwrap();
        assert_eq!(policy, GatePolicy::new("crime"));
        assert_eq!(policy.max_retries, 2);
        assert_eq!(GatePolicy::new("crime").with_max_retries(3).max_retries, 3);
    }
}
