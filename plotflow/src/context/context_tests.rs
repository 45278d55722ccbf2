//! Tests for the context module.

#[cfg(test)]
mod tests {
    use crate::context::{PipelineContext, RetryCounter};
    use crate::core::{StageId, ValidatorResult};
    use crate::errors::ContextError;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct World {
        setting: String,
        era: u32,
    }

    #[test]
    fn test_new_context_is_empty() {
        let ctx = PipelineContext::new()
            .with_settings(serde_json::json!({"players": 8, "language": "en"}));
        assert!(ctx.populated_stages().is_empty());
        assert!(ctx.active_stage().is_none());
        assert_eq!(ctx.setting::<u32>("players"), Some(8));
        assert_eq!(ctx.setting::<u32>("language"), None);
    }

    #[test]
    fn test_record_requires_active_stage() {
        let mut ctx = PipelineContext::new();
        assert_eq!(
            ctx.record(&"orphan").unwrap_err(),
            ContextError::NoActiveStage
        );
        assert!(ctx.note_partial_failures(vec![1]).is_err());
    }

    #[test]
    fn test_record_writes_only_active_slot() {
        let mut ctx = PipelineContext::new();
        let world = StageId::new("world");
        let crime = StageId::new("crime");

        ctx.enter(&world);
        ctx.record(&World {
            setting: "manor".to_string(),
            era: 1920,
        })
        .unwrap();
        ctx.leave();

        ctx.enter(&crime);
        ctx.record_value(serde_json::json!("poison")).unwrap();
        ctx.leave();

        let stored: World = ctx.output_as("world").unwrap().unwrap();
        assert_eq!(stored.setting, "manor");
        assert_eq!(ctx.output("crime"), Some(&serde_json::json!("poison")));
        assert_eq!(ctx.populated_stages(), vec![&crime, &world]);
    }

    #[test]
    fn test_rerun_overwrites_own_slot() {
        let mut ctx = PipelineContext::new();
        let world = StageId::new("world");

        ctx.enter(&world);
        ctx.record(&1).unwrap();
        ctx.leave();
        ctx.enter(&world);
        ctx.record(&2).unwrap();
        ctx.leave();

        assert_eq!(ctx.output_as::<i32>("world").unwrap(), Some(2));
    }

    #[test]
    fn test_output_as_missing_and_mismatched() {
        let mut ctx = PipelineContext::new();
        assert_eq!(ctx.output_as::<World>("world").unwrap(), None);

        ctx.enter(&StageId::new("world"));
        ctx.record(&"not a world").unwrap();
        ctx.leave();
        assert!(matches!(
            ctx.output_as::<World>("world"),
            Err(ContextError::Deserialize { .. })
        ));
    }

    #[test]
    fn test_counters_arm_and_bump() {
        let gate = StageId::new("world_validation");
        let mut ctx = PipelineContext::new();

        assert_eq!(ctx.arm_counter(&gate, 2), RetryCounter::new(2));
        assert_eq!(ctx.bump_retry(&gate, 2), 1);
        assert_eq!(ctx.bump_retry(&gate, 2), 2);

        let counter = ctx.retry_counter("world_validation").unwrap();
        assert!(counter.is_exhausted());
        assert_eq!(counter.remaining(), 0);
    }

    #[test]
    fn test_preset_retry_max_wins_over_arm() {
        let gate = StageId::new("logic_validation");
        let mut ctx = PipelineContext::new().with_retry_max(gate.clone(), 5);
        let counter = ctx.arm_counter(&gate, 3);
        assert_eq!(counter.max(), 5);
    }

    #[test]
    fn test_partial_failures_replace_and_clear() {
        let mut ctx = PipelineContext::new();
        let content = StageId::new("content");
        ctx.enter(&content);
        ctx.note_partial_failures(vec![3, 5]).unwrap();
        assert_eq!(ctx.partial_failures().get("content"), Some(&vec![3, 5]));

        ctx.note_partial_failures(Vec::new()).unwrap();
        assert!(ctx.partial_failures().is_empty());
    }

    #[test]
    fn test_snapshot_ignores_run_identity() {
        let build = || {
            let mut ctx = PipelineContext::new();
            let gate = StageId::new("world_validation");
            ctx.enter(&StageId::new("world"));
            ctx.record(&"manor").unwrap();
            ctx.leave();
            ctx.store_verdict(&gate, ValidatorResult::pass("ok")).unwrap();
            ctx.arm_counter(&gate, 2);
            ctx
        };

        let a = build();
        let b = build();
        assert_ne!(a.run_id(), b.run_id());
        assert_eq!(a.snapshot(), b.snapshot());
        assert_eq!(a.snapshot().fingerprint(), b.snapshot().fingerprint());
        assert_eq!(a.verdict("world_validation").map(ValidatorResult::is_pass), Some(true));
    }

    #[test]
    fn test_gate_result_fills_gate_slot() {
        let mut ctx = PipelineContext::new();
        let gate = StageId::new("logic_validation");
        let result = ValidatorResult::fail("motive missing").with_issues(["no motive"]);
        ctx.store_verdict(&gate, result.clone()).unwrap();

        assert!(ctx.has_output("logic_validation"));
        let slot: Option<ValidatorResult> = ctx.output_as("logic_validation").unwrap();
        assert_eq!(slot.as_ref(), Some(&result));
        assert_eq!(ctx.verdict("logic_validation"), Some(&result));
        assert_eq!(ctx.populated_stages(), vec![&gate]);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let mut ctx = PipelineContext::new();
        let before = ctx.snapshot().fingerprint().unwrap();
        ctx.enter(&StageId::new("world"));
        ctx.record(&"manor").unwrap();
        ctx.leave();
        let after = ctx.snapshot().fingerprint().unwrap();
        assert_ne!(before, after);
        assert_eq!(after.len(), 64);
    }
}
