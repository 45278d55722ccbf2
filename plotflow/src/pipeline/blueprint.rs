//! The standard mystery-game pipeline.
//!
//! Stage order:
//!
//! ```text
//! world -> world_validation -> visual_style -> characters -> relationships
//!       -> crime -> timeline -> killer_selection -> logic_validation
//!       -> content -> host_images -> packaging
//! ```
//!
//! `world_validation` retries to `world` up to 2 times; `logic_validation`
//! retries to `crime` up to 3 times.

use super::{GatePolicy, GraphBuilder, StageGraph};
use crate::core::{StageId, Tier};
use crate::errors::GraphError;
use crate::stages::StageFactory;
use std::collections::HashMap;
use std::sync::Arc;

/// World building.
pub const WORLD: &str = "world";
/// Gate checking world coherence.
pub const WORLD_VALIDATION: &str = "world_validation";
/// Visual style guide.
pub const VISUAL_STYLE: &str = "visual_style";
/// Character roster.
pub const CHARACTERS: &str = "characters";
/// Relationships between characters.
pub const RELATIONSHIPS: &str = "relationships";
/// The crime itself.
pub const CRIME: &str = "crime";
/// Global timeline of events.
pub const TIMELINE: &str = "timeline";
/// Choice of the killer.
pub const KILLER_SELECTION: &str = "killer_selection";
/// Gate checking the logic of the whole mystery.
pub const LOGIC_VALIDATION: &str = "logic_validation";
/// Per-player content generation.
pub const CONTENT: &str = "content";
/// Host-facing images.
pub const HOST_IMAGES: &str = "host_images";
/// Final document packaging.
pub const PACKAGING: &str = "packaging";

/// Stage ids in execution order.
pub const STANDARD_ORDER: [&str; 12] = [
    WORLD,
    WORLD_VALIDATION,
    VISUAL_STYLE,
    CHARACTERS,
    RELATIONSHIPS,
    CRIME,
    TIMELINE,
    KILLER_SELECTION,
    LOGIC_VALIDATION,
    CONTENT,
    HOST_IMAGES,
    PACKAGING,
];

/// Default policy of a standard gate, or `None` for work stages.
#[must_use]
pub fn standard_policy(stage: &str) -> Option<GatePolicy> {
    match stage {
        WORLD_VALIDATION => Some(GatePolicy::new(WORLD).with_max_retries(2)),
        LOGIC_VALIDATION => Some(GatePolicy::new(CRIME).with_max_retries(3)),
        _ => None,
    }
}

/// The tier a standard stage draws its handle from.
///
/// Reasoning-heavy stages use the logic tier, bulk generation the content
/// tier, and auxiliary stages the cheap validation tier.
#[must_use]
pub fn standard_tier(stage: &str) -> Tier {
    match stage {
        WORLD | WORLD_VALIDATION | CRIME | KILLER_SELECTION | LOGIC_VALIDATION => Tier::logic(),
        HOST_IMAGES | PACKAGING => Tier::validation(),
        _ => Tier::content(),
    }
}

/// Factories for the standard stages, keyed by stage id.
pub struct StageCatalog<H> {
    factories: HashMap<StageId, Arc<dyn StageFactory<H>>>,
}

impl<H> std::fmt::Debug for StageCatalog<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&StageId> = self.factories.keys().collect();
        ids.sort();
        f.debug_struct("StageCatalog").field("stages", &ids).finish()
    }
}

impl<H> Default for StageCatalog<H> {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }
}

impl<H> StageCatalog<H>
where
    H: Send + Sync + 'static,
{
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the factory of a stage, replacing any earlier one.
    #[must_use]
    pub fn register(
        mut self,
        stage: impl Into<StageId>,
        factory: impl StageFactory<H> + 'static,
    ) -> Self {
        self.factories.insert(stage.into(), Arc::new(factory));
        self
    }

    /// Registers a shared factory.
    #[must_use]
    pub fn register_arc(
        mut self,
        stage: impl Into<StageId>,
        factory: Arc<dyn StageFactory<H>>,
    ) -> Self {
        self.factories.insert(stage.into(), factory);
        self
    }

    /// Returns true if a factory is registered for the stage.
    #[must_use]
    pub fn contains(&self, stage: &str) -> bool {
        self.factories.contains_key(stage)
    }

    /// Builds the standard graph with the default gate policies.
    ///
    /// Every standard stage needs a factory; registering an id outside the
    /// standard order is also an error.
    pub fn standard_graph(mut self) -> Result<StageGraph<H>, GraphError> {
        let mut builder = GraphBuilder::new("mystery");
        for stage in STANDARD_ORDER {
            let factory = self
                .factories
                .remove(stage)
                .ok_or_else(|| GraphError::MissingFactory(StageId::new(stage)))?;
            builder = builder.node(stage, factory, standard_policy(stage));
        }
        if let Some(extra) = self.factories.keys().min() {
            return Err(GraphError::UnknownStage(extra.clone()));
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PipelineContext;
    use crate::stages::{FnStage, StageExecutor};
    use crate::testing::{ScriptedGate, TestHandle};

    fn full_catalog() -> StageCatalog<TestHandle> {
        STANDARD_ORDER.iter().fold(StageCatalog::new(), |catalog, &stage| {
            let executor = if standard_policy(stage).is_some() {
                StageExecutor::gate(ScriptedGate::always_pass(stage))
            } else {
                StageExecutor::work(FnStage::new(stage, |_ctx: &mut PipelineContext| Ok(())))
            };
            catalog.register(stage, executor)
        })
    }

    #[test]
    fn test_standard_graph_order_and_gates() {
        let graph = full_catalog().standard_graph().unwrap();
        let ids: Vec<&str> = graph.stage_ids().into_iter().map(StageId::as_str).collect();
        assert_eq!(ids, STANDARD_ORDER.to_vec());

        let world_gate = graph.gate_policy(WORLD_VALIDATION).unwrap();
        assert_eq!(world_gate.retry_target.as_str(), WORLD);
        assert_eq!(world_gate.max_retries, 2);

        let logic_gate = graph.gate_policy(LOGIC_VALIDATION).unwrap();
        assert_eq!(logic_gate.retry_target.as_str(), CRIME);
        assert_eq!(logic_gate.max_retries, 3);
        assert_eq!(graph.gates().count(), 2);
    }

    #[test]
    fn test_missing_factory() {
        let mut catalog = full_catalog();
        catalog.factories.remove(TIMELINE);
        assert_eq!(
            catalog.standard_graph().unwrap_err(),
            GraphError::MissingFactory(StageId::new(TIMELINE))
        );
    }

    #[test]
    fn test_unknown_stage() {
        let catalog = full_catalog().register(
            "epilogue",
            StageExecutor::work(FnStage::new("epilogue", |_ctx: &mut PipelineContext| Ok(()))),
        );
        assert!(catalog.contains("epilogue"));
        assert_eq!(
            catalog.standard_graph().unwrap_err(),
            GraphError::UnknownStage(StageId::new("epilogue"))
        );
    }

    #[test]
    fn test_standard_tiers() {
        assert_eq!(standard_tier(WORLD), Tier::logic());
        assert_eq!(standard_tier(CHARACTERS), Tier::content());
        assert_eq!(standard_tier(PACKAGING), Tier::validation());
    }
}
