//! The fixed, validated stage graph.

use super::GatePolicy;
use crate::core::StageId;
use crate::errors::GraphError;
use crate::stages::StageFactory;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub(crate) struct StageNode<H> {
    pub(crate) id: StageId,
    pub(crate) factory: Arc<dyn StageFactory<H>>,
    pub(crate) gate: Option<GatePolicy>,
}

/// An ordered sequence of stages with gate back-edges.
///
/// The first stage is the entry. Every stage advances unconditionally to the
/// next one; after a gate, the router may instead jump back to the gate's
/// retry target. Passing the last stage reaches the success terminal.
pub struct StageGraph<H> {
    name: String,
    nodes: Vec<StageNode<H>>,
    index: HashMap<StageId, usize>,
}

impl<H> std::fmt::Debug for StageGraph<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageGraph")
            .field("name", &self.name)
            .field("stages", &self.stage_ids())
            .finish()
    }
}

impl<H> StageGraph<H> {
    /// The graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false for a built graph.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Stage ids in execution order.
    #[must_use]
    pub fn stage_ids(&self) -> Vec<&StageId> {
        self.nodes.iter().map(|n| &n.id).collect()
    }

    /// Position of a stage in execution order.
    #[must_use]
    pub fn position(&self, stage: &str) -> Option<usize> {
        self.index.get(stage).copied()
    }

    /// The policy of a gate, or `None` for work stages and unknown ids.
    #[must_use]
    pub fn gate_policy(&self, stage: &str) -> Option<&GatePolicy> {
        self.position(stage).and_then(|i| self.nodes[i].gate.as_ref())
    }

    /// Gates with their policies, in execution order.
    pub fn gates(&self) -> impl Iterator<Item = (&StageId, &GatePolicy)> {
        self.nodes
            .iter()
            .filter_map(|n| n.gate.as_ref().map(|policy| (&n.id, policy)))
    }

    /// Replaces gate policies, for example with configured overrides.
    ///
    /// Every key must name a gate of this graph and every target must precede
    /// its gate. Nothing is changed if any override is invalid.
    pub fn override_policies(
        &mut self,
        overrides: &BTreeMap<StageId, GatePolicy>,
    ) -> Result<(), GraphError> {
        for (gate, policy) in overrides {
            let position = self
                .position(gate.as_str())
                .filter(|&i| self.nodes[i].gate.is_some())
                .ok_or_else(|| GraphError::UnknownGate(gate.clone()))?;
            self.check_target(gate, position, policy)?;
        }
        for (gate, policy) in overrides {
            if let Some(i) = self.position(gate.as_str()) {
                self.nodes[i].gate = Some(policy.clone());
            }
        }
        Ok(())
    }

    pub(crate) fn node(&self, position: usize) -> Option<&StageNode<H>> {
        self.nodes.get(position)
    }

    fn check_target(
        &self,
        gate: &StageId,
        gate_position: usize,
        policy: &GatePolicy,
    ) -> Result<(), GraphError> {
        match self.position(policy.retry_target.as_str()) {
            None => Err(GraphError::UnknownRetryTarget {
                gate: gate.clone(),
                target: policy.retry_target.clone(),
            }),
            Some(target) if target >= gate_position => Err(GraphError::RetryTargetNotEarlier {
                gate: gate.clone(),
                target: policy.retry_target.clone(),
            }),
            Some(_) => Ok(()),
        }
    }
}

/// Builder for [`StageGraph`].
pub struct GraphBuilder<H> {
    name: String,
    nodes: Vec<StageNode<H>>,
}

impl<H> std::fmt::Debug for GraphBuilder<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&StageId> = self.nodes.iter().map(|n| &n.id).collect();
        f.debug_struct("GraphBuilder")
            .field("name", &self.name)
            .field("stages", &ids)
            .finish()
    }
}

impl<H> GraphBuilder<H>
where
    H: Send + Sync + 'static,
{
    /// Creates an empty builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    /// Appends a work stage.
    #[must_use]
    pub fn stage(self, id: impl Into<StageId>, factory: impl StageFactory<H> + 'static) -> Self {
        self.push(id.into(), Arc::new(factory), None)
    }

    /// Appends a gate that retries per `policy`.
    #[must_use]
    pub fn gate(
        self,
        id: impl Into<StageId>,
        factory: impl StageFactory<H> + 'static,
        policy: GatePolicy,
    ) -> Self {
        self.push(id.into(), Arc::new(factory), Some(policy))
    }

    /// Appends a stage whose factory is already shared.
    #[must_use]
    pub fn node(
        self,
        id: impl Into<StageId>,
        factory: Arc<dyn StageFactory<H>>,
        gate: Option<GatePolicy>,
    ) -> Self {
        self.push(id.into(), factory, gate)
    }

    /// Validates and builds the graph.
    pub fn build(self) -> Result<StageGraph<H>, GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::Empty(self.name));
        }

        let mut index = HashMap::with_capacity(self.nodes.len());
        for (position, node) in self.nodes.iter().enumerate() {
            if index.insert(node.id.clone(), position).is_some() {
                return Err(GraphError::DuplicateStage(node.id.clone()));
            }
        }

        let graph = StageGraph {
            name: self.name,
            nodes: self.nodes,
            index,
        };
        for (position, node) in graph.nodes.iter().enumerate() {
            if let Some(policy) = &node.gate {
                graph.check_target(&node.id, position, policy)?;
            }
        }

        tracing::debug!(
            pipeline = %graph.name,
            stages = graph.len(),
            gates = graph.gates().count(),
            "Stage graph built"
        );
        Ok(graph)
    }

    fn push(
        mut self,
        id: StageId,
        factory: Arc<dyn StageFactory<H>>,
        gate: Option<GatePolicy>,
    ) -> Self {
        self.nodes.push(StageNode { id, factory, gate });
        self
    }
}
