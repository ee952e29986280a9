use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::condition::EdgeCondition;
use crate::error::{Result, WorkflowError};
use crate::id::{EdgeId, NodeId};
use crate::state::GraphWorkflowState;

/// Descriptive metadata attached to an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_weight")]
    weight: f64,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

fn default_weight() -> f64 {
    1.0
}

impl EdgeMetadata {
    pub fn new() -> Self {
        Self {
            name: None,
            description: None,
            weight: default_weight(),
            properties: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the weight. Negative and NaN weights are rejected.
    pub fn with_weight(mut self, weight: f64) -> Result<Self> {
        if weight.is_nan() || weight < 0.0 {
            return Err(WorkflowError::InvalidMetadata(format!(
                "edge weight must be >= 0, got {}",
                weight
            )));
        }
        self.weight = weight;
        Ok(self)
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }
}

impl Default for EdgeMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// A directed, conditioned connection between two nodes.
#[derive(Debug, Clone)]
pub struct GraphEdge<S> {
    id: EdgeId,
    from: NodeId,
    to: NodeId,
    condition: EdgeCondition<S>,
    metadata: EdgeMetadata,
}

impl<S> GraphEdge<S> {
    /// An unconditional edge.
    pub fn new(id: EdgeId, from: NodeId, to: NodeId) -> Self {
        Self::conditional(id, from, to, EdgeCondition::Always)
    }

    pub fn conditional(id: EdgeId, from: NodeId, to: NodeId, condition: EdgeCondition<S>) -> Self {
        Self {
            id,
            from,
            to,
            condition,
            metadata: EdgeMetadata::new(),
        }
    }

    /// Copy with a different condition.
    pub fn with_condition(&self, condition: EdgeCondition<S>) -> Self {
        Self {
            id: self.id.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            condition,
            metadata: self.metadata.clone(),
        }
    }

    /// Copy with different metadata.
    pub fn with_metadata(&self, metadata: EdgeMetadata) -> Self {
        Self {
            id: self.id.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            condition: self.condition.clone(),
            metadata,
        }
    }

    pub fn id(&self) -> &EdgeId {
        &self.id
    }

    pub fn from(&self) -> &NodeId {
        &self.from
    }

    pub fn to(&self) -> &NodeId {
        &self.to
    }

    pub fn condition(&self) -> &EdgeCondition<S> {
        &self.condition
    }

    pub fn metadata(&self) -> &EdgeMetadata {
        &self.metadata
    }

    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }

    pub fn connects(&self, from: &NodeId, to: &NodeId) -> bool {
        &self.from == from && &self.to == to
    }

    /// Whether the edge's condition admits `state`.
    pub fn can_traverse(&self, state: &GraphWorkflowState<S>) -> bool {
        self.condition.evaluate(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextKey, WorkflowContext};
    use crate::id::WorkflowId;

    fn n(id: &str) -> NodeId {
        NodeId::new(id).unwrap()
    }

    #[test]
    fn test_edge_builders() {
        let e: GraphEdge<()> = GraphEdge::new(EdgeId::new("e1").unwrap(), n("a"), n("b"));
        assert_eq!(e.from(), &n("a"));
        assert_eq!(e.to(), &n("b"));
        assert!(e.condition().is_always());
        assert!(!e.is_self_loop());
        assert!(e.connects(&n("a"), &n("b")));

        let looped: GraphEdge<()> = GraphEdge::new(EdgeId::new("e2").unwrap(), n("a"), n("a"));
        assert!(looped.is_self_loop());
    }

    #[test]
    fn test_with_condition_leaves_original() {
        let e: GraphEdge<()> = GraphEdge::new(EdgeId::new("e1").unwrap(), n("a"), n("b"));
        let gated = e.with_condition(EdgeCondition::never());
        assert!(e.condition().is_always());
        assert_eq!(gated.condition().description(), "never");
        assert_eq!(gated.id(), e.id());
    }

    #[test]
    fn test_can_traverse() {
        let key: ContextKey<bool> = ContextKey::new("ready");
        let e: GraphEdge<()> = GraphEdge::conditional(
            EdgeId::new("e1").unwrap(),
            n("a"),
            n("b"),
            EdgeCondition::when_context_equals(&key, true),
        );
        let state = GraphWorkflowState::initial(
            WorkflowId::new("wf").unwrap(),
            (),
            WorkflowContext::new(),
            n("a"),
        );
        assert!(!e.can_traverse(&state));
        let ready = state.with_context_value(&key, true).unwrap();
        assert!(e.can_traverse(&ready));
    }

    #[test]
    fn test_weight_validation() {
        assert!(EdgeMetadata::new().with_weight(-1.0).is_err());
        assert!(EdgeMetadata::new().with_weight(f64::NAN).is_err());
        let m = EdgeMetadata::new()
            .with_name("primary")
            .with_weight(0.0)
            .unwrap()
            .with_property("lane", serde_json::json!("fast"));
        assert_eq!(m.weight(), 0.0);
        assert_eq!(m.name.as_deref(), Some("primary"));
        assert_eq!(m.properties.get("lane"), Some(&serde_json::json!("fast")));
    }
}
