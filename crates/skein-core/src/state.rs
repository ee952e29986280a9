use serde::{Deserialize, Serialize};

use crate::context::{ContextKey, WorkflowContext};
use crate::error::Result;
use crate::id::{EdgeId, NodeId, WorkflowId};
use crate::metadata::StateMetadata;
use crate::position::GraphPosition;

/// Bound satisfied by any payload a workflow can carry between nodes and
/// across parallel branches.
pub trait WorkflowData: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> WorkflowData for T {}

/// Immutable snapshot passed to every node and returned from every run.
///
/// All `with_*`/movement methods return a new snapshot whose metadata has
/// been advanced by one version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphWorkflowState<S> {
    workflow_id: WorkflowId,
    data: S,
    context: WorkflowContext,
    position: Option<GraphPosition>,
    metadata: StateMetadata,
}

impl<S> GraphWorkflowState<S> {
    /// An unpositioned state with an empty context.
    pub fn new(workflow_id: WorkflowId, data: S) -> Self {
        Self {
            workflow_id,
            data,
            context: WorkflowContext::new(),
            position: None,
            metadata: StateMetadata::new(),
        }
    }

    /// The state a run begins with: positioned at `start`, version 1.
    pub fn initial(
        workflow_id: WorkflowId,
        data: S,
        context: WorkflowContext,
        start: NodeId,
    ) -> Self {
        Self {
            workflow_id,
            data,
            context,
            position: Some(GraphPosition::at(start)),
            metadata: StateMetadata::new(),
        }
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    pub fn data(&self) -> &S {
        &self.data
    }

    pub fn into_data(self) -> S {
        self.data
    }

    pub fn context(&self) -> &WorkflowContext {
        &self.context
    }

    /// Convenience typed read from the context.
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &ContextKey<T>) -> Option<T> {
        self.context.get(key)
    }

    /// The node this state is positioned at, if any.
    pub fn current_node(&self) -> Option<&NodeId> {
        self.position.as_ref().map(GraphPosition::current_node)
    }

    pub fn position(&self) -> Option<&GraphPosition> {
        self.position.as_ref()
    }

    pub fn metadata(&self) -> &StateMetadata {
        &self.metadata
    }

    pub fn version(&self) -> u64 {
        self.metadata.version()
    }

    /// Nodes visited so far, oldest first.
    pub fn trace(&self) -> &[NodeId] {
        self.position.as_ref().map(GraphPosition::visited).unwrap_or(&[])
    }
}

impl<S: Clone> GraphWorkflowState<S> {
    pub fn with_data(&self, data: S) -> Self {
        let mut next = self.advanced();
        next.data = data;
        next
    }

    pub fn with_context(&self, context: WorkflowContext) -> Self {
        let mut next = self.advanced();
        next.context = context;
        next
    }

    pub fn with_context_value<T: Serialize>(&self, key: &ContextKey<T>, value: T) -> Result<Self> {
        let context = self.context.put(key, value)?;
        Ok(self.with_context(context))
    }

    /// Right-biased merge of `updates` into the context.
    pub fn merge_context(&self, updates: &WorkflowContext) -> Self {
        self.with_context(self.context.merge(updates))
    }

    pub fn with_position(&self, position: GraphPosition) -> Self {
        let mut next = self.advanced();
        next.position = Some(position);
        next
    }

    /// Move to `node`; an unpositioned state starts its history there.
    pub fn move_to(&self, node: NodeId) -> Self {
        let position = match &self.position {
            Some(p) => p.move_to(node),
            None => GraphPosition::at(node),
        };
        self.with_position(position)
    }

    /// Move to `node` along `edge`.
    pub fn traverse(&self, edge: &EdgeId, node: NodeId) -> Self {
        let position = match &self.position {
            Some(p) => p.traverse(edge, node),
            None => GraphPosition::at(node),
        };
        self.with_position(position)
    }

    /// Jump to `node` without a predecessor, keeping history.
    pub fn reset_to(&self, node: NodeId) -> Self {
        let position = match &self.position {
            Some(p) => p.reset_to(node),
            None => GraphPosition::at(node),
        };
        self.with_position(position)
    }

    /// Bump the version beyond `floor`, for snapshots reconciled from
    /// several derived states.
    pub fn advanced_past(&self, floor: u64) -> Self {
        let mut next = self.clone();
        next.metadata = self.metadata.advance_past(floor);
        next
    }

    fn advanced(&self) -> Self {
        let mut next = self.clone();
        next.metadata = self.metadata.advance();
        next
    }
}
