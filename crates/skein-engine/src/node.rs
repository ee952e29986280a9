use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use skein_core::command::GraphCommand;
use skein_core::error::{Result, WorkflowError};
use skein_core::id::NodeId;
use skein_core::state::{GraphWorkflowState, WorkflowData};

use crate::panic::panic_message;

/// The role a node plays in the graph. Informational except for `Start`,
/// which marks an entry point, and `End`, which marks an exit point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    #[default]
    Task,
    Decision,
    Fork,
    Join,
    Start,
    End,
    Suspend,
}

/// Descriptive metadata for a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub node_type: NodeType,
    /// Explicitly eligible to start a run.
    #[serde(default)]
    pub entry_point: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl NodeMetadata {
    pub fn new(node_type: NodeType) -> Self {
        Self {
            node_type,
            ..Self::default()
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

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// The logic of a node.
///
/// Receives an owned snapshot and declares what happens next. Errors are
/// reported node failures; panics are contained by the lifecycle wrapper.
pub trait NodeProcessor<S>: Send + Sync + 'static {
    fn process(&self, state: GraphWorkflowState<S>) -> BoxFuture<'_, Result<GraphCommand<S>>>;
}

type BoxedProcessFn<S> =
    Arc<dyn Fn(GraphWorkflowState<S>) -> BoxFuture<'static, Result<GraphCommand<S>>> + Send + Sync>;

struct FnProcessor<S> {
    f: BoxedProcessFn<S>,
}

impl<S: WorkflowData> NodeProcessor<S> for FnProcessor<S> {
    fn process(&self, state: GraphWorkflowState<S>) -> BoxFuture<'_, Result<GraphCommand<S>>> {
        (self.f)(state)
    }
}

type ValidateHook<S> = Arc<dyn Fn(&GraphWorkflowState<S>) -> Result<()> + Send + Sync>;
type BeforeHook<S> = Arc<dyn Fn(&GraphWorkflowState<S>) + Send + Sync>;
type AfterHook<S> = Arc<dyn Fn(&GraphWorkflowState<S>, &GraphCommand<S>) + Send + Sync>;
type ErrorHook<S> = Arc<dyn Fn(&GraphWorkflowState<S>, &WorkflowError) + Send + Sync>;

/// Optional lifecycle callbacks run around `NodeProcessor::process`.
pub struct NodeHooks<S> {
    validate: Option<ValidateHook<S>>,
    before: Option<BeforeHook<S>>,
    after: Option<AfterHook<S>>,
    on_error: Option<ErrorHook<S>>,
}

impl<S> Default for NodeHooks<S> {
    fn default() -> Self {
        Self {
            validate: None,
            before: None,
            after: None,
            on_error: None,
        }
    }
}

impl<S> Clone for NodeHooks<S> {
    fn clone(&self) -> Self {
        Self {
            validate: self.validate.clone(),
            before: self.before.clone(),
            after: self.after.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

/// A processing unit of the graph: an id, metadata, the processor, and its
/// lifecycle hooks.
pub struct GraphWorkflowNode<S> {
    id: NodeId,
    metadata: NodeMetadata,
    processor: Arc<dyn NodeProcessor<S>>,
    hooks: NodeHooks<S>,
}

impl<S> Clone for GraphWorkflowNode<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            metadata: self.metadata.clone(),
            processor: self.processor.clone(),
            hooks: self.hooks.clone(),
        }
    }
}

impl<S> fmt::Debug for GraphWorkflowNode<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphWorkflowNode")
            .field("id", &self.id)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl<S: WorkflowData> GraphWorkflowNode<S> {
    pub fn new(id: NodeId, processor: impl NodeProcessor<S>) -> Self {
        Self {
            id,
            metadata: NodeMetadata::default(),
            processor: Arc::new(processor),
            hooks: NodeHooks::default(),
        }
    }

    /// A node whose logic is an async closure.
    pub fn from_fn<F, Fut>(id: NodeId, f: F) -> Self
    where
        F: Fn(GraphWorkflowState<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GraphCommand<S>>> + Send + 'static,
    {
        let f: BoxedProcessFn<S> = Arc::new(move |state| f(state).boxed());
        Self::new(id, FnProcessor { f })
    }

    /// A node whose logic is a synchronous closure over the state.
    pub fn from_sync_fn<F>(id: NodeId, f: F) -> Self
    where
        F: Fn(&GraphWorkflowState<S>) -> Result<GraphCommand<S>> + Send + Sync + 'static,
    {
        Self::from_fn(id, move |state| futures::future::ready(f(&state)))
    }

    pub fn with_metadata(mut self, metadata: NodeMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_type(mut self, node_type: NodeType) -> Self {
        self.metadata.node_type = node_type;
        self
    }

    /// Mark the node as eligible to start a run.
    pub fn as_entry_point(mut self) -> Self {
        self.metadata.entry_point = true;
        self
    }

    /// Reject states before anything else runs.
    pub fn with_validation<F>(mut self, f: F) -> Self
    where
        F: Fn(&GraphWorkflowState<S>) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.validate = Some(Arc::new(f));
        self
    }

    pub fn on_before<F>(mut self, f: F) -> Self
    where
        F: Fn(&GraphWorkflowState<S>) + Send + Sync + 'static,
    {
        self.hooks.before = Some(Arc::new(f));
        self
    }

    pub fn on_after<F>(mut self, f: F) -> Self
    where
        F: Fn(&GraphWorkflowState<S>, &GraphCommand<S>) + Send + Sync + 'static,
    {
        self.hooks.after = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&GraphWorkflowState<S>, &WorkflowError) + Send + Sync + 'static,
    {
        self.hooks.on_error = Some(Arc::new(f));
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    pub fn node_type(&self) -> NodeType {
        self.metadata.node_type
    }

    /// Whether the node declares itself a valid place to start a run.
    pub fn is_entry_point(&self) -> bool {
        self.metadata.entry_point || self.metadata.node_type == NodeType::Start
    }

    /// Run the processor alone, without hooks or panic containment.
    pub fn process(&self, state: GraphWorkflowState<S>) -> BoxFuture<'_, Result<GraphCommand<S>>> {
        self.processor.process(state)
    }

    /// Validate, run the before hook, process, then run the after or error
    /// hook. A panic in the processor or in any hook yields an
    /// `execution-error` suspension.
    pub async fn process_with_lifecycle(
        &self,
        state: GraphWorkflowState<S>,
    ) -> Result<GraphCommand<S>> {
        if let Some(validate) = &self.hooks.validate {
            match self.guarded("validate", || validate(&state)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(node_id = %self.id, error = %e, "State rejected by node");
                    return Err(match e {
                        WorkflowError::StateValidation { .. } => e,
                        other => WorkflowError::StateValidation {
                            node: self.id.clone(),
                            message: other.to_string(),
                        },
                    });
                }
                Err(suspend) => return Ok(suspend),
            }
        }

        if let Some(before) = &self.hooks.before {
            if let Err(suspend) = self.guarded("before", || before(&state)) {
                return Ok(suspend);
            }
        }

        let input = state.clone();
        let fut = match self.guarded("process", || self.processor.process(input)) {
            Ok(fut) => fut,
            Err(suspend) => return Ok(suspend),
        };

        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(command)) => {
                if let Some(after) = &self.hooks.after {
                    if let Err(suspend) = self.guarded("after", || after(&state, &command)) {
                        return Ok(suspend);
                    }
                }
                Ok(command)
            }
            Ok(Err(e)) => {
                if let Some(on_error) = &self.hooks.on_error {
                    if let Err(suspend) = self.guarded("on_error", || on_error(&state, &e)) {
                        return Ok(suspend);
                    }
                }
                Err(e)
            }
            Err(payload) => Ok(self.contain_panic("process", panic_message(&*payload))),
        }
    }

    /// Run `f`, turning a panic into the suspension that replaces the
    /// node's command.
    fn guarded<T>(
        &self,
        stage: &'static str,
        f: impl FnOnce() -> T,
    ) -> std::result::Result<T, GraphCommand<S>> {
        std::panic::catch_unwind(AssertUnwindSafe(f))
            .map_err(|payload| self.contain_panic(stage, panic_message(&*payload)))
    }

    fn contain_panic(&self, stage: &'static str, message: String) -> GraphCommand<S> {
        warn!(
            node_id = %self.id,
            stage,
            panic = %message,
            "Node panicked, suspending workflow"
        );
        GraphCommand::execution_error(&message)
    }
}
