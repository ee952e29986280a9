use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{info, warn};

use skein_core::config::EngineConfig;
use skein_core::context::WorkflowContext;
use skein_core::edge::GraphEdge;
use skein_core::error::WorkflowError;
use skein_core::id::{IdGenerator, NodeId, WorkflowId};
use skein_core::state::{GraphWorkflowState, WorkflowData};

use crate::executor::{Engine, Mode, RunOutcome};
use crate::graph::ValidationReport;
use crate::node::GraphWorkflowNode;
use crate::panic::panic_message;

/// Turns the final state of a successful run into the caller-visible value.
pub type OutputExtractor<S, O> = Arc<dyn Fn(&GraphWorkflowState<S>) -> O + Send + Sync>;

/// A paused run. Persist `state` and hand it back to `resume` later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suspension<S> {
    pub suspension_id: String,
    pub reason: String,
    /// How long the caller may wait before giving up. Not enforced by the engine.
    #[serde(default)]
    pub timeout: Option<Duration>,
    pub state: GraphWorkflowState<S>,
}

/// Outcome of every run and resume call.
#[derive(Debug)]
pub enum WorkflowResult<O, S> {
    Success {
        output: O,
        state: GraphWorkflowState<S>,
    },
    Suspended(Suspension<S>),
    Failure {
        error: WorkflowError,
        state: Option<GraphWorkflowState<S>>,
    },
}

impl<O, S> WorkflowResult<O, S> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    pub fn output(&self) -> Option<&O> {
        match self {
            Self::Success { output, .. } => Some(output),
            _ => None,
        }
    }

    pub fn into_output(self) -> Option<O> {
        match self {
            Self::Success { output, .. } => Some(output),
            _ => None,
        }
    }

    /// The final, suspended, or last known state.
    pub fn state(&self) -> Option<&GraphWorkflowState<S>> {
        match self {
            Self::Success { state, .. } => Some(state),
            Self::Suspended(s) => Some(&s.state),
            Self::Failure { state, .. } => state.as_ref(),
        }
    }

    pub fn suspension(&self) -> Option<&Suspension<S>> {
        match self {
            Self::Suspended(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_suspension(self) -> Option<Suspension<S>> {
        match self {
            Self::Suspended(s) => Some(s),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&WorkflowError> {
        match self {
            Self::Failure { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// How `resume_with_options` treats a state that no longer fits the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeOptions {
    /// Fail when the state's node is missing or the state is unpositioned.
    /// When off, such states restart at the entry point.
    pub strict: bool,
}

impl ResumeOptions {
    pub fn strict() -> Self {
        Self { strict: true }
    }

    pub fn permissive() -> Self {
        Self { strict: false }
    }
}

impl Default for ResumeOptions {
    fn default() -> Self {
        Self::strict()
    }
}

/// Completion of a run started with one of the `*_async` methods.
pub struct WorkflowHandle<O, S> {
    rx: oneshot::Receiver<WorkflowResult<O, S>>,
}

impl<O, S> Future for WorkflowHandle<O, S> {
    type Output = WorkflowResult<O, S>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(WorkflowResult::Failure {
                error: WorkflowError::TaskJoin("workflow task ended without a result".to_string()),
                state: None,
            }),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub(crate) struct WorkflowInner<S, O> {
    pub(crate) engine: Arc<Engine<S>>,
    pub(crate) extractor: OutputExtractor<S, O>,
    pub(crate) id_generator: Arc<dyn IdGenerator>,
    pub(crate) config: EngineConfig,
    pub(crate) name: Option<String>,
}

/// A built, validated, immutable workflow. Cheap to clone and safe to run
/// concurrently.
pub struct GraphWorkflow<S, O> {
    inner: Arc<WorkflowInner<S, O>>,
}

impl<S, O> Clone for GraphWorkflow<S, O> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S, O> GraphWorkflow<S, O>
where
    S: WorkflowData,
    O: Send + 'static,
{
    pub(crate) fn from_inner(inner: WorkflowInner<S, O>) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // -- Introspection --

    pub fn nodes(&self) -> impl Iterator<Item = &GraphWorkflowNode<S>> {
        self.inner.engine.topology.nodes()
    }

    pub fn node(&self, id: &NodeId) -> Option<&GraphWorkflowNode<S>> {
        self.inner.engine.topology.node(id).map(|n| &**n)
    }

    pub fn edges(&self) -> &[GraphEdge<S>] {
        self.inner.engine.topology.edges()
    }

    pub fn edges_from(&self, id: &NodeId) -> Vec<&GraphEdge<S>> {
        self.inner.engine.topology.edges_from(id)
    }

    pub fn edges_to(&self, id: &NodeId) -> Vec<&GraphEdge<S>> {
        self.inner.engine.topology.edges_to(id)
    }

    pub fn entry_points(&self) -> &[NodeId] {
        self.inner.engine.topology.entry_points()
    }

    /// The node `start` begins at.
    pub fn entry_node(&self) -> &NodeId {
        self.inner.engine.topology.entry()
    }

    pub fn is_exit_point(&self, id: &NodeId) -> bool {
        self.inner.engine.topology.is_exit_point(id)
    }

    pub fn validate(&self) -> ValidationReport {
        self.inner.engine.topology.validate()
    }

    // -- Running --

    /// Run from the entry point with an empty context.
    pub async fn start(&self, input: S) -> WorkflowResult<O, S> {
        self.start_with_context(input, WorkflowContext::new()).await
    }

    pub async fn start_with_context(
        &self,
        input: S,
        context: WorkflowContext,
    ) -> WorkflowResult<O, S> {
        let workflow_id = match WorkflowId::generate(self.inner.id_generator.as_ref()) {
            Ok(id) => id,
            Err(error) => return self.finish(RunOutcome::Failed { error, state: None }),
        };
        let state =
            GraphWorkflowState::initial(workflow_id, input, context, self.entry_node().clone());
        info!(
            workflow_id = %state.workflow_id(),
            workflow = self.name().unwrap_or("unnamed"),
            entry = %self.entry_node(),
            "Starting workflow"
        );
        self.notify("on_workflow_started", |m| m.on_workflow_started(&state));
        let outcome = self.inner.engine.clone().drive(state, Mode::Root).await;
        self.finish(outcome)
    }

    /// Re-enter a suspended state at its current node, using the configured
    /// resume strictness.
    pub async fn resume(&self, state: GraphWorkflowState<S>) -> WorkflowResult<O, S> {
        let options = ResumeOptions {
            strict: self.inner.config.resume.strict,
        };
        self.resume_with_options(state, WorkflowContext::new(), options).await
    }

    /// Merge `updates` into the state's context, then re-enter it.
    pub async fn resume_with_options(
        &self,
        state: GraphWorkflowState<S>,
        updates: WorkflowContext,
        options: ResumeOptions,
    ) -> WorkflowResult<O, S> {
        let state = match self.prepare_resume(state, &updates, options) {
            Ok(state) => state,
            Err((error, state)) => {
                return self.finish(RunOutcome::Failed {
                    error,
                    state: Some(state),
                })
            }
        };
        info!(
            workflow_id = %state.workflow_id(),
            node_id = ?state.current_node().map(NodeId::as_str),
            strict = options.strict,
            "Resuming workflow"
        );
        self.notify("on_workflow_resumed", |m| m.on_workflow_resumed(&state));
        let outcome = self.inner.engine.clone().drive(state, Mode::Root).await;
        self.finish(outcome)
    }

    pub fn start_async(&self, input: S, context: WorkflowContext) -> WorkflowHandle<O, S> {
        let this = self.clone();
        self.spawn(async move { this.start_with_context(input, context).await })
    }

    pub fn resume_async(&self, state: GraphWorkflowState<S>) -> WorkflowHandle<O, S> {
        let this = self.clone();
        self.spawn(async move { this.resume(state).await })
    }

    pub fn resume_with_options_async(
        &self,
        state: GraphWorkflowState<S>,
        updates: WorkflowContext,
        options: ResumeOptions,
    ) -> WorkflowHandle<O, S> {
        let this = self.clone();
        self.spawn(async move { this.resume_with_options(state, updates, options).await })
    }

    fn spawn<F>(&self, run: F) -> WorkflowHandle<O, S>
    where
        F: Future<Output = WorkflowResult<O, S>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.inner.engine.executor.spawn(
            async move {
                // Caller may have dropped the handle
                let _ = tx.send(run.await);
            }
            .boxed(),
        );
        WorkflowHandle { rx }
    }

    #[allow(clippy::result_large_err)]
    fn prepare_resume(
        &self,
        state: GraphWorkflowState<S>,
        updates: &WorkflowContext,
        options: ResumeOptions,
    ) -> std::result::Result<GraphWorkflowState<S>, (WorkflowError, GraphWorkflowState<S>)> {
        let state = if updates.is_empty() {
            state
        } else {
            state.merge_context(updates)
        };
        let problem = match state.current_node() {
            Some(node) if self.inner.engine.topology.contains(node) => return Ok(state),
            Some(node) => format!("node '{}' is not part of this workflow", node),
            None => "state is not positioned at any node".to_string(),
        };
        if options.strict {
            return Err((WorkflowError::Resume(problem), state));
        }
        warn!(
            workflow_id = %state.workflow_id(),
            problem = %problem,
            entry = %self.entry_node(),
            "Restarting resumed workflow at entry point"
        );
        let entry = self.entry_node().clone();
        Ok(state.reset_to(entry))
    }

    fn finish(&self, outcome: RunOutcome<S>) -> WorkflowResult<O, S> {
        match outcome {
            RunOutcome::Completed(state) => {
                let extractor = &self.inner.extractor;
                match std::panic::catch_unwind(AssertUnwindSafe(|| extractor(&state))) {
                    Ok(output) => {
                        self.notify("on_workflow_completed", |m| m.on_workflow_completed(&state));
                        WorkflowResult::Success { output, state }
                    }
                    Err(payload) => self.fail(
                        WorkflowError::OutputExtraction(panic_message(&*payload)),
                        Some(state),
                    ),
                }
            }
            RunOutcome::Suspended(suspension) => {
                self.notify("on_workflow_suspended", |m| {
                    m.on_workflow_suspended(
                        &suspension.state,
                        &suspension.suspension_id,
                        &suspension.reason,
                    )
                });
                WorkflowResult::Suspended(suspension)
            }
            RunOutcome::Failed { error, state } => self.fail(error, state),
            RunOutcome::Joined { join_node, state, .. } => self.fail(
                WorkflowError::InvalidCommand(format!(
                    "join at {} reported outside a fork",
                    join_node
                )),
                Some(state),
            ),
        }
    }

    fn fail(
        &self,
        error: WorkflowError,
        state: Option<GraphWorkflowState<S>>,
    ) -> WorkflowResult<O, S> {
        self.notify("on_workflow_error", |m| m.on_workflow_error(state.as_ref(), &error));
        WorkflowResult::Failure { error, state }
    }

    fn notify<F>(&self, hook: &'static str, f: F)
    where
        F: FnOnce(&dyn skein_core::traits::WorkflowMonitor<S>),
    {
        self.inner.engine.monitor.notify(hook, f);
    }
}
