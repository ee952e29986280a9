use futures::future::BoxFuture;
use tracing::error;

use crate::command::GraphCommand;
use crate::error::WorkflowError;
use crate::id::NodeId;
use crate::state::GraphWorkflowState;

/// Sink of workflow lifecycle notifications.
///
/// Every method defaults to a no-op. Monitors observe only: the engine
/// contains their panics and never lets them alter an outcome.
pub trait WorkflowMonitor<S>: Send + Sync + 'static {
    fn on_workflow_started(&self, state: &GraphWorkflowState<S>) {
        let _ = state;
    }

    fn on_node_started(&self, node: &NodeId, state: &GraphWorkflowState<S>) {
        let _ = (node, state);
    }

    fn on_node_completed(
        &self,
        node: &NodeId,
        state: &GraphWorkflowState<S>,
        command: &GraphCommand<S>,
    ) {
        let _ = (node, state, command);
    }

    fn on_state_updated(&self, previous: &GraphWorkflowState<S>, current: &GraphWorkflowState<S>) {
        let _ = (previous, current);
    }

    fn on_workflow_suspended(
        &self,
        state: &GraphWorkflowState<S>,
        suspension_id: &str,
        reason: &str,
    ) {
        let _ = (state, suspension_id, reason);
    }

    fn on_workflow_resumed(&self, state: &GraphWorkflowState<S>) {
        let _ = state;
    }

    fn on_workflow_completed(&self, state: &GraphWorkflowState<S>) {
        let _ = state;
    }

    fn on_workflow_error(&self, state: Option<&GraphWorkflowState<S>>, error: &WorkflowError) {
        let _ = (state, error);
    }
}

/// Worker pool used for async runs and parallel fork branches.
///
/// Must accept concurrent submissions.
pub trait TaskExecutor: Send + Sync + 'static {
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

/// Spawns onto the ambient tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioExecutor;

impl TaskExecutor for TokioExecutor {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
            }
            Err(e) => error!(error = %e, "No tokio runtime available, dropping task"),
        }
    }
}

impl TaskExecutor for tokio::runtime::Handle {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        tokio::runtime::Handle::spawn(self, task);
    }
}
