//! Fixtures shared by the Skein test suites.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use skein_core::command::GraphCommand;
use skein_core::error::{Result, WorkflowError};
use skein_core::id::{EdgeId, NodeId, WorkflowId};
use skein_core::state::{GraphWorkflowState, WorkflowData};
use skein_core::traits::WorkflowMonitor;
use skein_engine::node::{GraphWorkflowNode, NodeProcessor};

/// Shorthand for a known-good node id.
pub fn node_id(id: &str) -> NodeId {
    NodeId::new(id).expect("valid node id")
}

pub fn edge_id(id: &str) -> EdgeId {
    EdgeId::new(id).expect("valid edge id")
}

pub fn workflow_id(id: &str) -> WorkflowId {
    WorkflowId::new(id).expect("valid workflow id")
}

/// Install a test subscriber. Reads `SKEIN_LOG`, then `RUST_LOG`, falling
/// back to `warn`. Safe to call from every test.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("SKEIN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// -- Nodes --

type CommandFactory<S> =
    Arc<dyn Fn(&GraphWorkflowState<S>) -> Result<GraphCommand<S>> + Send + Sync>;

/// Counts its invocations and answers with a fixed command factory.
pub struct CountingNode<S> {
    calls: Arc<AtomicUsize>,
    respond: CommandFactory<S>,
}

impl<S: WorkflowData> CountingNode<S> {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&GraphWorkflowState<S>) -> Result<GraphCommand<S>> + Send + Sync + 'static,
    {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            respond: Arc::new(respond),
        }
    }

    /// Always traverses to `target`.
    pub fn traversing(target: NodeId) -> Self {
        Self::new(move |_| Ok(GraphCommand::traverse(target.clone())))
    }

    pub fn completing() -> Self {
        Self::new(|_| Ok(GraphCommand::complete()))
    }

    /// Handle to the call counter, valid after the node is moved into a graph.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn into_node(self, id: NodeId) -> GraphWorkflowNode<S> {
        GraphWorkflowNode::new(id, self)
    }
}

impl<S: WorkflowData> NodeProcessor<S> for CountingNode<S> {
    fn process(&self, state: GraphWorkflowState<S>) -> BoxFuture<'_, Result<GraphCommand<S>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = (self.respond)(&state);
        futures::future::ready(reply).boxed()
    }
}

/// Replays a queue of replies, one per invocation, then completes.
pub struct ScriptedNode<S> {
    script: Mutex<VecDeque<Result<GraphCommand<S>>>>,
    delay: Option<Duration>,
}

impl<S: WorkflowData> ScriptedNode<S> {
    pub fn new(script: Vec<Result<GraphCommand<S>>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            delay: None,
        }
    }

    /// Sleep before each reply, for ordering and timeout tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn into_node(self, id: NodeId) -> GraphWorkflowNode<S> {
        GraphWorkflowNode::new(id, self)
    }
}

impl<S: WorkflowData> NodeProcessor<S> for ScriptedNode<S> {
    fn process(&self, _state: GraphWorkflowState<S>) -> BoxFuture<'_, Result<GraphCommand<S>>> {
        let next = self
            .script
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Ok(GraphCommand::complete()));
        let delay = self.delay;
        async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            next
        }
        .boxed()
    }
}

/// A node whose processor panics with `message`.
pub fn panicking_node<S: WorkflowData>(id: NodeId, message: &'static str) -> GraphWorkflowNode<S> {
    GraphWorkflowNode::from_sync_fn(
        id,
        move |_: &GraphWorkflowState<S>| -> Result<GraphCommand<S>> { panic!("{}", message) },
    )
}

/// A node that reports a failure.
pub fn failing_node<S: WorkflowData>(id: NodeId, message: &'static str) -> GraphWorkflowNode<S> {
    let node = id.clone();
    GraphWorkflowNode::from_sync_fn(id, move |_: &GraphWorkflowState<S>| {
        Err(WorkflowError::NodeExecution {
            node: node.clone(),
            message: message.to_string(),
        })
    })
}

// -- Monitors --

/// Records every notification as a short string such as `node_started:a`.
#[derive(Default)]
pub struct RecordingMonitor {
    events: Mutex<Vec<String>>,
}

impl RecordingMonitor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Recorded events whose name starts with `prefix`.
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    fn record(&self, event: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl<S: WorkflowData> WorkflowMonitor<S> for RecordingMonitor {
    fn on_workflow_started(&self, state: &GraphWorkflowState<S>) {
        self.record(format!("started:{}", state.workflow_id()));
    }

    fn on_node_started(&self, node: &NodeId, _state: &GraphWorkflowState<S>) {
        self.record(format!("node_started:{}", node));
    }

    fn on_node_completed(
        &self,
        node: &NodeId,
        _state: &GraphWorkflowState<S>,
        command: &GraphCommand<S>,
    ) {
        self.record(format!("node_completed:{}:{}", node, command.kind()));
    }

    fn on_state_updated(&self, _previous: &GraphWorkflowState<S>, current: &GraphWorkflowState<S>) {
        self.record(format!("state_updated:{}", current.version()));
    }

    fn on_workflow_suspended(
        &self,
        _state: &GraphWorkflowState<S>,
        suspension_id: &str,
        _reason: &str,
    ) {
        self.record(format!("suspended:{}", suspension_id));
    }

    fn on_workflow_resumed(&self, _state: &GraphWorkflowState<S>) {
        self.record("resumed".to_string());
    }

    fn on_workflow_completed(&self, _state: &GraphWorkflowState<S>) {
        self.record("completed".to_string());
    }

    fn on_workflow_error(&self, _state: Option<&GraphWorkflowState<S>>, err: &WorkflowError) {
        self.record(format!("error:{}", err));
    }
}

/// Panics on every notification.
pub struct PanickingMonitor;

impl<S: WorkflowData> WorkflowMonitor<S> for PanickingMonitor {
    fn on_workflow_started(&self, _state: &GraphWorkflowState<S>) {
        panic!("monitor exploded on start");
    }

    fn on_node_started(&self, _node: &NodeId, _state: &GraphWorkflowState<S>) {
        panic!("monitor exploded on node start");
    }

    fn on_workflow_completed(&self, _state: &GraphWorkflowState<S>) {
        panic!("monitor exploded on completion");
    }
}

// -- Files --

/// Write `content` to `name` inside a fresh temp dir. Keep the dir alive
/// for as long as the file is needed.
pub fn write_config(name: &str, content: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("write config file");
    (dir, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_node_replays_then_completes() {
        let node: ScriptedNode<u8> =
            ScriptedNode::new(vec![Ok(GraphCommand::traverse(node_id("b")))]);
        let state = GraphWorkflowState::new(workflow_id("wf"), 0u8);

        assert_eq!(node.process(state.clone()).await.unwrap().kind(), "traverse");
        assert_eq!(node.remaining(), 0);
        assert_eq!(node.process(state).await.unwrap().kind(), "complete");
    }

    #[tokio::test]
    async fn test_counting_node_counts() {
        let node: CountingNode<u8> = CountingNode::completing();
        let counter = node.counter();
        let state = GraphWorkflowState::new(workflow_id("wf"), 0u8);
        node.process(state.clone()).await.unwrap();
        node.process(state).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(node.calls(), 2);
    }

    #[test]
    fn test_write_config() {
        let (_dir, path) = write_config("skein.toml", "[resume]\nstrict = false\n");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "[resume]\nstrict = false\n");
    }
}
