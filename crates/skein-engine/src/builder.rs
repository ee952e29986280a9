use std::sync::Arc;

use tracing::{debug, warn};

use skein_core::condition::EdgeCondition;
use skein_core::config::EngineConfig;
use skein_core::edge::GraphEdge;
use skein_core::error::{Result, WorkflowError};
use skein_core::id::{EdgeId, IdGenerator, NodeId, UuidIdGenerator};
use skein_core::state::{GraphWorkflowState, WorkflowData};
use skein_core::traits::{TaskExecutor, TokioExecutor, WorkflowMonitor};

use crate::executor::Engine;
use crate::graph::{validate_parts, GraphTopology, ValidationReport};
use crate::merge::{FnMerger, JoinMerge, JoinMerger, JoinedBranch, LastWriterWins};
use crate::monitor::{CompositeMonitor, MonitorGuard, TracingMonitor};
use crate::node::GraphWorkflowNode;
use crate::workflow::{GraphWorkflow, OutputExtractor, WorkflowInner};

/// Collects nodes, edges, and collaborators, then validates them into an
/// immutable [`GraphWorkflow`]. Nothing is checked until `build()`.
pub struct GraphWorkflowBuilder<S, O> {
    name: Option<String>,
    nodes: Vec<GraphWorkflowNode<S>>,
    edges: Vec<GraphEdge<S>>,
    default_entry: Option<NodeId>,
    extractor: Option<OutputExtractor<S, O>>,
    monitors: Vec<Arc<dyn WorkflowMonitor<S>>>,
    executor: Option<Arc<dyn TaskExecutor>>,
    merger: Option<Arc<dyn JoinMerger<S>>>,
    id_generator: Arc<dyn IdGenerator>,
    config: EngineConfig,
}

impl<S, O> Default for GraphWorkflowBuilder<S, O>
where
    S: WorkflowData,
    O: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S, O> GraphWorkflowBuilder<S, O>
where
    S: WorkflowData,
    O: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            name: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            default_entry: None,
            extractor: None,
            monitors: Vec::new(),
            executor: None,
            merger: None,
            id_generator: Arc::new(UuidIdGenerator),
            config: EngineConfig::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn add_node(mut self, node: GraphWorkflowNode<S>) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn add_edge(mut self, edge: GraphEdge<S>) -> Self {
        self.edges.push(edge);
        self
    }

    /// Add an unconditional edge with a generated id.
    pub fn connect(self, from: NodeId, to: NodeId) -> Result<Self> {
        self.connect_when(from, to, EdgeCondition::Always)
    }

    /// Add a conditional edge with a generated id.
    pub fn connect_when(
        mut self,
        from: NodeId,
        to: NodeId,
        condition: EdgeCondition<S>,
    ) -> Result<Self> {
        let id = EdgeId::generate(self.id_generator.as_ref())?;
        self.edges.push(GraphEdge::conditional(id, from, to, condition));
        Ok(self)
    }

    pub fn default_entry_point(mut self, node: NodeId) -> Self {
        self.default_entry = Some(node);
        self
    }

    pub fn output_extractor<F>(mut self, f: F) -> Self
    where
        F: Fn(&GraphWorkflowState<S>) -> O + Send + Sync + 'static,
    {
        self.extractor = Some(Arc::new(f));
        self
    }

    /// Add a monitor. Several monitors are notified in the order added;
    /// with none, a [`TracingMonitor`] is used.
    pub fn monitor(mut self, monitor: Arc<dyn WorkflowMonitor<S>>) -> Self {
        self.monitors.push(monitor);
        self
    }

    /// Executor for async runs and parallel fork branches. Defaults to the
    /// ambient tokio runtime.
    pub fn async_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn merger(mut self, merger: Arc<dyn JoinMerger<S>>) -> Self {
        self.merger = Some(merger);
        self
    }

    /// Use a closure to reconcile joined branches.
    pub fn merge_with<F>(self, f: F) -> Self
    where
        F: Fn(&GraphWorkflowState<S>, &[JoinedBranch<S>]) -> Result<JoinMerge<S>>
            + Send
            + Sync
            + 'static,
    {
        self.merger(Arc::new(FnMerger(f)))
    }

    /// Source of generated workflow and edge ids.
    pub fn id_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = generator;
        self
    }

    pub fn configuration(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Check the graph without building it.
    pub fn validate(&self) -> ValidationReport {
        validate_parts(&self.nodes, &self.edges, self.default_entry.as_ref())
    }

    pub fn build(self) -> Result<GraphWorkflow<S, O>> {
        let report = self.validate();
        for warning in &report.warnings {
            warn!(workflow = self.name.as_deref().unwrap_or("unnamed"), "{}", warning);
        }
        report.into_result()?;

        let extractor = self.extractor.ok_or(WorkflowError::MissingOutputExtractor)?;
        let topology = GraphTopology::build(self.nodes, self.edges, self.default_entry)?;

        let monitor: Arc<dyn WorkflowMonitor<S>> = match self.monitors.len() {
            0 => Arc::new(TracingMonitor),
            1 => self.monitors.into_iter().next().unwrap_or_else(|| Arc::new(TracingMonitor)),
            _ => Arc::new(CompositeMonitor::new(self.monitors)),
        };

        debug!(
            workflow = self.name.as_deref().unwrap_or("unnamed"),
            entry = %topology.entry(),
            edges = topology.edges().len(),
            "Workflow graph built"
        );

        let engine = Engine {
            topology,
            monitor: MonitorGuard::new(monitor),
            executor: self.executor.unwrap_or_else(|| Arc::new(TokioExecutor)),
            merger: self.merger.unwrap_or_else(|| Arc::new(LastWriterWins)),
            config: self.config.execution.clone(),
        };

        Ok(GraphWorkflow::from_inner(WorkflowInner {
            engine: Arc::new(engine),
            extractor,
            id_generator: self.id_generator,
            config: self.config,
            name: self.name,
        }))
    }
}
