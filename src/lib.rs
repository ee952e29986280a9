//! Skein: graph-based workflow orchestration.
//!
//! Workflows are directed graphs of nodes over an immutable, versioned state.
//! Each node returns a [`GraphCommand`](prelude::GraphCommand) saying where
//! execution goes next: traverse an edge, fork into branches, join, suspend
//! for outside input, complete, or fail. The executor enforces the graph.
//!
//! ```no_run
//! use skein::prelude::*;
//!
//! # async fn run() -> Result<()> {
//! let workflow = GraphWorkflowBuilder::new()
//!     .add_node(
//!         GraphWorkflowNode::from_sync_fn(
//!             NodeId::new("greet")?,
//!             |s: &GraphWorkflowState<String>| {
//!                 Ok(GraphCommand::complete().with_data(format!("hello, {}", s.data())))
//!             },
//!         )
//!         .as_entry_point(),
//!     )
//!     .output_extractor(|s: &GraphWorkflowState<String>| s.data().clone())
//!     .build()?;
//!
//! let result = workflow.start("world".to_string()).await;
//! assert_eq!(result.output().map(String::as_str), Some("hello, world"));
//! # Ok(())
//! # }
//! ```

pub use skein_core;
pub use skein_engine;

pub mod prelude {
    pub use skein_core::{
        ContextKey, EdgeCondition, EdgeId, EngineConfig, EventBus, ForkStrategy, GraphCommand,
        GraphEdge, GraphPosition, GraphWorkflowState, IdGenerator, NodeId, Result,
        SequentialIdGenerator, TaskExecutor, UuidIdGenerator, WaitPolicy, WorkflowContext,
        WorkflowError, WorkflowEvent, WorkflowId, WorkflowMonitor,
    };
    pub use skein_engine::{
        CompositeMonitor, EventBusMonitor, GraphWorkflow, GraphWorkflowBuilder, GraphWorkflowNode,
        JoinMerge, JoinedBranch, NodeMetadata, NodeProcessor, NodeType, ResumeOptions,
        Suspension, TracingMonitor, WorkflowResult,
    };
}
