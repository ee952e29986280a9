pub mod builder;
mod executor;
pub mod graph;
pub mod merge;
pub mod monitor;
pub mod node;
mod panic;
pub mod workflow;

pub use builder::GraphWorkflowBuilder;
pub use graph::ValidationReport;
pub use merge::{FnMerger, JoinMerge, JoinMerger, JoinedBranch, LastWriterWins};
pub use monitor::{CompositeMonitor, EventBusMonitor, NoopMonitor, TracingMonitor};
pub use node::{GraphWorkflowNode, NodeMetadata, NodeProcessor, NodeType};
pub use workflow::{
    GraphWorkflow, OutputExtractor, ResumeOptions, Suspension, WorkflowHandle, WorkflowResult,
};
