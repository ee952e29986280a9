pub mod command;
pub mod condition;
pub mod config;
pub mod context;
pub mod edge;
pub mod error;
pub mod event;
pub mod id;
pub mod metadata;
pub mod position;
pub mod state;
pub mod traits;

pub use command::{ForkStrategy, GraphCommand, WaitPolicy, EXECUTION_ERROR_SUSPENSION};
pub use condition::EdgeCondition;
pub use config::EngineConfig;
pub use context::{ContextKey, WorkflowContext};
pub use edge::{EdgeMetadata, GraphEdge};
pub use error::{Result, WorkflowError};
pub use event::{EventBus, WorkflowEvent};
pub use id::{EdgeId, IdGenerator, NodeId, SequentialIdGenerator, UuidIdGenerator, WorkflowId};
pub use metadata::StateMetadata;
pub use position::GraphPosition;
pub use state::{GraphWorkflowState, WorkflowData};
pub use traits::{TaskExecutor, TokioExecutor, WorkflowMonitor};
