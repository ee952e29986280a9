use std::time::Duration;

use thiserror::Error;

use crate::id::NodeId;

#[derive(Debug, Error)]
pub enum WorkflowError {
    // Identifier / value errors
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    // Build-time errors
    #[error("Graph validation failed: {}", .errors.join("; "))]
    Validation { errors: Vec<String> },

    #[error("No output extractor configured")]
    MissingOutputExtractor,

    // Run-time errors
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Cannot traverse {from} -> {to}: {reason}")]
    Traversal {
        from: NodeId,
        to: NodeId,
        reason: String,
    },

    #[error("State rejected by node {node}: {message}")]
    StateValidation { node: NodeId, message: String },

    #[error("Node {node} failed: {message}")]
    NodeExecution { node: NodeId, message: String },

    #[error("Node {node} reported error (recoverable: {recoverable}): {message}")]
    Command {
        node: NodeId,
        message: String,
        recoverable: bool,
    },

    #[error("Join at {join_node} timed out after {timeout:?}")]
    JoinTimeout { join_node: NodeId, timeout: Duration },

    #[error("Workflow exceeded max steps ({limit})")]
    MaxStepsExceeded { limit: usize },

    #[error("Node {node} visited more than {limit} times")]
    VisitLimitExceeded { node: NodeId, limit: usize },

    #[error("Workflow state is not positioned at any node")]
    Unpositioned,

    #[error("Cannot resume: {0}")]
    Resume(String),

    #[error("Output extraction failed: {0}")]
    OutputExtraction(String),

    #[error("Workflow task failed: {0}")]
    TaskJoin(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkflowError {
    /// Shorthand for a node-reported execution failure.
    pub fn node(node: &NodeId, message: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.clone(),
            message: message.into(),
        }
    }

    /// Whether the error came from a command flagged as recoverable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Command { recoverable: true, .. })
    }

    /// Whether the error is a join timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::JoinTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
