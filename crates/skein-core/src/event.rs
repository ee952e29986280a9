use serde::Serialize;

use crate::config::MonitorConfig;
use crate::id::{NodeId, WorkflowId};

/// Lifecycle notification broadcast to all subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A run began at its entry node.
    WorkflowStarted {
        workflow_id: WorkflowId,
        entry_node: NodeId,
    },
    /// A node is about to process a state.
    NodeStarted {
        workflow_id: WorkflowId,
        node_id: NodeId,
        depth: usize,
    },
    /// A node returned a command.
    NodeCompleted {
        workflow_id: WorkflowId,
        node_id: NodeId,
        command: String,
    },
    /// A transition produced a new state version.
    StateUpdated {
        workflow_id: WorkflowId,
        version: u64,
    },
    /// A run paused at a node.
    WorkflowSuspended {
        workflow_id: WorkflowId,
        node_id: Option<NodeId>,
        suspension_id: String,
        reason: String,
    },
    /// A suspended run was re-entered.
    WorkflowResumed {
        workflow_id: WorkflowId,
        node_id: Option<NodeId>,
    },
    /// A run finished successfully.
    WorkflowCompleted {
        workflow_id: WorkflowId,
        depth: usize,
        version: u64,
    },
    /// A run failed.
    WorkflowError {
        workflow_id: Option<WorkflowId>,
        error: String,
    },
}

impl WorkflowEvent {
    /// The `type` tag used when serialized.
    pub fn name(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "workflow_started",
            Self::NodeStarted { .. } => "node_started",
            Self::NodeCompleted { .. } => "node_completed",
            Self::StateUpdated { .. } => "state_updated",
            Self::WorkflowSuspended { .. } => "workflow_suspended",
            Self::WorkflowResumed { .. } => "workflow_resumed",
            Self::WorkflowCompleted { .. } => "workflow_completed",
            Self::WorkflowError { .. } => "workflow_error",
        }
    }
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// A bus sized by `[monitor] event_bus_capacity`.
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.event_bus_capacity)
    }

    pub fn publish(&self, event: WorkflowEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wf() -> WorkflowId {
        WorkflowId::new("wf-1").unwrap()
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new(8);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(WorkflowEvent::StateUpdated {
            workflow_id: wf(),
            version: 2,
        });

        assert_eq!(rx1.recv().await.unwrap().name(), "state_updated");
        assert_eq!(rx2.recv().await.unwrap().name(), "state_updated");
    }

    #[test]
    fn test_capacity_comes_from_config() {
        let bus = EventBus::from_config(&MonitorConfig {
            event_bus_capacity: 2,
        });
        let mut rx = bus.subscribe();
        for version in 1..=3 {
            bus.publish(WorkflowEvent::StateUpdated {
                workflow_id: wf(),
                version,
            });
        }
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(1))
        ));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(WorkflowEvent::WorkflowError {
            workflow_id: None,
            error: "nobody listening".into(),
        });
    }

    #[test]
    fn test_serialized_tag() {
        let event = WorkflowEvent::WorkflowSuspended {
            workflow_id: wf(),
            node_id: Some(NodeId::new("approve").unwrap()),
            suspension_id: "approval".into(),
            reason: "waiting".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "workflow_suspended");
        assert_eq!(json["node_id"], "approve");
        assert_eq!(json["suspension_id"], "approval");
    }
}
