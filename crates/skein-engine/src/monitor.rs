use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use skein_core::command::GraphCommand;
use skein_core::config::EngineConfig;
use skein_core::error::WorkflowError;
use skein_core::event::{EventBus, WorkflowEvent};
use skein_core::id::NodeId;
use skein_core::state::{GraphWorkflowState, WorkflowData};
use skein_core::traits::WorkflowMonitor;

use crate::panic::panic_message;

/// Ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl<S: WorkflowData> WorkflowMonitor<S> for NoopMonitor {}

/// Logs lifecycle notifications through `tracing`. The default monitor.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMonitor;

impl<S: WorkflowData> WorkflowMonitor<S> for TracingMonitor {
    fn on_workflow_started(&self, state: &GraphWorkflowState<S>) {
        info!(
            workflow_id = %state.workflow_id(),
            entry = ?state.current_node().map(NodeId::as_str),
            "Workflow started"
        );
    }

    fn on_node_started(&self, node: &NodeId, state: &GraphWorkflowState<S>) {
        debug!(
            workflow_id = %state.workflow_id(),
            node_id = %node,
            depth = state.trace().len().saturating_sub(1),
            "Executing graph node"
        );
    }

    fn on_node_completed(
        &self,
        node: &NodeId,
        state: &GraphWorkflowState<S>,
        command: &GraphCommand<S>,
    ) {
        debug!(
            workflow_id = %state.workflow_id(),
            node_id = %node,
            command = command.kind(),
            "Node execution complete"
        );
    }

    fn on_workflow_suspended(
        &self,
        state: &GraphWorkflowState<S>,
        suspension_id: &str,
        reason: &str,
    ) {
        info!(
            workflow_id = %state.workflow_id(),
            node_id = ?state.current_node().map(NodeId::as_str),
            suspension_id,
            reason,
            "Workflow suspended"
        );
    }

    fn on_workflow_resumed(&self, state: &GraphWorkflowState<S>) {
        info!(
            workflow_id = %state.workflow_id(),
            node_id = ?state.current_node().map(NodeId::as_str),
            version = state.version(),
            "Workflow resumed"
        );
    }

    fn on_workflow_completed(&self, state: &GraphWorkflowState<S>) {
        info!(
            workflow_id = %state.workflow_id(),
            steps = state.trace().len(),
            version = state.version(),
            "Workflow completed"
        );
    }

    fn on_workflow_error(&self, state: Option<&GraphWorkflowState<S>>, err: &WorkflowError) {
        error!(
            workflow_id = ?state.map(|s| s.workflow_id().as_str()),
            error = %err,
            "Workflow failed"
        );
    }
}

/// Publishes a [`WorkflowEvent`] for every notification.
pub struct EventBusMonitor {
    bus: Arc<EventBus>,
}

impl EventBusMonitor {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// A monitor publishing on a fresh bus sized by the engine config.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(Arc::new(EventBus::from_config(&config.monitor)))
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}

impl<S: WorkflowData> WorkflowMonitor<S> for EventBusMonitor {
    fn on_workflow_started(&self, state: &GraphWorkflowState<S>) {
        if let Some(entry) = state.current_node() {
            self.bus.publish(WorkflowEvent::WorkflowStarted {
                workflow_id: state.workflow_id().clone(),
                entry_node: entry.clone(),
            });
        }
    }

    fn on_node_started(&self, node: &NodeId, state: &GraphWorkflowState<S>) {
        self.bus.publish(WorkflowEvent::NodeStarted {
            workflow_id: state.workflow_id().clone(),
            node_id: node.clone(),
            depth: state.trace().len().saturating_sub(1),
        });
    }

    fn on_node_completed(
        &self,
        node: &NodeId,
        state: &GraphWorkflowState<S>,
        command: &GraphCommand<S>,
    ) {
        self.bus.publish(WorkflowEvent::NodeCompleted {
            workflow_id: state.workflow_id().clone(),
            node_id: node.clone(),
            command: command.kind().to_string(),
        });
    }

    fn on_state_updated(&self, _previous: &GraphWorkflowState<S>, current: &GraphWorkflowState<S>) {
        self.bus.publish(WorkflowEvent::StateUpdated {
            workflow_id: current.workflow_id().clone(),
            version: current.version(),
        });
    }

    fn on_workflow_suspended(
        &self,
        state: &GraphWorkflowState<S>,
        suspension_id: &str,
        reason: &str,
    ) {
        self.bus.publish(WorkflowEvent::WorkflowSuspended {
            workflow_id: state.workflow_id().clone(),
            node_id: state.current_node().cloned(),
            suspension_id: suspension_id.to_string(),
            reason: reason.to_string(),
        });
    }

    fn on_workflow_resumed(&self, state: &GraphWorkflowState<S>) {
        self.bus.publish(WorkflowEvent::WorkflowResumed {
            workflow_id: state.workflow_id().clone(),
            node_id: state.current_node().cloned(),
        });
    }

    fn on_workflow_completed(&self, state: &GraphWorkflowState<S>) {
        self.bus.publish(WorkflowEvent::WorkflowCompleted {
            workflow_id: state.workflow_id().clone(),
            depth: state.trace().len().saturating_sub(1),
            version: state.version(),
        });
    }

    fn on_workflow_error(&self, state: Option<&GraphWorkflowState<S>>, err: &WorkflowError) {
        self.bus.publish(WorkflowEvent::WorkflowError {
            workflow_id: state.map(|s| s.workflow_id().clone()),
            error: err.to_string(),
        });
    }
}

/// Fans every notification out to several monitors, in order. Each monitor
/// is guarded on its own, so a panic in one never hides the notification
/// from the others.
pub struct CompositeMonitor<S> {
    monitors: Vec<MonitorGuard<S>>,
}

impl<S: WorkflowData> CompositeMonitor<S> {
    pub fn new(monitors: Vec<Arc<dyn WorkflowMonitor<S>>>) -> Self {
        Self {
            monitors: monitors.into_iter().map(MonitorGuard::new).collect(),
        }
    }

    pub fn push(&mut self, monitor: Arc<dyn WorkflowMonitor<S>>) {
        self.monitors.push(MonitorGuard::new(monitor));
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    fn each<F>(&self, hook: &'static str, f: F)
    where
        F: Fn(&dyn WorkflowMonitor<S>),
    {
        for guard in &self.monitors {
            guard.notify(hook, &f);
        }
    }
}

impl<S: WorkflowData> WorkflowMonitor<S> for CompositeMonitor<S> {
    fn on_workflow_started(&self, state: &GraphWorkflowState<S>) {
        self.each("on_workflow_started", |m| m.on_workflow_started(state));
    }

    fn on_node_started(&self, node: &NodeId, state: &GraphWorkflowState<S>) {
        self.each("on_node_started", |m| m.on_node_started(node, state));
    }

    fn on_node_completed(
        &self,
        node: &NodeId,
        state: &GraphWorkflowState<S>,
        command: &GraphCommand<S>,
    ) {
        self.each("on_node_completed", |m| {
            m.on_node_completed(node, state, command)
        });
    }

    fn on_state_updated(&self, previous: &GraphWorkflowState<S>, current: &GraphWorkflowState<S>) {
        self.each("on_state_updated", |m| m.on_state_updated(previous, current));
    }

    fn on_workflow_suspended(
        &self,
        state: &GraphWorkflowState<S>,
        suspension_id: &str,
        reason: &str,
    ) {
        self.each("on_workflow_suspended", |m| {
            m.on_workflow_suspended(state, suspension_id, reason)
        });
    }

    fn on_workflow_resumed(&self, state: &GraphWorkflowState<S>) {
        self.each("on_workflow_resumed", |m| m.on_workflow_resumed(state));
    }

    fn on_workflow_completed(&self, state: &GraphWorkflowState<S>) {
        self.each("on_workflow_completed", |m| m.on_workflow_completed(state));
    }

    fn on_workflow_error(&self, state: Option<&GraphWorkflowState<S>>, err: &WorkflowError) {
        self.each("on_workflow_error", |m| m.on_workflow_error(state, err));
    }
}

/// Invokes a monitor with its panics contained and logged.
pub(crate) struct MonitorGuard<S> {
    inner: Arc<dyn WorkflowMonitor<S>>,
}

impl<S: WorkflowData> MonitorGuard<S> {
    pub(crate) fn new(inner: Arc<dyn WorkflowMonitor<S>>) -> Self {
        Self { inner }
    }

    pub(crate) fn notify<F>(&self, hook: &'static str, f: F)
    where
        F: FnOnce(&dyn WorkflowMonitor<S>),
    {
        let monitor = self.inner.as_ref();
        if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| f(monitor))) {
            warn!(hook, panic = %panic_message(&*payload), "Workflow monitor panicked, ignoring");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use skein_core::context::WorkflowContext;
    use skein_core::id::WorkflowId;

    fn state() -> GraphWorkflowState<()> {
        GraphWorkflowState::initial(
            WorkflowId::new("wf-1").unwrap(),
            (),
            WorkflowContext::new(),
            NodeId::new("start").unwrap(),
        )
    }

    struct Recorder(Mutex<Vec<String>>);

    impl WorkflowMonitor<()> for Recorder {
        fn on_workflow_started(&self, _state: &GraphWorkflowState<()>) {
            self.0.lock().unwrap().push("started".into());
        }
    }

    struct Exploding;

    impl WorkflowMonitor<()> for Exploding {
        fn on_workflow_started(&self, _state: &GraphWorkflowState<()>) {
            panic!("monitor bug");
        }
    }

    #[tokio::test]
    async fn test_event_bus_monitor_publishes() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let monitor = EventBusMonitor::new(bus.clone());

        let s = state();
        WorkflowMonitor::on_workflow_started(&monitor, &s);
        WorkflowMonitor::on_node_started(&monitor, &NodeId::new("start").unwrap(), &s);

        match rx.recv().await.unwrap() {
            WorkflowEvent::WorkflowStarted { entry_node, .. } => {
                assert_eq!(entry_node.as_str(), "start")
            }
            other => panic!("unexpected event {}", other.name()),
        }
        assert_eq!(rx.recv().await.unwrap().name(), "node_started");
    }

    #[test]
    fn test_composite_fans_out() {
        let a = Arc::new(Recorder(Mutex::new(Vec::new())));
        let b = Arc::new(Recorder(Mutex::new(Vec::new())));
        let composite = CompositeMonitor::new(vec![
            a.clone() as Arc<dyn WorkflowMonitor<()>>,
            b.clone() as Arc<dyn WorkflowMonitor<()>>,
        ]);
        assert_eq!(composite.len(), 2);
        composite.on_workflow_started(&state());
        assert_eq!(a.0.lock().unwrap().len(), 1);
        assert_eq!(b.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_composite_isolates_a_panicking_monitor() {
        let after = Arc::new(Recorder(Mutex::new(Vec::new())));
        let composite = CompositeMonitor::new(vec![
            Arc::new(Exploding) as Arc<dyn WorkflowMonitor<()>>,
            after.clone() as Arc<dyn WorkflowMonitor<()>>,
        ]);
        composite.on_workflow_started(&state());
        composite.on_workflow_started(&state());
        assert_eq!(*after.0.lock().unwrap(), vec!["started", "started"]);
    }

    #[test]
    fn test_guard_contains_panics() {
        let guard: MonitorGuard<()> = MonitorGuard::new(Arc::new(Exploding));
        let s = state();
        guard.notify("on_workflow_started", |m| m.on_workflow_started(&s));
        // still usable afterwards
        guard.notify("on_workflow_started", |m| m.on_workflow_started(&s));
    }
}
