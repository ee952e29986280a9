use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::condition::EdgeCondition;
use crate::context::{ContextKey, WorkflowContext};
use crate::error::{Result, WorkflowError};
use crate::id::NodeId;

/// Suspension id used when a node panics and the lifecycle wrapper contains it.
pub const EXECUTION_ERROR_SUSPENSION: &str = "execution-error";

/// How the branches of a fork are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkStrategy {
    /// Branches run concurrently on the task executor.
    #[default]
    Parallel,
    /// Branches run one after another on the calling task.
    Sequential,
    /// Only branches whose condition holds are started, concurrently.
    Conditional,
}

/// When a join may proceed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    #[default]
    WaitAll,
    WaitAny,
    WaitMajority,
}

impl WaitPolicy {
    /// Whether `reported` joined branches out of `total` started satisfy the policy.
    pub fn is_satisfied(&self, reported: usize, total: usize) -> bool {
        match self {
            Self::WaitAll => reported >= total,
            Self::WaitAny => reported >= 1,
            Self::WaitMajority => reported * 2 > total,
        }
    }
}

/// What a node declares should happen after it processed a state.
///
/// Every variant may carry context updates, merged right-biased into the
/// state before the transition is applied.
#[derive(Debug, Clone)]
pub enum GraphCommand<S> {
    /// Move to an adjacent node.
    Traverse {
        target: NodeId,
        condition: Option<EdgeCondition<S>>,
        context_updates: WorkflowContext,
        data: Option<S>,
    },
    /// Split into independent branches, one per target.
    Fork {
        targets: Vec<NodeId>,
        strategy: ForkStrategy,
        conditions: HashMap<NodeId, EdgeCondition<S>>,
        context_updates: WorkflowContext,
        data: Option<S>,
    },
    /// End the current branch at `join_node`.
    Join {
        join_node: NodeId,
        policy: WaitPolicy,
        timeout: Option<Duration>,
        context_updates: WorkflowContext,
        data: Option<S>,
    },
    /// Pause; the current node is re-entered on resume.
    Suspend {
        suspension_id: String,
        reason: String,
        timeout: Option<Duration>,
        context_updates: WorkflowContext,
    },
    /// Finish successfully.
    Complete {
        context_updates: WorkflowContext,
        data: Option<S>,
    },
    /// Finish with an error, or reroute to a fallback when recoverable.
    Error {
        message: String,
        recoverable: bool,
        fallback_node: Option<NodeId>,
        context_updates: WorkflowContext,
    },
}

impl<S> GraphCommand<S> {
    pub fn traverse(target: NodeId) -> Self {
        Self::Traverse {
            target,
            condition: None,
            context_updates: WorkflowContext::new(),
            data: None,
        }
    }

    /// Fork to `targets`. At least one target is required and duplicates are
    /// collapsed, keeping the first occurrence.
    pub fn fork(targets: Vec<NodeId>) -> Result<Self> {
        if targets.is_empty() {
            return Err(WorkflowError::InvalidCommand(
                "fork requires at least one target".into(),
            ));
        }
        let mut unique: Vec<NodeId> = Vec::with_capacity(targets.len());
        for t in targets {
            if !unique.contains(&t) {
                unique.push(t);
            }
        }
        Ok(Self::Fork {
            targets: unique,
            strategy: ForkStrategy::default(),
            conditions: HashMap::new(),
            context_updates: WorkflowContext::new(),
            data: None,
        })
    }

    pub fn join(join_node: NodeId) -> Self {
        Self::Join {
            join_node,
            policy: WaitPolicy::default(),
            timeout: None,
            context_updates: WorkflowContext::new(),
            data: None,
        }
    }

    /// Suspend with a non-empty id and reason.
    pub fn suspend(suspension_id: impl Into<String>, reason: impl Into<String>) -> Result<Self> {
        let suspension_id = suspension_id.into();
        let reason = reason.into();
        if suspension_id.trim().is_empty() {
            return Err(WorkflowError::InvalidCommand(
                "suspension id must not be empty".into(),
            ));
        }
        if reason.trim().is_empty() {
            return Err(WorkflowError::InvalidCommand(
                "suspension reason must not be empty".into(),
            ));
        }
        Ok(Self::Suspend {
            suspension_id,
            reason,
            timeout: None,
            context_updates: WorkflowContext::new(),
        })
    }

    /// The suspension a contained node panic is converted into.
    pub fn execution_error(message: &str) -> Self {
        let reason = if message.trim().is_empty() {
            "node execution panicked".to_string()
        } else {
            format!("node execution panicked: {}", message)
        };
        Self::Suspend {
            suspension_id: EXECUTION_ERROR_SUSPENSION.to_string(),
            reason,
            timeout: None,
            context_updates: WorkflowContext::new(),
        }
    }

    pub fn complete() -> Self {
        Self::Complete {
            context_updates: WorkflowContext::new(),
            data: None,
        }
    }

    /// A fatal error.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            recoverable: false,
            fallback_node: None,
            context_updates: WorkflowContext::new(),
        }
    }

    /// A recoverable error that reroutes to `fallback`.
    pub fn recoverable_error(message: impl Into<String>, fallback: NodeId) -> Self {
        Self::Error {
            message: message.into(),
            recoverable: true,
            fallback_node: Some(fallback),
            context_updates: WorkflowContext::new(),
        }
    }

    /// Replace the context updates carried by the command.
    pub fn with_context(mut self, updates: WorkflowContext) -> Self {
        *self.context_updates_mut() = updates;
        self
    }

    /// Add one typed context update.
    pub fn with_context_value<T: Serialize>(
        mut self,
        key: &ContextKey<T>,
        value: T,
    ) -> Result<Self> {
        let updated = self.context_updates().put(key, value)?;
        *self.context_updates_mut() = updated;
        Ok(self)
    }

    /// Replace the payload. Ignored by `Suspend` and `Error`, which never
    /// change the payload.
    pub fn with_data(mut self, new_data: S) -> Self {
        match &mut self {
            Self::Traverse { data, .. }
            | Self::Fork { data, .. }
            | Self::Join { data, .. }
            | Self::Complete { data, .. } => *data = Some(new_data),
            Self::Suspend { .. } | Self::Error { .. } => {}
        }
        self
    }

    /// Gate a `Traverse` on an extra condition, checked against the state
    /// before the move.
    pub fn with_condition(mut self, edge_condition: EdgeCondition<S>) -> Self {
        if let Self::Traverse { condition, .. } = &mut self {
            *condition = Some(edge_condition);
        }
        self
    }

    pub fn with_strategy(mut self, fork_strategy: ForkStrategy) -> Self {
        if let Self::Fork { strategy, .. } = &mut self {
            *strategy = fork_strategy;
        }
        self
    }

    /// Condition for one fork branch, honoured under `ForkStrategy::Conditional`.
    pub fn with_branch_condition(mut self, target: NodeId, condition: EdgeCondition<S>) -> Self {
        if let Self::Fork { conditions, .. } = &mut self {
            conditions.insert(target, condition);
        }
        self
    }

    pub fn with_policy(mut self, wait_policy: WaitPolicy) -> Self {
        if let Self::Join { policy, .. } = &mut self {
            *policy = wait_policy;
        }
        self
    }

    /// Timeout for `Join` (wait deadline) or `Suspend` (informational for the caller).
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        match &mut self {
            Self::Join { timeout, .. } | Self::Suspend { timeout, .. } => *timeout = Some(duration),
            _ => {}
        }
        self
    }

    pub fn context_updates(&self) -> &WorkflowContext {
        match self {
            Self::Traverse { context_updates, .. }
            | Self::Fork { context_updates, .. }
            | Self::Join { context_updates, .. }
            | Self::Suspend { context_updates, .. }
            | Self::Complete { context_updates, .. }
            | Self::Error { context_updates, .. } => context_updates,
        }
    }

    fn context_updates_mut(&mut self) -> &mut WorkflowContext {
        match self {
            Self::Traverse { context_updates, .. }
            | Self::Fork { context_updates, .. }
            | Self::Join { context_updates, .. }
            | Self::Suspend { context_updates, .. }
            | Self::Complete { context_updates, .. }
            | Self::Error { context_updates, .. } => context_updates,
        }
    }

    /// Short variant name for logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Traverse { .. } => "traverse",
            Self::Fork { .. } => "fork",
            Self::Join { .. } => "join",
            Self::Suspend { .. } => "suspend",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Suspend { .. } | Self::Complete { .. } | Self::Error { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(id: &str) -> NodeId {
        NodeId::new(id).unwrap()
    }

    #[test]
    fn test_fork_requires_targets() {
        assert!(GraphCommand::<()>::fork(vec![]).is_err());
        match GraphCommand::<()>::fork(vec![n("a"), n("b"), n("a")]).unwrap() {
            GraphCommand::Fork { targets, strategy, .. } => {
                assert_eq!(targets, vec![n("a"), n("b")]);
                assert_eq!(strategy, ForkStrategy::Parallel);
            }
            other => panic!("expected fork, got {}", other.kind()),
        }
    }

    #[test]
    fn test_suspend_requires_id_and_reason() {
        assert!(GraphCommand::<()>::suspend("", "why").is_err());
        assert!(GraphCommand::<()>::suspend("approval", " ").is_err());
        let cmd = GraphCommand::<()>::suspend("approval", "needs sign-off")
            .unwrap()
            .with_timeout(Duration::from_secs(60));
        match cmd {
            GraphCommand::Suspend {
                suspension_id,
                timeout,
                ..
            } => {
                assert_eq!(suspension_id, "approval");
                assert_eq!(timeout, Some(Duration::from_secs(60)));
            }
            other => panic!("expected suspend, got {}", other.kind()),
        }
    }

    #[test]
    fn test_execution_error_suspension() {
        match GraphCommand::<()>::execution_error("boom") {
            GraphCommand::Suspend {
                suspension_id,
                reason,
                ..
            } => {
                assert_eq!(suspension_id, EXECUTION_ERROR_SUSPENSION);
                assert!(reason.contains("boom"));
            }
            other => panic!("expected suspend, got {}", other.kind()),
        }
    }

    #[test]
    fn test_context_updates_on_any_variant() {
        let key: ContextKey<u8> = ContextKey::new("k");
        let cmd = GraphCommand::<()>::error("bad")
            .with_context_value(&key, 9)
            .unwrap();
        assert_eq!(cmd.context_updates().get(&key), Some(9));
        assert!(cmd.is_terminal());
    }

    #[test]
    fn test_modifiers_apply_only_to_matching_variant() {
        let cmd = GraphCommand::<u8>::join(n("j"))
            .with_policy(WaitPolicy::WaitAny)
            .with_strategy(ForkStrategy::Sequential)
            .with_data(4);
        match cmd {
            GraphCommand::Join { policy, data, .. } => {
                assert_eq!(policy, WaitPolicy::WaitAny);
                assert_eq!(data, Some(4));
            }
            other => panic!("expected join, got {}", other.kind()),
        }

        match GraphCommand::<u8>::error("x").with_data(1) {
            GraphCommand::Error { recoverable, .. } => assert!(!recoverable),
            other => panic!("expected error, got {}", other.kind()),
        }
    }

    #[test]
    fn test_wait_policy() {
        assert!(WaitPolicy::WaitAll.is_satisfied(3, 3));
        assert!(!WaitPolicy::WaitAll.is_satisfied(2, 3));
        assert!(WaitPolicy::WaitAny.is_satisfied(1, 3));
        assert!(!WaitPolicy::WaitAny.is_satisfied(0, 3));
        assert!(WaitPolicy::WaitMajority.is_satisfied(2, 3));
        assert!(!WaitPolicy::WaitMajority.is_satisfied(1, 2));
        assert!(WaitPolicy::WaitMajority.is_satisfied(3, 4));
        assert!(!WaitPolicy::WaitMajority.is_satisfied(2, 4));
    }
}
