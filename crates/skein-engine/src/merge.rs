use skein_core::context::WorkflowContext;
use skein_core::error::Result;
use skein_core::id::NodeId;
use skein_core::state::{GraphWorkflowState, WorkflowData};

/// A branch that reached its join, in completion order.
#[derive(Debug, Clone)]
pub struct JoinedBranch<S> {
    /// The fork target the branch started from.
    pub branch: NodeId,
    pub join_node: NodeId,
    /// Branch state when it issued the join, with the join's updates applied.
    pub state: GraphWorkflowState<S>,
}

/// Payload and context a join continues with.
#[derive(Debug, Clone)]
pub struct JoinMerge<S> {
    pub data: S,
    pub context: WorkflowContext,
}

/// Reconciles joined branches into the state that continues at the join node.
///
/// Positions are reconciled by the engine; a merger only decides payload and
/// context.
pub trait JoinMerger<S>: Send + Sync + 'static {
    fn merge(
        &self,
        base: &GraphWorkflowState<S>,
        branches: &[JoinedBranch<S>],
    ) -> Result<JoinMerge<S>>;
}

/// Contexts are merged in completion order, so the branch that joined last
/// wins on conflicting keys. The payload is that of the last joined branch.
#[derive(Debug, Default, Clone, Copy)]
pub struct LastWriterWins;

impl<S: WorkflowData> JoinMerger<S> for LastWriterWins {
    fn merge(
        &self,
        base: &GraphWorkflowState<S>,
        branches: &[JoinedBranch<S>],
    ) -> Result<JoinMerge<S>> {
        let context = branches
            .iter()
            .fold(base.context().clone(), |ctx, b| ctx.merge(b.state.context()));
        let data = branches
            .last()
            .map(|b| b.state.data().clone())
            .unwrap_or_else(|| base.data().clone());
        Ok(JoinMerge { data, context })
    }
}

/// Adapts a closure into a [`JoinMerger`].
pub struct FnMerger<F>(pub F);

impl<S, F> JoinMerger<S> for FnMerger<F>
where
    S: WorkflowData,
    F: Fn(&GraphWorkflowState<S>, &[JoinedBranch<S>]) -> Result<JoinMerge<S>>
        + Send
        + Sync
        + 'static,
{
    fn merge(
        &self,
        base: &GraphWorkflowState<S>,
        branches: &[JoinedBranch<S>],
    ) -> Result<JoinMerge<S>> {
        (self.0)(base, branches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::context::ContextKey;
    use skein_core::id::WorkflowId;

    fn n(id: &str) -> NodeId {
        NodeId::new(id).unwrap()
    }

    fn base() -> GraphWorkflowState<String> {
        GraphWorkflowState::initial(
            WorkflowId::new("wf").unwrap(),
            "base".to_string(),
            WorkflowContext::new(),
            n("fork"),
        )
    }

    fn branch(name: &str, winner: &str) -> JoinedBranch<String> {
        let key: ContextKey<String> = ContextKey::new("winner");
        let own: ContextKey<bool> = ContextKey::new(name);
        let state = base()
            .move_to(n(name))
            .with_data(name.to_string())
            .with_context_value(&key, winner.to_string())
            .unwrap()
            .with_context_value(&own, true)
            .unwrap();
        JoinedBranch {
            branch: n(name),
            join_node: n("join"),
            state,
        }
    }

    #[test]
    fn test_last_writer_wins_by_completion_order() {
        let key: ContextKey<String> = ContextKey::new("winner");
        let merged = LastWriterWins
            .merge(&base(), &[branch("a", "a"), branch("b", "b")])
            .unwrap();
        assert_eq!(merged.context.get(&key).as_deref(), Some("b"));
        assert_eq!(merged.data, "b");
        assert!(merged.context.contains("a"));
        assert!(merged.context.contains("b"));

        let reversed = LastWriterWins
            .merge(&base(), &[branch("b", "b"), branch("a", "a")])
            .unwrap();
        assert_eq!(reversed.context.get(&key).as_deref(), Some("a"));
        assert_eq!(reversed.data, "a");
    }

    #[test]
    fn test_no_branches_keeps_base() {
        let merged = LastWriterWins.merge(&base(), &[]).unwrap();
        assert_eq!(merged.data, "base");
        assert!(merged.context.is_empty());
    }

    #[test]
    fn test_fn_merger() {
        let merger = FnMerger(
            |base: &GraphWorkflowState<String>,
             branches: &[JoinedBranch<String>]|
             -> Result<JoinMerge<String>> {
                let joined: Vec<String> =
                    branches.iter().map(|b| b.state.data().clone()).collect();
                Ok(JoinMerge {
                    data: joined.join("+"),
                    context: base.context().clone(),
                })
            },
        );
        let merged = merger
            .merge(&base(), &[branch("a", "a"), branch("b", "b")])
            .unwrap();
        assert_eq!(merged.data, "a+b");
    }
}
