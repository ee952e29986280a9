use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use skein_core::command::{ForkStrategy, GraphCommand, WaitPolicy};
use skein_core::condition::EdgeCondition;
use skein_core::config::ExecutionConfig;
use skein_core::context::WorkflowContext;
use skein_core::edge::GraphEdge;
use skein_core::error::{Result, WorkflowError};
use skein_core::id::NodeId;
use skein_core::state::{GraphWorkflowState, WorkflowData};
use skein_core::traits::TaskExecutor;

use crate::graph::GraphTopology;
use crate::merge::{JoinMerger, JoinedBranch};
use crate::monitor::MonitorGuard;
use crate::panic::panic_message;
use crate::workflow::Suspension;

/// Whether a loop runs a whole workflow or one branch of a fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Root,
    Branch,
}

/// Terminal outcome of one run of the loop.
pub(crate) enum RunOutcome<S> {
    Completed(GraphWorkflowState<S>),
    Suspended(Suspension<S>),
    Failed {
        error: WorkflowError,
        state: Option<GraphWorkflowState<S>>,
    },
    /// A branch issued a join. Only produced in `Mode::Branch`.
    Joined {
        join_node: NodeId,
        policy: WaitPolicy,
        timeout: Option<Duration>,
        state: GraphWorkflowState<S>,
    },
}

impl<S> RunOutcome<S> {
    fn failed(error: WorkflowError, state: GraphWorkflowState<S>) -> Self {
        Self::Failed {
            error,
            state: Some(state),
        }
    }
}

enum Step<S> {
    Continue(GraphWorkflowState<S>),
    Finish(RunOutcome<S>),
    Fork(ForkRequest<S>),
}

/// The joined state to continue with, or the outcome that ended the fork.
type ForkResult<S> = std::result::Result<GraphWorkflowState<S>, RunOutcome<S>>;

struct ForkRequest<S> {
    from: NodeId,
    base: GraphWorkflowState<S>,
    targets: Vec<NodeId>,
    strategy: ForkStrategy,
}

/// The interpreter: runs nodes and applies the commands they return.
pub(crate) struct Engine<S> {
    pub(crate) topology: GraphTopology<S>,
    pub(crate) monitor: MonitorGuard<S>,
    pub(crate) executor: Arc<dyn TaskExecutor>,
    pub(crate) merger: Arc<dyn JoinMerger<S>>,
    pub(crate) config: ExecutionConfig,
}

impl<S: WorkflowData> Engine<S> {
    /// Drive `state` until it completes, suspends, fails, or (in branch
    /// mode) joins.
    pub(crate) fn drive(
        self: Arc<Self>,
        state: GraphWorkflowState<S>,
        mode: Mode,
    ) -> BoxFuture<'static, RunOutcome<S>> {
        async move {
            let mut state = state;
            let mut steps = 0usize;
            loop {
                let current = match state.current_node() {
                    Some(node) => node.clone(),
                    None => return RunOutcome::failed(WorkflowError::Unpositioned, state),
                };

                steps += 1;
                if steps > self.config.max_steps {
                    warn!(
                        node_id = %current,
                        limit = self.config.max_steps,
                        "Step limit reached, terminating graph"
                    );
                    return RunOutcome::failed(
                        WorkflowError::MaxStepsExceeded {
                            limit: self.config.max_steps,
                        },
                        state,
                    );
                }
                if let Some(limit) = self.config.visit_limit() {
                    let visits = state.position().map_or(0, |p| p.visit_count(&current));
                    if visits > limit {
                        warn!(
                            node_id = %current,
                            limit,
                            "Node visited too many times, terminating graph"
                        );
                        return RunOutcome::failed(
                            WorkflowError::VisitLimitExceeded {
                                node: current,
                                limit,
                            },
                            state,
                        );
                    }
                }

                let node = match self.topology.node(&current) {
                    Some(node) => node.clone(),
                    None => return RunOutcome::failed(WorkflowError::NodeNotFound(current), state),
                };

                self.monitor
                    .notify("on_node_started", |m| m.on_node_started(&current, &state));

                let command = match node.process_with_lifecycle(state.clone()).await {
                    Ok(command) => command,
                    Err(e) => {
                        warn!(node_id = %current, error = %e, "Graph node failed");
                        return RunOutcome::failed(e, state);
                    }
                };

                self.monitor.notify("on_node_completed", |m| {
                    m.on_node_completed(&current, &state, &command)
                });

                let next = match self.apply(&current, &state, command, mode) {
                    Step::Continue(next) => next,
                    Step::Finish(outcome) => return outcome,
                    Step::Fork(request) => match self.clone().fork(request).await {
                        Ok(next) => next,
                        Err(outcome) => return outcome,
                    },
                };
                self.monitor
                    .notify("on_state_updated", |m| m.on_state_updated(&state, &next));
                state = next;
            }
        }
        .boxed()
    }

    /// Interpret one command against the state it was produced from.
    fn apply(
        &self,
        current: &NodeId,
        state: &GraphWorkflowState<S>,
        command: GraphCommand<S>,
        mode: Mode,
    ) -> Step<S> {
        match command {
            GraphCommand::Traverse {
                target,
                condition,
                context_updates,
                data,
            } => {
                let condition = condition.as_ref();
                match self.traverse(current, state, &target, condition, &context_updates, data) {
                    Ok(next) => Step::Continue(next),
                    Err(e) => Step::Finish(RunOutcome::failed(e, state.clone())),
                }
            }

            GraphCommand::Fork {
                targets,
                strategy,
                conditions,
                context_updates,
                data,
            } => {
                if let Err(e) = self.check_fork_targets(current, &targets) {
                    return Step::Finish(RunOutcome::failed(e, state.clone()));
                }
                let base = with_updates(state, &context_updates, data);
                match eligible_targets(current, &base, targets, strategy, &conditions) {
                    Ok(targets) => Step::Fork(ForkRequest {
                        from: current.clone(),
                        base,
                        targets,
                        strategy,
                    }),
                    Err(e) => Step::Finish(RunOutcome::failed(e, base)),
                }
            }

            GraphCommand::Join {
                join_node,
                policy,
                timeout,
                context_updates,
                data,
            } => match mode {
                Mode::Root => {
                    debug!(
                        node_id = %current,
                        join_node = %join_node,
                        "Join outside a fork, moving to join node"
                    );
                    match self.traverse(current, state, &join_node, None, &context_updates, data) {
                        Ok(next) => Step::Continue(next),
                        Err(e) => Step::Finish(RunOutcome::failed(e, state.clone())),
                    }
                }
                Mode::Branch => {
                    if let Err(e) = self.select_edge(current, state, &join_node) {
                        return Step::Finish(RunOutcome::failed(e, state.clone()));
                    }
                    Step::Finish(RunOutcome::Joined {
                        join_node,
                        policy,
                        timeout,
                        state: with_updates(state, &context_updates, data),
                    })
                }
            },

            GraphCommand::Suspend {
                suspension_id,
                reason,
                timeout,
                context_updates,
            } => Step::Finish(RunOutcome::Suspended(Suspension {
                suspension_id,
                reason,
                timeout,
                state: with_updates(state, &context_updates, None),
            })),

            GraphCommand::Complete {
                context_updates,
                data,
            } => Step::Finish(RunOutcome::Completed(with_updates(state, &context_updates, data))),

            GraphCommand::Error {
                message,
                recoverable,
                fallback_node,
                context_updates,
            } => {
                let updated = with_updates(state, &context_updates, None);
                match (recoverable, fallback_node) {
                    (true, Some(fallback)) => {
                        if !self.topology.contains(&fallback) {
                            return Step::Finish(RunOutcome::failed(
                                WorkflowError::NodeNotFound(fallback),
                                updated,
                            ));
                        }
                        warn!(
                            node_id = %current,
                            fallback = %fallback,
                            error = %message,
                            "Recoverable node error, routing to fallback"
                        );
                        Step::Continue(updated.move_to(fallback))
                    }
                    _ => Step::Finish(RunOutcome::failed(
                        WorkflowError::Command {
                            node: current.clone(),
                            message,
                            recoverable,
                        },
                        updated,
                    )),
                }
            }
        }
    }

    fn traverse(
        &self,
        current: &NodeId,
        state: &GraphWorkflowState<S>,
        target: &NodeId,
        condition: Option<&EdgeCondition<S>>,
        context_updates: &WorkflowContext,
        data: Option<S>,
    ) -> Result<GraphWorkflowState<S>> {
        if let Some(condition) = condition {
            if !condition.evaluate(state) {
                let reason = format!("condition not satisfied: {}", condition);
                return Err(traversal(current, target, reason));
            }
        }
        let edge_id = self.select_edge(current, state, target)?.id().clone();
        let next = with_updates(state, context_updates, data);
        debug!(from = %current, to = %target, edge = %edge_id, "Traversing edge");
        Ok(next.traverse(&edge_id, target.clone()))
    }

    /// The first edge `current -> target` whose condition admits `state`, or
    /// the first such edge at all when edge conditions are not enforced.
    fn select_edge(
        &self,
        current: &NodeId,
        state: &GraphWorkflowState<S>,
        target: &NodeId,
    ) -> Result<&GraphEdge<S>> {
        if !self.topology.contains(target) {
            return Err(traversal(current, target, "target node does not exist"));
        }
        let edges = self.topology.edges_between(current, target);
        if edges.is_empty() {
            return Err(traversal(current, target, "no edge connects the nodes"));
        }
        if !self.config.enforce_edge_conditions {
            return Ok(edges[0]);
        }
        edges
            .iter()
            .copied()
            .find(|e| e.can_traverse(state))
            .ok_or_else(|| {
                let conditions: Vec<String> =
                    edges.iter().map(|e| e.condition().description()).collect();
                traversal(
                    current,
                    target,
                    format!("no edge condition satisfied ({})", conditions.join(", ")),
                )
            })
    }

    fn check_fork_targets(&self, current: &NodeId, targets: &[NodeId]) -> Result<()> {
        for target in targets {
            if !self.topology.contains(target) {
                return Err(traversal(current, target, "fork target does not exist"));
            }
            if self.topology.edges_between(current, target).is_empty() {
                return Err(traversal(current, target, "fork target is not adjacent"));
            }
        }
        Ok(())
    }

    /// Run the branches of a fork and reconcile them at their join.
    async fn fork(self: Arc<Self>, request: ForkRequest<S>) -> ForkResult<S> {
        let ForkRequest {
            from,
            base,
            targets,
            strategy,
        } = request;
        let total = targets.len();
        let started = Instant::now();
        info!(node_id = %from, branches = total, strategy = ?strategy, "Forking workflow");

        let mut join = JoinTracker::new(&from, total, self.config.default_join_timeout());

        match strategy {
            ForkStrategy::Sequential => {
                for target in targets {
                    if join.satisfied() {
                        break;
                    }
                    let seed = base.move_to(target.clone());
                    let outcome = self.clone().drive(seed, Mode::Branch).await;
                    if let Some(outcome) = join.record(target, outcome) {
                        return Err(outcome);
                    }
                    // A branch that joins after the deadline does not count
                    if let Some(err) = join.expired(started) {
                        return Err(RunOutcome::failed(err, base));
                    }
                }
            }
            ForkStrategy::Parallel | ForkStrategy::Conditional => {
                let (tx, mut rx) = mpsc::unbounded_channel();
                for target in targets {
                    let seed = base.move_to(target.clone());
                    let engine = self.clone();
                    let tx = tx.clone();
                    self.executor.spawn(
                        async move {
                            let outcome = engine.drive(seed, Mode::Branch).await;
                            // Receiver is gone once the join gave up on us
                            let _ = tx.send((target, outcome));
                        }
                        .boxed(),
                    );
                }
                drop(tx);

                let poll = self.config.join_poll_interval();
                while !join.satisfied() {
                    if let Some(err) = join.expired(started) {
                        return Err(RunOutcome::failed(err, base));
                    }
                    match tokio::time::timeout(poll, rx.recv()).await {
                        Ok(Some((target, outcome))) => {
                            if let Some(outcome) = join.record(target, outcome) {
                                return Err(outcome);
                            }
                        }
                        Ok(None) => {
                            return Err(RunOutcome::failed(
                                WorkflowError::TaskJoin(format!(
                                    "fork at {} lost {} branch(es) before they reported",
                                    from,
                                    total - join.reported()
                                )),
                                base,
                            ));
                        }
                        Err(_) => continue,
                    }
                }
            }
        }

        let (join_node, branches) = match join.finish() {
            Some(joined) => joined,
            None => {
                return Err(RunOutcome::failed(
                    WorkflowError::TaskJoin(format!(
                        "fork at {} ended without any branch joining",
                        from
                    )),
                    base,
                ))
            }
        };
        if branches.len() < total {
            debug!(
                join_node = %join_node,
                joined = branches.len(),
                abandoned = total - branches.len(),
                "Join satisfied, abandoning remaining branches"
            );
        }

        match self.reconcile(&base, &join_node, &branches) {
            Ok(next) => {
                info!(join_node = %join_node, joined = branches.len(), "Branches joined");
                Ok(next)
            }
            Err(e) => Err(RunOutcome::failed(e, base)),
        }
    }

    /// Merge joined branches into one state positioned at the join node.
    fn reconcile(
        &self,
        base: &GraphWorkflowState<S>,
        join_node: &NodeId,
        branches: &[JoinedBranch<S>],
    ) -> Result<GraphWorkflowState<S>> {
        let merge = || self.merger.merge(base, branches);
        let merged = std::panic::catch_unwind(AssertUnwindSafe(merge)).map_err(|payload| {
            WorkflowError::TaskJoin(format!(
                "join merger panicked at {}: {}",
                join_node,
                panic_message(&*payload)
            ))
        })??;
        let since = base.trace().len();
        let position = match base.position() {
            Some(p) => branches.iter().fold(p.clone(), |acc, b| match b.state.position() {
                Some(bp) => acc.absorb(bp, since),
                None => acc,
            }),
            None => return Err(WorkflowError::Unpositioned),
        };
        let highest = branches.iter().map(|b| b.state.version()).max().unwrap_or(0);
        Ok(base
            .with_data(merged.data)
            .with_context(merged.context)
            .with_position(position)
            .move_to(join_node.clone())
            .advanced_past(highest))
    }
}

/// Counts branch reports against the wait policy of their join.
struct JoinTracker<S> {
    fork_node: NodeId,
    total: usize,
    default_timeout: Option<Duration>,
    join_node: Option<NodeId>,
    policy: Option<WaitPolicy>,
    timeout: Option<Duration>,
    joined: Vec<JoinedBranch<S>>,
}

impl<S: WorkflowData> JoinTracker<S> {
    fn new(fork_node: &NodeId, total: usize, default_timeout: Option<Duration>) -> Self {
        Self {
            fork_node: fork_node.clone(),
            total,
            default_timeout,
            join_node: None,
            policy: None,
            timeout: None,
            joined: Vec::new(),
        }
    }

    fn reported(&self) -> usize {
        self.joined.len()
    }

    fn satisfied(&self) -> bool {
        match self.policy {
            Some(policy) => policy.is_satisfied(self.joined.len(), self.total),
            None => false,
        }
    }

    /// The timeout error, once the deadline has passed.
    fn expired(&self, started: Instant) -> Option<WorkflowError> {
        let timeout = self.timeout.or(self.default_timeout)?;
        if started.elapsed() < timeout {
            return None;
        }
        let join_node = self.join_node.clone().unwrap_or_else(|| self.fork_node.clone());
        warn!(
            join_node = %join_node,
            joined = self.joined.len(),
            branches = self.total,
            "Join timed out"
        );
        Some(WorkflowError::JoinTimeout { join_node, timeout })
    }

    /// Record one branch outcome. Returns the outcome when it ends the whole
    /// fork.
    fn record(&mut self, branch: NodeId, outcome: RunOutcome<S>) -> Option<RunOutcome<S>> {
        match outcome {
            RunOutcome::Joined {
                join_node,
                policy,
                timeout,
                state,
            } => {
                if let Some(expected) = &self.join_node {
                    if *expected != join_node {
                        let from = state.current_node().cloned().unwrap_or_else(|| branch.clone());
                        let reason = format!(
                            "branches must join at a single node, '{}' already used",
                            expected
                        );
                        let error = traversal(&from, &join_node, reason);
                        return Some(RunOutcome::failed(error, state));
                    }
                } else {
                    self.join_node = Some(join_node.clone());
                    self.policy = Some(policy);
                    self.timeout = timeout;
                }
                debug!(branch = %branch, join_node = %join_node, "Branch reached join");
                self.joined.push(JoinedBranch {
                    branch,
                    join_node,
                    state,
                });
                None
            }
            RunOutcome::Completed(state) => {
                debug!(branch = %branch, "Branch completed the workflow");
                Some(RunOutcome::Completed(state))
            }
            RunOutcome::Suspended(suspension) => {
                debug!(
                    branch = %branch,
                    suspension_id = %suspension.suspension_id,
                    "Branch suspended the workflow"
                );
                Some(RunOutcome::Suspended(suspension))
            }
            failed @ RunOutcome::Failed { .. } => {
                debug!(branch = %branch, "Branch failed");
                Some(failed)
            }
        }
    }

    fn finish(self) -> Option<(NodeId, Vec<JoinedBranch<S>>)> {
        let join_node = self.join_node?;
        Some((join_node, self.joined))
    }
}

fn eligible_targets<S>(
    current: &NodeId,
    base: &GraphWorkflowState<S>,
    targets: Vec<NodeId>,
    strategy: ForkStrategy,
    conditions: &HashMap<NodeId, EdgeCondition<S>>,
) -> Result<Vec<NodeId>> {
    if strategy != ForkStrategy::Conditional {
        return Ok(targets);
    }
    let first = targets.first().cloned();
    let eligible: Vec<NodeId> = targets
        .into_iter()
        .filter(|t| conditions.get(t).map_or(true, |c| c.evaluate(base)))
        .collect();
    match (eligible.is_empty(), first) {
        (true, Some(first)) => Err(traversal(
            current,
            &first,
            "no fork branch condition satisfied",
        )),
        _ => Ok(eligible),
    }
}

/// Apply a command's context updates and payload, bumping the version only
/// when something changes.
fn with_updates<S: WorkflowData>(
    state: &GraphWorkflowState<S>,
    context_updates: &WorkflowContext,
    data: Option<S>,
) -> GraphWorkflowState<S> {
    let next = if context_updates.is_empty() {
        state.clone()
    } else {
        state.merge_context(context_updates)
    };
    match data {
        Some(data) => next.with_data(data),
        None => next,
    }
}

fn traversal(from: &NodeId, to: &NodeId, reason: impl Into<String>) -> WorkflowError {
    WorkflowError::Traversal {
        from: from.clone(),
        to: to.clone(),
        reason: reason.into(),
    }
}
