use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};
use crate::id::{EdgeId, NodeId};

/// Traversal bookkeeping for one line of execution.
///
/// `visited` is append-only and always ends with the current node, so
/// `depth == visited.len() - 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPosition")]
pub struct GraphPosition {
    current_node: NodeId,
    previous_node: Option<NodeId>,
    visited: Vec<NodeId>,
    edge_traversals: BTreeMap<EdgeId, DateTime<Utc>>,
    depth: usize,
}

#[derive(Deserialize)]
struct RawPosition {
    current_node: NodeId,
    previous_node: Option<NodeId>,
    visited: Vec<NodeId>,
    #[serde(default)]
    edge_traversals: BTreeMap<EdgeId, DateTime<Utc>>,
    depth: usize,
}

impl TryFrom<RawPosition> for GraphPosition {
    type Error = WorkflowError;

    fn try_from(raw: RawPosition) -> Result<Self> {
        match raw.visited.last() {
            None => {
                return Err(WorkflowError::InvalidPosition(
                    "visited history is empty".into(),
                ))
            }
            Some(last) if *last != raw.current_node => {
                return Err(WorkflowError::InvalidPosition(format!(
                    "history ends at {} but current node is {}",
                    last, raw.current_node
                )))
            }
            Some(_) => {}
        }
        if raw.depth != raw.visited.len() - 1 {
            return Err(WorkflowError::InvalidPosition(format!(
                "depth {} does not match {} visited nodes",
                raw.depth,
                raw.visited.len()
            )));
        }
        Ok(Self {
            current_node: raw.current_node,
            previous_node: raw.previous_node,
            visited: raw.visited,
            edge_traversals: raw.edge_traversals,
            depth: raw.depth,
        })
    }
}

impl GraphPosition {
    /// Position at the start node with no history.
    pub fn at(start: NodeId) -> Self {
        Self {
            current_node: start.clone(),
            previous_node: None,
            visited: vec![start],
            edge_traversals: BTreeMap::new(),
            depth: 0,
        }
    }

    /// Move to `node` without recording an edge.
    pub fn move_to(&self, node: NodeId) -> Self {
        let mut next = self.clone();
        next.previous_node = Some(next.current_node.clone());
        next.push(node);
        next
    }

    /// Move to `node` along `edge`, stamping the traversal time.
    pub fn traverse(&self, edge: &EdgeId, node: NodeId) -> Self {
        let mut next = self.move_to(node);
        next.edge_traversals.insert(edge.clone(), Utc::now());
        next
    }

    /// Jump to `node`, forgetting the previous node. History is kept.
    pub fn reset_to(&self, node: NodeId) -> Self {
        let mut next = self.clone();
        next.previous_node = None;
        next.push(node);
        next
    }

    /// Append the history `other` recorded after `since` visits, e.g. the
    /// nodes a forked branch walked after leaving a shared prefix.
    pub fn absorb(&self, other: &GraphPosition, since: usize) -> Self {
        let mut next = self.clone();
        for node in other.visited.iter().skip(since) {
            next.previous_node = Some(next.current_node.clone());
            next.push(node.clone());
        }
        for (edge, at) in &other.edge_traversals {
            let entry = next.edge_traversals.entry(edge.clone()).or_insert(*at);
            if *at > *entry {
                *entry = *at;
            }
        }
        next
    }

    fn push(&mut self, node: NodeId) {
        self.current_node = node.clone();
        self.visited.push(node);
        self.depth = self.visited.len() - 1;
    }

    pub fn current_node(&self) -> &NodeId {
        &self.current_node
    }

    pub fn previous_node(&self) -> Option<&NodeId> {
        self.previous_node.as_ref()
    }

    pub fn visited(&self) -> &[NodeId] {
        &self.visited
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn visit_count(&self, node: &NodeId) -> usize {
        self.visited.iter().filter(|n| *n == node).count()
    }

    pub fn has_visited(&self, node: &NodeId) -> bool {
        self.visited.contains(node)
    }

    /// True when the current node already appears earlier in the history.
    pub fn has_cycle(&self) -> bool {
        match self.visited.split_last() {
            Some((last, earlier)) => earlier.contains(last),
            None => false,
        }
    }

    pub fn edge_traversed_at(&self, edge: &EdgeId) -> Option<DateTime<Utc>> {
        self.edge_traversals.get(edge).copied()
    }

    pub fn traversed_edges(&self) -> impl Iterator<Item = (&EdgeId, &DateTime<Utc>)> {
        self.edge_traversals.iter()
    }
}
