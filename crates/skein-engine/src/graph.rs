use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use skein_core::edge::GraphEdge;
use skein_core::error::{Result, WorkflowError};
use skein_core::id::NodeId;
use skein_core::state::WorkflowData;

use crate::node::{GraphWorkflowNode, NodeType};

/// Findings from validating a graph. Errors block `build()`; warnings are
/// informational.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Err(WorkflowError::Validation)` when any error was found.
    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(WorkflowError::Validation {
                errors: self.errors,
            })
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error(s), {} warning(s)",
            self.errors.len(),
            self.warnings.len()
        )?;
        for e in &self.errors {
            write!(f, "\n  error: {}", e)?;
        }
        for w in &self.warnings {
            write!(f, "\n  warning: {}", w)?;
        }
        Ok(())
    }
}

/// Check a set of nodes and edges. Pure; shared by the builder and the built
/// workflow.
pub(crate) fn validate_parts<S: WorkflowData>(
    nodes: &[GraphWorkflowNode<S>],
    edges: &[GraphEdge<S>],
    default_entry: Option<&NodeId>,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    if nodes.is_empty() {
        report.errors.push("Graph has no nodes".to_string());
        return report;
    }

    let mut node_ids: HashSet<&NodeId> = HashSet::new();
    for node in nodes {
        if !node_ids.insert(node.id()) {
            report
                .errors
                .push(format!("Duplicate node id '{}'", node.id()));
        }
    }

    let mut edge_ids = HashSet::new();
    for edge in edges {
        if !edge_ids.insert(edge.id()) {
            report
                .errors
                .push(format!("Duplicate edge id '{}'", edge.id()));
        }
        if !node_ids.contains(edge.from()) {
            report.errors.push(format!(
                "Edge '{}' references unknown source node '{}'",
                edge.id(),
                edge.from()
            ));
        }
        if !node_ids.contains(edge.to()) {
            report.errors.push(format!(
                "Edge '{}' references unknown target node '{}'",
                edge.id(),
                edge.to()
            ));
        }
    }

    if let Some(entry) = default_entry {
        if !node_ids.contains(entry) {
            report.errors.push(format!(
                "Default entry point '{}' is not a node in the graph",
                entry
            ));
        }
    }

    let declared = declared_entry_points(nodes);
    if default_entry.is_none() {
        match declared.len() {
            0 => report.errors.push(
                "No entry point: mark a node as an entry point or set a default entry point"
                    .to_string(),
            ),
            1 => {}
            _ => report.warnings.push(format!(
                "Multiple entry points ({}); '{}' is used",
                join_ids(&declared),
                declared[0]
            )),
        }
    }

    let mut roots: Vec<&NodeId> = declared;
    if let Some(entry) = default_entry {
        if node_ids.contains(entry) {
            roots.push(entry);
        }
    }
    if !roots.is_empty() {
        let reachable = reachable_from(&roots, edges);
        for node in nodes {
            if !reachable.contains(node.id()) {
                report.warnings.push(format!(
                    "Node '{}' is unreachable from any entry point",
                    node.id()
                ));
            }
        }
    }

    report
}

fn declared_entry_points<S: WorkflowData>(nodes: &[GraphWorkflowNode<S>]) -> Vec<&NodeId> {
    nodes
        .iter()
        .filter(|n| n.is_entry_point())
        .map(|n| n.id())
        .collect()
}

fn reachable_from<'a, S>(roots: &[&'a NodeId], edges: &'a [GraphEdge<S>]) -> HashSet<&'a NodeId> {
    let mut seen: HashSet<&NodeId> = roots.iter().copied().collect();
    let mut queue: VecDeque<&NodeId> = roots.iter().copied().collect();
    while let Some(current) = queue.pop_front() {
        for edge in edges.iter().filter(|e| e.from() == current) {
            if seen.insert(edge.to()) {
                queue.push_back(edge.to());
            }
        }
    }
    seen
}

fn join_ids(ids: &[&NodeId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The immutable, validated shape of a workflow: nodes in declaration order,
/// edges, adjacency indexes, and the resolved entry node.
pub struct GraphTopology<S> {
    nodes: Vec<Arc<GraphWorkflowNode<S>>>,
    node_index: HashMap<NodeId, usize>,
    edges: Vec<GraphEdge<S>>,
    outgoing: HashMap<NodeId, Vec<usize>>,
    incoming: HashMap<NodeId, Vec<usize>>,
    entry_points: Vec<NodeId>,
    default_entry: Option<NodeId>,
    entry: NodeId,
}

impl<S: WorkflowData> GraphTopology<S> {
    /// Validate and index. Fails with `WorkflowError::Validation` on any
    /// validation error.
    pub(crate) fn build(
        nodes: Vec<GraphWorkflowNode<S>>,
        edges: Vec<GraphEdge<S>>,
        default_entry: Option<NodeId>,
    ) -> Result<Self> {
        validate_parts(&nodes, &edges, default_entry.as_ref()).into_result()?;

        let mut entry_points: Vec<NodeId> = Vec::new();
        if let Some(entry) = &default_entry {
            entry_points.push(entry.clone());
        }
        for node in nodes.iter().filter(|n| n.is_entry_point()) {
            if !entry_points.contains(node.id()) {
                entry_points.push(node.id().clone());
            }
        }
        let entry = entry_points
            .first()
            .cloned()
            .ok_or_else(|| WorkflowError::Validation {
                errors: vec!["No entry point".to_string()],
            })?;

        let node_index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id().clone(), i))
            .collect();
        let mut outgoing: HashMap<NodeId, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<NodeId, Vec<usize>> = HashMap::new();
        for (i, edge) in edges.iter().enumerate() {
            outgoing.entry(edge.from().clone()).or_default().push(i);
            incoming.entry(edge.to().clone()).or_default().push(i);
        }

        Ok(Self {
            nodes: nodes.into_iter().map(Arc::new).collect(),
            node_index,
            edges,
            outgoing,
            incoming,
            entry_points,
            default_entry,
            entry,
        })
    }

    pub fn node(&self, id: &NodeId) -> Option<&Arc<GraphWorkflowNode<S>>> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.node_index.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphWorkflowNode<S>> {
        self.nodes.iter().map(|n| &**n)
    }

    pub fn edges(&self) -> &[GraphEdge<S>] {
        &self.edges
    }

    pub fn edges_from(&self, id: &NodeId) -> Vec<&GraphEdge<S>> {
        self.indexed(self.outgoing.get(id))
    }

    pub fn edges_to(&self, id: &NodeId) -> Vec<&GraphEdge<S>> {
        self.indexed(self.incoming.get(id))
    }

    /// Edges from `from` to `to`, in declaration order.
    pub fn edges_between(&self, from: &NodeId, to: &NodeId) -> Vec<&GraphEdge<S>> {
        self.edges_from(from)
            .into_iter()
            .filter(|e| e.to() == to)
            .collect()
    }

    /// The default entry point (if set) followed by self-declared entry
    /// points in declaration order.
    pub fn entry_points(&self) -> &[NodeId] {
        &self.entry_points
    }

    /// The node every `start` begins at.
    pub fn entry(&self) -> &NodeId {
        &self.entry
    }

    /// `End` nodes and nodes without outgoing edges.
    pub fn is_exit_point(&self, id: &NodeId) -> bool {
        match self.node(id) {
            Some(node) => {
                node.node_type() == NodeType::End || !self.outgoing.contains_key(id)
            }
            None => false,
        }
    }

    pub fn validate(&self) -> ValidationReport {
        let nodes: Vec<GraphWorkflowNode<S>> = self.nodes.iter().map(|n| (**n).clone()).collect();
        validate_parts(&nodes, &self.edges, self.default_entry.as_ref())
    }

    fn indexed(&self, indexes: Option<&Vec<usize>>) -> Vec<&GraphEdge<S>> {
        indexes
            .map(|ix| ix.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::command::GraphCommand;
    use skein_core::id::EdgeId;

    fn n(id: &str) -> NodeId {
        NodeId::new(id).unwrap()
    }

    fn node(id: &str) -> GraphWorkflowNode<()> {
        GraphWorkflowNode::from_sync_fn(n(id), |_| Ok(GraphCommand::complete()))
    }

    fn edge(id: &str, from: &str, to: &str) -> GraphEdge<()> {
        GraphEdge::new(EdgeId::new(id).unwrap(), n(from), n(to))
    }

    #[test]
    fn test_empty_graph_invalid() {
        let report = validate_parts::<()>(&[], &[], None);
        assert!(!report.is_valid());
        assert_eq!(report.errors, vec!["Graph has no nodes".to_string()]);
    }

    #[test]
    fn test_missing_entry_point() {
        let nodes = vec![node("a"), node("b")];
        let edges = vec![edge("e1", "a", "b")];
        let report = validate_parts(&nodes, &edges, None);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("No entry point"));

        let fixed = validate_parts(&nodes, &edges, Some(&n("a")));
        assert!(fixed.is_valid(), "{}", fixed);
        assert!(fixed.warnings.is_empty());
    }

    #[test]
    fn test_dangling_and_duplicate_references() {
        let nodes = vec![node("a").as_entry_point(), node("a")];
        let edges = vec![edge("e1", "a", "ghost"), edge("e1", "nowhere", "a")];
        let report = validate_parts(&nodes, &edges, Some(&n("missing")));
        let all = report.errors.join("\n");
        assert!(all.contains("Duplicate node id 'a'"));
        assert!(all.contains("Duplicate edge id 'e1'"));
        assert!(all.contains("unknown target node 'ghost'"));
        assert!(all.contains("unknown source node 'nowhere'"));
        assert!(all.contains("Default entry point 'missing'"));
    }

    #[test]
    fn test_unreachable_is_warning() {
        let nodes = vec![node("a").as_entry_point(), node("b"), node("island")];
        let edges = vec![edge("e1", "a", "b")];
        let report = validate_parts(&nodes, &edges, None);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("'island'"));
    }

    #[test]
    fn test_multiple_entry_points_pick_first_declared() {
        let nodes = vec![
            node("a"),
            node("b").as_entry_point(),
            node("c").with_type(NodeType::Start),
        ];
        let report = validate_parts(&nodes, &[], None);
        assert!(report.warnings.iter().any(|w| w.contains("Multiple entry points")));

        let topo = GraphTopology::build(nodes, vec![], None).unwrap();
        assert_eq!(topo.entry(), &n("b"));
        assert_eq!(topo.entry_points(), &[n("b"), n("c")]);
    }

    #[test]
    fn test_default_entry_takes_priority() {
        let nodes = vec![node("a").as_entry_point(), node("b")];
        let edges = vec![edge("e1", "b", "a")];
        let topo = GraphTopology::build(nodes, edges, Some(n("b"))).unwrap();
        assert_eq!(topo.entry(), &n("b"));
        assert_eq!(topo.entry_points()[0], n("b"));
    }

    #[test]
    fn test_adjacency_queries() {
        let nodes = vec![node("a").as_entry_point(), node("b"), node("c").with_type(NodeType::End)];
        let edges = vec![
            edge("e1", "a", "b"),
            edge("e2", "a", "b"),
            edge("e3", "b", "c"),
            edge("e4", "c", "a"),
        ];
        let topo = GraphTopology::build(nodes, edges, None).unwrap();
        assert_eq!(topo.edges_from(&n("a")).len(), 2);
        assert_eq!(topo.edges_to(&n("b")).len(), 2);
        assert_eq!(topo.edges_between(&n("a"), &n("b"))[0].id().as_str(), "e1");
        assert!(topo.edges_between(&n("a"), &n("c")).is_empty());
        assert!(!topo.is_exit_point(&n("a")));
        assert!(topo.is_exit_point(&n("c")));
        assert!(topo.validate().is_valid());
    }

    #[test]
    fn test_build_rejects_invalid() {
        let err = GraphTopology::<()>::build(vec![node("a"), node("b")], vec![], None)
            .err()
            .unwrap();
        assert!(matches!(err, WorkflowError::Validation { .. }));
    }
}
