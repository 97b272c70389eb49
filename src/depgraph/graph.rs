use crate::model::{NodeStatus, Package};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::Serialize;
use std::collections::HashMap;

/// A package in the dependency graph, with its crawl status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    pub package: Package,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
}

/// Directed dependency graph: an edge `a -> b` means "a depends on b".
///
/// Nodes are unique per [`Package`] and there is at most one edge between
/// any ordered pair of nodes. Callers only ever see clones handed out by
/// [`GraphBuilder::graph`](super::GraphBuilder::graph); mutation is reserved
/// to the crawler.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<GraphNode, ()>,
    index: HashMap<Package, NodeIndex>,
}

impl DependencyGraph {
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, package: &Package) -> bool {
        self.index.contains_key(package)
    }

    pub fn node(&self, package: &Package) -> Option<&GraphNode> {
        self.index.get(package).map(|&ix| &self.graph[ix])
    }

    /// Status of `package`, or `None` if it is absent or has no status.
    pub fn status(&self, package: &Package) -> Option<NodeStatus> {
        self.node(package).and_then(|node| node.status)
    }

    pub fn has_edge(&self, from: &Package, to: &Package) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(&a), Some(&b)) => self.graph.contains_edge(a, b),
            _ => false,
        }
    }

    /// Direct dependencies of `package`, in the order they were linked.
    pub fn dependencies(&self, package: &Package) -> Vec<&Package> {
        let Some(&ix) = self.index.get(package) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self.graph.edges(ix).map(|e| (e.id(), e.target())).collect();
        edges.sort_by_key(|(id, _)| *id);
        edges
            .into_iter()
            .map(|(_, target)| &self.graph[target].package)
            .collect()
    }

    /// Nodes in discovery order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph.node_indices().map(move |ix| &self.graph[ix])
    }

    /// Edges as `(dependent, dependency)` pairs, in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (&Package, &Package)> {
        self.graph
            .edge_references()
            .map(move |e| (&self.graph[e.source()].package, &self.graph[e.target()].package))
    }

    /// Underlying petgraph structure, for renderers.
    pub fn as_petgraph(&self) -> &DiGraph<GraphNode, ()> {
        &self.graph
    }

    pub(crate) fn add_node(&mut self, package: &Package) -> NodeIndex {
        if let Some(&ix) = self.index.get(package) {
            return ix;
        }
        let ix = self.graph.add_node(GraphNode {
            package: package.clone(),
            status: None,
        });
        self.index.insert(package.clone(), ix);
        ix
    }

    /// Links `from -> to`, adding either node if missing. Idempotent.
    pub(crate) fn add_edge(&mut self, from: &Package, to: &Package) {
        let a = self.add_node(from);
        let b = self.add_node(to);
        self.graph.update_edge(a, b, ());
    }

    /// Raises the status of an existing node. Absent nodes are ignored.
    pub(crate) fn mark(&mut self, package: &Package, status: NodeStatus) {
        if let Some(&ix) = self.index.get(package) {
            let node = &mut self.graph[ix];
            node.status = NodeStatus::escalate(node.status, status);
        }
    }
}
