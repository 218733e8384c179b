use flowcore::{Flow, NodeId};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use std::collections::{BTreeSet, HashMap};

/// Child lists derived from a flow's edges.
///
/// Rebuilt at the start of every run or resumption; never persisted.
#[derive(Debug, Clone, Default)]
pub struct Adjacency {
    children: HashMap<NodeId, Vec<NodeId>>,
    dangling: Vec<(NodeId, NodeId)>,
}

impl Adjacency {
    /// Every node gets a (possibly empty) child list. An edge whose source
    /// or target is not in the node set is logged and left out.
    pub fn build(flow: &Flow) -> Self {
        let mut children: HashMap<NodeId, Vec<NodeId>> = flow
            .nodes
            .iter()
            .map(|node| (node.id.clone(), Vec::new()))
            .collect();
        let mut dangling = Vec::new();

        for edge in &flow.edges {
            let source_known = children.contains_key(&edge.source);
            let target_known = children.contains_key(&edge.target);
            match (source_known, target_known) {
                (true, true) => {
                    if let Some(list) = children.get_mut(&edge.source) {
                        list.push(edge.target.clone());
                    }
                }
                _ => {
                    tracing::warn!(
                        source = %edge.source,
                        target = %edge.target,
                        "Invalid edge: source or target node not found, skipping"
                    );
                    dangling.push((edge.source.clone(), edge.target.clone()));
                }
            }
        }

        tracing::debug!(nodes = children.len(), edges = flow.edges.len(), "Built adjacency");
        Self { children, dangling }
    }

    /// Direct successors of `node_id`, in edge order.
    pub fn children(&self, node_id: &str) -> &[NodeId] {
        self.children
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Edges skipped during [`Adjacency::build`].
    pub fn dangling_edges(&self) -> &[(NodeId, NodeId)] {
        &self.dangling
    }

    /// All nodes reachable from `starts` by following children, `starts`
    /// included when they are known nodes.
    pub fn reachable_from<'a>(&self, starts: impl IntoIterator<Item = &'a str>) -> BTreeSet<NodeId> {
        let (graph, index) = self.to_graph();
        let mut seen = BTreeSet::new();

        for start in starts {
            let Some(&root) = index.get(start) else {
                continue;
            };
            let mut bfs = Bfs::new(&graph, root);
            while let Some(idx) = bfs.next(&graph) {
                seen.insert(graph[idx].clone());
            }
        }
        seen
    }

    fn to_graph(&self) -> (DiGraph<NodeId, ()>, HashMap<&str, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for id in self.children.keys() {
            index.insert(id.as_str(), graph.add_node(id.clone()));
        }
        for (source, targets) in &self.children {
            for target in targets {
                if let (Some(&from), Some(&to)) = (index.get(source.as_str()), index.get(target.as_str())) {
                    graph.add_edge(from, to, ());
                }
            }
        }
        (graph, index)
    }
}

/// True when no edge in the flow targets `node_id`.
///
/// Dangling edges count: an edge from an unknown source still makes its
/// target a non-root.
pub fn is_root(flow: &Flow, node_id: &str) -> bool {
    !flow.edges.iter().any(|edge| edge.target == node_id)
}

/// Root nodes in document order. Empty for a pure cycle.
pub fn roots(flow: &Flow) -> Vec<NodeId> {
    flow.nodes
        .iter()
        .filter(|node| is_root(flow, &node.id))
        .map(|node| node.id.clone())
        .collect()
}
