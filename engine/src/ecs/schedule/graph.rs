//! Graph plumbing for the schedule builder: small adjacency-list graphs
//! keyed by [`NodeId`], an iterative strongly-connected-components pass,
//! and the reachability analysis that drives redundancy and ambiguity
//! checks. Node iteration follows insertion order everywhere, so builds
//! are deterministic for a given configuration sequence.

use std::collections::HashMap;

use fixedbitset::FixedBitSet;

/// A node in the schedule graphs: either a system or a system set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    System(usize),
    Set(usize),
}

impl NodeId {
    #[inline]
    pub fn index(&self) -> usize {
        match *self {
            NodeId::System(index) | NodeId::Set(index) => index,
        }
    }

    #[inline]
    pub fn is_system(&self) -> bool {
        matches!(self, NodeId::System(_))
    }
}

/// A directed graph over [`NodeId`]s with deduplicated edges.
#[derive(Debug, Default, Clone)]
pub struct DiGraph {
    nodes: Vec<NodeId>,
    indices: HashMap<NodeId, usize>,
    outgoing: Vec<Vec<NodeId>>,
    incoming: Vec<Vec<NodeId>>,
}

impl DiGraph {
    pub fn add_node(&mut self, node: NodeId) {
        if !self.indices.contains_key(&node) {
            self.indices.insert(node, self.nodes.len());
            self.nodes.push(node);
            self.outgoing.push(Vec::new());
            self.incoming.push(Vec::new());
        }
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.indices.contains_key(&node)
    }

    /// Add `from -> to`, creating missing nodes. Duplicate edges collapse.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        self.add_node(from);
        self.add_node(to);
        let from_index = self.indices[&from];
        if !self.outgoing[from_index].contains(&to) {
            self.outgoing[from_index].push(to);
            let to_index = self.indices[&to];
            self.incoming[to_index].push(from);
        }
    }

    pub fn contains_edge(&self, from: NodeId, to: NodeId) -> bool {
        self.indices
            .get(&from)
            .is_some_and(|&i| self.outgoing[i].contains(&to))
    }

    /// Remove `from -> to` if present. Nodes stay in the graph.
    pub fn remove_edge(&mut self, from: NodeId, to: NodeId) {
        let (Some(&from_index), Some(&to_index)) =
            (self.indices.get(&from), self.indices.get(&to))
        else {
            return;
        };
        self.outgoing[from_index].retain(|&n| n != to);
        self.incoming[to_index].retain(|&n| n != from);
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    pub fn neighbors(&self, node: NodeId) -> &[NodeId] {
        self.indices
            .get(&node)
            .map(|&i| self.outgoing[i].as_slice())
            .unwrap_or(&[])
    }

    pub fn neighbors_incoming(&self, node: NodeId) -> &[NodeId] {
        self.indices
            .get(&node)
            .map(|&i| self.incoming[i].as_slice())
            .unwrap_or(&[])
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .flat_map(|(i, &from)| self.outgoing[i].iter().map(move |&to| (from, to)))
    }

    /// Strongly connected components, iterative Tarjan. Components come out
    /// in reverse topological order.
    pub fn strongly_connected_components(&self) -> Vec<Vec<NodeId>> {
        #[derive(Clone, Copy)]
        struct NodeState {
            index: u32,
            low_link: u32,
            on_stack: bool,
            visited: bool,
        }
        let n = self.nodes.len();
        let mut state = vec![
            NodeState {
                index: 0,
                low_link: 0,
                on_stack: false,
                visited: false,
            };
            n
        ];
        let mut next_index = 0u32;
        let mut stack: Vec<usize> = Vec::new();
        let mut components: Vec<Vec<NodeId>> = Vec::new();
        // (node, next outgoing neighbor position) frames.
        let mut call_stack: Vec<(usize, usize)> = Vec::new();

        for start in 0..n {
            if state[start].visited {
                continue;
            }
            call_stack.push((start, 0));
            state[start].visited = true;
            state[start].index = next_index;
            state[start].low_link = next_index;
            next_index += 1;
            state[start].on_stack = true;
            stack.push(start);

            while let Some(&mut (node, ref mut neighbor_pos)) = call_stack.last_mut() {
                if *neighbor_pos < self.outgoing[node].len() {
                    let next = self.indices[&self.outgoing[node][*neighbor_pos]];
                    *neighbor_pos += 1;
                    if !state[next].visited {
                        state[next].visited = true;
                        state[next].index = next_index;
                        state[next].low_link = next_index;
                        next_index += 1;
                        state[next].on_stack = true;
                        stack.push(next);
                        call_stack.push((next, 0));
                    } else if state[next].on_stack {
                        state[node].low_link = state[node].low_link.min(state[next].index);
                    }
                } else {
                    call_stack.pop();
                    if let Some(&mut (parent, _)) = call_stack.last_mut() {
                        state[parent].low_link = state[parent].low_link.min(state[node].low_link);
                    }
                    if state[node].low_link == state[node].index {
                        let mut component = Vec::new();
                        loop {
                            let member = stack
                                .pop()
                                .unwrap_or_else(|| unreachable!("scc stack underflow"));
                            state[member].on_stack = false;
                            component.push(self.nodes[member]);
                            if member == node {
                                break;
                            }
                        }
                        components.push(component);
                    }
                }
            }
        }
        components
    }

    /// Topological order, or the list of cyclic components when the graph
    /// has a cycle.
    pub fn topsort(&self) -> Result<Vec<NodeId>, Vec<Vec<NodeId>>> {
        let components = self.strongly_connected_components();
        let cycles: Vec<Vec<NodeId>> = components
            .iter()
            .filter(|c| c.len() > 1)
            .cloned()
            .collect();
        if !cycles.is_empty() {
            return Err(cycles);
        }
        // Single-node components: a self-loop is still a cycle.
        for component in &components {
            let node = component[0];
            if self.contains_edge(node, node) {
                return Err(vec![vec![node]]);
            }
        }
        Ok(components.into_iter().rev().flatten().collect())
    }
}

/// An undirected graph over [`NodeId`]s with deduplicated edges.
#[derive(Debug, Default, Clone)]
pub struct UnGraph {
    adjacency: HashMap<NodeId, Vec<NodeId>>,
    edges: Vec<(NodeId, NodeId)>,
}

impl UnGraph {
    pub fn add_edge(&mut self, a: NodeId, b: NodeId) {
        if !self.contains_edge(a, b) {
            self.adjacency.entry(a).or_default().push(b);
            self.adjacency.entry(b).or_default().push(a);
            self.edges.push((a, b));
        }
    }

    /// Edges in insertion order, one entry per unordered pair.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.edges.iter().copied()
    }

    pub fn contains_edge(&self, a: NodeId, b: NodeId) -> bool {
        self.adjacency.get(&a).is_some_and(|v| v.contains(&b))
    }

    pub fn neighbors(&self, node: NodeId) -> &[NodeId] {
        self.adjacency
            .get(&node)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Results of the one-pass reachability analysis of a DAG.
pub struct CheckGraphResults {
    /// `reachable[i]` holds the topological positions reachable from the
    /// node at position `i` (excluding itself).
    pub reachable: Vec<FixedBitSet>,
    /// Topological position of each node.
    pub positions: HashMap<NodeId, usize>,
    /// Node at each topological position.
    pub topological_order: Vec<NodeId>,
    /// Edges implied by other paths; candidates for redundancy warnings.
    pub transitive_edges: Vec<(NodeId, NodeId)>,
    /// Unordered pairs with no path between them in either direction.
    pub disconnected: Vec<(NodeId, NodeId)>,
}

impl CheckGraphResults {
    pub fn is_reachable(&self, from: NodeId, to: NodeId) -> bool {
        match (self.positions.get(&from), self.positions.get(&to)) {
            (Some(&i), Some(&j)) => self.reachable[i].contains(j),
            _ => false,
        }
    }
}

/// Analyze a DAG given its topological order: per-node reachability, the
/// transitive edges, and all disconnected pairs.
pub fn check_graph(graph: &DiGraph, topological_order: &[NodeId]) -> CheckGraphResults {
    let n = topological_order.len();
    let positions: HashMap<NodeId, usize> = topological_order
        .iter()
        .enumerate()
        .map(|(i, &node)| (node, i))
        .collect();
    let mut reachable: Vec<FixedBitSet> = vec![FixedBitSet::with_capacity(n); n];
    let mut transitive_edges = Vec::new();

    // Walk in reverse topological order so every successor's reachability
    // row is complete before it is folded into its predecessors.
    for i in (0..n).rev() {
        let node = topological_order[i];
        let mut successors: Vec<usize> = graph
            .neighbors(node)
            .iter()
            .map(|next| positions[next])
            .collect();
        successors.sort_unstable();
        for j in successors {
            if reachable[i].contains(j) {
                // Already implied by an earlier successor's paths.
                transitive_edges.push((node, topological_order[j]));
            } else {
                reachable[i].insert(j);
                let (head, tail) = reachable.split_at_mut(j);
                head[i].union_with(&tail[0]);
            }
        }
    }

    let mut disconnected = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            // Position j cannot reach position i in a topological order.
            if !reachable[i].contains(j) {
                disconnected.push((topological_order[i], topological_order[j]));
            }
        }
    }

    CheckGraphResults {
        reachable,
        positions,
        topological_order: topological_order.to_vec(),
        transitive_edges,
        disconnected,
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;

    fn sys(i: usize) -> NodeId {
        NodeId::System(i)
    }

    #[test]
    fn topsort_orders_dependencies_first() {
        // Given a diamond a -> {b, c} -> d
        let mut graph = DiGraph::default();
        graph.add_edge(sys(0), sys(1));
        graph.add_edge(sys(0), sys(2));
        graph.add_edge(sys(1), sys(3));
        graph.add_edge(sys(2), sys(3));

        // When
        let order = graph.topsort().unwrap();

        // Then - every edge points forward
        let pos: HashMap<_, _> = order.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        for (from, to) in graph.edges() {
            assert!(pos[&from] < pos[&to], "{from:?} must precede {to:?}");
        }
    }

    #[test]
    fn topsort_reports_cycles() {
        // Given a -> b -> c -> a
        let mut graph = DiGraph::default();
        graph.add_edge(sys(0), sys(1));
        graph.add_edge(sys(1), sys(2));
        graph.add_edge(sys(2), sys(0));

        // When
        let cycles = graph.topsort().unwrap_err();

        // Then
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 3);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let mut graph = DiGraph::default();
        graph.add_edge(sys(0), sys(0));
        let cycles = graph.topsort().unwrap_err();
        assert_eq!(cycles, vec![vec![sys(0)]]);
    }

    #[test]
    fn check_graph_finds_transitive_edge() {
        // Given a -> b -> c plus the redundant a -> c
        let mut graph = DiGraph::default();
        graph.add_edge(sys(0), sys(1));
        graph.add_edge(sys(1), sys(2));
        graph.add_edge(sys(0), sys(2));

        // When
        let order = graph.topsort().unwrap();
        let results = check_graph(&graph, &order);

        // Then
        assert_eq!(results.transitive_edges, vec![(sys(0), sys(2))]);
        assert!(results.disconnected.is_empty());
        assert!(results.is_reachable(sys(0), sys(2)));
    }

    #[test]
    fn check_graph_finds_disconnected_pairs() {
        // Given two independent chains a -> b and c -> d
        let mut graph = DiGraph::default();
        graph.add_edge(sys(0), sys(1));
        graph.add_edge(sys(2), sys(3));

        // When
        let order = graph.topsort().unwrap();
        let results = check_graph(&graph, &order);

        // Then - exactly the cross-chain pairs are unordered
        assert_eq!(results.disconnected.len(), 4);
        for (a, b) in &results.disconnected {
            let chain = |n: &NodeId| n.index() / 2;
            assert_ne!(chain(a), chain(b));
        }
    }

    #[test]
    fn duplicate_edges_collapse() {
        let mut graph = DiGraph::default();
        graph.add_edge(sys(0), sys(1));
        graph.add_edge(sys(0), sys(1));
        assert_eq!(graph.edges().count(), 1);
    }
}
