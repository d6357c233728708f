//! A generic worklist algorithm for monotone dataflow problems.
//!
//! A fixpoint problem is given by a directed graph where every node carries a
//! value out of a partially ordered set and every edge describes how the
//! value at its start node transforms into a value at its end node. A
//! solution assigns a value to every node such that for each edge the
//! transformed start value is absorbed by the value at the end node.
//!
//! The worklist holds the nodes whose value may still grow. Nodes are
//! prioritized by a weak topological order of the graph so that loops
//! stabilize innermost first. Since the taint and alias lattices have
//! unbounded height, the algorithm switches from joining to widening at a
//! node once that node has been merged more often than the widening delay,
//! which bounds the height of every ascending chain.
//!
//! To solve a problem, implement [`Context`], wrap it into a [`Computation`],
//! seed the entry values with [`Computation::set_node_value`] and run
//! [`Computation::compute_with_max_steps`].

use std::collections::BTreeSet;

use fnv::FnvHashMap;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::prelude::*;

/// The number of merges at a single node after which further merges widen
/// instead of join.
const WIDENING_DELAY: u64 = 4;

/// The context of a fixpoint computation: the graph together with the merge
/// and transfer functions of the problem.
pub trait Context {
    /// The type of the edge labels of the graph.
    type EdgeLabel: Clone;
    /// The type of the node labels of the graph.
    type NodeLabel;
    /// The type of the value assigned to each node.
    /// The values must form a partially ordered set.
    type NodeValue: PartialEq + Eq + Clone;

    /// Returns the graph on which the fixpoint computation operates.
    fn get_graph(&self) -> &DiGraph<Self::NodeLabel, Self::EdgeLabel>;

    /// Merge two values, i.e. compute an upper bound of both.
    fn merge(&self, value1: &Self::NodeValue, value2: &Self::NodeValue) -> Self::NodeValue;

    /// Widen the old value at a node with an incoming value.
    ///
    /// The result must absorb both arguments, and repeated widening must
    /// reach a fixed value after finitely many steps. The default widens by
    /// merging, which is sufficient for lattices of finite height.
    fn widen(&self, old_value: &Self::NodeValue, new_value: &Self::NodeValue) -> Self::NodeValue {
        self.merge(old_value, new_value)
    }

    /// Compute the value at the end node of an edge from the value at its
    /// start node. `None` indicates that no information flows through the
    /// edge, in which case the end node keeps its previous value.
    fn update_edge(&self, value: &Self::NodeValue, edge: EdgeIndex) -> Option<Self::NodeValue>;
}

/// An intermediate state of a fixpoint computation, with methods to continue
/// the computation and to extract the (intermediate or final) node values.
pub struct Computation<T: Context> {
    fp_context: T,
    /// Maps a node index to its priority.
    /// Nodes with a higher priority get stabilized first.
    node_priority_list: Vec<usize>,
    /// Maps a priority to the corresponding node index.
    priority_to_node_list: Vec<NodeIndex>,
    /// The priorities (not the node indices) of the nodes that are not yet
    /// stabilized.
    worklist: BTreeSet<usize>,
    /// Counts the merges at each node to decide when to start widening.
    merge_counts: Vec<u64>,
    node_values: FnvHashMap<NodeIndex, T::NodeValue>,
}

impl<T: Context> Computation<T> {
    /// Create a new fixpoint computation from a fixpoint context and an
    /// optional default value assigned to all nodes.
    ///
    /// With a default value, all nodes start out on the worklist. Without
    /// one, only nodes seeded through [`Computation::set_node_value`] and
    /// nodes reachable from them take part in the computation.
    pub fn new(fp_context: T, default_value: Option<T::NodeValue>) -> Self {
        let graph = fp_context.get_graph();
        // Order the nodes in weak topological order: strongly connected
        // components in execution order, so that entry nodes get the
        // highest priority.
        let priority_sorted_nodes: Vec<NodeIndex> = petgraph::algo::kosaraju_scc(graph)
            .into_iter()
            .flatten()
            .collect();
        let mut node_priority_list: Vec<usize> = vec![0; graph.node_count()];
        for (priority, node) in priority_sorted_nodes.iter().enumerate() {
            node_priority_list[node.index()] = priority;
        }
        let mut worklist = BTreeSet::new();
        let mut node_values: FnvHashMap<NodeIndex, T::NodeValue> = FnvHashMap::default();
        if let Some(default_value) = default_value {
            for (priority, node) in priority_sorted_nodes.iter().enumerate() {
                worklist.insert(priority);
                node_values.insert(*node, default_value.clone());
            }
        }
        Computation {
            merge_counts: vec![0; graph.node_count()],
            fp_context,
            node_priority_list,
            priority_to_node_list: priority_sorted_nodes,
            worklist,
            node_values,
        }
    }

    /// Get the value of a node.
    pub fn get_node_value(&self, node: NodeIndex) -> Option<&T::NodeValue> {
        self.node_values.get(&node)
    }

    /// Set the value of a node and mark the node as not yet stabilized.
    pub fn set_node_value(&mut self, node: NodeIndex, value: T::NodeValue) {
        self.node_values.insert(node, value);
        self.worklist.insert(self.node_priority_list[node.index()]);
    }

    /// Merge the value at a node with an incoming value,
    /// widening once the node has been merged more often than the delay.
    fn merge_node_value(&mut self, node: NodeIndex, value: T::NodeValue) {
        if let Some(old_value) = self.node_values.get(&node) {
            self.merge_counts[node.index()] += 1;
            let merged_value = if self.merge_counts[node.index()] > WIDENING_DELAY {
                self.fp_context.widen(old_value, &value)
            } else {
                self.fp_context.merge(&value, old_value)
            };
            if merged_value != *old_value {
                self.set_node_value(node, merged_value);
            }
        } else {
            self.set_node_value(node, value);
        }
    }

    /// Compute and update the value at the end node of an edge.
    fn update_edge(&mut self, edge: EdgeIndex) {
        if let Some((start_node, end_node)) = self.fp_context.get_graph().edge_endpoints(edge) {
            if let Some(start_value) = self.node_values.get(&start_node) {
                if let Some(new_end_value) = self.fp_context.update_edge(start_value, edge) {
                    self.merge_node_value(end_node, new_end_value);
                }
            }
        }
    }

    /// Update all outgoing edges of a node.
    fn update_node(&mut self, node: NodeIndex) {
        let edges: Vec<EdgeIndex> = self
            .fp_context
            .get_graph()
            .edges(node)
            .map(|edge_ref| edge_ref.id())
            .collect();
        for edge in edges {
            self.update_edge(edge);
        }
    }

    /// Remove the highest priority node from the worklist and return it.
    fn take_next_node_from_worklist(&mut self) -> Option<NodeIndex> {
        let priority = self.worklist.iter().next_back().copied()?;
        self.worklist.remove(&priority);
        Some(self.priority_to_node_list[priority])
    }

    /// Compute the fixpoint, visiting each node at most `max_steps` times.
    ///
    /// Returns an error if some nodes did not stabilize within the step
    /// limit. The values computed so far stay accessible and the unstable
    /// nodes remain on the worklist.
    pub fn compute_with_max_steps(&mut self, max_steps: u64) -> Result<(), Error> {
        let mut steps = vec![0; self.fp_context.get_graph().node_count()];
        let mut non_stabilized_nodes = BTreeSet::new();
        while let Some(priority) = self.worklist.iter().next_back().copied() {
            self.worklist.remove(&priority);
            let node = self.priority_to_node_list[priority];
            if steps[node.index()] < max_steps {
                steps[node.index()] += 1;
                self.update_node(node);
            } else {
                non_stabilized_nodes.insert(priority);
            }
        }
        self.worklist = non_stabilized_nodes;
        if self.worklist.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "fixpoint did not stabilize within {} steps per node ({} nodes left unstable)",
                max_steps,
                self.worklist.len()
            ))
        }
    }

    /// Get a reference to the map holding the current values of all nodes.
    pub fn node_values(&self) -> &FnvHashMap<NodeIndex, T::NodeValue> {
        &self.node_values
    }

    /// Get a reference to the underlying graph.
    pub fn get_graph(&self) -> &DiGraph<T::NodeLabel, T::EdgeLabel> {
        self.fp_context.get_graph()
    }

    /// Get a reference to the underlying context object.
    pub fn get_context(&self) -> &T {
        &self.fp_context
    }

    /// Returns whether the computation has stabilized,
    /// i.e. the worklist is empty.
    pub fn has_stabilized(&self) -> bool {
        self.worklist.is_empty()
    }

    /// Returns the list of nodes that are marked as not stabilized.
    pub fn non_stabilized_nodes(&self) -> Vec<NodeIndex> {
        self.worklist
            .iter()
            .map(|priority| self.priority_to_node_list[*priority])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ShortestPathContext {
        graph: DiGraph<(), u64>,
    }

    impl Context for ShortestPathContext {
        type EdgeLabel = u64;
        type NodeLabel = ();
        type NodeValue = u64;

        fn get_graph(&self) -> &DiGraph<(), u64> {
            &self.graph
        }

        fn merge(&self, value1: &u64, value2: &u64) -> u64 {
            std::cmp::min(*value1, *value2)
        }

        fn update_edge(&self, value: &u64, edge: EdgeIndex) -> Option<u64> {
            self.graph.edge_weight(edge).map(|weight| value + weight)
        }
    }

    /// Counts loop iterations, growing forever unless the widening cap kicks in.
    struct LoopContext {
        graph: DiGraph<(), u64>,
        widening_cap: Option<u64>,
    }

    impl Context for LoopContext {
        type EdgeLabel = u64;
        type NodeLabel = ();
        type NodeValue = u64;

        fn get_graph(&self) -> &DiGraph<(), u64> {
            &self.graph
        }

        fn merge(&self, value1: &u64, value2: &u64) -> u64 {
            std::cmp::max(*value1, *value2)
        }

        fn widen(&self, old_value: &u64, new_value: &u64) -> u64 {
            match self.widening_cap {
                Some(cap) if new_value > old_value => std::cmp::max(*old_value, cap),
                _ => self.merge(old_value, new_value),
            }
        }

        fn update_edge(&self, value: &u64, edge: EdgeIndex) -> Option<u64> {
            self.graph
                .edge_weight(edge)
                .map(|weight| value.saturating_add(*weight))
        }
    }

    fn loop_graph() -> DiGraph<(), u64> {
        let mut graph = DiGraph::new();
        let head = graph.add_node(());
        let body = graph.add_node(());
        graph.add_edge(head, body, 1);
        graph.add_edge(body, head, 1);
        graph
    }

    #[test]
    fn computes_shortest_distances() {
        let mut graph = DiGraph::new();
        let nodes: Vec<_> = (0..5).map(|_| graph.add_node(())).collect();
        graph.add_edge(nodes[0], nodes[1], 2);
        graph.add_edge(nodes[0], nodes[2], 5);
        graph.add_edge(nodes[1], nodes[3], 2);
        graph.add_edge(nodes[2], nodes[3], 1);
        graph.add_edge(nodes[3], nodes[4], 3);

        let mut solution = Computation::new(ShortestPathContext { graph }, None);
        solution.set_node_value(nodes[0], 0);
        solution.compute_with_max_steps(10).unwrap();

        assert_eq!(*solution.get_node_value(nodes[3]).unwrap(), 4);
        assert_eq!(*solution.get_node_value(nodes[4]).unwrap(), 7);
        assert!(solution.has_stabilized());
    }

    #[test]
    fn default_values_cover_unseeded_nodes() {
        let mut graph = DiGraph::new();
        let seeded = graph.add_node(());
        let island = graph.add_node(());
        let target = graph.add_node(());
        graph.add_edge(seeded, target, 1);

        let mut solution = Computation::new(ShortestPathContext { graph }, Some(100));
        solution.set_node_value(seeded, 0);
        solution.compute_with_max_steps(10).unwrap();

        assert_eq!(*solution.get_node_value(island).unwrap(), 100);
        assert_eq!(*solution.get_node_value(target).unwrap(), 1);
    }

    #[test]
    fn entry_nodes_are_stabilized_first() {
        let mut graph: DiGraph<(), u64> = DiGraph::new();
        let entry = graph.add_node(());
        let middle = graph.add_node(());
        let exit = graph.add_node(());
        graph.add_edge(entry, middle, 1);
        graph.add_edge(middle, exit, 1);

        let mut solution = Computation::new(ShortestPathContext { graph }, Some(0));
        assert_eq!(solution.take_next_node_from_worklist(), Some(entry));
        assert_eq!(solution.take_next_node_from_worklist(), Some(middle));
        assert_eq!(solution.take_next_node_from_worklist(), Some(exit));
        assert_eq!(solution.take_next_node_from_worklist(), None);
    }

    #[test]
    fn widening_stabilizes_growing_loops() {
        let fp_context = LoopContext {
            graph: loop_graph(),
            widening_cap: Some(1000),
        };
        let mut solution = Computation::new(fp_context, None);
        solution.set_node_value(NodeIndex::new(0), 0);
        solution.compute_with_max_steps(100).unwrap();

        assert!(solution.has_stabilized());
        assert_eq!(*solution.get_node_value(NodeIndex::new(0)).unwrap(), 1000);
        assert_eq!(*solution.get_node_value(NodeIndex::new(1)).unwrap(), 1000);
    }

    #[test]
    fn divergence_is_reported() {
        let fp_context = LoopContext {
            graph: loop_graph(),
            widening_cap: None,
        };
        let mut solution = Computation::new(fp_context, None);
        solution.set_node_value(NodeIndex::new(0), 0);

        assert!(solution.compute_with_max_steps(10).is_err());
        assert!(!solution.has_stabilized());
        assert!(!solution.non_stabilized_nodes().is_empty());
    }
}
