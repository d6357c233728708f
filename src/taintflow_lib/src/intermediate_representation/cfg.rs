use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::intermediate_representation::InstructionId;
use crate::prelude::*;

/// A basic block of a control flow graph.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct Block {
    /// The instructions of the block, in execution order.
    pub instructions: Vec<InstructionId>,
}

impl Block {
    /// Generate a new block with the given instructions.
    pub fn new(instructions: Vec<InstructionId>) -> Self {
        Block { instructions }
    }
}

/// The control flow graph of a method body.
///
/// The graph has a unique entry node and a unique, artificial exit node.
/// Every block without successors is connected to the exit node,
/// so the reversed graph is entered at a single point as well.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Cfg {
    graph: DiGraph<Block, ()>,
    entry: NodeIndex,
    exit: NodeIndex,
}

impl Cfg {
    /// Generate a control flow graph from the given blocks and edges
    /// between block indices. The first block is the entry block.
    ///
    /// An artificial exit block is appended and all blocks without
    /// successors are connected to it.
    pub fn new(blocks: Vec<Block>, edges: &[(usize, usize)]) -> Self {
        let mut graph = DiGraph::new();
        let nodes: Vec<NodeIndex> = blocks.into_iter().map(|block| graph.add_node(block)).collect();
        for (from, to) in edges {
            graph.add_edge(nodes[*from], nodes[*to], ());
        }

        let entry = nodes.first().copied().unwrap_or_else(|| graph.add_node(Block::default()));
        let exit = graph.add_node(Block::default());
        let returning_nodes: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|node| {
                *node != exit && graph.neighbors_directed(*node, Direction::Outgoing).count() == 0
            })
            .collect();
        for node in returning_nodes {
            graph.add_edge(node, exit, ());
        }

        Cfg { graph, entry, exit }
    }

    /// Returns the underlying graph.
    pub fn graph(&self) -> &DiGraph<Block, ()> {
        &self.graph
    }

    /// Returns the entry node.
    pub fn entry(&self) -> NodeIndex {
        self.entry
    }

    /// Returns the artificial exit node.
    pub fn exit(&self) -> NodeIndex {
        self.exit
    }

    /// Returns the block at the given node.
    pub fn block(&self, node: NodeIndex) -> &Block {
        &self.graph[node]
    }

    /// Returns a copy of the graph with all edges reversed.
    ///
    /// Nodes are added in the same order as in `self`,
    /// so node indices of the reversed graph identify the same blocks.
    pub fn reversed(&self) -> Cfg {
        let mut graph = DiGraph::new();
        for node in self.graph.node_indices() {
            graph.add_node(self.graph[node].clone());
        }
        for edge in self.graph.edge_indices() {
            if let Some((from, to)) = self.graph.edge_endpoints(edge) {
                graph.add_edge(to, from, ());
            }
        }
        Cfg {
            graph,
            entry: self.exit,
            exit: self.entry,
        }
    }
}
