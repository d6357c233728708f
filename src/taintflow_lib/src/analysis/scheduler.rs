//! Work distribution of one global fixpoint round.
//!
//! The methods of a round are split into per-worker queues. Queues are
//! filled component by component along the strongly connected components of
//! the call relation, callees before callers, so most methods are analyzed
//! after the models they read have already been updated in the round.
//! Mutually recursive methods end up in the same queue.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;

use crate::analysis::dependencies::Dependencies;
use crate::intermediate_representation::MethodId;

/// The per-worker method queues of one round.
#[derive(Debug)]
pub struct Scheduler {
    queues: Vec<Vec<MethodId>>,
}

impl Scheduler {
    pub fn new(
        methods: &BTreeSet<MethodId>,
        dependencies: &Dependencies,
        number_of_workers: usize,
    ) -> Scheduler {
        let mut graph = DiGraph::<MethodId, ()>::new();
        let mut nodes = BTreeMap::new();
        for &method in methods {
            nodes.insert(method, graph.add_node(method));
        }
        for &method in methods {
            // The dependents of a method are its callers.
            for dependent in dependencies.dependencies(method) {
                if let Some(&caller) = nodes.get(dependent) {
                    graph.add_edge(caller, nodes[&method], ());
                }
            }
        }

        let number_of_queues = number_of_workers.max(1);
        let mut queues = vec![Vec::new(); number_of_queues];
        // Tarjan emits the components in postorder: the components of
        // callees come before the components of their callers.
        for (index, component) in tarjan_scc(&graph).into_iter().enumerate() {
            let queue = &mut queues[index % number_of_queues];
            for node in component {
                queue.push(graph[node]);
            }
        }
        Scheduler { queues }
    }

    pub fn queues(&self) -> &[Vec<MethodId>] {
        &self.queues
    }
}
