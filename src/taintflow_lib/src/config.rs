//! Configuration of the analysis:
//! user-facing options and the internal precision heuristics.

use crate::prelude::*;

/// User-facing configuration of an analysis run.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct Options {
    /// Maximum number of hops between a taint and its original declaration.
    /// Frames whose distance would exceed this limit are dropped during propagation.
    pub maximum_source_sink_distance: u32,
    /// Number of worker threads used for the global fixpoint.
    pub number_of_workers: usize,
    /// If set, the global fixpoint runs on the current thread without parallelization.
    pub sequential: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            maximum_source_sink_distance: 10,
            number_of_workers: 4,
            sequential: false,
        }
    }
}

/// Limits bounding the size of the computed abstractions.
///
/// These control where the analysis trades precision for termination and
/// memory usage. Whenever one of the limits triggers, the affected taint is
/// generalized (collapsed or capped), never dropped, and tagged with a
/// broadening feature so that the approximation remains visible in the
/// resulting models.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct Heuristics {
    /// When a method has more overrides than this threshold,
    /// call sites on it do not join all override models
    /// and treat the call as obscure instead.
    pub join_override_threshold: usize,
    /// Maximum number of leaves in a source or sink tree of a model.
    /// When the limit is reached, all subtrees are collapsed into a single node.
    pub model_tree_max_leaves: usize,
    /// Maximum length of the port of an inferred generation.
    pub generation_max_port_size: usize,
    /// Maximum length of the port of an inferred parameter source.
    pub parameter_source_max_port_size: usize,
    /// Maximum length of the port of an inferred sink.
    pub sink_max_port_size: usize,
    /// Maximum length of the input and output paths of an inferred propagation.
    pub propagation_max_path_size: usize,
    /// Maximum number of local positions per taint.
    pub max_number_local_positions: usize,
    /// Maximum number of iterations of a per-method fixpoint.
    /// Exceeding this limit aborts the analysis of the method with an error.
    pub max_number_iterations: usize,
    /// Maximum number of rounds of the global fixpoint.
    /// Exceeding this limit aborts the analysis with an error.
    pub max_number_global_iterations: usize,
}

/// Maximum height of an abstract tree after widening.
///
/// When a tree reaches this height during widening, deeper subtrees are
/// collapsed into their ancestor at this depth.
pub const ABSTRACT_TREE_WIDENING_HEIGHT: usize = 4;

impl Default for Heuristics {
    fn default() -> Self {
        Heuristics {
            join_override_threshold: 40,
            model_tree_max_leaves: 20,
            generation_max_port_size: 4,
            parameter_source_max_port_size: 4,
            sink_max_port_size: 4,
            propagation_max_path_size: 2,
            max_number_local_positions: 20,
            max_number_iterations: 150,
            max_number_global_iterations: 100,
        }
    }
}
