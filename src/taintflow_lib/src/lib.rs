/*!
The main library of taintflow, an interprocedural static taint analysis for register-based bytecode.

# What is taintflow

Taintflow computes, for every method of an analyzed program, a **model** describing
how tainted data flows through the method: which taint *sources* it returns or writes
into its parameters, which *sinks* its parameters reach, and how taint *propagates*
from its inputs to its outputs. Models are inferred by abstract interpretation over
the control flow graph of each method body and combined across the call graph until
a global fixpoint is reached. Flows from a source to a sink that match one of the
configured *rules* are reported as issues.

The analysis is organized in three layers:

- The [abstract domains](crate::abstract_domain) that taint and alias information
  is expressed in: nested frame partitions, access path trees with implicit
  inheritance from ancestors to descendants, and points-to sets.
  See the [`taint`](crate::taint) module for the taint-specific domain stack.
- The [per-method analyses](crate::analysis): a forward alias analysis resolving
  registers to memory locations, followed by forward and backward taint analyses
  that infer the method's sources, sinks and propagations from the models of its
  callees.
- The [global fixpoint](crate::analysis::interprocedural): methods are scheduled
  in reverse topological order over the caller-dependency graph and analyzed in
  parallel by a fixed pool of worker threads until no model changes anymore.

The bytecode itself is consumed through the [intermediate
representation](crate::intermediate_representation), a small register-transfer
language with an explicit control flow graph. Loading bytecode containers and
constructing this representation is the job of a frontend and not part of this
library.
*/

pub mod abstract_domain;
pub mod analysis;
pub mod config;
pub mod context;
pub mod intermediate_representation;
pub mod model;
pub mod taint;

mod prelude {
    pub use serde::{Deserialize, Serialize};

    pub use crate::abstract_domain::{AbstractDomain, HasTop};
    pub use anyhow::{anyhow, Error};
}
