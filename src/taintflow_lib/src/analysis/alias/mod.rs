//! Intraprocedural alias analysis.
//!
//! For each method, a forward fixpoint over the control flow graph computes
//! which memory locations each register may hold and which memory locations
//! the fields of each object may point to. The taint analyses do not touch
//! registers at all: they operate on the per-instruction snapshots of the
//! alias information collected here.

pub mod forward;
pub mod points_to;
pub mod results;
pub mod widening_resolver;

pub use forward::run;
pub use points_to::{AliasingProperties, PointsToEnvironment, PointsToSet, PointsToTree};
pub use results::{AliasAnalysisResults, InstructionAliasResults, ResolvedAliasesMap};
pub use widening_resolver::{WideningPointsToResolver, WidenedPointsToComponents};
