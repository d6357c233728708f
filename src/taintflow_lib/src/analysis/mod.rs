//! The analyses of this crate.
//!
//! The entry point is [`interprocedural::run`], which computes a model for
//! every method of the program by iterating the per-method analysis until a
//! global fixpoint is reached. The per-method analysis first runs the alias
//! analysis in the [`alias`] module and then propagates taint forwards and
//! backwards over its results in the [`taint`] module.

pub mod alias;
pub mod call_graph;
pub mod dependencies;
pub mod fixpoint;
pub mod interprocedural;
pub mod memory_location;
pub mod scheduler;
pub mod taint;
