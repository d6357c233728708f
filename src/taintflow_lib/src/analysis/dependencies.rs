//! The caller-dependency graph of the global fixpoint.
//!
//! The dependencies of a method are the methods that must be re-analyzed
//! when its model changes, i.e. its callers. Unlike the call graph, the
//! dependency graph accounts for virtual dispatch: a caller of a virtual
//! method depends on every override that could be joined into the call,
//! unless joining is disabled for the base method.

use std::collections::BTreeSet;

use fnv::FnvHashMap;

use crate::analysis::call_graph::CallGraph;
use crate::context::Context;
use crate::intermediate_representation::MethodId;
use crate::model::Registry;

/// Maps each method to the methods whose analysis depends on its model.
#[derive(Debug, Default)]
pub struct Dependencies {
    dependencies: FnvHashMap<MethodId, BTreeSet<MethodId>>,
    empty: BTreeSet<MethodId>,
}

impl Dependencies {
    pub fn new(context: &Context, call_graph: &CallGraph, registry: &Registry) -> Self {
        let mut dependencies: FnvHashMap<MethodId, BTreeSet<MethodId>> = FnvHashMap::default();
        for (caller, method) in context.methods.iter() {
            if method.body.is_none() || registry.get(caller).skip_analysis() {
                continue;
            }
            for call_target in call_graph.callees(caller) {
                let base_callee = call_target.resolved_base_callee();
                dependencies.entry(base_callee).or_default().insert(caller);

                if !call_target.is_virtual() {
                    // Direct calls cannot dispatch to an override.
                    continue;
                }
                if registry.get(base_callee).no_join_virtual_overrides() {
                    continue;
                }
                for dispatch_target in call_target.overrides() {
                    dependencies
                        .entry(*dispatch_target)
                        .or_default()
                        .insert(caller);
                }
            }
        }
        Dependencies {
            dependencies,
            empty: BTreeSet::new(),
        }
    }

    /// Returns the methods that must be re-analyzed when the given method's
    /// model changes.
    pub fn dependencies(&self, method: MethodId) -> &BTreeSet<MethodId> {
        self.dependencies.get(&method).unwrap_or(&self.empty)
    }
}
