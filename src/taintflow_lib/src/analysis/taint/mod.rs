//! The per-method taint analyses.
//!
//! For one method, taint is propagated in two fixpoints over the alias
//! analysis results: the forward pass flows sources from their entry points
//! towards sinks and return values, inferring generations and reporting
//! issues; the backward pass flows sink and propagation sentinels from the
//! method's exits towards its parameters, inferring sinks and propagations.
//! Both passes share the per-call-site model instantiation of
//! [`MethodContext`].

use std::cell::RefCell;

use fnv::FnvHashMap;

use crate::analysis::alias;
use crate::analysis::alias::results::{AliasAnalysisResults, InstructionAliasResults};
use crate::analysis::call_graph::{CallGraph, CallTarget};
use crate::analysis::memory_location::MemoryFactory;
use crate::context::Context;
use crate::intermediate_representation::{InstructionId, Method, MethodId, PositionId, TypeId};
use crate::model::{Model, Registry, Rules};
use crate::prelude::*;
use crate::taint::CallClassIntervalContext;

pub mod backward;
pub mod environment;
pub mod forward;
pub mod fulfilled_partial;

pub use environment::TaintEnvironment;
pub use fulfilled_partial::FulfilledPartialKindState;

/// Everything the forward and backward taint fixpoints of one method share:
/// the global analysis state, the alias analysis results of the method and
/// the instantiated callee models, cached per call site.
pub struct MethodContext<'a> {
    context: &'a Context,
    rules: &'a Rules,
    call_graph: &'a CallGraph,
    registry: &'a Registry,
    method: MethodId,
    memory_factory: MemoryFactory,
    alias_results: AliasAnalysisResults,
    /// Position reported for flows at instructions without position info.
    unknown_position: PositionId,
    callsite_models: RefCell<FnvHashMap<InstructionId, Model>>,
}

impl<'a> MethodContext<'a> {
    /// Runs the alias analysis of the method and prepares the shared state
    /// of its taint fixpoints.
    pub fn new(
        context: &'a Context,
        rules: &'a Rules,
        call_graph: &'a CallGraph,
        registry: &'a Registry,
        method: MethodId,
        unknown_position: PositionId,
    ) -> Result<Self, Error> {
        let mut memory_factory = MemoryFactory::new(context.method(method));
        let alias_results = alias::run(context, context.method(method), &mut memory_factory)?;
        Ok(MethodContext {
            context,
            rules,
            call_graph,
            registry,
            method,
            memory_factory,
            alias_results,
            unknown_position,
            callsite_models: RefCell::new(FnvHashMap::default()),
        })
    }

    pub fn method(&self) -> &'a Method {
        self.context.method(self.method)
    }

    pub fn method_id(&self) -> MethodId {
        self.method
    }

    /// The position to report for a flow at the given instruction.
    pub fn call_position(&self, alias_results: &InstructionAliasResults) -> PositionId {
        alias_results.position().unwrap_or(self.unknown_position)
    }

    /// Returns the resolution of the invoke at the given instruction.
    pub fn call_target(&self, instruction: InstructionId) -> Option<&CallTarget> {
        self.call_graph.callee(self.method, instruction)
    }

    /// Returns the callee model seen from this call site.
    ///
    /// The base callee's model is instantiated at the call position; for a
    /// virtual call, the models of all possible dispatch targets are
    /// instantiated and joined in, unless joining is disabled for the base
    /// method. `receiver_is_this` states whether the call dispatches on the
    /// `this` of the enclosing method, which lets the callee inherit the
    /// caller's class interval context.
    pub fn model_at_callsite(
        &self,
        target: &CallTarget,
        call_position: PositionId,
        receiver_is_this: bool,
    ) -> Model {
        if let Some(model) = self.callsite_models.borrow().get(&target.instruction()) {
            return model.clone();
        }
        let model = self.instantiate_model(target, call_position, receiver_is_this);
        self.callsite_models
            .borrow_mut()
            .insert(target.instruction(), model.clone());
        model
    }

    fn instantiate_model(
        &self,
        target: &CallTarget,
        call_position: PositionId,
        receiver_is_this: bool,
    ) -> Model {
        let base_callee = target.resolved_base_callee();
        let source_register_types: Vec<Option<TypeId>> = self
            .context
            .method(base_callee)
            .parameter_types
            .iter()
            .map(|parameter_type| Some(*parameter_type))
            .collect();
        // Constant propagation into call arguments is not performed.
        let source_constant_arguments: Vec<Option<String>> =
            vec![None; source_register_types.len()];
        let caller_class_interval = self.context.class_intervals.get(self.method().class);

        let base_model = self.registry.get(base_callee);
        let instantiated = base_model.at_callsite(
            self.context,
            call_position,
            &CallClassIntervalContext::new(target.receiver_class_interval(), receiver_is_this),
            caller_class_interval,
            &source_register_types,
            &source_constant_arguments,
        );
        if !target.is_virtual() || base_model.no_join_virtual_overrides() {
            return instantiated;
        }

        // Accumulate into a method-less model, since the dispatch targets
        // are distinct methods.
        let mut joined = Model::empty();
        joined.join_with(&instantiated);
        for &dispatch_target in target.overrides() {
            let interval = self
                .context
                .class_intervals
                .get(self.context.method(dispatch_target).class);
            let dispatch_model = self.registry.get(dispatch_target).at_callsite(
                self.context,
                call_position,
                &CallClassIntervalContext::new(interval, receiver_is_this),
                caller_class_interval,
                &source_register_types,
                &source_constant_arguments,
            );
            joined.join_with(&dispatch_model);
        }
        joined
    }
}
