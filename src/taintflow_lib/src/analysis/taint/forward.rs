//! The forward taint fixpoint of one method.
//!
//! Sources enter the environment at parameter loads, field reads and call
//! sites returning tainted values, and flow along the aliasing structure
//! towards the method's exits. After the fixpoint stabilizes, the converged
//! block entry states are replayed once to check sources against the sinks
//! of every call site and to infer the generations of the method's model.

use petgraph::graph::{DiGraph, EdgeIndex};

use crate::abstract_domain::UpdateKind;
use crate::analysis::alias::results::InstructionAliasResults;
use crate::analysis::fixpoint;
use crate::analysis::taint::{FulfilledPartialKindState, MethodContext, TaintEnvironment};
use crate::intermediate_representation::{
    AccessPath, Block, Instruction, InstructionId, MethodBody, Path, PathElement, PositionId,
    Register, Root,
};
use crate::model::{Issue, Model};
use crate::prelude::*;
use crate::taint::{FeatureId, FeatureMayAlwaysSet, Taint, TaintTree};

/// The fixpoint problem of the forward taint analysis of one method.
struct ForwardTaintContext<'a> {
    method_context: &'a MethodContext<'a>,
    body: &'a MethodBody,
}

impl<'a> ForwardTaintContext<'a> {
    /// Applies the abstract semantics of one instruction to the environment.
    ///
    /// During the fixpoint iterations no model is given; during the replay
    /// of the converged states, issues and inferred generations are
    /// collected into `model`.
    fn analyze_instruction(
        &self,
        environment: &mut TaintEnvironment,
        instruction_id: InstructionId,
        model: Option<&mut Model>,
    ) {
        let method_context = self.method_context;
        let alias_results = match method_context.alias_results.get(instruction_id) {
            Ok(alias_results) => alias_results,
            Err(error) => {
                log::error!("{error}");
                return;
            }
        };
        match self.body.instruction(instruction_id) {
            Instruction::LoadParam { parameter, .. } => {
                let sources = method_context
                    .registry
                    .get(method_context.method_id())
                    .parameter_sources()
                    .read_root(Root::Argument(*parameter));
                if sources.is_bottom() {
                    return;
                }
                let position = method_context.call_position(alias_results);
                match method_context.memory_factory.make_parameter(*parameter) {
                    Ok(location) => {
                        environment.write_unaliased(location, sources.attach_position(position))
                    }
                    Err(error) => log::error!("{error}"),
                }
            }
            Instruction::FieldGet { field, .. } | Instruction::StaticGet { field, .. } => {
                let field_model = method_context.registry.field_model(*field);
                if field_model.sources().is_bottom() {
                    return;
                }
                let position = method_context.call_position(alias_results);
                let sources = TaintTree::from_taint(field_model.sources().attach_position(position));
                if let Some(locations) = alias_results.result_memory_locations() {
                    environment.write_locations(
                        &method_context.context.heuristics,
                        &method_context.memory_factory,
                        alias_results.resolved_aliases(),
                        locations,
                        sources,
                        UpdateKind::Weak,
                    );
                }
            }
            // The flow into the written field is covered by the aliasing
            // structure; only the field's declared sinks need a check.
            Instruction::FieldPut { src, field, .. } | Instruction::StaticPut { src, field } => {
                let Some(model) = model else {
                    return;
                };
                let field_model = method_context.registry.field_model(*field);
                if field_model.sinks().is_bottom() {
                    return;
                }
                let sources = self
                    .read_register(environment, alias_results, *src)
                    .collapse(&FeatureMayAlwaysSet::make_always([
                        FeatureId::ISSUE_BROADENING,
                    ]));
                if sources.is_bottom() {
                    return;
                }
                let position = method_context.call_position(alias_results);
                let sinks = field_model.sinks().attach_position(position);
                let mut fulfilled = FulfilledPartialKindState::default();
                self.check_sources_against_sinks(model, &sources, &sinks, position, 0, &mut fulfilled);
            }
            Instruction::Invoke {
                arguments, dest, ..
            } => {
                let Some(target) = method_context.call_target(instruction_id) else {
                    return;
                };
                let position = method_context.call_position(alias_results);
                let receiver_is_this = self.receiver_is_this(target.is_virtual(), arguments, alias_results);
                let callsite_model =
                    method_context.model_at_callsite(target, position, receiver_is_this);

                if let Some(model) = model {
                    self.check_call_flows(
                        environment,
                        &callsite_model,
                        arguments,
                        alias_results,
                        position,
                        model,
                    );
                }
                self.apply_propagations(
                    environment,
                    &callsite_model,
                    arguments,
                    alias_results,
                    position,
                );
                self.apply_generations(
                    environment,
                    &callsite_model,
                    arguments,
                    dest.is_some(),
                    alias_results,
                );
            }
            Instruction::Return { src } => {
                let Some(model) = model else {
                    return;
                };
                if let Some(src) = src {
                    let tree = self.read_register(environment, alias_results, *src);
                    for (path, taint) in tree.elements() {
                        model.add_inferred_generations(
                            method_context.context,
                            AccessPath::new(Root::Return, path),
                            taint.clone(),
                        );
                    }
                }
                if !method_context.method().is_static {
                    self.infer_receiver_generations(environment, alias_results, model);
                }
            }
            Instruction::Const { .. }
            | Instruction::ConstString { .. }
            | Instruction::Move { .. }
            | Instruction::NewInstance { .. }
            | Instruction::Opaque { .. }
            | Instruction::DebugPosition { .. } => (),
        }
    }

    fn read_register(
        &self,
        environment: &TaintEnvironment,
        alias_results: &InstructionAliasResults,
        register: Register,
    ) -> TaintTree {
        environment.read_register(
            &self.method_context.context.heuristics,
            &self.method_context.memory_factory,
            alias_results,
            register,
        )
    }

    /// Returns whether the call dispatches on the `this` of the enclosing
    /// method, in which case the callee runs in the caller's class interval.
    fn receiver_is_this(
        &self,
        is_virtual: bool,
        arguments: &[Register],
        alias_results: &InstructionAliasResults,
    ) -> bool {
        if !is_virtual || self.method_context.method().is_static {
            return false;
        }
        let Some(receiver) = arguments.first() else {
            return false;
        };
        let locations = alias_results.register_memory_locations(*receiver);
        if locations.is_top() || locations.len() != Some(1) {
            return false;
        }
        let receiver_is_parameter_zero = locations.iter().next().is_some_and(|location| {
            self.method_context
                .memory_factory
                .parameter_position(*location)
                == Some(0)
        });
        receiver_is_parameter_zero
    }

    /// Writes the instantiated generations of the callee model into the
    /// result and argument registers of the call.
    fn apply_generations(
        &self,
        environment: &mut TaintEnvironment,
        callsite_model: &Model,
        arguments: &[Register],
        has_result: bool,
        alias_results: &InstructionAliasResults,
    ) {
        let method_context = self.method_context;
        for (root, tree) in callsite_model.generations().roots() {
            match root {
                Root::Return => {
                    if !has_result {
                        continue;
                    }
                    if let Some(locations) = alias_results.result_memory_locations() {
                        environment.write_locations(
                            &method_context.context.heuristics,
                            &method_context.memory_factory,
                            alias_results.resolved_aliases(),
                            locations,
                            tree.clone(),
                            UpdateKind::Weak,
                        );
                    }
                }
                Root::Argument(parameter) => {
                    if let Some(register) = arguments.get(parameter as usize) {
                        environment.write_register(
                            &method_context.context.heuristics,
                            &method_context.memory_factory,
                            alias_results,
                            *register,
                            tree.clone(),
                            UpdateKind::Weak,
                        );
                    }
                }
                Root::CallEffect => (),
            }
        }
    }

    /// Applies the propagations of the callee model: taint on an input
    /// port flows into the output ports named by the propagation kinds,
    /// collapsed to the collapse depth of each output path.
    fn apply_propagations(
        &self,
        environment: &mut TaintEnvironment,
        callsite_model: &Model,
        arguments: &[Register],
        alias_results: &InstructionAliasResults,
        position: PositionId,
    ) {
        let method_context = self.method_context;
        let heuristics = &method_context.context.heuristics;
        for (input_port, taint) in callsite_model.propagations().elements() {
            let Root::Argument(parameter) = input_port.root() else {
                continue;
            };
            let Some(&input_register) = arguments.get(parameter as usize) else {
                continue;
            };
            let input = self
                .read_register(environment, alias_results, input_register)
                .read(input_port.path());
            if input.is_bottom() {
                continue;
            }
            for frame in taint.frames() {
                let Some(output_root) = method_context
                    .context
                    .kinds
                    .get(frame.kind())
                    .propagation_root()
                else {
                    continue;
                };
                for (output_path, collapse_depth) in frame.output_paths().elements() {
                    let mut output = input.clone();
                    if collapse_depth.should_collapse() {
                        if let Some(depth) = collapse_depth.depth() {
                            output.collapse_deeper_than(
                                depth as usize,
                                &FeatureMayAlwaysSet::make_always([
                                    FeatureId::PROPAGATION_BROADENING,
                                ]),
                            );
                        }
                    }
                    output.add_locally_inferred_features_and_local_position(
                        &frame.features(),
                        Some(position),
                        heuristics.max_number_local_positions,
                    );
                    let mut nested = TaintTree::bottom();
                    nested.write_tree(&output_path, output, UpdateKind::Weak);
                    match output_root {
                        Root::Return => {
                            if let Some(locations) = alias_results.result_memory_locations() {
                                environment.write_locations(
                                    heuristics,
                                    &method_context.memory_factory,
                                    alias_results.resolved_aliases(),
                                    locations,
                                    nested,
                                    UpdateKind::Weak,
                                );
                            }
                        }
                        Root::Argument(output_parameter) => {
                            if let Some(&register) = arguments.get(output_parameter as usize) {
                                environment.write_register(
                                    heuristics,
                                    &method_context.memory_factory,
                                    alias_results,
                                    register,
                                    nested,
                                    UpdateKind::Weak,
                                );
                            }
                        }
                        Root::CallEffect => (),
                    }
                }
            }
        }
    }

    /// Checks the sources reaching the call arguments against the sinks of
    /// the callee model and reports matching rules as issues.
    fn check_call_flows(
        &self,
        environment: &TaintEnvironment,
        callsite_model: &Model,
        arguments: &[Register],
        alias_results: &InstructionAliasResults,
        position: PositionId,
        model: &mut Model,
    ) {
        // Halves of multi-source rules fulfill each other within one call.
        let mut fulfilled = FulfilledPartialKindState::default();
        for (sink_index, (port, sinks)) in callsite_model.sinks().elements().into_iter().enumerate()
        {
            let Root::Argument(parameter) = port.root() else {
                continue;
            };
            let Some(&register) = arguments.get(parameter as usize) else {
                continue;
            };
            let sources = self
                .read_register(environment, alias_results, register)
                .read(port.path())
                .collapse(&FeatureMayAlwaysSet::make_always([
                    FeatureId::ISSUE_BROADENING,
                ]));
            if sources.is_bottom() {
                continue;
            }
            self.check_sources_against_sinks(
                model,
                &sources,
                sinks,
                position,
                sink_index as u32,
                &mut fulfilled,
            );
        }
    }

    fn check_sources_against_sinks(
        &self,
        model: &mut Model,
        sources: &Taint,
        sinks: &Taint,
        position: PositionId,
        sink_index: u32,
        fulfilled: &mut FulfilledPartialKindState,
    ) {
        let context = self.method_context.context;
        let rules = self.method_context.rules;
        for source_kind in sources.kinds() {
            if context.kinds.get(source_kind).is_propagation() {
                continue;
            }
            let kind_sources = sources.filter_by_kind(|kind| kind == source_kind);
            for sink_kind in sinks.kinds() {
                let kind_sinks = sinks.filter_by_kind(|kind| kind == sink_kind);
                if context.kinds.get(sink_kind).is_partial() {
                    for &rule in rules.partial_rules(source_kind, sink_kind) {
                        if let Some(triggered_sinks) = fulfilled.fulfill_kind(
                            context,
                            sink_kind,
                            rule,
                            kind_sources.features_joined(),
                            &kind_sinks,
                        ) {
                            model.add_issue(Issue::new(
                                rule,
                                position,
                                sink_index,
                                kind_sources.clone(),
                                triggered_sinks,
                            ));
                        }
                    }
                } else {
                    for &rule in rules.rules(source_kind, sink_kind) {
                        model.add_issue(Issue::new(
                            rule,
                            position,
                            sink_index,
                            kind_sources.clone(),
                            kind_sinks.clone(),
                        ));
                    }
                }
            }
        }
    }

    /// Infers generations on the receiver for taint written into its object
    /// graph during the method, e.g. by a field write or a callee.
    fn infer_receiver_generations(
        &self,
        environment: &TaintEnvironment,
        alias_results: &InstructionAliasResults,
        model: &mut Model,
    ) {
        let method_context = self.method_context;
        let receiver = match method_context.memory_factory.make_parameter(0) {
            Ok(receiver) => receiver,
            Err(error) => {
                log::error!("{error}");
                return;
            }
        };
        let resolved = alias_results.resolved_aliases().get(receiver);
        for (alias_path, points_to) in resolved.elements() {
            for (target, properties) in points_to.iter() {
                let Some(tree) = environment.tree(target) else {
                    continue;
                };
                for (inner_path, taint) in tree.elements() {
                    if target == receiver && alias_path.is_empty() && inner_path.is_empty() {
                        // The entry taint of the parameter itself.
                        continue;
                    }
                    let mut port_path: Vec<PathElement> = alias_path.clone();
                    port_path.extend(inner_path.iter().copied());
                    let mut taint = taint.clone();
                    taint.add_locally_inferred_features(properties.locally_inferred_features());
                    model.add_inferred_generations(
                        method_context.context,
                        AccessPath::new(Root::Argument(0), Path::new(port_path)),
                        taint,
                    );
                }
            }
        }
    }
}

impl<'a> fixpoint::Context for ForwardTaintContext<'a> {
    type EdgeLabel = ();
    type NodeLabel = Block;
    type NodeValue = TaintEnvironment;

    fn get_graph(&self) -> &DiGraph<Block, ()> {
        self.body.cfg().graph()
    }

    fn merge(&self, value1: &TaintEnvironment, value2: &TaintEnvironment) -> TaintEnvironment {
        value1.join(value2)
    }

    fn widen(
        &self,
        old_value: &TaintEnvironment,
        new_value: &TaintEnvironment,
    ) -> TaintEnvironment {
        let mut widened = old_value.clone();
        widened.widen_with(new_value);
        widened
    }

    fn update_edge(
        &self,
        value: &TaintEnvironment,
        edge: EdgeIndex,
    ) -> Option<TaintEnvironment> {
        let (start_node, _) = self.get_graph().edge_endpoints(edge)?;
        let mut environment = value.clone();
        for &instruction_id in &self.get_graph()[start_node].instructions {
            self.analyze_instruction(&mut environment, instruction_id, None);
        }
        Some(environment)
    }
}

/// Runs the forward taint analysis of the given method, collecting issues
/// and inferred generations into `model`.
pub fn run(method_context: &MethodContext, model: &mut Model) -> Result<(), Error> {
    let body = method_context
        .method()
        .body
        .as_ref()
        .ok_or_else(|| anyhow!("forward taint analysis on a method without a body"))?;
    let cfg = body.cfg();

    let forward_context = ForwardTaintContext {
        method_context,
        body,
    };
    let mut computation = fixpoint::Computation::new(forward_context, None);
    computation.set_node_value(cfg.entry(), TaintEnvironment::default());
    computation.compute_with_max_steps(
        method_context.context.heuristics.max_number_iterations as u64,
    )?;

    // Replay every reachable block once from its converged entry state.
    let forward_context = computation.get_context();
    for node in cfg.graph().node_indices() {
        let Some(environment) = computation.get_node_value(node) else {
            continue;
        };
        let mut environment = environment.clone();
        for &instruction_id in &cfg.block(node).instructions {
            forward_context.analyze_instruction(&mut environment, instruction_id, Some(model));
        }
    }
    Ok(())
}
