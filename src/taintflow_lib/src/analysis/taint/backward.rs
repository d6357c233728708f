//! The backward taint fixpoint of one method.
//!
//! The pass runs over the reversed control flow graph. Sentinel propagation
//! frames seeded at the method's exit mark the return value and the final
//! object graphs of the parameters; callee sinks enter the environment at
//! call sites. Whatever reaches a parameter load is recorded on the model:
//! sentinels become inferred propagations, everything else inferred sinks.

use petgraph::graph::{DiGraph, EdgeIndex};

use crate::abstract_domain::UpdateKind;
use crate::analysis::alias::results::InstructionAliasResults;
use crate::analysis::fixpoint;
use crate::analysis::taint::{MethodContext, TaintEnvironment};
use crate::intermediate_representation::{
    AccessPath, Block, Cfg, Instruction, InstructionId, MethodBody, ParameterPosition,
    PathElement, PositionId, Register, Root,
};
use crate::model::Model;
use crate::prelude::*;
use crate::taint::{
    CollapseDepth, FeatureId, FeatureMayAlwaysSet, PathTreeDomain, Taint, TaintConfig, TaintTree,
};

/// The fixpoint problem of the backward taint analysis of one method.
struct BackwardTaintContext<'a> {
    method_context: &'a MethodContext<'a>,
    body: &'a MethodBody,
    reversed_cfg: Cfg,
}

impl<'a> BackwardTaintContext<'a> {
    /// Applies the reverse abstract semantics of one instruction.
    ///
    /// During the fixpoint iterations no model is given; during the replay
    /// of the converged states, inferred sinks and propagations are
    /// collected into `model` at the parameter loads.
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
            Instruction::Return { src } => {
                let Some(src) = src else {
                    return;
                };
                let sentinel = Taint::from_config(TaintConfig::propagation(
                    method_context.context.kinds.local_return(),
                    AccessPath::from_root(Root::Return),
                    PathTreeDomain::leaf(CollapseDepth::no_collapse()),
                ));
                self.write_register(
                    environment,
                    alias_results,
                    *src,
                    TaintTree::from_taint(sentinel),
                );
            }
            Instruction::FieldPut { src, object, field } => {
                let field_name = method_context.context.fields.get(*field).name;
                let object_tree = self.read_register(environment, alias_results, *object);
                let mut result = object_tree.raw_read(&[PathElement::Field(field_name)]);
                let mut root_taint = object_tree.root().clone();
                if !root_taint.is_bottom() {
                    root_taint.append_to_propagation_output_paths(
                        PathElement::Field(field_name),
                        method_context.context.heuristics.propagation_max_path_size,
                    );
                    result.write(&[], root_taint, UpdateKind::Weak);
                }
                let field_model = method_context.registry.field_model(*field);
                if !field_model.sinks().is_bottom() {
                    let position = method_context.call_position(alias_results);
                    result.write(
                        &[],
                        field_model.sinks().attach_position(position),
                        UpdateKind::Weak,
                    );
                }
                if !result.is_bottom() {
                    self.write_register(environment, alias_results, *src, result);
                }
            }
            Instruction::StaticPut { src, field } => {
                let field_model = method_context.registry.field_model(*field);
                if field_model.sinks().is_bottom() {
                    return;
                }
                let position = method_context.call_position(alias_results);
                let sinks = TaintTree::from_taint(field_model.sinks().attach_position(position));
                self.write_register(environment, alias_results, *src, sinks);
            }
            Instruction::Invoke {
                arguments, dest, ..
            } => {
                let Some(target) = method_context.call_target(instruction_id) else {
                    return;
                };
                let position = method_context.call_position(alias_results);
                let callsite_model = method_context.model_at_callsite(target, position, false);
                self.apply_sinks(environment, &callsite_model, arguments, alias_results);
                self.apply_propagations(
                    environment,
                    &callsite_model,
                    arguments,
                    *dest,
                    alias_results,
                    position,
                );
            }
            Instruction::LoadParam { parameter, .. } => {
                let Some(model) = model else {
                    return;
                };
                self.infer_parameter_taint(environment, alias_results, *parameter, model);
            }
            Instruction::Const { .. }
            | Instruction::ConstString { .. }
            | Instruction::Move { .. }
            | Instruction::NewInstance { .. }
            | Instruction::FieldGet { .. }
            | Instruction::StaticGet { .. }
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

    fn write_register(
        &self,
        environment: &mut TaintEnvironment,
        alias_results: &InstructionAliasResults,
        register: Register,
        tree: TaintTree,
    ) {
        environment.write_register(
            &self.method_context.context.heuristics,
            &self.method_context.memory_factory,
            alias_results,
            register,
            tree,
            UpdateKind::Weak,
        );
    }

    /// Writes the sinks of the callee model into the call's arguments.
    fn apply_sinks(
        &self,
        environment: &mut TaintEnvironment,
        callsite_model: &Model,
        arguments: &[Register],
        alias_results: &InstructionAliasResults,
    ) {
        for (port, sinks) in callsite_model.sinks().elements() {
            let Root::Argument(parameter) = port.root() else {
                continue;
            };
            let Some(&register) = arguments.get(parameter as usize) else {
                continue;
            };
            let mut nested = TaintTree::bottom();
            nested.write(port.path(), sinks.clone(), UpdateKind::Weak);
            self.write_register(environment, alias_results, register, nested);
        }
    }

    /// Reverses the propagations of the callee model: backward taint on an
    /// output port flows into the input ports of the propagation kinds.
    fn apply_propagations(
        &self,
        environment: &mut TaintEnvironment,
        callsite_model: &Model,
        arguments: &[Register],
        dest: Option<Register>,
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
            for frame in taint.frames() {
                let Some(output_root) = method_context
                    .context
                    .kinds
                    .get(frame.kind())
                    .propagation_root()
                else {
                    continue;
                };
                let output_tree = match output_root {
                    Root::Return => match dest {
                        Some(register) => self.read_register(environment, alias_results, register),
                        None => continue,
                    },
                    Root::Argument(output_parameter) => {
                        match arguments.get(output_parameter as usize) {
                            Some(&register) => {
                                self.read_register(environment, alias_results, register)
                            }
                            None => continue,
                        }
                    }
                    Root::CallEffect => continue,
                };
                for (output_path, collapse_depth) in frame.output_paths().elements() {
                    let mut back = output_tree.read(&output_path);
                    if back.is_bottom() {
                        continue;
                    }
                    if collapse_depth.should_collapse() {
                        if let Some(depth) = collapse_depth.depth() {
                            back.collapse_deeper_than(
                                depth as usize,
                                &FeatureMayAlwaysSet::make_always([
                                    FeatureId::PROPAGATION_BROADENING,
                                ]),
                            );
                        }
                    }
                    back.add_locally_inferred_features_and_local_position(
                        &frame.features(),
                        Some(position),
                        heuristics.max_number_local_positions,
                    );
                    let mut nested = TaintTree::bottom();
                    nested.write_tree(input_port.path(), back, UpdateKind::Weak);
                    self.write_register(environment, alias_results, input_register, nested);
                }
            }
        }
    }

    /// Records the backward taint reaching a parameter on the model:
    /// propagation frames become inferred propagations out of the parameter,
    /// the remaining frames inferred sinks on it.
    fn infer_parameter_taint(
        &self,
        environment: &TaintEnvironment,
        alias_results: &InstructionAliasResults,
        parameter: ParameterPosition,
        model: &mut Model,
    ) {
        let method_context = self.method_context;
        let location = match method_context.memory_factory.make_parameter(parameter) {
            Ok(location) => location,
            Err(error) => {
                log::error!("{error}");
                return;
            }
        };
        let tree = environment.deep_read(
            &method_context.context.heuristics,
            &method_context.memory_factory,
            alias_results.resolved_aliases(),
            location,
        );
        let own_sentinel = method_context.context.kinds.local_argument(parameter);
        for (path, taint) in tree.elements() {
            let port = AccessPath::new(Root::Argument(parameter), path.clone());
            let kinds = &method_context.context.kinds;
            let (propagations, sinks) =
                taint.partition_by_kind(|kind| kinds.get(kind).is_propagation());

            let mut propagations = propagations;
            // The untouched sentinel of this parameter is the identity.
            propagations.retain_frames(|frame| {
                if frame.kind() != own_sentinel || !path.is_empty() {
                    return true;
                }
                let output_paths = frame.output_paths().elements();
                !(output_paths.len() == 1 && output_paths[0].0.is_empty())
            });
            if !propagations.is_bottom() {
                let mut rebuilt = Taint::bottom();
                for frame in propagations.frames() {
                    rebuilt.add(frame.with_callee_port(port.clone()));
                }
                model.add_inferred_propagation(method_context.context, port.clone(), rebuilt);
            }
            if !sinks.is_bottom() {
                model.add_inferred_sinks(method_context.context, port, sinks);
            }
        }
    }

    /// The environment at the method's exit: sentinels marking the final
    /// object graph of every parameter.
    fn exit_environment(&self) -> Result<TaintEnvironment, Error> {
        let method_context = self.method_context;
        let mut environment = TaintEnvironment::default();
        for parameter in 0..method_context.method().number_of_parameters() {
            let location = method_context.memory_factory.make_parameter(parameter)?;
            let sentinel = Taint::from_config(TaintConfig::propagation(
                method_context.context.kinds.local_argument(parameter),
                AccessPath::from_root(Root::Argument(parameter)),
                PathTreeDomain::leaf(CollapseDepth::no_collapse()),
            ));
            environment.write_unaliased(location, TaintTree::from_taint(sentinel));
        }
        Ok(environment)
    }
}

impl<'a> fixpoint::Context for BackwardTaintContext<'a> {
    type EdgeLabel = ();
    type NodeLabel = Block;
    type NodeValue = TaintEnvironment;

    fn get_graph(&self) -> &DiGraph<Block, ()> {
        self.reversed_cfg.graph()
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
        for &instruction_id in self.get_graph()[start_node].instructions.iter().rev() {
            self.analyze_instruction(&mut environment, instruction_id, None);
        }
        Some(environment)
    }
}

/// Runs the backward taint analysis of the given method, collecting inferred
/// sinks and propagations into `model`.
pub fn run(method_context: &MethodContext, model: &mut Model) -> Result<(), Error> {
    let body = method_context
        .method()
        .body
        .as_ref()
        .ok_or_else(|| anyhow!("backward taint analysis on a method without a body"))?;

    let backward_context = BackwardTaintContext {
        method_context,
        body,
        reversed_cfg: body.cfg().reversed(),
    };
    let entry = backward_context.reversed_cfg.entry();
    let exit_environment = backward_context.exit_environment()?;

    let mut computation = fixpoint::Computation::new(backward_context, None);
    computation.set_node_value(entry, exit_environment);
    computation.compute_with_max_steps(
        method_context.context.heuristics.max_number_iterations as u64,
    )?;

    // Replay every reachable block once from its converged entry state.
    let backward_context = computation.get_context();
    for node in backward_context.reversed_cfg.graph().node_indices() {
        let Some(environment) = computation.get_node_value(node) else {
            continue;
        };
        let mut environment = environment.clone();
        for &instruction_id in backward_context
            .reversed_cfg
            .block(node)
            .instructions
            .iter()
            .rev()
        {
            backward_context.analyze_instruction(&mut environment, instruction_id, Some(model));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::call_graph::{CallGraph, Overrides};
    use crate::config::{Heuristics, Options};
    use crate::context::Context;
    use crate::intermediate_representation::{Field, Method, MethodId, Position};
    use crate::model::{Registry, Rules};
    use crate::taint::Frame;

    struct Setup {
        context: Context,
        rules: Rules,
        registry: Registry,
        unknown_position: PositionId,
    }

    fn setup(context: Context) -> Setup {
        let mut context = context;
        let unknown_position = context.positions.intern(Position::unknown());
        let overrides = Overrides::new(&context);
        let registry =
            Registry::with_default_models(&context, |method| overrides.get(method).len());
        Setup {
            context,
            rules: Rules::new(),
            registry,
            unknown_position,
        }
    }

    fn run_backward(setup: &Setup, method: MethodId) -> Model {
        let overrides = Overrides::new(&setup.context);
        let call_graph = CallGraph::new(&setup.context, &overrides);
        let method_context = MethodContext::new(
            &setup.context,
            &setup.rules,
            &call_graph,
            &setup.registry,
            method,
            setup.unknown_position,
        )
        .unwrap();
        let mut model = setup.registry.get(method).clone();
        run(&method_context, &mut model).unwrap();
        model
    }

    #[test]
    fn identity_methods_infer_a_return_propagation() {
        let mut context = Context::new(Options::default(), Heuristics::default());
        let class = context.type_named("LData;");
        let name = context.strings.intern("identity");
        let method = context.methods.add(Method::new(
            class,
            name,
            vec![class],
            Some(class),
            true,
            Some(MethodBody::linear(vec![
                Instruction::LoadParam {
                    parameter: 0,
                    dest: Register(0),
                },
                Instruction::Return {
                    src: Some(Register(0)),
                },
            ])),
        ));
        let setup = setup(context);

        let model = run_backward(&setup, method);

        let propagations = model
            .propagations()
            .read(&AccessPath::from_root(Root::Argument(0)));
        assert!(!propagations.is_bottom());
        let frame = propagations.root().frames().next().unwrap();
        assert_eq!(frame.kind(), setup.context.kinds.local_return());
        assert!(frame.call_kind().is_propagation());
    }

    #[test]
    fn callee_sinks_become_caller_sinks() {
        let mut context = Context::new(Options::default(), Heuristics::default());
        let class = context.type_named("LData;");
        let sink_name = context.strings.intern("sink");
        let sink_method = context.methods.add(Method::new(
            class,
            sink_name,
            vec![class],
            None,
            true,
            Some(MethodBody::linear(vec![Instruction::Return { src: None }])),
        ));
        let caller_name = context.strings.intern("caller");
        let caller = context.methods.add(Method::new(
            class,
            caller_name,
            vec![class],
            None,
            true,
            Some(MethodBody::linear(vec![
                Instruction::LoadParam {
                    parameter: 0,
                    dest: Register(0),
                },
                Instruction::Invoke {
                    arguments: vec![Register(0)],
                    method: sink_method,
                    is_virtual: false,
                    dest: None,
                },
                Instruction::Return { src: None },
            ])),
        ));
        let mut setup = setup(context);

        let sink_kind = setup.context.kinds.named("CodeExecution");
        let mut sink_model = setup.registry.get(sink_method).clone();
        sink_model.add_sink(
            &setup.context,
            AccessPath::from_root(Root::Argument(0)),
            Frame::from_config(TaintConfig::new(
                sink_kind,
                AccessPath::from_root(Root::Argument(0)),
            )),
        );
        setup.registry.set(sink_method, sink_model);

        let model = run_backward(&setup, caller);

        let sinks = model
            .sinks()
            .read(&AccessPath::from_root(Root::Argument(0)));
        assert!(!sinks.is_bottom());
        let frame = sinks.root().frames().next().unwrap();
        assert_eq!(frame.kind(), sink_kind);
        assert_eq!(frame.callee(), Some(sink_method));
        assert_eq!(frame.distance(), 1);
    }

    #[test]
    fn field_stores_extend_propagation_output_paths() {
        let mut context = Context::new(Options::default(), Heuristics::default());
        let box_class = context.type_named("LBox;");
        let data_class = context.type_named("LData;");
        let field_name = context.strings.intern("content");
        let field = context.fields.intern(Field::new(box_class, field_name));
        let name = context.strings.intern("set");
        let method = context.methods.add(Method::new(
            box_class,
            name,
            vec![box_class, data_class],
            None,
            true,
            Some(MethodBody::linear(vec![
                Instruction::LoadParam {
                    parameter: 0,
                    dest: Register(0),
                },
                Instruction::LoadParam {
                    parameter: 1,
                    dest: Register(1),
                },
                Instruction::FieldPut {
                    src: Register(1),
                    object: Register(0),
                    field,
                },
                Instruction::Return { src: None },
            ])),
        ));
        let setup = setup(context);

        let model = run_backward(&setup, method);

        // The value parameter flows into the `content` field of the first
        // parameter's object graph.
        let propagations = model
            .propagations()
            .read(&AccessPath::from_root(Root::Argument(1)));
        assert!(!propagations.is_bottom());
        let frame = propagations.root().frames().next().unwrap();
        assert_eq!(frame.kind(), setup.context.kinds.local_argument(0));
        let output_paths = frame.output_paths().elements();
        assert_eq!(output_paths.len(), 1);
        assert_eq!(output_paths[0].0, vec![PathElement::Field(field_name)]);
    }
}
