//! The forward alias fixpoint of one method.
//!
//! The analysis computes, for every program point, which memory locations
//! each register may hold and which locations the fields of those locations
//! may point to. After the fixpoint stabilizes, the converged block entry
//! states are replayed once to take an [`InstructionAliasResults`] snapshot
//! per instruction, which is what the taint analyses consume.

use std::cell::RefCell;

use petgraph::graph::{DiGraph, EdgeIndex};

use crate::abstract_domain::{ConstantDomain, UpdateKind};
use crate::analysis::alias::points_to::PointsToEnvironment;
use crate::analysis::alias::results::{
    AliasAnalysisResults, InstructionAliasResults, ResolvedAliasesMap,
};
use crate::analysis::alias::widening_resolver::WideningPointsToResolver;
use crate::analysis::fixpoint;
use crate::analysis::memory_location::{
    MemoryFactory, MemoryLocationsDomain, RegisterMemoryLocationsMap,
};
use crate::context::Context;
use crate::intermediate_representation::{
    Block, Instruction, InstructionId, Method, MethodBody, ParameterPosition, PositionId, Register,
};
use crate::prelude::*;

/// The abstract state of the alias analysis at one program point.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ForwardAliasEnvironment {
    /// Maps registers to the memory locations they may hold.
    memory_locations: RegisterMemoryLocationsMap,
    /// The points-to trees of the root locations written so far.
    points_to: PointsToEnvironment,
    /// The last source position passed on the way to this point.
    position: ConstantDomain<PositionId>,
    /// The position of the next parameter load.
    last_parameter_load: ConstantDomain<ParameterPosition>,
}

impl ForwardAliasEnvironment {
    /// The state at the entry of a method, before any parameter load.
    pub fn initial() -> Self {
        ForwardAliasEnvironment {
            memory_locations: RegisterMemoryLocationsMap::bottom(),
            points_to: PointsToEnvironment::default(),
            position: ConstantDomain::Top,
            last_parameter_load: ConstantDomain::Value(0),
        }
    }

    /// Binds the given register to the given locations.
    pub fn assign(&mut self, register: Register, locations: MemoryLocationsDomain) {
        debug_assert!(!locations.is_top());
        self.memory_locations.insert(register, locations);
    }

    /// Returns the memory locations the given register may hold.
    ///
    /// Registers about which nothing is known yield the empty set: the
    /// analysis does not track the objects behind them.
    pub fn memory_locations(&self, register: Register) -> MemoryLocationsDomain {
        match self.memory_locations.get(&register) {
            Some(locations) if !locations.is_top() => locations.clone(),
            _ => MemoryLocationsDomain::empty(),
        }
    }

    pub fn points_to(&self) -> &PointsToEnvironment {
        &self.points_to
    }

    pub fn last_position(&self) -> Option<PositionId> {
        self.position.value().copied()
    }

    pub fn set_last_position(&mut self, position: PositionId) {
        self.position = ConstantDomain::Value(position);
    }

    /// Returns the position of the next parameter load, if it is known.
    pub fn last_parameter_loaded(&self) -> Option<ParameterPosition> {
        self.last_parameter_load.value().copied()
    }

    pub fn increment_last_parameter_loaded(&mut self) {
        if let Some(position) = self.last_parameter_loaded() {
            self.last_parameter_load = ConstantDomain::Value(position + 1);
        }
    }
}

impl AbstractDomain for ForwardAliasEnvironment {
    fn bottom() -> Self {
        ForwardAliasEnvironment {
            memory_locations: RegisterMemoryLocationsMap::bottom(),
            points_to: PointsToEnvironment::bottom(),
            position: ConstantDomain::Bottom,
            last_parameter_load: ConstantDomain::Bottom,
        }
    }

    fn is_bottom(&self) -> bool {
        self.memory_locations.is_bottom()
            && self.points_to.is_bottom()
            && self.position.is_bottom()
            && self.last_parameter_load.is_bottom()
    }

    fn leq(&self, other: &Self) -> bool {
        self.memory_locations.leq(&other.memory_locations)
            && self.points_to.leq(&other.points_to)
            && self.position.leq(&other.position)
            && self.last_parameter_load.leq(&other.last_parameter_load)
    }

    fn join_with(&mut self, other: &Self) {
        self.memory_locations.join_with(&other.memory_locations);
        self.points_to.join_with(&other.points_to);
        self.position.join_with(&other.position);
        self.last_parameter_load.join_with(&other.last_parameter_load);
    }

    fn widen_with(&mut self, other: &Self) {
        self.memory_locations.widen_with(&other.memory_locations);
        self.points_to.widen_with(&other.points_to);
        self.position.widen_with(&other.position);
        self.last_parameter_load
            .widen_with(&other.last_parameter_load);
    }

    fn meet_with(&mut self, other: &Self) {
        self.memory_locations.meet_with(&other.memory_locations);
        self.points_to.meet_with(&other.points_to);
        self.position.meet_with(&other.position);
        self.last_parameter_load.meet_with(&other.last_parameter_load);
    }
}

/// The fixpoint problem of the alias analysis of one method.
struct AliasContext<'a> {
    context: &'a Context,
    body: &'a MethodBody,
    memory_factory: RefCell<&'a mut MemoryFactory>,
}

impl<'a> AliasContext<'a> {
    /// Applies the abstract semantics of one instruction to the environment.
    fn analyze_instruction(
        &self,
        environment: &mut ForwardAliasEnvironment,
        instruction_id: InstructionId,
    ) {
        match self.body.instruction(instruction_id) {
            Instruction::LoadParam { parameter, dest } => {
                let Some(position) = environment.last_parameter_loaded() else {
                    log::error!("Failed to deduce the position of a parameter load");
                    return;
                };
                debug_assert_eq!(position, *parameter);
                environment.increment_last_parameter_loaded();
                match self.memory_factory.borrow().make_parameter(position) {
                    Ok(location) => {
                        environment.assign(*dest, MemoryLocationsDomain::singleton(location))
                    }
                    Err(error) => log::error!("{error}"),
                }
            }
            Instruction::Const { dest }
            | Instruction::ConstString { dest, .. }
            | Instruction::NewInstance { dest, .. }
            | Instruction::StaticGet { dest, .. } => {
                let location = self.memory_factory.borrow_mut().make_location(instruction_id);
                environment.assign(*dest, MemoryLocationsDomain::singleton(location));
            }
            Instruction::Move { src, dest } => {
                let locations = environment.memory_locations(*src);
                environment.assign(*dest, locations);
            }
            Instruction::FieldGet {
                object,
                field,
                dest,
            } => {
                let field_name = self.context.fields.get(*field).name;
                let mut factory = self.memory_factory.borrow_mut();
                let mut field_locations = MemoryLocationsDomain::empty();
                for location in environment.memory_locations(*object).iter() {
                    field_locations.insert(factory.make_field(*location, field_name));
                }
                environment.assign(*dest, field_locations);
            }
            Instruction::FieldPut { src, object, field } => {
                let field_name = self.context.fields.get(*field).name;
                let value_locations = environment.memory_locations(*src);
                let target_locations = environment.memory_locations(*object);
                let mut factory = self.memory_factory.borrow_mut();
                let points_tos = environment
                    .points_to
                    .points_to_all(&mut **factory, &value_locations);
                // An update through a register holding several locations
                // overwrites only one of them at runtime.
                let kind = if target_locations.len() == Some(1) {
                    UpdateKind::Strong
                } else {
                    UpdateKind::Weak
                };
                for target in target_locations.iter() {
                    environment.points_to.write(
                        &**factory,
                        *target,
                        field_name,
                        points_tos.clone(),
                        kind,
                    );
                }
            }
            Instruction::StaticPut { .. } => (),
            Instruction::Invoke { dest, .. } | Instruction::Opaque { dest, .. } => {
                // The call result is a fresh object; flows through the callee
                // are handled by the taint analyses.
                if let Some(dest) = dest {
                    let location = self.memory_factory.borrow_mut().make_location(instruction_id);
                    environment.assign(*dest, MemoryLocationsDomain::singleton(location));
                }
            }
            Instruction::Return { .. } => (),
            Instruction::DebugPosition { position } => environment.set_last_position(*position),
        }
    }
}

impl<'a> fixpoint::Context for AliasContext<'a> {
    type EdgeLabel = ();
    type NodeLabel = Block;
    type NodeValue = ForwardAliasEnvironment;

    fn get_graph(&self) -> &DiGraph<Block, ()> {
        self.body.cfg().graph()
    }

    fn merge(
        &self,
        value1: &ForwardAliasEnvironment,
        value2: &ForwardAliasEnvironment,
    ) -> ForwardAliasEnvironment {
        value1.join(value2)
    }

    fn widen(
        &self,
        old_value: &ForwardAliasEnvironment,
        new_value: &ForwardAliasEnvironment,
    ) -> ForwardAliasEnvironment {
        let mut widened = old_value.clone();
        widened.widen_with(new_value);
        widened
    }

    fn update_edge(
        &self,
        value: &ForwardAliasEnvironment,
        edge: EdgeIndex,
    ) -> Option<ForwardAliasEnvironment> {
        let (start_node, _) = self.get_graph().edge_endpoints(edge)?;
        let mut environment = value.clone();
        for &instruction_id in &self.get_graph()[start_node].instructions {
            self.analyze_instruction(&mut environment, instruction_id);
        }
        Some(environment)
    }
}

/// Runs the alias analysis of the given method.
///
/// All memory locations are created by the given factory, so the returned
/// snapshots remain meaningful relative to it.
pub fn run(
    context: &Context,
    method: &Method,
    memory_factory: &mut MemoryFactory,
) -> Result<AliasAnalysisResults, Error> {
    let body = method
        .body
        .as_ref()
        .ok_or_else(|| anyhow!("alias analysis on a method without a body"))?;
    let cfg = body.cfg();

    let alias_context = AliasContext {
        context,
        body,
        memory_factory: RefCell::new(memory_factory),
    };
    let mut computation = fixpoint::Computation::new(alias_context, None);
    computation.set_node_value(cfg.entry(), ForwardAliasEnvironment::initial());
    computation.compute_with_max_steps(context.heuristics.max_number_iterations as u64)?;

    // Replay every reachable block once from its converged entry state and
    // store a snapshot per instruction.
    let mut results = AliasAnalysisResults::default();
    let alias_context = computation.get_context();
    for node in cfg.graph().node_indices() {
        let Some(environment) = computation.get_node_value(node) else {
            continue;
        };
        let mut environment = environment.clone();
        let mut resolver = WideningPointsToResolver::new(environment.points_to());
        for &instruction_id in &cfg.block(node).instructions {
            let instruction = body.instruction(instruction_id);
            let register_memory_locations_map: RegisterMemoryLocationsMap = instruction
                .sources()
                .into_iter()
                .map(|register| (register, environment.memory_locations(register)))
                .collect();

            alias_context.analyze_instruction(&mut environment, instruction_id);

            if matches!(instruction, Instruction::FieldPut { .. }) {
                resolver = WideningPointsToResolver::new(environment.points_to());
            }

            let resolved_aliases = {
                let mut factory = alias_context.memory_factory.borrow_mut();
                ResolvedAliasesMap::from_environments(
                    method,
                    &mut **factory,
                    &register_memory_locations_map,
                    &resolver,
                    instruction,
                )?
            };
            let result_memory_locations = instruction
                .dest()
                .map(|register| environment.memory_locations(register));

            results.store(
                instruction_id,
                InstructionAliasResults::new(
                    register_memory_locations_map,
                    resolved_aliases,
                    result_memory_locations,
                    environment.last_position(),
                ),
            );
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Heuristics, Options};
    use crate::intermediate_representation::{
        AccessPath, Field, MethodBody, Path, PathElement, Root, StringId, TypeId,
    };

    fn test_context() -> Context {
        Context::new(Options::default(), Heuristics::default())
    }

    #[test]
    fn parameters_and_fields_get_locations() {
        let mut context = test_context();
        let field_name = context.strings.intern("payload");
        let field = context.fields.intern(Field::new(TypeId(0), field_name));
        let method = Method::new(
            TypeId(0),
            StringId(0),
            vec![TypeId(0)],
            Some(TypeId(1)),
            true,
            Some(MethodBody::linear(vec![
                Instruction::LoadParam {
                    parameter: 0,
                    dest: Register(0),
                },
                Instruction::FieldGet {
                    object: Register(0),
                    field,
                    dest: Register(1),
                },
                Instruction::Return {
                    src: Some(Register(1)),
                },
            ])),
        );
        let mut factory = MemoryFactory::new(&method);

        let results = run(&context, &method, &mut factory).unwrap();

        let parameter = factory.make_parameter(0).unwrap();
        let field_location = factory.make_field(parameter, field_name);
        let get = results.get(InstructionId(1)).unwrap();
        assert_eq!(
            get.register_memory_locations(Register(0)),
            MemoryLocationsDomain::singleton(parameter)
        );
        assert_eq!(
            get.result_memory_locations(),
            Some(&MemoryLocationsDomain::singleton(field_location))
        );

        let return_results = results.get(InstructionId(2)).unwrap();
        assert_eq!(
            return_results.register_memory_locations(Register(1)),
            MemoryLocationsDomain::singleton(field_location)
        );
        assert_eq!(
            factory.access_path(field_location),
            Some(AccessPath::new(
                Root::Argument(0),
                Path::new(vec![PathElement::Field(field_name)])
            ))
        );
    }

    #[test]
    fn branches_join_register_locations() {
        let context = test_context();
        let method = Method::new(
            TypeId(0),
            StringId(0),
            vec![],
            None,
            true,
            Some(MethodBody::new(
                vec![
                    vec![Instruction::Const { dest: Register(0) }],
                    vec![Instruction::NewInstance {
                        class: TypeId(1),
                        dest: Register(0),
                    }],
                    vec![Instruction::NewInstance {
                        class: TypeId(2),
                        dest: Register(0),
                    }],
                    vec![Instruction::Opaque {
                        arguments: vec![Register(0)],
                        dest: None,
                    }],
                ],
                &[(0, 1), (0, 2), (1, 3), (2, 3)],
            )),
        );
        let mut factory = MemoryFactory::new(&method);

        let results = run(&context, &method, &mut factory).unwrap();

        let opaque = results.get(InstructionId(3)).unwrap();
        let locations = opaque.register_memory_locations(Register(0));
        assert_eq!(locations.len(), Some(2));
        assert!(locations.contains(&factory.make_location(InstructionId(1))));
        assert!(locations.contains(&factory.make_location(InstructionId(2))));
    }

    #[test]
    fn field_puts_are_visible_through_resolved_aliases() {
        let mut context = test_context();
        let field_name = context.strings.intern("next");
        let field = context.fields.intern(Field::new(TypeId(0), field_name));
        let method = Method::new(
            TypeId(0),
            StringId(0),
            vec![TypeId(0), TypeId(0)],
            None,
            false,
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
        );
        let mut factory = MemoryFactory::new(&method);

        let results = run(&context, &method, &mut factory).unwrap();

        // Returns of instance methods resolve the aliases of the receiver.
        let receiver = factory.make_parameter(0).unwrap();
        let argument = factory.make_parameter(1).unwrap();
        let return_results = results.get(InstructionId(3)).unwrap();
        let resolved = return_results.resolved_aliases().get(receiver);
        let path = [PathElement::Field(field_name)];
        let (remaining, subtree) = resolved.raw_read_max_path(&path);
        assert!(remaining.is_empty());
        assert!(subtree.root().contains(argument));
    }

    #[test]
    fn positions_are_tracked() {
        let context = test_context();
        let method = Method::new(
            TypeId(0),
            StringId(0),
            vec![],
            None,
            true,
            Some(MethodBody::linear(vec![
                Instruction::Const { dest: Register(0) },
                Instruction::DebugPosition {
                    position: PositionId(7),
                },
                Instruction::Return {
                    src: Some(Register(0)),
                },
            ])),
        );
        let mut factory = MemoryFactory::new(&method);

        let results = run(&context, &method, &mut factory).unwrap();

        assert_eq!(results.get(InstructionId(0)).unwrap().position(), None);
        assert_eq!(
            results.get(InstructionId(2)).unwrap().position(),
            Some(PositionId(7))
        );
    }

    #[test]
    fn cyclic_field_writes_converge_to_a_widened_component() {
        let mut context = test_context();
        let field_name = context.strings.intern("next");
        let field = context.fields.intern(Field::new(TypeId(0), field_name));
        // A loop assigning `this.next = this` on every iteration.
        let method = Method::new(
            TypeId(0),
            StringId(0),
            vec![TypeId(0)],
            None,
            false,
            Some(MethodBody::new(
                vec![
                    vec![Instruction::LoadParam {
                        parameter: 0,
                        dest: Register(0),
                    }],
                    vec![Instruction::FieldPut {
                        src: Register(0),
                        object: Register(0),
                        field,
                    }],
                    vec![Instruction::Return { src: None }],
                ],
                &[(0, 1), (1, 1), (1, 2)],
            )),
        );
        let mut factory = MemoryFactory::new(&method);

        let results = run(&context, &method, &mut factory).unwrap();

        let receiver = factory.make_parameter(0).unwrap();
        let return_results = results.get(InstructionId(2)).unwrap();
        let resolved = return_results.resolved_aliases().get(receiver);
        // The self-referential write collapses into a single widened node.
        assert!(resolved.successors().is_empty());
        let (target, properties) = resolved.root().iter().next().unwrap();
        assert_eq!(target, receiver);
        assert!(properties.collapse_depth().is_zero());
    }
}
