//! Per-instruction snapshots of the alias analysis.
//!
//! The taint analyses never look at the alias fixpoint itself. For every
//! instruction they may visit, the alias analysis stores the register state
//! before the instruction together with the resolved aliasing structure of
//! all memory locations the instruction touches.

use std::collections::BTreeMap;

use fnv::FnvHashMap;

use crate::analysis::alias::points_to::{PointsToSet, PointsToTree};
use crate::analysis::alias::widening_resolver::WideningPointsToResolver;
use crate::analysis::memory_location::{
    MemoryFactory, MemoryLocationId, MemoryLocationsDomain, RegisterMemoryLocationsMap,
};
use crate::intermediate_representation::{Instruction, InstructionId, Method, PositionId, Register};
use crate::prelude::*;

/// Maps the root memory locations used by one instruction to their resolved
/// points-to trees.
#[derive(Debug, Clone, Default)]
pub struct ResolvedAliasesMap {
    map: BTreeMap<MemoryLocationId, PointsToTree>,
}

impl ResolvedAliasesMap {
    /// Resolves the roots of all memory locations held by the source
    /// registers of the given instruction.
    ///
    /// For a return inside an instance method, the receiver is resolved as
    /// well, since return instructions infer taint on the `this` parameter.
    pub fn from_environments(
        method: &Method,
        factory: &mut MemoryFactory,
        register_memory_locations: &RegisterMemoryLocationsMap,
        widening_resolver: &WideningPointsToResolver,
        instruction: &Instruction,
    ) -> Result<Self, Error> {
        let mut map = BTreeMap::new();

        for register in instruction.sources() {
            let Some(locations) = register_memory_locations.get(&register) else {
                continue;
            };
            for location in locations.iter() {
                let root = factory.root(*location);
                map.entry(root)
                    .or_insert_with(|| widening_resolver.resolved_aliases(root));
            }
        }

        if !method.is_static && matches!(instruction, Instruction::Return { .. }) {
            let receiver = factory.make_parameter(0)?;
            map.entry(receiver)
                .or_insert_with(|| widening_resolver.resolved_aliases(receiver));
        }

        Ok(ResolvedAliasesMap { map })
    }

    /// Returns the resolved points-to tree for the given root location.
    ///
    /// A location without stored aliasing information resolves to itself.
    pub fn get(&self, root: MemoryLocationId) -> PointsToTree {
        match self.map.get(&root) {
            Some(tree) => tree.clone(),
            None => {
                log::debug!("No resolved aliases for root memory location {root}");
                PointsToTree::leaf(PointsToSet::singleton(root))
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MemoryLocationId, &PointsToTree)> {
        self.map.iter()
    }
}

/// Alias information about a specific instruction.
#[derive(Debug, Clone)]
pub struct InstructionAliasResults {
    /// Maps registers to their memory locations *before* the instruction.
    register_memory_locations_map: RegisterMemoryLocationsMap,
    /// The resolved points-to trees of the roots used by the instruction.
    resolved_aliases: ResolvedAliasesMap,
    /// The memory locations of the destination register, if any.
    result_memory_locations: Option<MemoryLocationsDomain>,
    /// The last source position seen before the instruction.
    position: Option<PositionId>,
}

impl InstructionAliasResults {
    pub fn new(
        register_memory_locations_map: RegisterMemoryLocationsMap,
        resolved_aliases: ResolvedAliasesMap,
        result_memory_locations: Option<MemoryLocationsDomain>,
        position: Option<PositionId>,
    ) -> Self {
        InstructionAliasResults {
            register_memory_locations_map,
            resolved_aliases,
            result_memory_locations,
            position,
        }
    }

    pub fn register_memory_locations_map(&self) -> &RegisterMemoryLocationsMap {
        &self.register_memory_locations_map
    }

    /// Returns the memory locations of the given register before the
    /// instruction. Unassigned registers hold an unknown value.
    pub fn register_memory_locations(&self, register: Register) -> MemoryLocationsDomain {
        self.register_memory_locations_map
            .get(&register)
            .cloned()
            .unwrap_or_else(MemoryLocationsDomain::top)
    }

    pub fn resolved_aliases(&self) -> &ResolvedAliasesMap {
        &self.resolved_aliases
    }

    pub fn result_memory_locations(&self) -> Option<&MemoryLocationsDomain> {
        self.result_memory_locations.as_ref()
    }

    /// Returns the memory location of the destination register,
    /// if the instruction has one and it is unambiguous.
    pub fn result_memory_location(&self) -> Option<MemoryLocationId> {
        let locations = self.result_memory_locations.as_ref()?;
        match locations.len() {
            Some(1) => locations.iter().next().copied(),
            _ => None,
        }
    }

    pub fn position(&self) -> Option<PositionId> {
        self.position
    }
}

/// The result of the forward alias analysis of one method.
/// This is passed to the forward and backward taint analysis.
#[derive(Debug, Default)]
pub struct AliasAnalysisResults {
    instructions: FnvHashMap<InstructionId, InstructionAliasResults>,
}

impl AliasAnalysisResults {
    /// Returns the alias information for the given instruction.
    ///
    /// The alias analysis only stores results for instructions the taint
    /// analyses interpret; asking for any other instruction is a bug.
    pub fn get(&self, instruction: InstructionId) -> Result<&InstructionAliasResults, Error> {
        self.instructions
            .get(&instruction)
            .ok_or_else(|| anyhow!("no alias information for instruction {instruction}"))
    }

    pub fn store(&mut self, instruction: InstructionId, results: InstructionAliasResults) {
        self.instructions.insert(instruction, results);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstract_domain::UpdateKind;
    use crate::analysis::alias::points_to::PointsToEnvironment;
    use crate::intermediate_representation::{PathElement, StringId, TypeId};

    fn instance_method() -> Method {
        Method::new(
            TypeId(0),
            StringId(0),
            vec![TypeId(0), TypeId(1)],
            None,
            false,
            None,
        )
    }

    #[test]
    fn snapshots_cover_the_source_registers() {
        let method = instance_method();
        let mut factory = MemoryFactory::new(&method);
        let parameter = factory.make_parameter(1).unwrap();
        let object = factory.make_location(InstructionId(0));

        let mut environment = PointsToEnvironment::default();
        environment.write(
            &factory,
            parameter,
            StringId(10),
            PointsToSet::singleton(object),
            UpdateKind::Strong,
        );
        let resolver = WideningPointsToResolver::new(&environment);

        let registers: RegisterMemoryLocationsMap =
            [(Register(0), MemoryLocationsDomain::singleton(parameter))]
                .into_iter()
                .collect();
        let instruction = Instruction::Move {
            src: Register(0),
            dest: Register(1),
        };

        let map = ResolvedAliasesMap::from_environments(
            &method,
            &mut factory,
            &registers,
            &resolver,
            &instruction,
        )
        .unwrap();

        let resolved = map.get(parameter);
        let path = [PathElement::Field(StringId(10))];
        let (remaining, subtree) = resolved.raw_read_max_path(&path);
        assert!(remaining.is_empty());
        assert_eq!(subtree.root(), &PointsToSet::singleton(object));

        // Roots without stored aliases resolve to themselves.
        assert_eq!(
            map.get(object),
            PointsToTree::leaf(PointsToSet::singleton(object))
        );
    }

    #[test]
    fn returns_resolve_the_receiver_of_instance_methods() {
        let method = instance_method();
        let mut factory = MemoryFactory::new(&method);
        let receiver = factory.make_parameter(0).unwrap();

        let environment = PointsToEnvironment::default();
        let resolver = WideningPointsToResolver::new(&environment);
        let registers = RegisterMemoryLocationsMap::default();

        let map = ResolvedAliasesMap::from_environments(
            &method,
            &mut factory,
            &registers,
            &resolver,
            &Instruction::Return { src: None },
        )
        .unwrap();

        assert!(map.iter().any(|(root, _)| *root == receiver));
    }

    #[test]
    fn missing_instructions_are_an_error() {
        let mut results = AliasAnalysisResults::default();
        assert!(results.get(InstructionId(0)).is_err());

        results.store(
            InstructionId(0),
            InstructionAliasResults::new(
                RegisterMemoryLocationsMap::default(),
                ResolvedAliasesMap::default(),
                None,
                None,
            ),
        );
        assert!(results.get(InstructionId(0)).is_ok());
        assert!(results.get(InstructionId(1)).is_err());
    }
}
