//! Symbolic memory locations.
//!
//! The alias analysis tracks which heap objects a register may hold by
//! mapping registers to sets of memory locations. A memory location is
//! either a root location, standing for the object passed in through a
//! parameter or created at a given instruction, or a field location,
//! standing for the object reached from another location through a field.
//!
//! Memory locations are handed out by a per-method [`MemoryFactory`] that
//! guarantees a unique location per parameter, instruction and field chain.
//! Field chains that revisit a field name are folded back onto the earlier
//! occurrence, so cyclic data structures produce finitely many locations.

use std::fmt;

use fnv::FnvHashMap;

use crate::abstract_domain::{DomainMap, MergeTopStrategy, SetDomain};
use crate::intermediate_representation::{
    AccessPath, InstructionId, Method, ParameterPosition, Path, PathElement, Register, Root,
    StringId,
};
use crate::prelude::*;

/// Handle of a memory location created by a [`MemoryFactory`].
///
/// Handles are only meaningful relative to the factory that created them;
/// two handles from the same factory are equal if and only if the locations
/// are the same.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct MemoryLocationId(pub u32);

impl fmt::Display for MemoryLocationId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "loc#{}", self.0)
    }
}

/// A symbolic memory location.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum MemoryLocation {
    /// The object held by the given parameter on entry.
    Parameter { position: ParameterPosition },
    /// The object produced by the given instruction,
    /// e.g. an allocation or the unknown result of a call.
    Instruction { instruction: InstructionId },
    /// The object reached from `parent` through the field with the given
    /// name. `root` and `path` are precomputed on creation.
    Field {
        parent: MemoryLocationId,
        field: StringId,
        root: MemoryLocationId,
        path: Path,
    },
}

/// A set of memory locations a register may hold.
///
/// `Top` stands for a register about which nothing is known,
/// e.g. a register holding a primitive value.
pub type MemoryLocationsDomain = SetDomain<MemoryLocationId>;

/// Maps each register to the memory locations it may hold.
///
/// Registers missing from the map are implicitly top: before an instruction
/// assigns a register, the register may hold anything.
pub type RegisterMemoryLocationsMap =
    DomainMap<Register, MemoryLocationsDomain, MergeTopStrategy>;

/// Creates and deduplicates the memory locations of one analyzed method.
#[derive(Debug)]
pub struct MemoryFactory {
    locations: Vec<MemoryLocation>,
    /// Parameter locations, indexed by parameter position.
    parameters: Vec<MemoryLocationId>,
    instruction_locations: FnvHashMap<InstructionId, MemoryLocationId>,
    field_locations: FnvHashMap<(MemoryLocationId, StringId), MemoryLocationId>,
    empty_path: Path,
}

impl MemoryFactory {
    pub fn new(method: &Method) -> Self {
        let mut factory = MemoryFactory {
            locations: Vec::new(),
            parameters: Vec::new(),
            instruction_locations: FnvHashMap::default(),
            field_locations: FnvHashMap::default(),
            empty_path: Path::empty(),
        };
        for position in 0..method.number_of_parameters() {
            let id = factory.add(MemoryLocation::Parameter { position });
            factory.parameters.push(id);
        }
        factory
    }

    fn add(&mut self, location: MemoryLocation) -> MemoryLocationId {
        let id = MemoryLocationId(self.locations.len() as u32);
        self.locations.push(location);
        id
    }

    /// Returns the location behind the given handle.
    pub fn get(&self, location: MemoryLocationId) -> &MemoryLocation {
        &self.locations[location.0 as usize]
    }

    /// Returns the location of the object passed in through the given
    /// parameter. Fails if the method has no such parameter.
    pub fn make_parameter(
        &self,
        position: ParameterPosition,
    ) -> Result<MemoryLocationId, Error> {
        self.parameters
            .get(position as usize)
            .copied()
            .ok_or_else(|| anyhow!("load of the out-of-range parameter {position}"))
    }

    /// Returns the location of the object produced by the given instruction.
    pub fn make_location(&mut self, instruction: InstructionId) -> MemoryLocationId {
        if let Some(id) = self.instruction_locations.get(&instruction) {
            return *id;
        }
        let id = self.add(MemoryLocation::Instruction { instruction });
        self.instruction_locations.insert(instruction, id);
        id
    }

    /// Returns the location reached from `parent` through the given field.
    ///
    /// If the chain of parents already contains a location for the same
    /// field name, that location is reused. This folds cycles such as
    /// `x.next.prev.next` onto `x.next` and keeps recursive data structures
    /// finite.
    pub fn make_field(&mut self, parent: MemoryLocationId, field: StringId) -> MemoryLocationId {
        if let Some(id) = self.field_locations.get(&(parent, field)) {
            return *id;
        }

        let mut ancestor = parent;
        loop {
            match self.get(ancestor) {
                MemoryLocation::Field {
                    parent: grandparent,
                    field: ancestor_field,
                    ..
                } => {
                    if *ancestor_field == field {
                        self.field_locations.insert((parent, field), ancestor);
                        return ancestor;
                    }
                    ancestor = *grandparent;
                }
                _ => break,
            }
        }

        let root = self.root(parent);
        let path = self.path(parent).extended(PathElement::Field(field));
        let id = self.add(MemoryLocation::Field {
            parent,
            field,
            root,
            path,
        });
        self.field_locations.insert((parent, field), id);
        id
    }

    /// Returns the location reached from `location` through the given
    /// sequence of fields.
    pub fn make_field_path(
        &mut self,
        location: MemoryLocationId,
        path: &[PathElement],
    ) -> MemoryLocationId {
        let mut current = location;
        for element in path {
            let PathElement::Field(field) = element;
            current = self.make_field(current, *field);
        }
        current
    }

    /// Returns the root location the given location is reached from.
    pub fn root(&self, location: MemoryLocationId) -> MemoryLocationId {
        match self.get(location) {
            MemoryLocation::Field { root, .. } => *root,
            _ => location,
        }
    }

    /// Returns the field path from the root to the given location.
    pub fn path(&self, location: MemoryLocationId) -> &Path {
        match self.get(location) {
            MemoryLocation::Field { path, .. } => path,
            _ => &self.empty_path,
        }
    }

    /// Returns whether the given location is a root location.
    pub fn is_root(&self, location: MemoryLocationId) -> bool {
        !matches!(self.get(location), MemoryLocation::Field { .. })
    }

    /// Returns the parameter position of the given location,
    /// if it is a parameter location.
    pub fn parameter_position(&self, location: MemoryLocationId) -> Option<ParameterPosition> {
        match self.get(location) {
            MemoryLocation::Parameter { position } => Some(*position),
            _ => None,
        }
    }

    /// Returns the port of the method the given location corresponds to,
    /// or `None` for locations not reachable from a parameter.
    pub fn access_path(&self, location: MemoryLocationId) -> Option<AccessPath> {
        let root = self.root(location);
        let position = self.parameter_position(root)?;
        Some(AccessPath::new(
            Root::Argument(position),
            self.path(location).clone(),
        ))
    }
}
