use std::fmt;

use crate::intermediate_representation::{
    Block, Cfg, Instruction, InstructionId, ParameterPosition, StringId, TypeId,
};
use crate::prelude::*;

/// Handle of an interned [`Method`].
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct MethodId(pub u32);

impl fmt::Display for MethodId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "method#{}", self.0)
    }
}

/// The body of a method: its instructions and their control flow graph.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MethodBody {
    instructions: Vec<Instruction>,
    cfg: Cfg,
}

impl MethodBody {
    /// Generate a method body from the given blocks of instructions
    /// and edges between block indices. The first block is the entry block.
    pub fn new(blocks: Vec<Vec<Instruction>>, edges: &[(usize, usize)]) -> Self {
        let mut instructions = Vec::new();
        let mut cfg_blocks = Vec::new();
        for block in blocks {
            let ids = block
                .iter()
                .enumerate()
                .map(|(offset, _)| InstructionId((instructions.len() + offset) as u32))
                .collect();
            cfg_blocks.push(Block::new(ids));
            instructions.extend(block);
        }
        MethodBody {
            instructions,
            cfg: Cfg::new(cfg_blocks, edges),
        }
    }

    /// Generate a method body consisting of a single basic block.
    pub fn linear(instructions: Vec<Instruction>) -> Self {
        Self::new(vec![instructions], &[])
    }

    /// Returns the instruction with the given id.
    pub fn instruction(&self, id: InstructionId) -> &Instruction {
        &self.instructions[id.0 as usize]
    }

    /// Returns the control flow graph of the body.
    pub fn cfg(&self) -> &Cfg {
        &self.cfg
    }

    /// Returns an iterator over all instructions with their ids.
    pub fn instructions(&self) -> impl Iterator<Item = (InstructionId, &Instruction)> {
        self.instructions
            .iter()
            .enumerate()
            .map(|(index, instruction)| (InstructionId(index as u32), instruction))
    }
}

/// A method of the analyzed program.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Method {
    /// The class declaring the method.
    pub class: TypeId,
    /// The name of the method.
    pub name: StringId,
    /// The types of the parameters.
    /// For instance methods, the type of `this` is included at position 0.
    pub parameter_types: Vec<TypeId>,
    /// The return type, or `None` for void methods.
    pub return_type: Option<TypeId>,
    /// Whether the method is static.
    pub is_static: bool,
    /// The body of the method.
    /// Methods without a body are external and treated as unknown code.
    pub body: Option<MethodBody>,
}

impl Method {
    /// Generate a new method.
    pub fn new(
        class: TypeId,
        name: StringId,
        parameter_types: Vec<TypeId>,
        return_type: Option<TypeId>,
        is_static: bool,
        body: Option<MethodBody>,
    ) -> Self {
        Method {
            class,
            name,
            parameter_types,
            return_type,
            is_static,
            body,
        }
    }

    /// Returns the number of parameters, including `this` for instance methods.
    pub fn number_of_parameters(&self) -> ParameterPosition {
        self.parameter_types.len() as ParameterPosition
    }

    /// Returns the type of the parameter at the given position.
    pub fn parameter_type(&self, position: ParameterPosition) -> Option<TypeId> {
        self.parameter_types.get(position as usize).copied()
    }
}
