use std::fmt;

use crate::intermediate_representation::{
    FieldId, MethodId, ParameterPosition, PositionId, StringId, TypeId,
};
use crate::prelude::*;

/// A virtual register of a method body.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct Register(pub u32);

impl fmt::Display for Register {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "v{}", self.0)
    }
}

/// The index of an instruction in its method body.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct InstructionId(pub u32);

impl fmt::Display for InstructionId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "i{}", self.0)
    }
}

/// An instruction of a method body.
///
/// The instruction set is deliberately small:
/// it contains the instructions whose data flow the analysis models precisely.
/// Everything else is represented as [`Instruction::Opaque`].
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub enum Instruction {
    /// Bind the parameter with the given position to `dest`.
    /// Parameter loads precede all other instructions of the entry block.
    LoadParam {
        /// The position of the loaded parameter.
        parameter: ParameterPosition,
        /// The register the parameter is bound to.
        dest: Register,
    },
    /// Load an untracked scalar constant into `dest`.
    Const {
        /// The register the constant is loaded into.
        dest: Register,
    },
    /// Load a string constant into `dest`.
    ConstString {
        /// The loaded string.
        value: StringId,
        /// The register the string is loaded into.
        dest: Register,
    },
    /// Copy `src` into `dest`.
    Move {
        /// The copied register.
        src: Register,
        /// The register copied into.
        dest: Register,
    },
    /// Allocate a new object of the given class.
    NewInstance {
        /// The instantiated class.
        class: TypeId,
        /// The register holding the new object.
        dest: Register,
    },
    /// Load `object.field` into `dest`.
    FieldGet {
        /// The register holding the accessed object.
        object: Register,
        /// The accessed field.
        field: FieldId,
        /// The register the field value is loaded into.
        dest: Register,
    },
    /// Store `src` into `object.field`.
    FieldPut {
        /// The stored register.
        src: Register,
        /// The register holding the accessed object.
        object: Register,
        /// The accessed field.
        field: FieldId,
    },
    /// Load the given static field into `dest`.
    StaticGet {
        /// The accessed field.
        field: FieldId,
        /// The register the field value is loaded into.
        dest: Register,
    },
    /// Store `src` into the given static field.
    StaticPut {
        /// The stored register.
        src: Register,
        /// The accessed field.
        field: FieldId,
    },
    /// Call a method.
    Invoke {
        /// The argument registers.
        /// For virtual calls, the receiver is the first argument.
        arguments: Vec<Register>,
        /// The statically resolved callee.
        method: MethodId,
        /// Whether the call dispatches dynamically over the receiver type.
        is_virtual: bool,
        /// The register the return value is bound to, if used.
        dest: Option<Register>,
    },
    /// Return from the method.
    Return {
        /// The returned register, if the method returns a value.
        src: Option<Register>,
    },
    /// Set the current source position for subsequent instructions.
    DebugPosition {
        /// The source position.
        position: PositionId,
    },
    /// An instruction whose semantics the analysis does not model.
    Opaque {
        /// The registers read by the instruction.
        arguments: Vec<Register>,
        /// The register written by the instruction, if any.
        dest: Option<Register>,
    },
}

impl Instruction {
    /// Returns the registers read by the instruction, in operand order.
    pub fn sources(&self) -> Vec<Register> {
        match self {
            Instruction::LoadParam { .. }
            | Instruction::Const { .. }
            | Instruction::ConstString { .. }
            | Instruction::NewInstance { .. }
            | Instruction::StaticGet { .. }
            | Instruction::DebugPosition { .. } => Vec::new(),
            Instruction::Move { src, .. } | Instruction::StaticPut { src, .. } => vec![*src],
            Instruction::FieldGet { object, .. } => vec![*object],
            Instruction::FieldPut { src, object, .. } => vec![*src, *object],
            Instruction::Invoke { arguments, .. } | Instruction::Opaque { arguments, .. } => {
                arguments.clone()
            }
            Instruction::Return { src } => src.iter().copied().collect(),
        }
    }

    /// Returns the register written by the instruction, if any.
    pub fn dest(&self) -> Option<Register> {
        match self {
            Instruction::LoadParam { dest, .. }
            | Instruction::Const { dest }
            | Instruction::ConstString { dest, .. }
            | Instruction::Move { dest, .. }
            | Instruction::NewInstance { dest, .. }
            | Instruction::FieldGet { dest, .. }
            | Instruction::StaticGet { dest, .. } => Some(*dest),
            Instruction::Invoke { dest, .. } | Instruction::Opaque { dest, .. } => *dest,
            Instruction::FieldPut { .. }
            | Instruction::StaticPut { .. }
            | Instruction::Return { .. }
            | Instruction::DebugPosition { .. } => None,
        }
    }
}
