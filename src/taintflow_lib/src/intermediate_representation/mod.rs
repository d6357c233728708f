//! This module contains the intermediate representation of the analyzed program.
//!
//! The representation is a register-based bytecode:
//! methods own a list of instructions
//! together with a control flow graph of basic blocks over them.
//! Methods, fields, types, strings and source positions are interned
//! and referenced through small copyable id handles,
//! so that all equality checks on them are integer comparisons.

mod access_path;
mod cfg;
mod field;
mod instruction;
mod method;
mod position;
mod types;

pub use access_path::{AccessPath, ParameterPosition, Path, PathElement, Root};
pub use cfg::{Block, Cfg};
pub use field::{Field, FieldId};
pub use instruction::{Instruction, InstructionId, Register};
pub use method::{Method, MethodBody, MethodId};
pub use position::{Position, PositionId};
pub use types::{ClassHierarchy, ClassInterval, ClassIntervals, StringId, Type, TypeId};
