use std::fmt;

use crate::intermediate_representation::{StringId, TypeId};
use crate::prelude::*;

/// Handle of an interned [`Field`].
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct FieldId(pub u32);

impl fmt::Display for FieldId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "field#{}", self.0)
    }
}

/// A field of a class.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub struct Field {
    /// The class declaring the field.
    pub class: TypeId,
    /// The name of the field.
    pub name: StringId,
}

impl Field {
    /// Generate a new field.
    pub fn new(class: TypeId, name: StringId) -> Self {
        Field { class, name }
    }
}
