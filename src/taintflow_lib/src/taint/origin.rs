use std::fmt;

use crate::abstract_domain::SetDomain;
use crate::intermediate_representation::{AccessPath, FieldId, MethodId};
use crate::prelude::*;

/// The method and port on which a source or sink was originally declared.
///
/// Origins identify the leaves of traces: however far a frame travels
/// through call sites, its origins keep pointing at the user-declared
/// models the taint stems from.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub struct MethodOrigin {
    pub method: MethodId,
    pub port: AccessPath,
}

impl MethodOrigin {
    pub fn new(method: MethodId, port: AccessPath) -> Self {
        MethodOrigin { method, port }
    }
}

impl fmt::Display for MethodOrigin {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "method#{}.{}", self.method.0, self.port)
    }
}

/// A set of method origins.
pub type MethodOriginSet = SetDomain<MethodOrigin>;

/// A set of field origins, for taint declared on fields rather than methods.
pub type FieldOriginSet = SetDomain<FieldId>;
