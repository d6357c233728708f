use std::fmt;

use crate::intermediate_representation::StringId;
use crate::prelude::*;

/// Handle of an interned [`Position`].
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct PositionId(pub u32);

impl fmt::Display for PositionId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "position#{}", self.0)
    }
}

/// A source position in the analyzed program.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct Position {
    /// The source file, if known.
    pub path: Option<StringId>,
    /// The line number, if known. Lines are one-based.
    pub line: Option<u32>,
}

impl Position {
    /// Generate a new position.
    pub fn new(path: Option<StringId>, line: Option<u32>) -> Self {
        Position { path, line }
    }

    /// Generate an unknown position.
    pub fn unknown() -> Self {
        Position {
            path: None,
            line: None,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match (self.path, self.line) {
            (Some(path), Some(line)) => write!(formatter, "{path}:{line}"),
            (Some(path), None) => write!(formatter, "{path}:?"),
            (None, Some(line)) => write!(formatter, "?:{line}"),
            (None, None) => write!(formatter, "?:?"),
        }
    }
}
