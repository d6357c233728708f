use std::fmt;

use derive_more::Deref;

use crate::intermediate_representation::StringId;
use crate::prelude::*;

/// The position of a parameter of a method.
///
/// For instance methods, position 0 is the `this` parameter.
pub type ParameterPosition = u32;

/// The root of an access path, i.e. the variable or parameter the path starts from.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum Root {
    /// The return value of the method.
    Return,
    /// A parameter of the method.
    Argument(ParameterPosition),
    /// The effect of merely calling the method, independent of any data flow
    /// through its parameters or return value.
    CallEffect,
}

impl Root {
    /// Returns whether this is a parameter root.
    pub fn is_argument(&self) -> bool {
        matches!(self, Root::Argument(_))
    }

    /// Returns the parameter position for parameter roots.
    pub fn parameter_position(&self) -> Option<ParameterPosition> {
        match self {
            Root::Argument(position) => Some(*position),
            _ => None,
        }
    }
}

impl fmt::Display for Root {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Root::Return => write!(formatter, "Return"),
            Root::Argument(position) => write!(formatter, "Argument({position})"),
            Root::CallEffect => write!(formatter, "CallEffect"),
        }
    }
}

/// A single element of an access path, e.g. a field access.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum PathElement {
    /// An access to the field with the given name.
    Field(StringId),
}

impl fmt::Display for PathElement {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PathElement::Field(name) => write!(formatter, ".{name}"),
        }
    }
}

/// A sequence of path elements, applied from left to right.
#[derive(
    Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord, Default, Deref,
)]
pub struct Path {
    elements: Vec<PathElement>,
}

impl Path {
    /// Generate the empty path.
    pub fn empty() -> Self {
        Path {
            elements: Vec::new(),
        }
    }

    /// Generate a path from the given elements.
    pub fn new(elements: Vec<PathElement>) -> Self {
        Path { elements }
    }

    /// Append the given element at the end of the path.
    pub fn append(&mut self, element: PathElement) {
        self.elements.push(element);
    }

    /// Returns the path extended by the given element.
    pub fn extended(&self, element: PathElement) -> Self {
        let mut path = self.clone();
        path.append(element);
        path
    }

    /// Truncates the path to at most `max_size` elements.
    pub fn truncate(&mut self, max_size: usize) {
        self.elements.truncate(max_size);
    }
}

impl FromIterator<PathElement> for Path {
    fn from_iter<I: IntoIterator<Item = PathElement>>(iter: I) -> Self {
        Path {
            elements: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        for element in &self.elements {
            write!(formatter, "{element}")?;
        }
        Ok(())
    }
}

/// An access path, i.e. a root together with a path of field accesses.
///
/// Access paths describe ports of a method, e.g. `Argument(1).payload`.
#[derive(
    Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord,
)]
pub struct AccessPath {
    root: Root,
    path: Path,
}

impl AccessPath {
    /// Generate a new access path.
    pub fn new(root: Root, path: Path) -> Self {
        AccessPath { root, path }
    }

    /// Generate an access path consisting only of the given root.
    pub fn from_root(root: Root) -> Self {
        AccessPath {
            root,
            path: Path::empty(),
        }
    }

    /// Returns the root of the access path.
    pub fn root(&self) -> Root {
        self.root
    }

    /// Returns the field path of the access path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the access path extended by the given element.
    pub fn extended(&self, element: PathElement) -> Self {
        AccessPath {
            root: self.root,
            path: self.path.extended(element),
        }
    }

    /// Truncates the field path to at most `max_size` elements.
    pub fn truncate(&mut self, max_size: usize) {
        self.path.truncate(max_size);
    }

    /// Returns the truncated access path as a new value.
    pub fn truncated(&self, max_size: usize) -> Self {
        let mut access_path = self.clone();
        access_path.truncate(max_size);
        access_path
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{}{}", self.root, self.path)
    }
}
