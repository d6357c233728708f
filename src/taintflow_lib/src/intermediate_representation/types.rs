use std::fmt;

use fnv::FnvHashMap;

use crate::prelude::*;

/// Handle of an interned string, e.g. a class, method or field name.
///
/// Handles are indices into the string table of the analysis context.
/// Two handles are equal if and only if the interned strings are equal.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct StringId(pub u32);

impl fmt::Display for StringId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

/// Handle of an interned [`Type`].
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl fmt::Display for TypeId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "type#{}", self.0)
    }
}

/// A class or primitive type of the analyzed program.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub struct Type {
    /// The fully qualified name of the type.
    pub name: StringId,
}

impl Type {
    /// Generate a new type with the given name.
    pub fn new(name: StringId) -> Self {
        Type { name }
    }
}

/// An interval of DFS finishing numbers identifying a set of classes
/// in the single-inheritance class hierarchy.
///
/// The interval of a class contains the interval of each of its subclasses,
/// so subtype queries are constant-time interval containment checks.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct ClassInterval {
    lower: u32,
    upper: u32,
}

impl ClassInterval {
    /// The interval containing every class.
    pub const fn top() -> Self {
        ClassInterval {
            lower: 0,
            upper: u32::MAX,
        }
    }

    /// The empty interval.
    pub const fn bottom() -> Self {
        ClassInterval { lower: 1, upper: 0 }
    }

    /// Generate the interval `[lower, upper]`.
    /// Empty intervals are normalized to a unique representation.
    pub fn new(lower: u32, upper: u32) -> Self {
        if lower > upper {
            Self::bottom()
        } else {
            ClassInterval { lower, upper }
        }
    }

    /// Returns whether the interval is empty.
    pub fn is_bottom(&self) -> bool {
        self.lower > self.upper
    }

    /// Returns whether the interval contains every class.
    pub fn is_top(&self) -> bool {
        self.lower == 0 && self.upper == u32::MAX
    }

    /// Returns whether `other` is a subset of `self`,
    /// i.e. whether `other` only contains subtypes of `self`.
    pub fn contains(&self, other: &ClassInterval) -> bool {
        if other.is_bottom() {
            return true;
        }
        self.lower <= other.lower && other.upper <= self.upper
    }

    /// Returns the intersection of the two intervals.
    pub fn meet(&self, other: &ClassInterval) -> ClassInterval {
        Self::new(
            std::cmp::max(self.lower, other.lower),
            std::cmp::min(self.upper, other.upper),
        )
    }

    /// Returns the smallest interval containing both inputs.
    pub fn join(&self, other: &ClassInterval) -> ClassInterval {
        if self.is_bottom() {
            return *other;
        }
        if other.is_bottom() {
            return *self;
        }
        ClassInterval {
            lower: std::cmp::min(self.lower, other.lower),
            upper: std::cmp::max(self.upper, other.upper),
        }
    }
}

impl fmt::Display for ClassInterval {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        if self.is_bottom() {
            write!(formatter, "[]")
        } else if self.is_top() {
            write!(formatter, "[*]")
        } else {
            write!(formatter, "[{}, {}]", self.lower, self.upper)
        }
    }
}

/// The single-inheritance class hierarchy of the analyzed program.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct ClassHierarchy {
    /// Maps each class to its direct subclasses.
    children: FnvHashMap<TypeId, Vec<TypeId>>,
    /// Maps each class to its direct superclass.
    parents: FnvHashMap<TypeId, TypeId>,
    /// Classes without a superclass.
    roots: Vec<TypeId>,
}

impl ClassHierarchy {
    pub fn new() -> Self {
        ClassHierarchy::default()
    }

    /// Add a class without a superclass.
    pub fn add_root(&mut self, class: TypeId) {
        self.roots.push(class);
    }

    /// Add a class extending the given superclass.
    pub fn add_class(&mut self, class: TypeId, parent: TypeId) {
        self.children.entry(parent).or_default().push(class);
        self.parents.insert(class, parent);
    }

    pub fn roots(&self) -> &[TypeId] {
        &self.roots
    }

    /// Maps each class to its direct subclasses.
    pub fn children(&self) -> &FnvHashMap<TypeId, Vec<TypeId>> {
        &self.children
    }

    pub fn parent(&self, class: TypeId) -> Option<TypeId> {
        self.parents.get(&class).copied()
    }

    /// Returns all strict subclasses of the given class.
    pub fn subclasses(&self, class: TypeId) -> Vec<TypeId> {
        let mut subclasses = Vec::new();
        let mut worklist = vec![class];
        while let Some(class) = worklist.pop() {
            if let Some(children) = self.children.get(&class) {
                subclasses.extend_from_slice(children);
                worklist.extend_from_slice(children);
            }
        }
        subclasses
    }
}

/// The class intervals of all classes in the program,
/// computed by a depth-first traversal of the class hierarchy.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct ClassIntervals {
    intervals: FnvHashMap<TypeId, ClassInterval>,
}

impl ClassIntervals {
    /// Compute the class intervals for the given hierarchy.
    ///
    /// `children` maps each class to its direct subclasses;
    /// `roots` are the classes without superclass.
    /// Classes not reachable from a root are given the top interval.
    pub fn new(children: &FnvHashMap<TypeId, Vec<TypeId>>, roots: &[TypeId]) -> Self {
        let mut intervals = FnvHashMap::default();
        let mut next_number: u32 = 0;
        for root in roots {
            Self::number_subtree(*root, children, &mut intervals, &mut next_number);
        }
        ClassIntervals { intervals }
    }

    fn number_subtree(
        class: TypeId,
        children: &FnvHashMap<TypeId, Vec<TypeId>>,
        intervals: &mut FnvHashMap<TypeId, ClassInterval>,
        next_number: &mut u32,
    ) {
        let lower = *next_number;
        *next_number += 1;
        if let Some(subclasses) = children.get(&class) {
            for subclass in subclasses {
                Self::number_subtree(*subclass, children, intervals, next_number);
            }
        }
        let upper = *next_number;
        *next_number += 1;
        intervals.insert(class, ClassInterval::new(lower, upper));
    }

    /// Returns the interval of the given class.
    ///
    /// Classes outside the computed hierarchy get the top interval,
    /// i.e. they are conservatively treated as possibly-anything.
    pub fn get(&self, class: TypeId) -> ClassInterval {
        self.intervals
            .get(&class)
            .copied()
            .unwrap_or_else(ClassInterval::top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> ClassIntervals {
        // Object <- A <- B, Object <- C
        let mut children = FnvHashMap::default();
        children.insert(TypeId(0), vec![TypeId(1), TypeId(3)]);
        children.insert(TypeId(1), vec![TypeId(2)]);
        ClassIntervals::new(&children, &[TypeId(0)])
    }

    #[test]
    fn intervals_nest_along_the_hierarchy() {
        let intervals = hierarchy();
        let object = intervals.get(TypeId(0));
        let a = intervals.get(TypeId(1));
        let b = intervals.get(TypeId(2));
        let c = intervals.get(TypeId(3));

        assert!(object.contains(&a));
        assert!(object.contains(&c));
        assert!(a.contains(&b));
        assert!(!a.contains(&c));
        assert!(!b.contains(&a));
    }

    #[test]
    fn unknown_classes_are_top() {
        let intervals = hierarchy();
        assert!(intervals.get(TypeId(77)).is_top());
    }

    #[test]
    fn meet_of_disjoint_intervals_is_empty() {
        let intervals = hierarchy();
        let a = intervals.get(TypeId(1));
        let c = intervals.get(TypeId(3));
        assert!(a.meet(&c).is_bottom());
        assert_eq!(a.meet(&ClassInterval::top()), a);
    }

    #[test]
    fn empty_intervals_are_canonical() {
        assert_eq!(ClassInterval::new(5, 3), ClassInterval::bottom());
        assert!(ClassInterval::top().contains(&ClassInterval::bottom()));
    }
}
