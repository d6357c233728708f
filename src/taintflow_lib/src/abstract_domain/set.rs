use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::{AbstractDomain, DifferenceDomain, HasTop};

/// A powerset abstract domain over values of type `T`.
///
/// The partial order is subset inclusion with an explicit `Top` element
/// representing the set of all values. Join is set union, meet is set
/// intersection.
///
/// Feature sets, origin sets, via-ports and memory location sets are all
/// instances of this domain.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub enum SetDomain<T: Ord + Clone> {
    /// All values of type `T`.
    Top,
    /// Exactly the contained values.
    Set(BTreeSet<T>),
}

impl<T: Ord + Clone> SetDomain<T> {
    /// Returns the empty set, which is also the bottom element.
    pub fn empty() -> Self {
        SetDomain::Set(BTreeSet::new())
    }

    /// Returns the set containing only the given element.
    pub fn singleton(element: T) -> Self {
        SetDomain::Set(BTreeSet::from([element]))
    }

    /// Returns whether the set is empty.
    /// Note that `Top` is not empty.
    pub fn is_empty(&self) -> bool {
        match self {
            SetDomain::Top => false,
            SetDomain::Set(elements) => elements.is_empty(),
        }
    }

    /// Returns whether the given element is contained in the set.
    pub fn contains(&self, element: &T) -> bool {
        match self {
            SetDomain::Top => true,
            SetDomain::Set(elements) => elements.contains(element),
        }
    }

    /// Adds the given element to the set. Adding to `Top` is a no-op.
    pub fn insert(&mut self, element: T) {
        if let SetDomain::Set(elements) = self {
            elements.insert(element);
        }
    }

    /// Returns the contained elements, or `None` if the set is `Top`.
    pub fn as_set(&self) -> Option<&BTreeSet<T>> {
        match self {
            SetDomain::Top => None,
            SetDomain::Set(elements) => Some(elements),
        }
    }

    /// Returns an iterator over the contained elements.
    /// The `Top` element yields nothing; callers that can encounter `Top`
    /// must check [`HasTop::is_top`] first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.as_set().into_iter().flatten()
    }

    /// Returns the number of contained elements, or `None` for `Top`.
    pub fn len(&self) -> Option<usize> {
        self.as_set().map(|elements| elements.len())
    }
}

impl<T: Ord + Clone> Default for SetDomain<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Ord + Clone + fmt::Display> fmt::Display for SetDomain<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SetDomain::Top => write!(formatter, "T"),
            SetDomain::Set(elements) => {
                write!(formatter, "{{{}}}", elements.iter().join(", "))
            }
        }
    }
}

impl<T: Ord + Clone> FromIterator<T> for SetDomain<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        SetDomain::Set(iter.into_iter().collect())
    }
}

impl<T: Ord + Clone> AbstractDomain for SetDomain<T> {
    fn bottom() -> Self {
        Self::empty()
    }

    fn is_bottom(&self) -> bool {
        self.as_set().is_some_and(|elements| elements.is_empty())
    }

    fn leq(&self, other: &Self) -> bool {
        match (self, other) {
            (_, SetDomain::Top) => true,
            (SetDomain::Top, SetDomain::Set(_)) => false,
            (SetDomain::Set(lhs), SetDomain::Set(rhs)) => lhs.is_subset(rhs),
        }
    }

    fn join_with(&mut self, other: &Self) {
        match (&mut *self, other) {
            (SetDomain::Top, _) => (),
            (_, SetDomain::Top) => *self = SetDomain::Top,
            (SetDomain::Set(lhs), SetDomain::Set(rhs)) => {
                lhs.extend(rhs.iter().cloned());
            }
        }
    }

    fn meet_with(&mut self, other: &Self) {
        match (&mut *self, other) {
            (_, SetDomain::Top) => (),
            (SetDomain::Top, _) => *self = other.clone(),
            (SetDomain::Set(lhs), SetDomain::Set(rhs)) => {
                lhs.retain(|element| rhs.contains(element));
            }
        }
    }
}

impl<T: Ord + Clone> HasTop for SetDomain<T> {
    fn top() -> Self {
        SetDomain::Top
    }

    fn is_top(&self) -> bool {
        matches!(self, SetDomain::Top)
    }
}

impl<T: Ord + Clone> DifferenceDomain for SetDomain<T> {
    fn difference_with(&mut self, other: &Self) {
        match (&mut *self, other) {
            (_, SetDomain::Top) => *self = Self::empty(),
            (SetDomain::Top, SetDomain::Set(_)) => (),
            (SetDomain::Set(lhs), SetDomain::Set(rhs)) => {
                lhs.retain(|element| !rhs.contains(element));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(elements: &[u32]) -> SetDomain<u32> {
        elements.iter().copied().collect()
    }

    #[test]
    fn set_lattice_laws() {
        crate::abstract_domain::tests::check_lattice_laws(&[
            SetDomain::empty(),
            set(&[1]),
            set(&[2, 3]),
            set(&[1, 2, 3]),
            SetDomain::Top,
        ]);
    }

    #[test]
    fn join_is_union() {
        let mut lhs = set(&[1, 2]);
        lhs.join_with(&set(&[2, 3]));
        assert_eq!(lhs, set(&[1, 2, 3]));
    }

    #[test]
    fn meet_is_intersection() {
        let mut lhs = set(&[1, 2]);
        lhs.meet_with(&set(&[2, 3]));
        assert_eq!(lhs, set(&[2]));
    }

    #[test]
    fn difference_removes_covered_elements() {
        let mut lhs = set(&[1, 2, 3]);
        lhs.difference_with(&set(&[2]));
        assert_eq!(lhs, set(&[1, 3]));

        lhs.difference_with(&SetDomain::Top);
        assert!(lhs.is_bottom());
    }

    #[test]
    fn top_absorbs_all_elements() {
        assert!(set(&[1, 2]).leq(&SetDomain::Top));
        assert!(SetDomain::Top.contains(&42));
        let mut top: SetDomain<u32> = SetDomain::Top;
        top.insert(1);
        assert!(top.is_top());
    }
}
