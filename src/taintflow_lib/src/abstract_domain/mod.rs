//! This module defines traits describing general properties of abstract domains
//! as well as several abstract domain types implementing these traits.
//!
//! All taint and alias information computed by the analysis is expressed in
//! terms of these domains. Every domain is a join-semilattice with a least
//! element (bottom); domains with a greatest element additionally implement
//! [`HasTop`].

mod constant;
pub use constant::ConstantDomain;

mod set;
pub use set::SetDomain;

mod domain_map;
pub use domain_map::*;

mod tree;
pub use tree::{AbstractTreeDomain, TreeConfig, UpdateKind};

/// The main trait describing an abstract domain.
///
/// Each abstract domain is partially ordered via [`AbstractDomain::leq`]
/// and has a least element, the bottom value. Abstract domains of the same
/// type can be joined, yielding an upper bound of the inputs.
pub trait AbstractDomain: Sized + Eq + Clone {
    /// Returns the least element of the domain.
    fn bottom() -> Self;

    /// Returns whether the element is the least element of the domain.
    fn is_bottom(&self) -> bool;

    /// Returns whether `self` is less than or equal to `other`
    /// with respect to the partial order on the domain.
    fn leq(&self, other: &Self) -> bool;

    /// Joins `other` into `self`, such that afterwards `self` is an upper
    /// bound (with respect to the partial order on the domain) of the two
    /// inputs.
    ///
    /// Joining may never drop information: both inputs must satisfy
    /// [`AbstractDomain::leq`] with respect to the result.
    fn join_with(&mut self, other: &Self);

    /// Widens `self` with `other`, such that afterwards `self` is an upper
    /// bound of the two inputs.
    ///
    /// Unlike joining, widening is permitted to lose precision to guarantee
    /// termination of fixpoint computations. It must only be called on
    /// values flowing through loop back-edges.
    ///
    /// # Default
    ///
    /// Calls [`AbstractDomain::join_with`], which is a correct widening for
    /// domains without infinite ascending chains.
    fn widen_with(&mut self, other: &Self) {
        self.join_with(other);
    }

    /// Meets `self` with `other`, such that afterwards `self` is a lower
    /// bound (with respect to the partial order on the domain) of the two
    /// inputs.
    fn meet_with(&mut self, other: &Self);

    /// Narrows `self` with `other`.
    ///
    /// # Default
    ///
    /// Calls [`AbstractDomain::meet_with`].
    fn narrow_with(&mut self, other: &Self) {
        self.meet_with(other);
    }

    /// Returns the join of the two inputs as a new value.
    #[must_use]
    fn join(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.join_with(other);
        result
    }

    /// Returns the meet of the two inputs as a new value.
    #[must_use]
    fn meet(&self, other: &Self) -> Self {
        let mut result = self.clone();
        result.meet_with(other);
        result
    }

    /// Overwrites `self` with the least element of the domain.
    fn set_to_bottom(&mut self) {
        *self = Self::bottom();
    }
}

/// An abstract domain implementing this trait has a global maximum, i.e. a
/// *Top* element.
///
/// Partition-like domains (frame sets, taint trees) grow without bound and
/// have no meaningful top; those implement [`AbstractDomain`] only.
pub trait HasTop: AbstractDomain {
    /// Returns the greatest element of the domain.
    fn top() -> Self;

    /// Returns whether the element is the greatest element of the domain.
    fn is_top(&self) -> bool;

    /// Overwrites `self` with the greatest element of the domain.
    fn set_to_top(&mut self) {
        *self = Self::top();
    }
}

/// A trait for domains that support removing covered information.
///
/// This is required by [`AbstractTreeDomain`], which stores on each tree
/// node only the elements not already implied by its ancestors: after a
/// join, elements covered by the ancestor accumulator are removed again.
pub trait DifferenceDomain: AbstractDomain {
    /// Removes all parts of `self` that are already covered by `other`,
    /// i.e. afterwards `self.join(other)` still equals the old
    /// `self.join(other)`, but `self` is as small as possible.
    fn difference_with(&mut self, other: &Self);
}
