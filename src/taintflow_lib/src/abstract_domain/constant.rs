use super::{AbstractDomain, HasTop};
use serde::{Deserialize, Serialize};

/// A flat abstract domain over values of type `T`.
///
/// The partial order is `Bottom < Value(v) < Top` for every `v`,
/// with distinct values being incomparable. Joining two distinct values
/// loses all information and yields `Top`.
///
/// The analysis uses this domain to track the last source position seen on
/// a path through a method and the index of the last loaded parameter.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub enum ConstantDomain<T: Eq + Clone> {
    /// No value reaches this program point.
    #[default]
    Bottom,
    /// Exactly this value reaches this program point.
    Value(T),
    /// More than one distinct value may reach this program point.
    Top,
}

impl<T: Eq + Clone> ConstantDomain<T> {
    /// Returns the contained value if the element is a single constant.
    pub fn value(&self) -> Option<&T> {
        match self {
            ConstantDomain::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl<T: Eq + Clone> AbstractDomain for ConstantDomain<T> {
    fn bottom() -> Self {
        ConstantDomain::Bottom
    }

    fn is_bottom(&self) -> bool {
        matches!(self, ConstantDomain::Bottom)
    }

    fn leq(&self, other: &Self) -> bool {
        match (self, other) {
            (ConstantDomain::Bottom, _) => true,
            (_, ConstantDomain::Top) => true,
            (ConstantDomain::Value(lhs), ConstantDomain::Value(rhs)) => lhs == rhs,
            _ => false,
        }
    }

    fn join_with(&mut self, other: &Self) {
        match (&*self, other) {
            (_, ConstantDomain::Bottom) => (),
            (ConstantDomain::Bottom, _) => *self = other.clone(),
            (ConstantDomain::Value(lhs), ConstantDomain::Value(rhs)) if lhs == rhs => (),
            _ => *self = ConstantDomain::Top,
        }
    }

    fn meet_with(&mut self, other: &Self) {
        match (&*self, other) {
            (_, ConstantDomain::Top) => (),
            (ConstantDomain::Top, _) => *self = other.clone(),
            (ConstantDomain::Value(lhs), ConstantDomain::Value(rhs)) if lhs == rhs => (),
            _ => *self = ConstantDomain::Bottom,
        }
    }
}

impl<T: Eq + Clone> HasTop for ConstantDomain<T> {
    fn top() -> Self {
        ConstantDomain::Top
    }

    fn is_top(&self) -> bool {
        matches!(self, ConstantDomain::Top)
    }
}
