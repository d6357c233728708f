use std::collections::BTreeSet;
use std::fmt;

use itertools::Itertools;

use crate::abstract_domain::SetDomain;
use crate::prelude::*;

/// Handle of an interned feature.
///
/// A feature is a user-visible breadcrumb attached to taint, e.g. `via-obscure`
/// or `via-widen-broadening`. Features are interned in the feature table of the
/// analysis context; two handles are equal if and only if the feature names are
/// equal.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct FeatureId(pub u32);

impl fmt::Display for FeatureId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "feature#{}", self.0)
    }
}

impl FeatureId {
    /// `via-widen-broadening`, attached when widening collapses a taint tree.
    ///
    /// The broadening features occupy fixed slots in the feature table so that
    /// they are available in code that has no access to an analysis context.
    /// [`crate::context::Features::new`] installs them.
    pub const WIDEN_BROADENING: Self = FeatureId(0);
    /// `via-issue-broadening`, attached when taint is collapsed to match a sink.
    pub const ISSUE_BROADENING: Self = FeatureId(1);
    /// `via-propagation-broadening`, attached when a propagation collapses taint.
    pub const PROPAGATION_BROADENING: Self = FeatureId(2);
    /// `via-obscure`, attached when taint passes through a method without code.
    pub const OBSCURE: Self = FeatureId(3);
    /// `via-obscure-taint-in-taint-out`, attached by the obscure call fallback.
    pub const OBSCURE_TAINT_IN_TAINT_OUT: Self = FeatureId(4);
}

/// A set of features, e.g. the user-declared features of a taint config.
pub type FeatureSet = SetDomain<FeatureId>;

/// A set of features, tracking for each feature whether it may or always
/// is present on the flow.
///
/// The *may* set over-approximates and the *always* set under-approximates the
/// features of the flows described by a taint value. The always-set is a subset
/// of the may-set. Joining two values unions the may-sets but intersects the
/// always-sets, since a feature that is only always-present on one of two
/// joined flows may or may not be present on the joined flow.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub enum FeatureMayAlwaysSet {
    /// No flow at all. This is distinct from an empty feature set.
    Bottom,
    /// Any feature may be present.
    Top,
    /// A known set of may- and always-features.
    Value {
        may: BTreeSet<FeatureId>,
        always: BTreeSet<FeatureId>,
    },
}

impl FeatureMayAlwaysSet {
    /// Returns the empty feature set: no features, neither may nor always.
    pub fn empty() -> Self {
        FeatureMayAlwaysSet::Value {
            may: BTreeSet::new(),
            always: BTreeSet::new(),
        }
    }

    /// Creates a feature set from separate may- and always-sets.
    /// The always-features are also may-features.
    pub fn new(may: &FeatureSet, always: &FeatureSet) -> Self {
        match (may.as_set(), always.as_set()) {
            (Some(may), Some(always)) => FeatureMayAlwaysSet::Value {
                may: may.union(always).cloned().collect(),
                always: always.clone(),
            },
            _ => FeatureMayAlwaysSet::Top,
        }
    }

    /// Creates a feature set where all given features are may-features.
    pub fn make_may(features: impl IntoIterator<Item = FeatureId>) -> Self {
        FeatureMayAlwaysSet::Value {
            may: features.into_iter().collect(),
            always: BTreeSet::new(),
        }
    }

    /// Creates a feature set where all given features are always-features.
    pub fn make_always(features: impl IntoIterator<Item = FeatureId>) -> Self {
        let always: BTreeSet<_> = features.into_iter().collect();
        FeatureMayAlwaysSet::Value {
            may: always.clone(),
            always,
        }
    }

    /// Returns whether the set is neither top nor bottom.
    pub fn is_value(&self) -> bool {
        matches!(self, FeatureMayAlwaysSet::Value { .. })
    }

    /// Returns whether the set contains no features.
    /// Note that the bottom element is not empty.
    pub fn is_empty(&self) -> bool {
        match self {
            FeatureMayAlwaysSet::Value { may, .. } => may.is_empty(),
            _ => false,
        }
    }

    /// Returns the features that may be present on the flow.
    pub fn may(&self) -> FeatureSet {
        match self {
            FeatureMayAlwaysSet::Bottom => FeatureSet::empty(),
            FeatureMayAlwaysSet::Top => FeatureSet::Top,
            FeatureMayAlwaysSet::Value { may, .. } => FeatureSet::Set(may.clone()),
        }
    }

    /// Returns the features that are always present on the flow.
    pub fn always(&self) -> FeatureSet {
        match self {
            FeatureMayAlwaysSet::Bottom => FeatureSet::empty(),
            FeatureMayAlwaysSet::Top => FeatureSet::Top,
            FeatureMayAlwaysSet::Value { always, .. } => FeatureSet::Set(always.clone()),
        }
    }

    /// Adds a may-feature. Adding to the bottom set yields a set
    /// containing only the added feature.
    pub fn add_may(&mut self, feature: FeatureId) {
        match self {
            FeatureMayAlwaysSet::Bottom => *self = Self::make_may([feature]),
            FeatureMayAlwaysSet::Top => (),
            FeatureMayAlwaysSet::Value { may, .. } => {
                may.insert(feature);
            }
        }
    }

    /// Adds an always-feature, which is also a may-feature.
    pub fn add_always(&mut self, feature: FeatureId) {
        match self {
            FeatureMayAlwaysSet::Bottom => *self = Self::make_always([feature]),
            FeatureMayAlwaysSet::Top => (),
            FeatureMayAlwaysSet::Value { may, always } => {
                may.insert(feature);
                always.insert(feature);
            }
        }
    }

    /// Adds all features of `other` with their respective may/always status.
    ///
    /// Unlike [`AbstractDomain::join_with`] this never removes a feature from
    /// the always-set: the features of `other` are additional evidence on the
    /// same flow, not an alternative flow.
    pub fn add(&mut self, other: &Self) {
        match (&mut *self, other) {
            (_, FeatureMayAlwaysSet::Bottom) => (),
            (FeatureMayAlwaysSet::Top, _) => (),
            (_, FeatureMayAlwaysSet::Top) => *self = FeatureMayAlwaysSet::Top,
            (FeatureMayAlwaysSet::Bottom, other) => *self = other.clone(),
            (
                FeatureMayAlwaysSet::Value { may, always },
                FeatureMayAlwaysSet::Value {
                    may: other_may,
                    always: other_always,
                },
            ) => {
                may.extend(other_may.iter().copied());
                always.extend(other_always.iter().copied());
            }
        }
    }
}

impl Default for FeatureMayAlwaysSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl AbstractDomain for FeatureMayAlwaysSet {
    fn bottom() -> Self {
        FeatureMayAlwaysSet::Bottom
    }

    fn is_bottom(&self) -> bool {
        matches!(self, FeatureMayAlwaysSet::Bottom)
    }

    fn leq(&self, other: &Self) -> bool {
        match (self, other) {
            (FeatureMayAlwaysSet::Bottom, _) => true,
            (_, FeatureMayAlwaysSet::Top) => true,
            (_, FeatureMayAlwaysSet::Bottom) => false,
            (FeatureMayAlwaysSet::Top, _) => false,
            (
                FeatureMayAlwaysSet::Value { may, always },
                FeatureMayAlwaysSet::Value {
                    may: other_may,
                    always: other_always,
                },
            ) => may.is_subset(other_may) && other_always.is_subset(always),
        }
    }

    fn join_with(&mut self, other: &Self) {
        match (&mut *self, other) {
            (_, FeatureMayAlwaysSet::Bottom) => (),
            (FeatureMayAlwaysSet::Top, _) => (),
            (_, FeatureMayAlwaysSet::Top) => *self = FeatureMayAlwaysSet::Top,
            (FeatureMayAlwaysSet::Bottom, other) => *self = other.clone(),
            (
                FeatureMayAlwaysSet::Value { may, always },
                FeatureMayAlwaysSet::Value {
                    may: other_may,
                    always: other_always,
                },
            ) => {
                may.extend(other_may.iter().copied());
                always.retain(|feature| other_always.contains(feature));
            }
        }
    }

    fn meet_with(&mut self, other: &Self) {
        match (&mut *self, other) {
            (_, FeatureMayAlwaysSet::Top) => (),
            (FeatureMayAlwaysSet::Bottom, _) => (),
            (_, FeatureMayAlwaysSet::Bottom) => *self = FeatureMayAlwaysSet::Bottom,
            (FeatureMayAlwaysSet::Top, other) => *self = other.clone(),
            (
                FeatureMayAlwaysSet::Value { may, always },
                FeatureMayAlwaysSet::Value {
                    may: other_may,
                    always: other_always,
                },
            ) => {
                may.retain(|feature| other_may.contains(feature));
                always.extend(other_always.iter().copied());
                // A feature cannot always be present but never be present.
                if !always.is_subset(may) {
                    *self = FeatureMayAlwaysSet::Bottom;
                }
            }
        }
    }
}

impl HasTop for FeatureMayAlwaysSet {
    fn top() -> Self {
        FeatureMayAlwaysSet::Top
    }

    fn is_top(&self) -> bool {
        matches!(self, FeatureMayAlwaysSet::Top)
    }
}

impl fmt::Display for FeatureMayAlwaysSet {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FeatureMayAlwaysSet::Top => write!(formatter, "T"),
            FeatureMayAlwaysSet::Bottom => write!(formatter, "_|_"),
            FeatureMayAlwaysSet::Value { may, always } => {
                if may.is_empty() {
                    write!(formatter, "{{}}")
                } else {
                    write!(
                        formatter,
                        "{{may=[{}], always=[{}]}}",
                        may.iter().map(|feature| feature.0).join(", "),
                        always.iter().map(|feature| feature.0).join(", "),
                    )
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn may_always(may: &[u32], always: &[u32]) -> FeatureMayAlwaysSet {
        let mut result = FeatureMayAlwaysSet::make_may(may.iter().map(|id| FeatureId(*id)));
        result.add(&FeatureMayAlwaysSet::make_always(
            always.iter().map(|id| FeatureId(*id)),
        ));
        result
    }

    #[test]
    fn feature_lattice_laws() {
        crate::abstract_domain::tests::check_lattice_laws(&[
            FeatureMayAlwaysSet::Bottom,
            FeatureMayAlwaysSet::empty(),
            may_always(&[1], &[]),
            may_always(&[1], &[1]),
            may_always(&[1, 2], &[2]),
            FeatureMayAlwaysSet::Top,
        ]);
    }

    #[test]
    fn join_intersects_always_features() {
        let mut features = may_always(&[1, 2], &[1, 2]);
        features.join_with(&may_always(&[2, 3], &[2, 3]));
        assert_eq!(features, may_always(&[1, 2, 3], &[2]));
    }

    #[test]
    fn add_keeps_always_features() {
        let mut features = may_always(&[1], &[1]);
        features.add(&may_always(&[2], &[2]));
        assert_eq!(features, may_always(&[1, 2], &[1, 2]));

        let mut features = FeatureMayAlwaysSet::Bottom;
        features.add(&may_always(&[1], &[1]));
        assert_eq!(features, may_always(&[1], &[1]));
    }

    #[test]
    fn always_features_are_may_features() {
        let mut features = FeatureMayAlwaysSet::empty();
        features.add_always(FeatureId(1));
        assert!(features.may().contains(&FeatureId(1)));
        assert!(features.always().contains(&FeatureId(1)));

        let from_parts = FeatureMayAlwaysSet::new(
            &FeatureSet::empty(),
            &FeatureSet::singleton(FeatureId(1)),
        );
        assert_eq!(from_parts, features);
    }

    #[test]
    fn ordering_is_may_up_always_down() {
        assert!(may_always(&[1], &[1]).leq(&may_always(&[1, 2], &[1])));
        assert!(may_always(&[1], &[1]).leq(&may_always(&[1], &[])));
        assert!(!may_always(&[1], &[]).leq(&may_always(&[1], &[1])));
        assert!(FeatureMayAlwaysSet::empty().leq(&FeatureMayAlwaysSet::Top));
        assert!(FeatureMayAlwaysSet::Bottom.leq(&FeatureMayAlwaysSet::empty()));
    }

    #[test]
    fn contradictory_meet_is_bottom() {
        let mut features = may_always(&[1], &[1]);
        features.meet_with(&may_always(&[2], &[2]));
        assert!(features.is_bottom());
    }

    #[test]
    fn empty_is_not_bottom() {
        assert!(!FeatureMayAlwaysSet::empty().is_bottom());
        assert!(FeatureMayAlwaysSet::empty().is_empty());
        assert!(!FeatureMayAlwaysSet::Bottom.is_empty());
        assert!(FeatureMayAlwaysSet::Bottom.is_bottom());
    }
}
