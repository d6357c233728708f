use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{AbstractDomain, DifferenceDomain, HasTop};

/// A `DomainMap<Key, Value, MapMergeStrategy>` is a wrapper type around a `BTreeMap<Key, Value>`
/// where the `Value` type is an abstract domain and the map itself is also an abstract domain.
///
/// For example, a map from memory locations to the taint trees rooted at them
/// can be represented by a `DomainMap`.
///
/// A `DomainMap` has two main advantages over a regular `BTreeMap`:
/// * The map itself is wrapped into an `Arc<..>` to enable cheap cloning of `DomainMaps`.
/// * The `DomainMap` automatically implements the [`AbstractDomain`] trait
///   according to the provided [`MapMergeStrategy`] used for joining two maps.
///
/// Since a `DomainMap` implements the `Deref` and `DerefMut` traits with target the inner `BTreeMap`,
/// it can be used just like a `BTreeMap`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct DomainMap<K, V, S>
where
    K: PartialOrd + Ord + Clone,
    V: AbstractDomain,
    S: MapMergeStrategy<K, V>,
{
    inner: Arc<BTreeMap<K, V>>,
    phantom: PhantomData<S>,
}

impl<K, V, S> Deref for DomainMap<K, V, S>
where
    K: PartialOrd + Ord + Clone,
    V: AbstractDomain,
    S: MapMergeStrategy<K, V>,
{
    type Target = BTreeMap<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<K, V, S> DerefMut for DomainMap<K, V, S>
where
    K: PartialOrd + Ord + Clone,
    V: AbstractDomain,
    S: MapMergeStrategy<K, V>,
{
    fn deref_mut(&mut self) -> &mut BTreeMap<K, V> {
        Arc::make_mut(&mut self.inner)
    }
}

impl<K, V, S> From<BTreeMap<K, V>> for DomainMap<K, V, S>
where
    K: PartialOrd + Ord + Clone,
    V: AbstractDomain,
    S: MapMergeStrategy<K, V>,
{
    /// Generate a new `DomainMap` from the `BTreeMap` that it should contain.
    fn from(map: BTreeMap<K, V>) -> Self {
        DomainMap {
            inner: Arc::new(map),
            phantom: PhantomData,
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for DomainMap<K, V, S>
where
    K: PartialOrd + Ord + Clone,
    V: AbstractDomain,
    S: MapMergeStrategy<K, V>,
{
    /// Generate a new `DomainMap` from an iterator over the key-value pairs that it should contain.
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
    {
        DomainMap {
            inner: Arc::new(iter.into_iter().collect()),
            phantom: PhantomData,
        }
    }
}

impl<K, V, S> Default for DomainMap<K, V, S>
where
    K: PartialOrd + Ord + Clone,
    V: AbstractDomain,
    S: MapMergeStrategy<K, V> + Clone + Eq,
{
    fn default() -> Self {
        Self::bottom()
    }
}

impl<K, V, S> DomainMap<K, V, S>
where
    K: PartialOrd + Ord + Clone,
    V: AbstractDomain,
    S: MapMergeStrategy<K, V>,
{
    /// Returns the value for the given key,
    /// or the bottom value if the key is not present in the map.
    ///
    /// This matches the implicit-bottom reading of [`UnionMergeStrategy`]
    /// maps; callers using [`MergeTopStrategy`] maps must treat absent keys
    /// as top themselves.
    pub fn get_or_bottom(&self, key: &K) -> V {
        self.inner.get(key).cloned().unwrap_or_else(V::bottom)
    }

    /// Joins `value` into the entry for `key`.
    /// Joining a bottom value is a no-op.
    pub fn update_with(&mut self, key: K, value: V) {
        if value.is_bottom() {
            return;
        }
        match Arc::make_mut(&mut self.inner).entry(key) {
            std::collections::btree_map::Entry::Occupied(mut entry) => {
                entry.get_mut().join_with(&value);
            }
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(value);
            }
        }
    }

    /// Removes entries whose value is bottom.
    /// Bottom entries carry no information for union-style maps
    /// and would break structural equality checks.
    pub fn prune_bottom(&mut self) {
        if self.inner.values().any(|value| value.is_bottom()) {
            Arc::make_mut(&mut self.inner).retain(|_, value| !value.is_bottom());
        }
    }
}

impl<K, V, S> AbstractDomain for DomainMap<K, V, S>
where
    K: PartialOrd + Ord + Clone,
    V: AbstractDomain,
    S: MapMergeStrategy<K, V> + Clone + Eq,
{
    fn bottom() -> Self {
        DomainMap {
            inner: Arc::new(BTreeMap::new()),
            phantom: PhantomData,
        }
    }

    fn is_bottom(&self) -> bool {
        self.inner.is_empty()
    }

    fn leq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        S::leq_map(&self.inner, &other.inner)
    }

    fn join_with(&mut self, other: &Self) {
        if self == other {
            return;
        }
        *self = DomainMap {
            inner: Arc::new(S::join_map(&self.inner, &other.inner)),
            phantom: PhantomData,
        };
    }

    fn widen_with(&mut self, other: &Self) {
        if self == other {
            return;
        }
        *self = DomainMap {
            inner: Arc::new(S::widen_map(&self.inner, &other.inner)),
            phantom: PhantomData,
        };
    }

    fn meet_with(&mut self, other: &Self) {
        if self == other {
            return;
        }
        *self = DomainMap {
            inner: Arc::new(S::meet_map(&self.inner, &other.inner)),
            phantom: PhantomData,
        };
    }
}

impl<K, V> DifferenceDomain for DomainMap<K, V, UnionMergeStrategy>
where
    K: PartialOrd + Ord + Clone,
    V: AbstractDomain + DifferenceDomain,
{
    fn difference_with(&mut self, other: &Self) {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            *self = Self::bottom();
            return;
        }
        if other.inner.is_empty() {
            return;
        }
        Arc::make_mut(&mut self.inner).retain(|key, value| match other.inner.get(key) {
            Some(other_value) => {
                value.difference_with(other_value);
                !value.is_bottom()
            }
            None => true,
        });
    }
}

/// A `MapMergeStrategy` determines how the lattice operations
/// of a [`DomainMap`] treat keys that are only present in one of the maps.
///
/// The possible strategies are:
/// * [`UnionMergeStrategy`]: absent keys are implicitly bottom.
/// * [`IntersectMergeStrategy`]: keys absent on either side are dropped on a join.
/// * [`MergeTopStrategy`]: absent keys are implicitly top.
pub trait MapMergeStrategy<K: Ord + Clone, V: AbstractDomain> {
    /// Computes the join of two maps.
    fn join_map(map_left: &BTreeMap<K, V>, map_right: &BTreeMap<K, V>) -> BTreeMap<K, V>;

    /// Computes the widening of two maps.
    /// Pointwise widening on common keys; absent keys as in the join.
    fn widen_map(map_left: &BTreeMap<K, V>, map_right: &BTreeMap<K, V>) -> BTreeMap<K, V>;

    /// Computes the meet of two maps.
    fn meet_map(map_left: &BTreeMap<K, V>, map_right: &BTreeMap<K, V>) -> BTreeMap<K, V>;

    /// Returns whether `map_left` is less than or equal to `map_right`
    /// in the partial order induced by the strategy.
    fn leq_map(map_left: &BTreeMap<K, V>, map_right: &BTreeMap<K, V>) -> bool;
}

/// A [`MapMergeStrategy`] where key-value pairs whose key is only present in one input map
/// are added unchanged to the joined map.
///
/// The strategy is meant to be used for partition-like maps
/// where the values associated to keys not present in the map
/// have an implicit bottom value of the value abstract domain associated to them.
/// Values that become bottom are removed from the map.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct UnionMergeStrategy {
    _private: (), // Marker to prevent instantiation
}

impl UnionMergeStrategy {
    fn join_or_widen<K: Ord + Clone, V: AbstractDomain>(
        map_left: &BTreeMap<K, V>,
        map_right: &BTreeMap<K, V>,
        combine: fn(&mut V, &V),
    ) -> BTreeMap<K, V> {
        let mut joined_map = map_left.clone();
        for (key, value_right) in map_right.iter() {
            joined_map
                .entry(key.clone())
                .and_modify(|value| {
                    combine(value, value_right);
                })
                .or_insert_with(|| value_right.clone());
        }
        joined_map.retain(|_, value| !value.is_bottom());
        joined_map
    }
}

impl<K: Ord + Clone, V: AbstractDomain> MapMergeStrategy<K, V> for UnionMergeStrategy {
    fn join_map(map_left: &BTreeMap<K, V>, map_right: &BTreeMap<K, V>) -> BTreeMap<K, V> {
        Self::join_or_widen(map_left, map_right, V::join_with)
    }

    fn widen_map(map_left: &BTreeMap<K, V>, map_right: &BTreeMap<K, V>) -> BTreeMap<K, V> {
        Self::join_or_widen(map_left, map_right, V::widen_with)
    }

    fn meet_map(map_left: &BTreeMap<K, V>, map_right: &BTreeMap<K, V>) -> BTreeMap<K, V> {
        let mut met_map = BTreeMap::new();
        for (key, value_left) in map_left.iter() {
            if let Some(value_right) = map_right.get(key) {
                let met_value = value_left.meet(value_right);
                if !met_value.is_bottom() {
                    met_map.insert(key.clone(), met_value);
                }
            }
        }
        met_map
    }

    fn leq_map(map_left: &BTreeMap<K, V>, map_right: &BTreeMap<K, V>) -> bool {
        map_left.iter().all(|(key, value_left)| match map_right.get(key) {
            Some(value_right) => value_left.leq(value_right),
            None => value_left.is_bottom(),
        })
    }
}

/// A [`MapMergeStrategy`] where the join only keeps keys
/// that are present in both input maps.
///
/// The strategy is meant to be used for maps of must-information, where a
/// key missing from a map carries no claim: a fact absent on one side of a
/// join cannot survive it. Unlike [`MergeTopStrategy`] the value domain
/// needs no top element, since keys present on only one side are dropped
/// outright.
///
/// Note that the empty map is the greatest element of this domain, not the
/// bottom element.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct IntersectMergeStrategy {
    _private: (), // Marker to prevent instantiation
}

impl IntersectMergeStrategy {
    fn join_or_widen<K: Ord + Clone, V: AbstractDomain>(
        map_left: &BTreeMap<K, V>,
        map_right: &BTreeMap<K, V>,
        combine: fn(&mut V, &V),
    ) -> BTreeMap<K, V> {
        let mut joined_map = BTreeMap::new();
        for (key, value_left) in map_left.iter() {
            if let Some(value_right) = map_right.get(key) {
                let mut joined_value = value_left.clone();
                combine(&mut joined_value, value_right);
                joined_map.insert(key.clone(), joined_value);
            }
        }
        joined_map
    }
}

impl<K: Ord + Clone, V: AbstractDomain> MapMergeStrategy<K, V> for IntersectMergeStrategy {
    fn join_map(map_left: &BTreeMap<K, V>, map_right: &BTreeMap<K, V>) -> BTreeMap<K, V> {
        Self::join_or_widen(map_left, map_right, V::join_with)
    }

    fn widen_map(map_left: &BTreeMap<K, V>, map_right: &BTreeMap<K, V>) -> BTreeMap<K, V> {
        Self::join_or_widen(map_left, map_right, V::widen_with)
    }

    fn meet_map(map_left: &BTreeMap<K, V>, map_right: &BTreeMap<K, V>) -> BTreeMap<K, V> {
        let mut met_map = map_left.clone();
        for (key, value_right) in map_right.iter() {
            met_map
                .entry(key.clone())
                .and_modify(|value| value.meet_with(value_right))
                .or_insert_with(|| value_right.clone());
        }
        met_map
    }

    fn leq_map(map_left: &BTreeMap<K, V>, map_right: &BTreeMap<K, V>) -> bool {
        map_right.iter().all(|(key, value_right)| match map_left.get(key) {
            Some(value_left) => value_left.leq(value_right),
            None => false,
        })
    }
}

/// A [`MapMergeStrategy`] where keys not present in a map are implicitly top.
/// On a join, keys present in only one input are dropped (their join with
/// the implicit top is top), and values that join to top are removed.
///
/// The strategy is meant to be used for environment-like maps, e.g. the map
/// from registers to their possible memory locations: a register missing
/// from the map may hold anything.
///
/// Note that the empty map is the top element of this domain, not the
/// bottom element. Unreachable program points are represented by the
/// absence of a map in the fixpoint state, never by a special map value.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct MergeTopStrategy {
    _private: (), // Marker to prevent instantiation
}

impl MergeTopStrategy {
    fn join_or_widen<K: Ord + Clone, V: AbstractDomain + HasTop>(
        map_left: &BTreeMap<K, V>,
        map_right: &BTreeMap<K, V>,
        combine: fn(&mut V, &V),
    ) -> BTreeMap<K, V> {
        let mut joined_map = BTreeMap::new();
        for (key, value_left) in map_left.iter() {
            if let Some(value_right) = map_right.get(key) {
                let mut joined_value = value_left.clone();
                combine(&mut joined_value, value_right);
                if !joined_value.is_top() {
                    joined_map.insert(key.clone(), joined_value);
                }
            }
        }
        joined_map
    }
}

impl<K: Ord + Clone, V: AbstractDomain + HasTop> MapMergeStrategy<K, V> for MergeTopStrategy {
    fn join_map(map_left: &BTreeMap<K, V>, map_right: &BTreeMap<K, V>) -> BTreeMap<K, V> {
        Self::join_or_widen(map_left, map_right, V::join_with)
    }

    fn widen_map(map_left: &BTreeMap<K, V>, map_right: &BTreeMap<K, V>) -> BTreeMap<K, V> {
        Self::join_or_widen(map_left, map_right, V::widen_with)
    }

    fn meet_map(map_left: &BTreeMap<K, V>, map_right: &BTreeMap<K, V>) -> BTreeMap<K, V> {
        let mut met_map = map_left.clone();
        for (key, value_right) in map_right.iter() {
            met_map
                .entry(key.clone())
                .and_modify(|value| value.meet_with(value_right))
                .or_insert_with(|| value_right.clone());
        }
        met_map
    }

    fn leq_map(map_left: &BTreeMap<K, V>, map_right: &BTreeMap<K, V>) -> bool {
        map_right.iter().all(|(key, value_right)| match map_left.get(key) {
            Some(value_left) => value_left.leq(value_right),
            None => value_right.is_top(),
        })
    }
}
