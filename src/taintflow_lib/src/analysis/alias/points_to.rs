//! The points-to layer of the alias analysis.
//!
//! Tracking which memory locations each register may hold is not enough to
//! interpret field writes: after `v0.f = v1`, taint flowing into the object
//! held by `v1` must be visible through every register aliasing `v0.f`.
//! This module tracks, for each root memory location, a [`PointsToTree`]
//! describing which root locations its fields point to, and resolves reads
//! and writes through that aliasing structure.

use std::collections::{BTreeMap, HashSet};

use crate::abstract_domain::{
    AbstractTreeDomain, DifferenceDomain, DomainMap, TreeConfig, UnionMergeStrategy, UpdateKind,
};
use crate::analysis::memory_location::{MemoryFactory, MemoryLocationId, MemoryLocationsDomain};
use crate::config::ABSTRACT_TREE_WIDENING_HEIGHT;
use crate::intermediate_representation::{PathElement, PositionId, StringId};
use crate::prelude::*;
use crate::taint::{CollapseDepth, FeatureMayAlwaysSet, LocalPositionSet};

/// The properties of a single points-to edge.
///
/// When taint flows through an alias edge, the positions and features
/// collected on the edge are attached to the taint. The collapse depth
/// bounds how much taint tree structure flows through the edge: a collapse
/// depth of zero marks a widened edge whose taint is collapsed into a
/// single node.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct AliasingProperties {
    local_positions: LocalPositionSet,
    locally_inferred_features: FeatureMayAlwaysSet,
    collapse_depth: CollapseDepth,
}

impl AliasingProperties {
    /// Returns properties carrying no information.
    pub fn empty() -> Self {
        AliasingProperties {
            local_positions: LocalPositionSet::empty(),
            locally_inferred_features: FeatureMayAlwaysSet::bottom(),
            collapse_depth: CollapseDepth::bottom(),
        }
    }

    /// Returns the properties of a widened edge.
    pub fn always_collapse() -> Self {
        AliasingProperties {
            local_positions: LocalPositionSet::empty(),
            locally_inferred_features: FeatureMayAlwaysSet::bottom(),
            collapse_depth: CollapseDepth::zero(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.is_bottom()
    }

    pub fn local_positions(&self) -> &LocalPositionSet {
        &self.local_positions
    }

    pub fn locally_inferred_features(&self) -> &FeatureMayAlwaysSet {
        &self.locally_inferred_features
    }

    pub fn collapse_depth(&self) -> CollapseDepth {
        self.collapse_depth
    }

    pub fn add_local_position(&mut self, position: PositionId) {
        self.local_positions.insert(position);
    }

    pub fn add_locally_inferred_features(&mut self, features: &FeatureMayAlwaysSet) {
        if features.is_bottom() || features.is_empty() {
            return;
        }
        self.locally_inferred_features.add(features);
    }

    /// Marks the edge as widened.
    pub fn set_always_collapse(&mut self) {
        self.collapse_depth = CollapseDepth::zero();
    }
}

impl AbstractDomain for AliasingProperties {
    fn bottom() -> Self {
        Self::empty()
    }

    fn is_bottom(&self) -> bool {
        self.local_positions.is_bottom()
            && self.locally_inferred_features.is_bottom()
            && self.collapse_depth.is_bottom()
    }

    fn leq(&self, other: &Self) -> bool {
        self.local_positions.leq(&other.local_positions)
            && self
                .locally_inferred_features
                .leq(&other.locally_inferred_features)
            && self.collapse_depth.leq(&other.collapse_depth)
    }

    fn join_with(&mut self, other: &Self) {
        self.local_positions.join_with(&other.local_positions);
        self.locally_inferred_features
            .join_with(&other.locally_inferred_features);
        self.collapse_depth.join_with(&other.collapse_depth);
    }

    fn widen_with(&mut self, other: &Self) {
        self.local_positions.widen_with(&other.local_positions);
        self.locally_inferred_features
            .widen_with(&other.locally_inferred_features);
        self.collapse_depth.widen_with(&other.collapse_depth);
    }

    fn meet_with(&mut self, other: &Self) {
        self.local_positions.meet_with(&other.local_positions);
        self.locally_inferred_features
            .meet_with(&other.locally_inferred_features);
        self.collapse_depth.meet_with(&other.collapse_depth);
    }
}

impl DifferenceDomain for AliasingProperties {
    fn difference_with(&mut self, other: &Self) {
        if self.local_positions.leq(&other.local_positions) {
            self.local_positions = LocalPositionSet::empty();
        }
        if self
            .locally_inferred_features
            .leq(&other.locally_inferred_features)
        {
            self.locally_inferred_features = FeatureMayAlwaysSet::bottom();
        }
        self.collapse_depth.difference_with(&other.collapse_depth);
    }
}

/// A set of memory locations that a field of an object may point to,
/// with the aliasing properties of each edge.
///
/// The elements are always root memory locations: aliasing between field
/// locations is expressed through the tree structure of [`PointsToTree`].
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct PointsToSet {
    targets: BTreeMap<MemoryLocationId, AliasingProperties>,
}

impl PointsToSet {
    pub fn singleton(location: MemoryLocationId) -> Self {
        Self::with_properties(location, AliasingProperties::empty())
    }

    pub fn with_properties(location: MemoryLocationId, properties: AliasingProperties) -> Self {
        PointsToSet {
            targets: BTreeMap::from([(location, properties)]),
        }
    }

    /// Generates the set of the given locations, with empty properties.
    pub fn from_locations(locations: &MemoryLocationsDomain) -> Self {
        debug_assert!(!locations.is_top());
        PointsToSet {
            targets: locations
                .iter()
                .map(|location| (*location, AliasingProperties::empty()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn contains(&self, location: MemoryLocationId) -> bool {
        self.targets.contains_key(&location)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MemoryLocationId, &AliasingProperties)> {
        self.targets
            .iter()
            .map(|(location, properties)| (*location, properties))
    }

    /// Returns the locations of the set, without their properties.
    pub fn locations(&self) -> MemoryLocationsDomain {
        let mut locations = MemoryLocationsDomain::empty();
        for location in self.targets.keys() {
            locations.insert(*location);
        }
        locations
    }

    pub fn add_local_position(&mut self, position: PositionId) {
        for properties in self.targets.values_mut() {
            properties.add_local_position(position);
        }
    }

    pub fn add_locally_inferred_features(&mut self, features: &FeatureMayAlwaysSet) {
        for properties in self.targets.values_mut() {
            properties.add_locally_inferred_features(features);
        }
    }

    /// Joins the given properties into the entry of the given location,
    /// inserting the location if it is not in the set.
    pub fn update_aliasing_properties(
        &mut self,
        location: MemoryLocationId,
        properties: AliasingProperties,
    ) {
        self.targets
            .entry(location)
            .and_modify(|existing| existing.join_with(&properties))
            .or_insert(properties);
    }

    /// Returns the set with the properties of every entry replaced.
    pub fn with_aliasing_properties(&self, properties: AliasingProperties) -> Self {
        PointsToSet {
            targets: self
                .targets
                .keys()
                .map(|location| (*location, properties.clone()))
                .collect(),
        }
    }

    /// Marks all edges of the set as widened.
    pub fn set_always_collapse(&mut self) {
        for properties in self.targets.values_mut() {
            properties.set_always_collapse();
        }
    }
}

impl AbstractDomain for PointsToSet {
    fn bottom() -> Self {
        PointsToSet::default()
    }

    fn is_bottom(&self) -> bool {
        self.targets.is_empty()
    }

    fn leq(&self, other: &Self) -> bool {
        self.targets.iter().all(|(location, properties)| {
            other
                .targets
                .get(location)
                .is_some_and(|other_properties| properties.leq(other_properties))
        })
    }

    fn join_with(&mut self, other: &Self) {
        for (location, other_properties) in other.targets.iter() {
            self.targets
                .entry(*location)
                .and_modify(|properties| properties.join_with(other_properties))
                .or_insert_with(|| other_properties.clone());
        }
    }

    fn widen_with(&mut self, other: &Self) {
        for (location, other_properties) in other.targets.iter() {
            self.targets
                .entry(*location)
                .and_modify(|properties| properties.widen_with(other_properties))
                .or_insert_with(|| other_properties.clone());
        }
    }

    fn meet_with(&mut self, other: &Self) {
        self.targets.retain(|location, _| other.contains(*location));
        for (location, properties) in self.targets.iter_mut() {
            if let Some(other_properties) = other.targets.get(location) {
                properties.meet_with(other_properties);
            }
        }
    }
}

impl DifferenceDomain for PointsToSet {
    /// Clears the properties of edges covered by `other`, but keeps the
    /// targets themselves: an alias target must never disappear during tree
    /// normalization.
    fn difference_with(&mut self, other: &Self) {
        for (location, properties) in self.targets.iter_mut() {
            if let Some(other_properties) = other.targets.get(location) {
                if properties.leq(other_properties) {
                    *properties = AliasingProperties::empty();
                }
            }
        }
    }
}

impl FromIterator<(MemoryLocationId, AliasingProperties)> for PointsToSet {
    fn from_iter<I: IntoIterator<Item = (MemoryLocationId, AliasingProperties)>>(
        iter: I,
    ) -> Self {
        PointsToSet {
            targets: iter.into_iter().collect(),
        }
    }
}

/// The tree configuration for points-to trees.
///
/// An edge of the tree is one field dereference, so values never apply to
/// paths below the node they are stored at.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct PointsToTreeConfig;

impl TreeConfig for PointsToTreeConfig {
    type PathElement = PathElement;
    type Leaf = PointsToSet;

    fn max_tree_height_after_widening() -> usize {
        ABSTRACT_TREE_WIDENING_HEIGHT
    }

    fn transform_on_widening_collapse(set: &mut PointsToSet) {
        // The tree shape below this node is no longer tracked,
        // so taint flowing through the surviving edges must be collapsed.
        set.set_always_collapse();
    }

    fn transform_on_sink(_set: PointsToSet) -> PointsToSet {
        // An alias edge describes exactly one field dereference
        // and never applies to deeper paths.
        PointsToSet::bottom()
    }

    fn transform_on_hoist(set: PointsToSet) -> PointsToSet {
        let mut set = set;
        set.set_always_collapse();
        set
    }
}

/// Maps field paths of a memory location to the locations they point to.
pub type PointsToTree = AbstractTreeDomain<PointsToTreeConfig>;

/// Maps each root memory location to the points-to tree of its fields.
///
/// The value at the root node of a stored tree is always bottom: a root
/// location trivially points to itself and needs no edge to say so.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct PointsToEnvironment {
    environment: DomainMap<MemoryLocationId, PointsToTree, UnionMergeStrategy>,
}

impl PointsToEnvironment {
    /// Returns the points-to tree of the given root location, if any.
    pub fn tree(&self, root: MemoryLocationId) -> Option<&PointsToTree> {
        self.environment.get(&root)
    }

    /// Iterates over the root locations with a points-to tree.
    pub fn iter(&self) -> impl Iterator<Item = (&MemoryLocationId, &PointsToTree)> {
        self.environment.iter()
    }

    /// Joins the given tree into the entry of the given root location.
    pub fn join_tree(&mut self, root: MemoryLocationId, tree: PointsToTree) {
        debug_assert!(tree.root().is_bottom());
        self.environment.update_with(root, tree);
    }

    /// Returns the set of root locations the given location may point to.
    ///
    /// A root location points to itself. A field location is resolved
    /// through the stored points-to trees, following edges until the
    /// remaining field path is fully consumed.
    pub fn points_to(
        &self,
        factory: &mut MemoryFactory,
        location: MemoryLocationId,
    ) -> PointsToSet {
        if factory.is_root(location) {
            return PointsToSet::singleton(location);
        }

        let mut result = PointsToSet::bottom();
        let mut worklist = vec![(factory.root(location), factory.path(location).to_vec())];
        while let Some((root, path)) = worklist.pop() {
            let Some(tree) = self.environment.get(&root) else {
                continue;
            };
            let (remaining, subtree) = tree.raw_read_max_path(&path);
            if remaining.is_empty() || subtree.is_bottom() {
                result.join_with(subtree.root());
                continue;
            }
            // The remaining path shrinks on every step, so this terminates
            // even if the points-to trees form a cycle.
            for (target, _properties) in subtree.root().iter() {
                let through_field = factory.make_field_path(target, remaining);
                worklist.push((
                    factory.root(through_field),
                    factory.path(through_field).to_vec(),
                ));
            }
        }
        result
    }

    /// Joins the points-to sets of all given locations.
    pub fn points_to_all(
        &self,
        factory: &mut MemoryFactory,
        locations: &MemoryLocationsDomain,
    ) -> PointsToSet {
        debug_assert!(!locations.is_top());
        let mut result = PointsToSet::bottom();
        for location in locations.iter() {
            result.join_with(&self.points_to(factory, *location));
        }
        result
    }

    /// Resolves the aliasing structure reachable from the given root.
    ///
    /// The returned tree holds, at each field path, the set of root
    /// locations the path may point to, following points-to edges
    /// transitively. The value at the empty path is the root itself.
    pub fn resolve_aliases(&self, root: MemoryLocationId) -> PointsToTree {
        let mut resolved = PointsToTree::bottom();
        let mut visited = HashSet::new();
        self.resolve_aliases_internal(
            root,
            &[],
            AliasingProperties::empty(),
            &mut resolved,
            &mut visited,
        );
        resolved
    }

    fn resolve_aliases_internal(
        &self,
        location: MemoryLocationId,
        path: &[PathElement],
        properties: AliasingProperties,
        resolved: &mut PointsToTree,
        visited: &mut HashSet<MemoryLocationId>,
    ) {
        if !visited.insert(location) {
            // A cycle in the points-to graph. Stop following it; taint
            // flowing through the unresolved part of the cycle is dropped.
            log::warn!("Found a loop while resolving the aliases of {location}");
            return;
        }

        resolved.write(
            path,
            PointsToSet::with_properties(location, properties),
            UpdateKind::Weak,
        );

        if let Some(tree) = self.environment.get(&location) {
            for (inner_path, points_to_set) in tree.elements() {
                debug_assert!(!inner_path.is_empty());
                for (target, target_properties) in points_to_set.iter() {
                    let mut child_path = path.to_vec();
                    child_path.extend(inner_path.iter().copied());
                    self.resolve_aliases_internal(
                        target,
                        &child_path,
                        target_properties.clone(),
                        resolved,
                        visited,
                    );
                }
            }
        }

        // The visited set is scoped to the current path, so a diamond in the
        // points-to graph is resolved along both branches.
        visited.remove(&location);
    }

    /// Writes the given points-to set for a field of the given location.
    ///
    /// The location is first resolved to the root locations it may point
    /// to; the write is then performed on the trees of all of them. A
    /// strong update on more than one target is downgraded to a weak
    /// update, since only one of the targets is written at runtime.
    pub fn write(
        &mut self,
        factory: &MemoryFactory,
        memory_location: MemoryLocationId,
        field: StringId,
        points_tos: PointsToSet,
        kind: UpdateKind,
    ) {
        let root = factory.root(memory_location);
        let path = factory.path(memory_location).to_vec();

        let resolved = self.resolve_aliases(root);
        let (remaining, subtree) = resolved.raw_read_max_path(&path);
        let targets = subtree.root();

        let kind = if kind == UpdateKind::Strong && targets.len() > 1 {
            UpdateKind::Weak
        } else {
            kind
        };

        let mut full_path: Vec<PathElement> = remaining.to_vec();
        full_path.push(PathElement::Field(field));

        for (target, _properties) in targets.iter() {
            self.environment
                .entry(target)
                .or_default()
                .write_tree(&full_path, PointsToTree::leaf(points_tos.clone()), kind);
        }
        self.environment.prune_bottom();
    }
}

impl AbstractDomain for PointsToEnvironment {
    fn bottom() -> Self {
        PointsToEnvironment::default()
    }

    fn is_bottom(&self) -> bool {
        self.environment.is_bottom()
    }

    fn leq(&self, other: &Self) -> bool {
        self.environment.leq(&other.environment)
    }

    fn join_with(&mut self, other: &Self) {
        self.environment.join_with(&other.environment);
    }

    fn widen_with(&mut self, other: &Self) {
        self.environment.widen_with(&other.environment);
    }

    fn meet_with(&mut self, other: &Self) {
        self.environment.meet_with(&other.environment);
    }
}
