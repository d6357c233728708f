//! The abstract state of the per-method taint fixpoints.
//!
//! Both taint analyses track a map from root memory locations to the taint
//! trees rooted at them. Reads and writes go through the resolved aliasing
//! structure snapshotted by the alias analysis, so taint written through one
//! register is visible through every register aliasing the same object.

use std::collections::BTreeMap;

use crate::abstract_domain::{DomainMap, UnionMergeStrategy, UpdateKind};
use crate::analysis::alias::points_to::AliasingProperties;
use crate::analysis::alias::results::{InstructionAliasResults, ResolvedAliasesMap};
use crate::analysis::memory_location::{MemoryFactory, MemoryLocationId, MemoryLocationsDomain};
use crate::config::Heuristics;
use crate::intermediate_representation::{PathElement, Register};
use crate::prelude::*;
use crate::taint::{FeatureId, FeatureMayAlwaysSet, TaintTree};

/// One target of a read or write that went through the aliasing structure:
/// a root memory location, the field path into its taint tree, and the
/// properties of the alias edges followed on the way.
struct ResolvedTarget {
    root: MemoryLocationId,
    path: Vec<PathElement>,
    properties: AliasingProperties,
}

/// Resolves a memory location to the root locations its object may live in.
///
/// A location whose root has no aliasing information resolves to itself;
/// taint is then stored under the unresolved field path of the location.
fn resolve_targets(
    factory: &MemoryFactory,
    resolved_aliases: &ResolvedAliasesMap,
    location: MemoryLocationId,
) -> Vec<ResolvedTarget> {
    let root = factory.root(location);
    let path = factory.path(location);
    let resolved = resolved_aliases.get(root);
    let (remaining, subtree) = resolved.raw_read_max_path(path);

    let mut targets: Vec<ResolvedTarget> = subtree
        .root()
        .iter()
        .map(|(target, properties)| ResolvedTarget {
            root: target,
            path: remaining.to_vec(),
            properties: properties.clone(),
        })
        .collect();
    if targets.is_empty() {
        targets.push(ResolvedTarget {
            root,
            path: path.to_vec(),
            properties: AliasingProperties::empty(),
        });
    }
    targets
}

/// Attaches the positions and features collected on the followed alias edges
/// and collapses taint that flowed through a widened edge.
fn apply_aliasing_properties(
    tree: &mut TaintTree,
    properties: &AliasingProperties,
    heuristics: &Heuristics,
) {
    if properties.is_empty() {
        return;
    }
    if let Some(depth) = properties.collapse_depth().depth() {
        tree.collapse_deeper_than(
            depth as usize,
            &FeatureMayAlwaysSet::make_may([FeatureId::WIDEN_BROADENING]),
        );
    }
    tree.add_locally_inferred_features(properties.locally_inferred_features());
    if let Some(positions) = properties.local_positions().as_set() {
        for position in positions {
            tree.add_local_position(*position, heuristics.max_number_local_positions);
        }
    }
}

/// Maps root memory locations to the taint trees rooted at them.
///
/// Locations missing from the map are untainted. The forward analysis stores
/// the sources that reached each location; the backward analysis stores the
/// sinks and propagation sentinels each location flows into.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct TaintEnvironment {
    environment: DomainMap<MemoryLocationId, TaintTree, UnionMergeStrategy>,
}

impl TaintEnvironment {
    /// Returns the taint tree stored for the given root location, if any.
    pub fn tree(&self, root: MemoryLocationId) -> Option<&TaintTree> {
        self.environment.get(&root)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MemoryLocationId, &TaintTree)> {
        self.environment.iter()
    }

    /// Stores taint for a root location without consulting the aliasing
    /// structure. This is only correct for locations that are known to be
    /// unaliased, e.g. parameter locations at the method entry.
    pub fn write_unaliased(&mut self, root: MemoryLocationId, tree: TaintTree) {
        self.environment.update_with(root, tree);
    }

    /// Reads the taint of the whole object at the given memory location.
    ///
    /// The result includes the taint of every root location the object's
    /// fields may alias, nested under the field path leading there, so the
    /// taint of an object graph is visible through any location that
    /// reaches it.
    pub fn deep_read(
        &self,
        heuristics: &Heuristics,
        factory: &MemoryFactory,
        resolved_aliases: &ResolvedAliasesMap,
        location: MemoryLocationId,
    ) -> TaintTree {
        let root = factory.root(location);
        let path = factory.path(location);
        let resolved = resolved_aliases.get(root);
        let (remaining, subtree) = resolved.raw_read_max_path(path);

        let mut result = TaintTree::bottom();
        if remaining.is_empty() {
            // The aliasing structure below the location is fully resolved;
            // collect the taint of every reachable alias target.
            for (alias_path, points_to) in subtree.elements() {
                for (target, properties) in points_to.iter() {
                    let Some(tree) = self.environment.get(&target) else {
                        continue;
                    };
                    let mut taint = tree.clone();
                    apply_aliasing_properties(&mut taint, properties, heuristics);
                    result.write_tree(&alias_path, taint, UpdateKind::Weak);
                }
            }
        } else {
            for target in resolve_targets(factory, resolved_aliases, location) {
                let Some(tree) = self.environment.get(&target.root) else {
                    continue;
                };
                let mut taint = tree.read(&target.path);
                apply_aliasing_properties(&mut taint, &target.properties, heuristics);
                result.join_with(&taint);
            }
        }
        result
    }

    /// Writes taint to the given memory location through its aliases.
    ///
    /// A strong update on a location resolving to more than one target is
    /// downgraded to a weak update, since only one of the targets holds the
    /// written object at runtime.
    pub fn deep_write(
        &mut self,
        heuristics: &Heuristics,
        factory: &MemoryFactory,
        resolved_aliases: &ResolvedAliasesMap,
        location: MemoryLocationId,
        taint: TaintTree,
        kind: UpdateKind,
    ) {
        let targets = resolve_targets(factory, resolved_aliases, location);
        let kind = if kind == UpdateKind::Strong && targets.len() > 1 {
            UpdateKind::Weak
        } else {
            kind
        };
        for target in targets {
            let mut taint = taint.clone();
            apply_aliasing_properties(&mut taint, &target.properties, heuristics);
            if taint.is_bottom() && kind == UpdateKind::Weak {
                continue;
            }
            self.environment
                .entry(target.root)
                .or_default()
                .write_tree(&target.path, taint, kind);
        }
        self.environment.prune_bottom();
    }

    /// Reads the taint of all memory locations the given register may hold.
    ///
    /// Registers about which the alias analysis knows nothing hold no
    /// tracked object and therefore no taint.
    pub fn read_register(
        &self,
        heuristics: &Heuristics,
        factory: &MemoryFactory,
        alias_results: &InstructionAliasResults,
        register: Register,
    ) -> TaintTree {
        let locations = alias_results.register_memory_locations(register);
        self.read_locations(heuristics, factory, alias_results.resolved_aliases(), &locations)
    }

    /// Reads the joined taint of the given memory locations.
    pub fn read_locations(
        &self,
        heuristics: &Heuristics,
        factory: &MemoryFactory,
        resolved_aliases: &ResolvedAliasesMap,
        locations: &MemoryLocationsDomain,
    ) -> TaintTree {
        if locations.is_top() {
            return TaintTree::bottom();
        }
        let mut result = TaintTree::bottom();
        for location in locations.iter() {
            result.join_with(&self.deep_read(heuristics, factory, resolved_aliases, *location));
        }
        result
    }

    /// Writes taint to all memory locations the given register may hold.
    pub fn write_register(
        &mut self,
        heuristics: &Heuristics,
        factory: &MemoryFactory,
        alias_results: &InstructionAliasResults,
        register: Register,
        taint: TaintTree,
        kind: UpdateKind,
    ) {
        let locations = alias_results.register_memory_locations(register);
        self.write_locations(
            heuristics,
            factory,
            alias_results.resolved_aliases(),
            &locations,
            taint,
            kind,
        );
    }

    /// Writes taint to all of the given memory locations.
    pub fn write_locations(
        &mut self,
        heuristics: &Heuristics,
        factory: &MemoryFactory,
        resolved_aliases: &ResolvedAliasesMap,
        locations: &MemoryLocationsDomain,
        taint: TaintTree,
        kind: UpdateKind,
    ) {
        if locations.is_top() {
            return;
        }
        // A register holding several locations writes only one of them.
        let kind = if locations.len() == Some(1) {
            kind
        } else {
            UpdateKind::Weak
        };
        for location in locations.iter() {
            self.deep_write(
                heuristics,
                factory,
                resolved_aliases,
                *location,
                taint.clone(),
                kind,
            );
        }
    }
}

impl From<BTreeMap<MemoryLocationId, TaintTree>> for TaintEnvironment {
    fn from(map: BTreeMap<MemoryLocationId, TaintTree>) -> Self {
        TaintEnvironment {
            environment: map.into(),
        }
    }
}

impl AbstractDomain for TaintEnvironment {
    fn bottom() -> Self {
        TaintEnvironment {
            environment: DomainMap::bottom(),
        }
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
