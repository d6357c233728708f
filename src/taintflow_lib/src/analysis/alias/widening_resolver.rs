//! Widened, fully resolved view of a points-to environment.
//!
//! The points-to trees of a [`PointsToEnvironment`] may form cycles, e.g.
//! for code that builds a circular linked list. The resolver computes the
//! strongly connected components of the points-to graph and collapses each
//! component into a single node, represented by one of its members. The
//! widened graph is acyclic, so every root location can be resolved to a
//! finite tree of the locations reachable from it. Edges into a collapsed
//! component are marked with collapse depth zero: taint flowing through
//! them loses its tree structure, which keeps the analysis sound without
//! tracking the cycle.

use std::collections::BTreeSet;

use fnv::FnvHashMap;
use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::abstract_domain::UpdateKind;
use crate::analysis::alias::points_to::{
    AliasingProperties, PointsToEnvironment, PointsToSet, PointsToTree,
};
use crate::analysis::memory_location::MemoryLocationId;
use crate::prelude::*;

/// The strongly connected components of a points-to environment.
///
/// Every component is represented by its head, the member with the smallest
/// location handle.
#[derive(Debug, Default)]
pub struct WidenedPointsToComponents {
    components: FnvHashMap<MemoryLocationId, BTreeSet<MemoryLocationId>>,
    member_to_head: FnvHashMap<MemoryLocationId, MemoryLocationId>,
}

impl WidenedPointsToComponents {
    fn insert_component(&mut self, members: BTreeSet<MemoryLocationId>) {
        let Some(head) = members.first().copied() else {
            return;
        };
        for member in &members {
            self.member_to_head.insert(*member, head);
        }
        self.components.insert(head, members);
    }

    /// Returns the head of the component the given location belongs to,
    /// or `None` if the location is not part of a cycle.
    pub fn get_head(&self, location: MemoryLocationId) -> Option<MemoryLocationId> {
        self.member_to_head.get(&location).copied()
    }

    /// Returns the members of the component the given location belongs to.
    pub fn component(&self, location: MemoryLocationId) -> Option<&BTreeSet<MemoryLocationId>> {
        self.components.get(&self.get_head(location)?)
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// Resolves root memory locations of a points-to environment to the full
/// tree of locations reachable from them, with cycles widened away.
#[derive(Debug)]
pub struct WideningPointsToResolver {
    widened_components: WidenedPointsToComponents,
    resolved_aliases: FnvHashMap<MemoryLocationId, PointsToTree>,
}

impl WideningPointsToResolver {
    pub fn new(environment: &PointsToEnvironment) -> Self {
        let mut graph: DiGraph<MemoryLocationId, ()> = DiGraph::new();
        let mut graph_nodes: FnvHashMap<MemoryLocationId, NodeIndex> = FnvHashMap::default();
        for (root, tree) in environment.iter() {
            let root_node = graph_node(&mut graph, &mut graph_nodes, *root);
            for (_path, points_to_set) in tree.elements() {
                for (target, _properties) in points_to_set.iter() {
                    let target_node = graph_node(&mut graph, &mut graph_nodes, target);
                    graph.update_edge(root_node, target_node, ());
                }
            }
        }

        // Components in reverse topological order:
        // the targets of an edge between components come first.
        let components_ordering = kosaraju_scc(&graph);

        let mut widened_components = WidenedPointsToComponents::default();
        for component in &components_ordering {
            let is_cycle = component.len() > 1
                || component
                    .iter()
                    .any(|node| graph.contains_edge(*node, *node));
            if is_cycle {
                widened_components
                    .insert_component(component.iter().map(|node| graph[*node]).collect());
            }
        }

        let widened_environment = build_widened_environment(environment, &widened_components);

        // Resolve in reverse topological order, so that the resolution of
        // all targets of a tree is already known when the tree is resolved.
        let mut resolved_aliases: FnvHashMap<MemoryLocationId, PointsToTree> =
            FnvHashMap::default();
        for component in &components_ordering {
            let Some(representative) = component.first() else {
                continue;
            };
            let location = graph[*representative];
            let head = widened_components.get_head(location).unwrap_or(location);
            if resolved_aliases.contains_key(&head) {
                continue;
            }

            let mut resolved_tree = PointsToTree::bottom();
            if let Some(tree) = widened_environment.tree(head) {
                for (inner_path, points_to_set) in tree.elements() {
                    debug_assert!(!inner_path.is_empty());
                    for (target, properties) in points_to_set.iter() {
                        debug_assert!(resolved_aliases.contains_key(&target));
                        let target_resolved = resolved_aliases
                            .get(&target)
                            .cloned()
                            .unwrap_or_else(|| PointsToTree::leaf(PointsToSet::singleton(target)));
                        resolved_tree.write_tree(
                            &inner_path,
                            with_edge_properties(target_resolved, properties),
                            UpdateKind::Weak,
                        );
                    }
                }
            }

            // Reads from a collapsed component must lose their tree
            // structure, so the self-resolution of a head carries the
            // collapse marker.
            let self_properties = if widened_components.get_head(head).is_some() {
                AliasingProperties::always_collapse()
            } else {
                AliasingProperties::empty()
            };
            resolved_tree.write(
                &[],
                PointsToSet::with_properties(head, self_properties),
                UpdateKind::Weak,
            );
            resolved_aliases.insert(head, resolved_tree);
        }

        WideningPointsToResolver {
            widened_components,
            resolved_aliases,
        }
    }

    /// Returns the resolved points-to tree of the given root location.
    ///
    /// Members of a widened component resolve to the tree of their head.
    /// Locations without aliasing information resolve to themselves.
    pub fn resolved_aliases(&self, root: MemoryLocationId) -> PointsToTree {
        let root = self.widened_components.get_head(root).unwrap_or(root);
        match self.resolved_aliases.get(&root) {
            Some(tree) => tree.clone(),
            None => PointsToTree::leaf(PointsToSet::singleton(root)),
        }
    }

    pub fn components(&self) -> &WidenedPointsToComponents {
        &self.widened_components
    }
}

fn graph_node(
    graph: &mut DiGraph<MemoryLocationId, ()>,
    graph_nodes: &mut FnvHashMap<MemoryLocationId, NodeIndex>,
    location: MemoryLocationId,
) -> NodeIndex {
    *graph_nodes
        .entry(location)
        .or_insert_with(|| graph.add_node(location))
}

/// Rewrites the environment such that all edges between members of the same
/// component disappear and all edges into a component lead to its head,
/// marked to collapse. The trees of all members of a component are merged
/// into the entry of the head. The result is acyclic.
fn build_widened_environment(
    environment: &PointsToEnvironment,
    widened_components: &WidenedPointsToComponents,
) -> PointsToEnvironment {
    let mut widened_environment = PointsToEnvironment::bottom();
    for (root, tree) in environment.iter() {
        let head = widened_components.get_head(*root).unwrap_or(*root);
        let mut contribution = PointsToTree::bottom();
        for (path, points_to_set) in tree.elements() {
            let mut widened_set = PointsToSet::bottom();
            for (target, properties) in points_to_set.iter() {
                match widened_components.get_head(target) {
                    // An edge within the component. The whole component is
                    // represented by the head, so the edge disappears.
                    Some(target_head) if target_head == head => continue,
                    Some(target_head) => {
                        let mut widened_properties = properties.clone();
                        widened_properties.set_always_collapse();
                        widened_set.update_aliasing_properties(target_head, widened_properties);
                    }
                    None => {
                        widened_set.update_aliasing_properties(target, properties.clone());
                    }
                }
            }
            if !widened_set.is_bottom() {
                contribution.write(&path, widened_set, UpdateKind::Weak);
            }
        }
        widened_environment.join_tree(head, contribution);
    }
    widened_environment
}

/// Embeds a resolved tree under an edge: the properties of the edge replace
/// the properties of the tree root, while deeper nodes keep the properties
/// of their own final edge.
fn with_edge_properties(tree: PointsToTree, properties: &AliasingProperties) -> PointsToTree {
    let mut result = PointsToTree::bottom();
    for (path, points_to_set) in tree.elements() {
        if path.is_empty() {
            result.write(
                &path,
                points_to_set.with_aliasing_properties(properties.clone()),
                UpdateKind::Weak,
            );
        } else {
            result.write(&path, points_to_set.clone(), UpdateKind::Weak);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::memory_location::MemoryFactory;
    use crate::intermediate_representation::{
        InstructionId, Method, PathElement, StringId, TypeId,
    };

    fn test_method() -> Method {
        Method::new(TypeId(0), StringId(0), vec![TypeId(0)], None, true, None)
    }

    fn field_x() -> StringId {
        StringId(10)
    }

    fn field_y() -> StringId {
        StringId(11)
    }

    fn set_at(tree: &PointsToTree, path: &[PathElement]) -> PointsToSet {
        let (remaining, subtree) = tree.raw_read_max_path(path);
        assert!(remaining.is_empty(), "no value stored at {path:?}");
        subtree.root().clone()
    }

    #[test]
    fn acyclic_environments_resolve_fully() {
        let mut factory = MemoryFactory::new(&test_method());
        let parameter = factory.make_parameter(0).unwrap();
        let object = factory.make_location(InstructionId(0));
        let inner = factory.make_location(InstructionId(1));

        let mut environment = PointsToEnvironment::default();
        environment.write(
            &factory,
            parameter,
            field_x(),
            PointsToSet::singleton(object),
            UpdateKind::Strong,
        );
        environment.write(
            &factory,
            object,
            field_y(),
            PointsToSet::singleton(inner),
            UpdateKind::Strong,
        );

        let resolver = WideningPointsToResolver::new(&environment);
        assert!(resolver.components().is_empty());

        let resolved = resolver.resolved_aliases(parameter);
        assert_eq!(set_at(&resolved, &[]), PointsToSet::singleton(parameter));
        assert_eq!(
            set_at(&resolved, &[PathElement::Field(field_x())]),
            PointsToSet::singleton(object)
        );
        assert_eq!(
            set_at(
                &resolved,
                &[PathElement::Field(field_x()), PathElement::Field(field_y())]
            ),
            PointsToSet::singleton(inner)
        );

        // Unknown locations resolve to themselves.
        let unknown = factory.make_location(InstructionId(7));
        assert_eq!(
            resolver.resolved_aliases(unknown),
            PointsToTree::leaf(PointsToSet::singleton(unknown))
        );
    }

    #[test]
    fn cycles_collapse_into_a_widened_component() {
        let mut factory = MemoryFactory::new(&test_method());
        let parameter = factory.make_parameter(0).unwrap();
        let object = factory.make_location(InstructionId(0));

        let mut environment = PointsToEnvironment::default();
        environment.write(
            &factory,
            parameter,
            field_x(),
            PointsToSet::singleton(object),
            UpdateKind::Strong,
        );
        environment.write(
            &factory,
            object,
            field_y(),
            PointsToSet::singleton(parameter),
            UpdateKind::Strong,
        );

        let resolver = WideningPointsToResolver::new(&environment);
        let components = resolver.components();
        assert_eq!(components.get_head(parameter), Some(parameter));
        assert_eq!(components.get_head(object), Some(parameter));

        // Both members resolve to the head, marked to collapse.
        for member in [parameter, object] {
            let resolved = resolver.resolved_aliases(member);
            let root_set = set_at(&resolved, &[]);
            assert!(root_set.contains(parameter));
            let (_, properties) = root_set.iter().next().unwrap();
            assert!(properties.collapse_depth().is_zero());
            assert!(resolved.successors().is_empty());
        }
    }

    #[test]
    fn edges_into_a_component_lead_to_its_head() {
        let mut factory = MemoryFactory::new(&test_method());
        let parameter = factory.make_parameter(0).unwrap();
        let first = factory.make_location(InstructionId(0));
        let second = factory.make_location(InstructionId(1));

        let mut environment = PointsToEnvironment::default();
        environment.write(
            &factory,
            parameter,
            field_x(),
            PointsToSet::singleton(first),
            UpdateKind::Strong,
        );
        environment.write(
            &factory,
            first,
            field_x(),
            PointsToSet::singleton(second),
            UpdateKind::Strong,
        );
        environment.write(
            &factory,
            second,
            field_y(),
            PointsToSet::singleton(first),
            UpdateKind::Strong,
        );

        let resolver = WideningPointsToResolver::new(&environment);
        let head = resolver.components().get_head(first);
        assert!(head.is_some());
        assert_eq!(resolver.components().get_head(second), head);
        assert_eq!(resolver.components().get_head(parameter), None);

        let resolved = resolver.resolved_aliases(parameter);
        let targets = set_at(&resolved, &[PathElement::Field(field_x())]);
        let (target, properties) = targets.iter().next().unwrap();
        assert_eq!(Some(target), head);
        assert!(properties.collapse_depth().is_zero());
    }
}
