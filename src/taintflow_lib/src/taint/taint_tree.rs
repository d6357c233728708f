use crate::abstract_domain::{
    AbstractTreeDomain, DomainMap, TreeConfig, UnionMergeStrategy, UpdateKind,
};
use crate::intermediate_representation::{AccessPath, Path, PathElement, PositionId, Root};
use crate::prelude::*;

use super::{CollapseDepth, FeatureId, FeatureMayAlwaysSet, Frame, KindId, Taint};

/// Tree configuration for taint indexed by paths into a value.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct TaintTreeConfig;

impl TreeConfig for TaintTreeConfig {
    type PathElement = PathElement;
    type Leaf = Taint;

    fn max_tree_height_after_widening() -> usize {
        crate::config::ABSTRACT_TREE_WIDENING_HEIGHT
    }

    fn transform_on_widening_collapse(taint: &mut Taint) {
        // A may-feature, since an always-feature would break `a.leq(a.widen(b))`.
        taint.add_locally_inferred_features(&FeatureMayAlwaysSet::make_may([
            FeatureId::WIDEN_BROADENING,
        ]));
        taint.update_maximum_collapse_depth(CollapseDepth::zero());
    }

    fn transform_on_sink(taint: Taint) -> Taint {
        taint
    }

    fn transform_on_hoist(taint: Taint) -> Taint {
        taint
    }
}

/// Taint on a single value, indexed by the path into the value.
///
/// Taint stored on a node covers all paths below it. Whenever taint is hoisted
/// into an ancestor by a collapse, the caller supplies broadening features that
/// keep the loss of precision visible in reported traces, and the collapse
/// depths of hoisted propagations are zeroed since their output structure no
/// longer matches their input.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct TaintTree {
    tree: AbstractTreeDomain<TaintTreeConfig>,
}

impl TaintTree {
    /// Returns a tree holding the given taint at its root.
    pub fn from_taint(taint: Taint) -> Self {
        TaintTree {
            tree: AbstractTreeDomain::leaf(taint),
        }
    }

    /// The taint stored directly at the root of the tree.
    pub fn root(&self) -> &Taint {
        self.tree.root()
    }

    /// Returns the subtree at the given path.
    /// Taint of ancestor nodes is inherited into the root of the result.
    pub fn read(&self, path: &[PathElement]) -> TaintTree {
        TaintTree {
            tree: self.tree.read(path),
        }
    }

    /// Returns the subtree at the given path, without inheriting ancestor taint.
    pub fn raw_read(&self, path: &[PathElement]) -> TaintTree {
        TaintTree {
            tree: self.tree.raw_read(path),
        }
    }

    /// Writes taint at the given path.
    pub fn write(&mut self, path: &[PathElement], taint: Taint, kind: UpdateKind) {
        self.tree.write(path, taint, kind);
    }

    /// Writes a whole subtree at the given path.
    pub fn write_tree(&mut self, path: &[PathElement], tree: TaintTree, kind: UpdateKind) {
        self.tree.write_tree(path, tree.tree, kind);
    }

    /// Returns all non-bottom taint values with the paths they are stored at.
    pub fn elements(&self) -> Vec<(Path, &Taint)> {
        self.tree
            .elements()
            .into_iter()
            .map(|(path, taint)| (Path::new(path), taint))
            .collect()
    }

    /// Returns an iterator over all frames of the taint in the tree.
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.tree
            .elements()
            .into_iter()
            .flat_map(|(_, taint)| taint.frames())
    }

    /// Returns an iterator over the kinds present in the tree.
    pub fn kinds(&self) -> impl Iterator<Item = KindId> + '_ {
        self.tree
            .elements()
            .into_iter()
            .flat_map(|(_, taint)| taint.kinds())
    }

    /// Applies the given function to every taint value in the tree.
    pub fn transform<F: FnMut(&mut Taint)>(&mut self, transform: F) {
        self.tree.transform(transform);
    }

    /// Collapses the tree into a single taint value, tagging hoisted taint
    /// with the given broadening features.
    pub fn collapse(&self, broadening_features: &FeatureMayAlwaysSet) -> Taint {
        self.tree.collapse(&mut broadening_transform(broadening_features))
    }

    /// Collapses all nodes deeper than the given height, tagging hoisted taint
    /// with the given broadening features.
    pub fn collapse_deeper_than(
        &mut self,
        height: usize,
        broadening_features: &FeatureMayAlwaysSet,
    ) {
        self.tree
            .collapse_deeper_than(height, &mut broadening_transform(broadening_features));
    }

    /// Collapses subtrees until the tree has at most the given number of
    /// leaves, tagging hoisted taint with the given broadening features.
    pub fn limit_leaves(&mut self, max_leaves: usize, broadening_features: &FeatureMayAlwaysSet) {
        self.tree
            .limit_leaves(max_leaves, &mut broadening_transform(broadening_features));
    }

    /// Adds the features to all taint in the tree as locally inferred features.
    pub fn add_locally_inferred_features(&mut self, features: &FeatureMayAlwaysSet) {
        if features.is_bottom() || features.is_empty() {
            return;
        }
        self.tree
            .transform(|taint| taint.add_locally_inferred_features(features));
    }

    /// Records a position the taint passed through within the current method.
    pub fn add_local_position(&mut self, position: PositionId, max_number_local_positions: usize) {
        self.tree
            .transform(|taint| taint.add_local_position(position, max_number_local_positions));
    }

    /// Adds locally inferred features and a local position in one pass.
    pub fn add_locally_inferred_features_and_local_position(
        &mut self,
        features: &FeatureMayAlwaysSet,
        position: Option<PositionId>,
        max_number_local_positions: usize,
    ) {
        if (features.is_bottom() || features.is_empty()) && position.is_none() {
            return;
        }
        self.tree.transform(|taint| {
            taint.add_locally_inferred_features_and_local_position(
                features,
                position,
                max_number_local_positions,
            )
        });
    }

    /// Rewrites all taint in the tree as the endpoint of a trace at the given
    /// position. Non-leaf taint is dropped.
    pub fn attach_position(&self, position: PositionId) -> TaintTree {
        let mut result = self.clone();
        result
            .tree
            .transform(|taint| *taint = taint.attach_position(position));
        result
    }

    /// Bounds the collapse depth of all propagation output paths in the tree.
    pub fn update_maximum_collapse_depth(&mut self, collapse_depth: CollapseDepth) {
        self.tree
            .transform(|taint| taint.update_maximum_collapse_depth(collapse_depth));
    }
}

fn broadening_transform(features: &FeatureMayAlwaysSet) -> impl FnMut(&mut Taint) + '_ {
    move |taint| {
        taint.add_locally_inferred_features(features);
        taint.update_maximum_collapse_depth(CollapseDepth::zero());
    }
}

impl AbstractDomain for TaintTree {
    fn bottom() -> Self {
        TaintTree {
            tree: AbstractTreeDomain::bottom(),
        }
    }

    fn is_bottom(&self) -> bool {
        self.tree.is_bottom()
    }

    fn leq(&self, other: &Self) -> bool {
        self.tree.leq(&other.tree)
    }

    fn join_with(&mut self, other: &Self) {
        self.tree.join_with(&other.tree);
    }

    fn widen_with(&mut self, other: &Self) {
        self.tree.widen_with(&other.tree);
    }

    fn meet_with(&mut self, other: &Self) {
        self.tree.meet_with(&other.tree);
    }
}

/// A forest of taint trees, one per access path root.
///
/// This is the shape of a method model: taint per parameter, return value and
/// call effect, each indexed by the path into the value.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct TaintAccessPathTree {
    trees: DomainMap<Root, TaintTree, UnionMergeStrategy>,
}

impl TaintAccessPathTree {
    /// Returns the tree rooted at the given access path root.
    pub fn read_root(&self, root: Root) -> TaintTree {
        self.trees.get_or_bottom(&root)
    }

    /// Returns the subtree at the given access path.
    /// Taint of ancestor nodes is inherited into the root of the result.
    pub fn read(&self, access_path: &AccessPath) -> TaintTree {
        match self.trees.get(&access_path.root()) {
            Some(tree) => tree.read(access_path.path()),
            None => TaintTree::bottom(),
        }
    }

    /// Returns the subtree at the given access path, without inheriting
    /// ancestor taint.
    pub fn raw_read(&self, access_path: &AccessPath) -> TaintTree {
        match self.trees.get(&access_path.root()) {
            Some(tree) => tree.raw_read(access_path.path()),
            None => TaintTree::bottom(),
        }
    }

    /// Writes taint at the given access path.
    pub fn write(&mut self, access_path: &AccessPath, taint: Taint, kind: UpdateKind) {
        let tree = self.trees.entry(access_path.root()).or_default();
        tree.write(access_path.path(), taint, kind);
        self.trees.prune_bottom();
    }

    /// Writes a whole subtree at the given access path.
    pub fn write_tree(&mut self, access_path: &AccessPath, tree: TaintTree, kind: UpdateKind) {
        let root_tree = self.trees.entry(access_path.root()).or_default();
        root_tree.write_tree(access_path.path(), tree, kind);
        self.trees.prune_bottom();
    }

    /// Returns all non-bottom taint values with their access paths.
    pub fn elements(&self) -> Vec<(AccessPath, &Taint)> {
        let mut results = Vec::new();
        for (root, tree) in self.trees.iter() {
            for (path, taint) in tree.elements() {
                results.push((AccessPath::new(*root, path), taint));
            }
        }
        results
    }

    /// Iterates over the root trees of the forest.
    pub fn roots(&self) -> impl Iterator<Item = (Root, &TaintTree)> + '_ {
        self.trees.iter().map(|(root, tree)| (*root, tree))
    }

    /// Applies the given function to every tree of the forest.
    pub fn transform_trees<F: FnMut(&mut TaintTree)>(&mut self, mut transform: F) {
        for tree in self.trees.values_mut() {
            transform(tree);
        }
        self.trees.prune_bottom();
    }

    /// Bounds the number of leaves of each root tree, tagging hoisted taint
    /// with the given broadening features.
    pub fn limit_leaves(&mut self, max_leaves: usize, broadening_features: &FeatureMayAlwaysSet) {
        for tree in self.trees.values_mut() {
            tree.limit_leaves(max_leaves, broadening_features);
        }
    }
}

impl AbstractDomain for TaintAccessPathTree {
    fn bottom() -> Self {
        TaintAccessPathTree {
            trees: DomainMap::bottom(),
        }
    }

    fn is_bottom(&self) -> bool {
        self.trees.is_bottom()
    }

    fn leq(&self, other: &Self) -> bool {
        self.trees.leq(&other.trees)
    }

    fn join_with(&mut self, other: &Self) {
        self.trees.join_with(&other.trees);
    }

    fn widen_with(&mut self, other: &Self) {
        self.trees.widen_with(&other.trees);
    }

    fn meet_with(&mut self, other: &Self) {
        self.trees.meet_with(&other.trees);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Heuristics, Options};
    use crate::context::Context;
    use crate::intermediate_representation::{Position, StringId};
    use crate::taint::{PathTreeDomain, TaintConfig};

    fn test_context() -> Context {
        Context::new(Options::default(), Heuristics::default())
    }

    fn field(name: u32) -> PathElement {
        PathElement::Field(StringId(name))
    }

    fn source(context: &Context, kind_name: &str) -> Taint {
        Taint::from_config(TaintConfig::new(
            context.kinds.named(kind_name),
            AccessPath::from_root(Root::Return),
        ))
    }

    #[test]
    fn widening_collapses_deep_paths_with_broadening() {
        let context = test_context();
        let taint = source(&context, "UserInput");
        let path: Vec<PathElement> = (1..=6).map(field).collect();

        let mut tree = TaintTree::bottom();
        tree.write(&path, taint.clone(), UpdateKind::Weak);
        let mut other = TaintTree::bottom();
        other.write(&path, taint, UpdateKind::Weak);

        tree.widen_with(&other);

        let elements = tree.elements();
        assert_eq!(elements.len(), 1);
        let (collapsed_path, collapsed) = &elements[0];
        assert_eq!(
            collapsed_path.len(),
            crate::config::ABSTRACT_TREE_WIDENING_HEIGHT,
        );
        let features = collapsed.features_joined();
        assert!(features.may().contains(&FeatureId::WIDEN_BROADENING));
        assert!(!features.always().contains(&FeatureId::WIDEN_BROADENING));
    }

    #[test]
    fn collapse_tags_hoisted_taint_and_zeroes_collapse_depths() {
        let context = test_context();
        let propagation = Taint::from_config(TaintConfig::propagation(
            context.kinds.local_return(),
            AccessPath::from_root(Root::Argument(0)),
            PathTreeDomain::leaf(CollapseDepth::new(3)),
        ));
        let mut tree = TaintTree::bottom();
        tree.write(&[field(1)], propagation, UpdateKind::Weak);

        let collapsed =
            tree.collapse(&FeatureMayAlwaysSet::make_always([FeatureId::ISSUE_BROADENING]));

        assert_eq!(collapsed.num_frames(), 1);
        let frame = collapsed.frames().next().unwrap();
        assert!(frame
            .locally_inferred_features()
            .always()
            .contains(&FeatureId::ISSUE_BROADENING));
        assert_eq!(frame.output_paths().root(), &CollapseDepth::zero());
    }

    #[test]
    fn reads_inherit_ancestor_taint() {
        let context = test_context();
        let root_taint = source(&context, "UserInput");
        let field_taint = source(&context, "ImplicitIntent");

        let mut tree = TaintTree::bottom();
        tree.write(&[], root_taint.clone(), UpdateKind::Weak);
        tree.write(&[field(1)], field_taint.clone(), UpdateKind::Weak);

        assert_eq!(
            tree.read(&[field(1)]).root(),
            &root_taint.join(&field_taint),
        );
        assert_eq!(tree.raw_read(&[field(1)]).root(), &field_taint);
        assert_eq!(tree.read(&[field(2)]).root(), &root_taint);
    }

    #[test]
    fn forest_indexes_taint_by_root() {
        let context = test_context();
        let argument_taint = source(&context, "UserInput");
        let return_taint = source(&context, "ImplicitIntent");
        let argument_port = AccessPath::new(Root::Argument(0), Path::new(vec![field(1)]));

        let mut forest = TaintAccessPathTree::bottom();
        forest.write(&argument_port, argument_taint.clone(), UpdateKind::Weak);
        forest.write(
            &AccessPath::from_root(Root::Return),
            return_taint,
            UpdateKind::Weak,
        );

        assert_eq!(forest.read(&argument_port).root(), &argument_taint);
        assert!(forest
            .read(&AccessPath::from_root(Root::CallEffect))
            .is_bottom());

        let elements = forest.elements();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].0, AccessPath::from_root(Root::Return));
        assert_eq!(elements[1].0, argument_port);

        // A strong overwrite with bottom erases the whole root entry.
        forest.write(
            &AccessPath::from_root(Root::Return),
            Taint::bottom(),
            UpdateKind::Strong,
        );
        assert_eq!(forest.roots().count(), 1);
    }

    #[test]
    fn limit_leaves_caps_each_root_tree() {
        let context = test_context();
        let taint = source(&context, "UserInput");

        let mut forest = TaintAccessPathTree::bottom();
        for name in 1..=3 {
            forest.write(
                &AccessPath::new(Root::Argument(0), Path::new(vec![field(name)])),
                taint.clone(),
                UpdateKind::Weak,
            );
        }

        forest.limit_leaves(
            1,
            &FeatureMayAlwaysSet::make_always([FeatureId::PROPAGATION_BROADENING]),
        );

        let elements = forest.elements();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].0, AccessPath::from_root(Root::Argument(0)));
        assert!(elements[0]
            .1
            .features_joined()
            .always()
            .contains(&FeatureId::PROPAGATION_BROADENING));
    }

    #[test]
    fn attach_position_rewrites_tree_taint() {
        let mut context = test_context();
        let position = context.positions.intern(Position::new(None, Some(7)));
        let taint = source(&context, "UserInput");

        let mut tree = TaintTree::bottom();
        tree.write(&[field(1)], taint, UpdateKind::Weak);

        let attached = tree.attach_position(position);
        let elements = attached.elements();
        assert_eq!(elements.len(), 1);
        let frame = elements[0].1.frames().next().unwrap();
        assert_eq!(frame.call_position(), Some(position));
        assert!(frame.call_kind().is_origin());
    }
}
