use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use super::{AbstractDomain, DifferenceDomain};

/// Compile-time configuration of an [`AbstractTreeDomain`].
///
/// The configuration fixes the edge label and leaf domain of the tree
/// and provides the projections that are applied when values move
/// between tree levels.
pub trait TreeConfig: Clone + PartialEq + Eq + Debug {
    /// The edge labels of the tree, e.g. field names.
    type PathElement: PartialOrd + Ord + Clone + Debug;
    /// The abstract domain stored at each node.
    type Leaf: DifferenceDomain + Debug;

    /// Maximum height of the tree after a widening.
    /// Nodes deeper than this are collapsed during [`AbstractTreeDomain::widen_with`].
    fn max_tree_height_after_widening() -> usize;

    /// Applied to values that are collapsed into an ancestor during a widening.
    fn transform_on_widening_collapse(leaf: &mut Self::Leaf);

    /// Applied when a value is propagated from a node down to a child during a read.
    ///
    /// An ancestor value generally covers all descendant paths,
    /// but some domains (e.g. alias edges) must not flow downwards,
    /// in which case this returns the bottom value.
    fn transform_on_sink(leaf: Self::Leaf) -> Self::Leaf;

    /// Applied when a value is hoisted from a node up to an ancestor during a collapse.
    fn transform_on_hoist(leaf: Self::Leaf) -> Self::Leaf;
}

/// Whether a write overwrites the previous value or is merged with it.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum UpdateKind {
    /// The write overwrites the previous value and discards the subtree below it.
    Strong,
    /// The write is joined into the previous value.
    Weak,
}

/// An abstract domain mapping access paths to elements of a leaf domain.
///
/// The tree implements read semantics:
/// a value stored at a node implicitly applies to all paths below that node.
/// As a consequence, the value stored at a child only contains the parts
/// that are not already covered by its ancestors.
/// Operations restore this normal form with [`DifferenceDomain::difference_with`]
/// whenever ancestor values grow.
///
/// The tree has no top element.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(bound(
    serialize = "C::PathElement: Serialize, C::Leaf: Serialize",
    deserialize = "C::PathElement: Deserialize<'de>, C::Leaf: Deserialize<'de>"
))]
pub struct AbstractTreeDomain<C: TreeConfig> {
    elements: C::Leaf,
    children: BTreeMap<C::PathElement, AbstractTreeDomain<C>>,
}

impl<C: TreeConfig> Default for AbstractTreeDomain<C> {
    fn default() -> Self {
        Self::bottom()
    }
}

impl<C: TreeConfig> AbstractTreeDomain<C> {
    /// Returns a tree consisting of a single node holding the given value.
    pub fn leaf(elements: C::Leaf) -> Self {
        AbstractTreeDomain {
            elements,
            children: BTreeMap::new(),
        }
    }

    /// Returns the value stored at the root node.
    /// This does not include values stored at deeper nodes.
    pub fn root(&self) -> &C::Leaf {
        &self.elements
    }

    /// Returns the child subtrees of the root node.
    pub fn successors(&self) -> &BTreeMap<C::PathElement, AbstractTreeDomain<C>> {
        &self.children
    }

    /// Returns the subtree reached via the given edge, if any.
    pub fn successor(&self, path_element: &C::PathElement) -> Option<&AbstractTreeDomain<C>> {
        self.children.get(path_element)
    }

    /// Applies `f` to every subtree of the root, removing subtrees that become bottom.
    fn update_children<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Self),
    {
        self.children.retain(|_, subtree| {
            f(subtree);
            !subtree.is_bottom()
        });
    }

    /// Joins all values in the tree into a single value.
    ///
    /// Values hoisted from below the root are passed through
    /// [`TreeConfig::transform_on_hoist`], then through `transform`.
    pub fn collapse<F>(&self, transform: &mut F) -> C::Leaf
    where
        F: FnMut(&mut C::Leaf),
    {
        let mut elements = self.elements.clone();
        for subtree in self.children.values() {
            subtree.collapse_into(&mut elements, transform);
        }
        elements
    }

    /// Collapses the tree into its root node, in place.
    pub fn collapse_inplace<F>(&mut self, transform: &mut F)
    where
        F: FnMut(&mut C::Leaf),
    {
        let children = std::mem::take(&mut self.children);
        for subtree in children.values() {
            subtree.collapse_into(&mut self.elements, transform);
        }
    }

    /// Joins all values of this tree into the given value,
    /// transforming each since it is hoisted across at least one level.
    fn collapse_into<F>(&self, elements: &mut C::Leaf, transform: &mut F)
    where
        F: FnMut(&mut C::Leaf),
    {
        if !self.elements.is_bottom() {
            let mut moved = C::transform_on_hoist(self.elements.clone());
            transform(&mut moved);
            elements.join_with(&moved);
        }
        for subtree in self.children.values() {
            subtree.collapse_into(elements, transform);
        }
    }

    /// Collapses all nodes deeper than the given height into their height-level ancestor.
    pub fn collapse_deeper_than<F>(&mut self, height: usize, transform: &mut F)
    where
        F: FnMut(&mut C::Leaf),
    {
        if height == 0 {
            self.collapse_inplace(transform);
        } else {
            self.update_children(|subtree| subtree.collapse_deeper_than(height - 1, transform));
        }
    }

    /// Collapses the tree such that it has at most `max_leaves` leaves.
    pub fn limit_leaves<F>(&mut self, max_leaves: usize, transform: &mut F)
    where
        F: FnMut(&mut C::Leaf),
    {
        let depth = match self.depth_exceeding_max_leaves(max_leaves) {
            Some(depth) => depth,
            None => return,
        };
        self.collapse_deeper_than(depth, transform);
    }

    /// Returns the depth at which the tree exceeds the given number of leaves,
    /// or `None` if it does not.
    fn depth_exceeding_max_leaves(&self, mut max_leaves: usize) -> Option<usize> {
        // Breadth-first search counting the leaves per level.
        let mut trees: Vec<&Self> = vec![self];
        let mut depth = 0;

        while !trees.is_empty() {
            let mut new_trees = Vec::new();

            for tree in trees {
                for subtree in tree.children.values() {
                    if subtree.children.is_empty() {
                        if max_leaves > 0 {
                            max_leaves -= 1;
                        } else {
                            return Some(depth);
                        }
                    } else {
                        new_trees.push(subtree);
                    }
                }
            }

            if new_trees.len() > max_leaves {
                return Some(depth);
            }

            depth += 1;
            trees = new_trees;
        }

        None
    }

    /// Removes all parts of the tree that are covered by the given value.
    pub fn prune(&mut self, mut accumulator: C::Leaf) {
        self.elements.difference_with(&accumulator);
        accumulator.join_with(&self.elements);
        self.prune_children(accumulator);
    }

    /// Removes all parts of the subtrees that are covered by the given value.
    fn prune_children(&mut self, accumulator: C::Leaf) {
        self.update_children(|subtree| subtree.prune(accumulator.clone()));
    }

    /// Writes the given value at the given path.
    pub fn write(&mut self, path: &[C::PathElement], elements: C::Leaf, kind: UpdateKind) {
        self.write_internal(path, elements, C::Leaf::bottom(), kind);
    }

    fn write_internal(
        &mut self,
        path: &[C::PathElement],
        mut elements: C::Leaf,
        mut accumulator: C::Leaf,
        kind: UpdateKind,
    ) {
        let (path_head, path_rest) = match path.split_first() {
            Some(split) => split,
            None => {
                match kind {
                    UpdateKind::Strong => {
                        self.elements = elements;
                        self.children.clear();
                    }
                    UpdateKind::Weak => {
                        self.elements.join_with(&elements);
                        accumulator.join_with(&self.elements);
                        self.prune_children(accumulator);
                    }
                }
                return;
            }
        };

        accumulator.join_with(&self.elements);
        elements.difference_with(&accumulator);
        if elements.is_bottom() && matches!(kind, UpdateKind::Weak) {
            return;
        }

        let subtree = self
            .children
            .entry(path_head.clone())
            .or_insert_with(Self::bottom);
        subtree.write_internal(path_rest, elements, accumulator, kind);
        if subtree.is_bottom() {
            self.children.remove(path_head);
        }
    }

    /// Writes the given tree at the given path.
    pub fn write_tree(&mut self, path: &[C::PathElement], tree: Self, kind: UpdateKind) {
        self.write_tree_internal(path, tree, C::Leaf::bottom(), kind);
    }

    fn write_tree_internal(
        &mut self,
        path: &[C::PathElement],
        tree: Self,
        mut accumulator: C::Leaf,
        kind: UpdateKind,
    ) {
        let (path_head, path_rest) = match path.split_first() {
            Some(split) => split,
            None => {
                match kind {
                    UpdateKind::Strong => {
                        *self = tree;
                        self.prune(accumulator);
                    }
                    UpdateKind::Weak => {
                        self.join_with_internal(&tree, &accumulator);
                    }
                }
                return;
            }
        };

        accumulator.join_with(&self.elements);

        let subtree = self
            .children
            .entry(path_head.clone())
            .or_insert_with(Self::bottom);
        subtree.write_tree_internal(path_rest, tree, accumulator, kind);
        if subtree.is_bottom() {
            self.children.remove(path_head);
        }
    }

    /// Returns the subtree at the given path.
    ///
    /// Ancestor values are propagated down to the result
    /// through [`TreeConfig::transform_on_sink`], once per level.
    pub fn read(&self, path: &[C::PathElement]) -> Self {
        let (path_head, path_rest) = match path.split_first() {
            Some(split) => split,
            None => return self.clone(),
        };

        match self.children.get(path_head) {
            None => {
                let mut result = C::transform_on_sink(self.elements.clone());
                for _ in path_rest {
                    result = C::transform_on_sink(result);
                }
                Self::leaf(result)
            }
            Some(subtree) => {
                let mut subtree = subtree.clone();
                let propagated = C::transform_on_sink(self.elements.clone());
                subtree.elements.join_with(&propagated);
                subtree.read(path_rest)
            }
        }
    }

    /// Returns the subtree at the given path.
    /// Ancestor values are not propagated down.
    pub fn raw_read(&self, path: &[C::PathElement]) -> Self {
        let mut tree = self;
        for path_element in path {
            match tree.children.get(path_element) {
                Some(subtree) => tree = subtree,
                None => return Self::bottom(),
            }
        }
        tree.clone()
    }

    /// Returns the subtree at the longest stored prefix of the given path,
    /// along with the suffix of the path that was not followed.
    pub fn raw_read_max_path<'p>(
        &self,
        path: &'p [C::PathElement],
    ) -> (&'p [C::PathElement], &Self) {
        let mut tree = self;
        let mut remaining = path;
        while let Some((path_head, path_rest)) = remaining.split_first() {
            match tree.children.get(path_head) {
                Some(subtree) => {
                    tree = subtree;
                    remaining = path_rest;
                }
                None => break,
            }
        }
        (remaining, tree)
    }

    /// Calls the visitor on all non-bottom values in the tree, with their paths.
    /// Values do not include their ancestors.
    pub fn visit<F>(&self, mut visitor: F)
    where
        F: FnMut(&[C::PathElement], &C::Leaf),
    {
        let mut path = Vec::new();
        self.visit_internal(&mut path, &mut visitor);
    }

    fn visit_internal<F>(&self, path: &mut Vec<C::PathElement>, visitor: &mut F)
    where
        F: FnMut(&[C::PathElement], &C::Leaf),
    {
        if !self.elements.is_bottom() {
            visitor(path, &self.elements);
        }
        for (path_element, subtree) in &self.children {
            path.push(path_element.clone());
            subtree.visit_internal(path, visitor);
            path.pop();
        }
    }

    /// Returns all pairs of path and value in the tree.
    /// Values do not include their ancestors.
    pub fn elements(&self) -> Vec<(Vec<C::PathElement>, &C::Leaf)> {
        let mut results = Vec::new();
        let mut path = Vec::new();
        self.elements_internal(&mut path, &mut results);
        results
    }

    fn elements_internal<'a>(
        &'a self,
        path: &mut Vec<C::PathElement>,
        results: &mut Vec<(Vec<C::PathElement>, &'a C::Leaf)>,
    ) {
        if !self.elements.is_bottom() {
            results.push((path.clone(), &self.elements));
        }
        for (path_element, subtree) in &self.children {
            path.push(path_element.clone());
            subtree.elements_internal(path, results);
            path.pop();
        }
    }

    /// Applies the given function to all values in the tree.
    pub fn transform<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut C::Leaf),
    {
        self.transform_internal(&mut f, C::Leaf::bottom());
    }

    fn transform_internal<F>(&mut self, f: &mut F, mut accumulator: C::Leaf)
    where
        F: FnMut(&mut C::Leaf),
    {
        if !self.elements.is_bottom() {
            f(&mut self.elements);
            self.elements.difference_with(&accumulator);
            accumulator.join_with(&self.elements);
        }
        self.update_children(|subtree| subtree.transform_internal(f, accumulator.clone()));
    }

    fn join_with_internal(&mut self, other: &Self, accumulator: &C::Leaf) {
        // The read semantics implies that a value on a node is implicitly
        // propagated to all its children. The accumulator contains the values
        // of all ancestors. Parts of a child that are covered by the
        // accumulator can be removed.
        self.elements.join_with(&other.elements);
        self.elements.difference_with(accumulator);

        let accumulator_tree = Self::leaf(accumulator.join(&self.elements));
        let mut new_children = BTreeMap::new();

        for (path_element, subtree) in &self.children {
            match other.children.get(path_element) {
                Some(other_subtree) => {
                    let mut subtree = subtree.clone();
                    subtree.join_with_internal(other_subtree, accumulator_tree.root());
                    if !subtree.is_bottom() {
                        new_children.insert(path_element.clone(), subtree);
                    }
                }
                None => {
                    if !subtree.leq(&accumulator_tree) {
                        new_children.insert(path_element.clone(), subtree.clone());
                    }
                }
            }
        }

        for (path_element, other_subtree) in &other.children {
            if self.children.contains_key(path_element) {
                continue; // Already handled above.
            }
            if !other_subtree.leq(&accumulator_tree) {
                new_children.insert(path_element.clone(), other_subtree.clone());
            }
        }

        self.children = new_children;
    }

    fn widen_with_internal(&mut self, other: &Self, accumulator: &C::Leaf, max_height: usize) {
        if max_height == 0 {
            let mut transform = |leaf: &mut C::Leaf| C::transform_on_widening_collapse(leaf);
            self.collapse_inplace(&mut transform);
            let other_collapsed = other.collapse(&mut transform);
            self.elements.join_with(&other_collapsed);
            self.elements.difference_with(accumulator);
            return;
        }

        self.elements.join_with(&other.elements);
        self.elements.difference_with(accumulator);

        let accumulator_tree = Self::leaf(accumulator.join(&self.elements));
        let mut new_children = BTreeMap::new();
        let mut collapse_transform = |leaf: &mut C::Leaf| C::transform_on_widening_collapse(leaf);

        for (path_element, subtree) in &self.children {
            match other.children.get(path_element) {
                Some(other_subtree) => {
                    let mut subtree = subtree.clone();
                    subtree.widen_with_internal(
                        other_subtree,
                        accumulator_tree.root(),
                        max_height - 1,
                    );
                    if !subtree.is_bottom() {
                        new_children.insert(path_element.clone(), subtree);
                    }
                }
                None => {
                    if !subtree.leq(&accumulator_tree) {
                        let mut subtree = subtree.clone();
                        subtree.collapse_deeper_than(max_height - 1, &mut collapse_transform);
                        new_children.insert(path_element.clone(), subtree);
                    }
                }
            }
        }

        for (path_element, other_subtree) in &other.children {
            if self.children.contains_key(path_element) {
                continue; // Already handled above.
            }
            if !other_subtree.leq(&accumulator_tree) {
                let mut other_subtree = other_subtree.clone();
                other_subtree.collapse_deeper_than(max_height - 1, &mut collapse_transform);
                new_children.insert(path_element.clone(), other_subtree);
            }
        }

        self.children = new_children;
    }
}

impl<C: TreeConfig> AbstractDomain for AbstractTreeDomain<C> {
    fn bottom() -> Self {
        AbstractTreeDomain {
            elements: C::Leaf::bottom(),
            children: BTreeMap::new(),
        }
    }

    fn is_bottom(&self) -> bool {
        self.elements.is_bottom() && self.children.is_empty()
    }

    fn leq(&self, other: &Self) -> bool {
        if !self.elements.leq(&other.elements) {
            return false;
        }

        for (path_element, subtree) in &self.children {
            match other.children.get(path_element) {
                Some(other_subtree) => {
                    // Read semantics: the other value is propagated to its children.
                    let mut other_subtree = other_subtree.clone();
                    other_subtree
                        .elements
                        .join_with(&C::transform_on_sink(other.elements.clone()));
                    if !subtree.leq(&other_subtree) {
                        return false;
                    }
                }
                None => {
                    let other_subtree = Self::leaf(C::transform_on_sink(other.elements.clone()));
                    if !subtree.leq(&other_subtree) {
                        return false;
                    }
                }
            }
        }

        true
    }

    fn join_with(&mut self, other: &Self) {
        if other.is_bottom() {
            return;
        } else if self.is_bottom() {
            *self = other.clone();
        } else {
            self.join_with_internal(other, &C::Leaf::bottom());
        }
    }

    fn widen_with(&mut self, other: &Self) {
        if other.is_bottom() {
            return;
        } else if self.is_bottom() {
            *self = other.clone();
        } else {
            self.widen_with_internal(
                other,
                &C::Leaf::bottom(),
                C::max_tree_height_after_widening(),
            );
        }
    }

    fn meet_with(&mut self, _other: &Self) {
        // Access path trees under read semantics do not form a meet-semilattice.
        panic!("meet is not defined for access path trees");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstract_domain::SetDomain;

    /// Ancestor values flow down to children unchanged.
    #[derive(Debug, PartialEq, Eq, Clone)]
    struct InheritingConfig;

    impl TreeConfig for InheritingConfig {
        type PathElement = &'static str;
        type Leaf = SetDomain<u32>;

        fn max_tree_height_after_widening() -> usize {
            2
        }

        fn transform_on_widening_collapse(leaf: &mut Self::Leaf) {
            leaf.insert(99);
        }

        fn transform_on_sink(leaf: Self::Leaf) -> Self::Leaf {
            leaf
        }

        fn transform_on_hoist(leaf: Self::Leaf) -> Self::Leaf {
            leaf
        }
    }

    /// Ancestor values do not flow down to children.
    #[derive(Debug, PartialEq, Eq, Clone)]
    struct StructuralConfig;

    impl TreeConfig for StructuralConfig {
        type PathElement = &'static str;
        type Leaf = SetDomain<u32>;

        fn max_tree_height_after_widening() -> usize {
            4
        }

        fn transform_on_widening_collapse(_leaf: &mut Self::Leaf) {}

        fn transform_on_sink(_leaf: Self::Leaf) -> Self::Leaf {
            SetDomain::bottom()
        }

        fn transform_on_hoist(leaf: Self::Leaf) -> Self::Leaf {
            leaf
        }
    }

    type Tree = AbstractTreeDomain<InheritingConfig>;
    type StructuralTree = AbstractTreeDomain<StructuralConfig>;

    fn set(elements: &[u32]) -> SetDomain<u32> {
        elements.iter().copied().collect()
    }

    #[test]
    fn write_and_read_accumulates_ancestors() {
        let mut tree = Tree::bottom();
        tree.write(&[], set(&[1]), UpdateKind::Weak);
        tree.write(&["f"], set(&[2]), UpdateKind::Weak);

        assert_eq!(tree.read(&[]).root(), &set(&[1]));
        assert_eq!(tree.read(&["f"]).root(), &set(&[1, 2]));
        // Reading past a leaf returns the accumulated leaf value.
        assert_eq!(tree.read(&["f", "g"]).root(), &set(&[1, 2]));
        // Reading an absent path returns the propagated ancestor values.
        assert_eq!(tree.read(&["other"]).root(), &set(&[1]));
    }

    #[test]
    fn raw_read_does_not_accumulate() {
        let mut tree = Tree::bottom();
        tree.write(&[], set(&[1]), UpdateKind::Weak);
        tree.write(&["f", "g"], set(&[2]), UpdateKind::Weak);

        assert_eq!(tree.raw_read(&["f", "g"]).root(), &set(&[2]));
        assert!(tree.raw_read(&["f"]).root().is_bottom());
        assert!(tree.raw_read(&["absent"]).is_bottom());
    }

    #[test]
    fn raw_read_max_path_returns_unfollowed_suffix() {
        let mut tree = Tree::bottom();
        tree.write(&["f", "g"], set(&[2]), UpdateKind::Weak);

        let (remaining, subtree) = tree.raw_read_max_path(&["f", "g", "h", "i"]);
        assert_eq!(remaining, &["h", "i"]);
        assert_eq!(subtree.root(), &set(&[2]));

        let (remaining, _) = tree.raw_read_max_path(&["f", "g"]);
        assert!(remaining.is_empty());
    }

    #[test]
    fn redundant_writes_are_pruned() {
        let mut tree = Tree::bottom();
        tree.write(&[], set(&[1]), UpdateKind::Weak);
        // Covered by the root value, so no child is materialized.
        tree.write(&["f"], set(&[1]), UpdateKind::Weak);
        assert!(tree.successors().is_empty());
    }

    #[test]
    fn strong_write_replaces_subtree() {
        let mut tree = Tree::bottom();
        tree.write(&["f", "g"], set(&[1]), UpdateKind::Weak);
        tree.write(&["f"], set(&[2]), UpdateKind::Strong);

        assert_eq!(tree.read(&["f"]).root(), &set(&[2]));
        assert!(tree.read(&["f", "g"]).root().leq(&set(&[2])));

        // A strong write at the root wipes the whole tree.
        tree.write(&[], set(&[3]), UpdateKind::Strong);
        assert_eq!(tree.elements().len(), 1);
        assert_eq!(tree.root(), &set(&[3]));
    }

    #[test]
    fn weak_write_joins() {
        let mut tree = Tree::bottom();
        tree.write(&["f"], set(&[1]), UpdateKind::Weak);
        tree.write(&["f"], set(&[2]), UpdateKind::Weak);
        assert_eq!(tree.read(&["f"]).root(), &set(&[1, 2]));
    }

    #[test]
    fn join_removes_covered_subtrees() {
        let mut left = Tree::bottom();
        left.write(&[], set(&[1]), UpdateKind::Weak);

        let mut right = Tree::bottom();
        right.write(&["f"], set(&[1]), UpdateKind::Weak);

        let joined = left.join(&right);
        assert_eq!(joined.root(), &set(&[1]));
        assert!(joined.successors().is_empty());

        assert!(left.leq(&joined));
        assert!(right.leq(&joined));
    }

    #[test]
    fn join_is_an_upper_bound() {
        let mut left = Tree::bottom();
        left.write(&["f"], set(&[1]), UpdateKind::Weak);
        left.write(&["g", "h"], set(&[2]), UpdateKind::Weak);

        let mut right = Tree::bottom();
        right.write(&["f"], set(&[3]), UpdateKind::Weak);
        right.write(&[], set(&[4]), UpdateKind::Weak);

        let joined = left.join(&right);
        assert!(left.leq(&joined));
        assert!(right.leq(&joined));
        assert_eq!(joined.read(&["f"]).root(), &set(&[1, 3, 4]));
    }

    #[test]
    fn widen_collapses_deep_paths() {
        let mut left = Tree::bottom();
        left.write(&["a", "b", "c", "d"], set(&[1]), UpdateKind::Weak);

        let mut right = Tree::bottom();
        right.write(&["a", "b", "c", "d"], set(&[2]), UpdateKind::Weak);

        let mut widened = left.clone();
        widened.widen_with(&right);

        assert!(left.leq(&widened));
        assert!(right.leq(&widened));

        // Only two levels survive; the collapsed values carry the marker.
        let deepest = widened.raw_read(&["a", "b"]);
        assert_eq!(deepest.root(), &set(&[1, 2, 99]));
        assert!(deepest.successors().is_empty());
    }

    #[test]
    fn collapse_joins_all_values() {
        let mut tree = Tree::bottom();
        tree.write(&[], set(&[1]), UpdateKind::Weak);
        tree.write(&["f"], set(&[2]), UpdateKind::Weak);
        tree.write(&["g", "h"], set(&[3]), UpdateKind::Weak);

        let mut markers = 0;
        let collapsed = tree.collapse(&mut |_leaf| markers += 1);
        assert_eq!(collapsed, set(&[1, 2, 3]));
        // The root value is not hoisted, the two deeper values are.
        assert_eq!(markers, 2);
    }

    #[test]
    fn collapse_deeper_than_limits_height() {
        let mut tree = Tree::bottom();
        tree.write(&["a", "b", "c"], set(&[1]), UpdateKind::Weak);
        tree.collapse_deeper_than(1, &mut |leaf| leaf.insert(7));

        assert_eq!(tree.raw_read(&["a"]).root(), &set(&[1, 7]));
        assert!(tree.raw_read(&["a"]).successors().is_empty());
    }

    #[test]
    fn limit_leaves_collapses_wide_trees() {
        let mut tree = Tree::bottom();
        tree.write(&["a"], set(&[1]), UpdateKind::Weak);
        tree.write(&["b"], set(&[2]), UpdateKind::Weak);
        tree.write(&["c"], set(&[3]), UpdateKind::Weak);

        let mut before = tree.clone();
        tree.limit_leaves(4, &mut |_| {});
        assert_eq!(tree, before);

        before.limit_leaves(2, &mut |leaf| leaf.insert(7));
        assert_eq!(before.root(), &set(&[1, 2, 3, 7]));
        assert!(before.successors().is_empty());
    }

    #[test]
    fn transform_applies_to_all_values() {
        let mut tree = Tree::bottom();
        tree.write(&[], set(&[1]), UpdateKind::Weak);
        tree.write(&["f"], set(&[2]), UpdateKind::Weak);

        tree.transform(|leaf| leaf.insert(10));
        assert_eq!(tree.read(&[]).root(), &set(&[1, 10]));
        // The child value is renormalized against the grown root value.
        assert_eq!(tree.raw_read(&["f"]).root(), &set(&[2]));
        assert_eq!(tree.read(&["f"]).root(), &set(&[1, 2, 10]));
    }

    #[test]
    fn structural_trees_do_not_propagate_on_read() {
        let mut tree = StructuralTree::bottom();
        tree.write(&[], set(&[1]), UpdateKind::Weak);
        tree.write(&["f"], set(&[2]), UpdateKind::Weak);

        assert_eq!(tree.read(&["f"]).root(), &set(&[2]));
        assert!(tree.read(&["absent"]).is_bottom());
        assert!(tree.read(&["f", "deeper"]).is_bottom());
    }

    #[test]
    fn structural_leq_ignores_ancestors() {
        let mut left = StructuralTree::bottom();
        left.write(&["f"], set(&[1]), UpdateKind::Weak);

        let mut right = StructuralTree::bottom();
        right.write(&[], set(&[1]), UpdateKind::Weak);

        // Without sink propagation the root value does not cover the child.
        assert!(!left.leq(&right));
    }

    #[test]
    fn visit_reports_all_nodes() {
        let mut tree = Tree::bottom();
        tree.write(&[], set(&[1]), UpdateKind::Weak);
        tree.write(&["f", "g"], set(&[2]), UpdateKind::Weak);

        let mut paths = Vec::new();
        tree.visit(|path, _elements| paths.push(path.to_vec()));
        assert_eq!(paths, vec![vec![], vec!["f", "g"]]);
    }
}
