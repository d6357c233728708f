use std::fmt;

use crate::abstract_domain::{AbstractTreeDomain, DifferenceDomain, TreeConfig};
use crate::intermediate_representation::PathElement;
use crate::prelude::*;

/// The collapse depth for a given propagation output path.
///
/// When a propagation is applied at a call site, the collapse depth bounds
/// how much of the input taint tree structure survives the propagation: the
/// taint written to the output path is collapsed to the given depth. A depth
/// of zero collapses the input taint into a single node.
///
/// Counter-intuitively, the partial order is reversed: a *smaller* depth
/// collapses more and therefore describes *more* flows, so zero is the top
/// element and joining takes the minimum.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum CollapseDepth {
    Bottom,
    Depth(u32),
}

const NO_COLLAPSE: u32 = u32::MAX;

impl CollapseDepth {
    pub fn new(depth: u32) -> Self {
        CollapseDepth::Depth(depth)
    }

    /// The depth that collapses the whole input taint into a single node.
    /// This is also the top element.
    pub fn zero() -> Self {
        CollapseDepth::Depth(0)
    }

    /// The depth that preserves the input taint as-is.
    pub fn no_collapse() -> Self {
        CollapseDepth::Depth(NO_COLLAPSE)
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, CollapseDepth::Depth(0))
    }

    /// Returns whether applying this depth loses tree structure.
    pub fn should_collapse(&self) -> bool {
        matches!(self, CollapseDepth::Depth(depth) if *depth < NO_COLLAPSE)
    }

    pub fn depth(&self) -> Option<u32> {
        match self {
            CollapseDepth::Bottom => None,
            CollapseDepth::Depth(depth) => Some(*depth),
        }
    }
}

impl Default for CollapseDepth {
    fn default() -> Self {
        CollapseDepth::Bottom
    }
}

impl AbstractDomain for CollapseDepth {
    fn bottom() -> Self {
        CollapseDepth::Bottom
    }

    fn is_bottom(&self) -> bool {
        matches!(self, CollapseDepth::Bottom)
    }

    fn leq(&self, other: &Self) -> bool {
        match (self, other) {
            (CollapseDepth::Bottom, _) => true,
            (_, CollapseDepth::Bottom) => false,
            (CollapseDepth::Depth(depth), CollapseDepth::Depth(other_depth)) => {
                depth >= other_depth
            }
        }
    }

    fn join_with(&mut self, other: &Self) {
        match (&mut *self, other) {
            (_, CollapseDepth::Bottom) => (),
            (CollapseDepth::Bottom, other) => *self = *other,
            (CollapseDepth::Depth(depth), CollapseDepth::Depth(other_depth)) => {
                *depth = std::cmp::min(*depth, *other_depth);
            }
        }
    }

    fn meet_with(&mut self, other: &Self) {
        match (&mut *self, other) {
            (CollapseDepth::Bottom, _) => (),
            (_, CollapseDepth::Bottom) => *self = CollapseDepth::Bottom,
            (CollapseDepth::Depth(depth), CollapseDepth::Depth(other_depth)) => {
                *depth = std::cmp::max(*depth, *other_depth);
            }
        }
    }
}

impl HasTop for CollapseDepth {
    fn top() -> Self {
        Self::zero()
    }

    fn is_top(&self) -> bool {
        self.is_zero()
    }
}

impl DifferenceDomain for CollapseDepth {
    fn difference_with(&mut self, other: &Self) {
        if self.leq(other) {
            self.set_to_bottom();
        }
    }
}

/// Tree configuration for propagation output path trees.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct PathTreeConfig;

impl TreeConfig for PathTreeConfig {
    type PathElement = PathElement;
    type Leaf = CollapseDepth;

    fn max_tree_height_after_widening() -> usize {
        crate::config::ABSTRACT_TREE_WIDENING_HEIGHT
    }

    fn transform_on_widening_collapse(_leaf: &mut CollapseDepth) {}

    fn transform_on_sink(leaf: CollapseDepth) -> CollapseDepth {
        leaf
    }

    fn transform_on_hoist(leaf: CollapseDepth) -> CollapseDepth {
        leaf
    }
}

/// The output paths of a propagation, mapping each path to the collapse
/// depth that bounds the taint structure written through it.
pub type PathTreeDomain = AbstractTreeDomain<PathTreeConfig>;

impl fmt::Display for CollapseDepth {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CollapseDepth::Bottom => write!(formatter, "_|_"),
            CollapseDepth::Depth(NO_COLLAPSE) => write!(formatter, "no-collapse"),
            CollapseDepth::Depth(depth) => write!(formatter, "{depth}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_depth_lattice_laws() {
        crate::abstract_domain::tests::check_lattice_laws(&[
            CollapseDepth::Bottom,
            CollapseDepth::no_collapse(),
            CollapseDepth::new(3),
            CollapseDepth::zero(),
        ]);
    }

    #[test]
    fn smaller_depth_collapses_more() {
        assert!(CollapseDepth::no_collapse().leq(&CollapseDepth::new(3)));
        assert!(CollapseDepth::new(3).leq(&CollapseDepth::zero()));
        assert!(!CollapseDepth::zero().leq(&CollapseDepth::new(3)));

        assert_eq!(
            CollapseDepth::new(3).join(&CollapseDepth::new(5)),
            CollapseDepth::new(3),
        );
    }

    #[test]
    fn should_collapse_ignores_bottom_and_no_collapse() {
        assert!(CollapseDepth::zero().should_collapse());
        assert!(CollapseDepth::new(3).should_collapse());
        assert!(!CollapseDepth::no_collapse().should_collapse());
        assert!(!CollapseDepth::Bottom.should_collapse());
    }

    #[test]
    fn difference_removes_covered_depths() {
        let mut depth = CollapseDepth::new(5);
        depth.difference_with(&CollapseDepth::new(3));
        assert!(depth.is_bottom());

        let mut depth = CollapseDepth::new(3);
        depth.difference_with(&CollapseDepth::new(5));
        assert_eq!(depth, CollapseDepth::new(3));
    }
}
