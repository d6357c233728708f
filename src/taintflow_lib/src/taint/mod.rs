//! Types for representing taint and the traces it travels along.
//!
//! Taint is a partition of [`Frame`]s. Each frame describes one hop of one
//! trace: the kind of the taint, the next hop towards its declaration and the
//! distance, features and origins collected so far. [`Taint`] groups the
//! frames of a method by kind, next hop, call position and callee port, so
//! that only frames whose trace bookkeeping agrees are ever merged.
//! [`TaintTree`] and [`TaintAccessPathTree`] additionally index taint by the
//! access path within a value.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;

use crate::abstract_domain::{DifferenceDomain, DomainMap, UnionMergeStrategy};
use crate::context::Context;
use crate::intermediate_representation::{
    AccessPath, ClassInterval, FieldId, MethodId, PathElement, PositionId, TypeId,
};
use crate::prelude::*;

mod call_kind;
pub use call_kind::CallKind;

mod canonical_name;
pub use canonical_name::{CanonicalName, CanonicalNameSet};

mod collapse_depth;
pub use collapse_depth::{CollapseDepth, PathTreeConfig, PathTreeDomain};

mod feature;
pub use feature::{FeatureId, FeatureMayAlwaysSet, FeatureSet};

mod frame;
pub use frame::{CallClassIntervalContext, Frame, LocalPositionSet, TaintConfig};

mod kind;
pub use kind::{Kind, KindId};

mod origin;
pub use origin::{FieldOriginSet, MethodOrigin, MethodOriginSet};

mod taint_tree;
pub use taint_tree::{TaintAccessPathTree, TaintTree};

/// The next hop of a frame, i.e. the model its trace continues in.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum TaintCallee {
    /// Leaf taint, still inside the method declaring it.
    Leaf,
    /// Taint that crossed a call to the given method.
    Method(MethodId),
    /// Taint read from or written into the given field.
    Field(FieldId),
}

impl TaintCallee {
    fn of(frame: &Frame) -> Self {
        if let Some(method) = frame.callee() {
            TaintCallee::Method(method)
        } else if let Some(field) = frame.field_callee() {
            TaintCallee::Field(field)
        } else {
            TaintCallee::Leaf
        }
    }
}

impl fmt::Display for TaintCallee {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaintCallee::Leaf => write!(formatter, "Leaf"),
            TaintCallee::Method(method) => write!(formatter, "method#{}", method.0),
            TaintCallee::Field(field) => write!(formatter, "field#{}", field.0),
        }
    }
}

/// The frames sharing kind, next hop, call position and callee port,
/// partitioned by call kind and class interval.
///
/// This is the innermost level of [`Taint`]. Frames under the same key only
/// differ in their lattice components and are merged with
/// [`Frame::join_with`]. A frame itself has no bottom element; the empty
/// partition is the bottom of this domain.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct FramesByInterval {
    frames: BTreeMap<(CallKind, CallClassIntervalContext), Frame>,
}

impl FramesByInterval {
    /// Joins the frame into the partition.
    pub fn add(&mut self, frame: Frame) {
        let key = (frame.call_kind(), frame.class_interval_context());
        match self.frames.entry(key) {
            Entry::Occupied(mut entry) => entry.get_mut().join_with(&frame),
            Entry::Vacant(entry) => {
                entry.insert(frame);
            }
        }
    }

    /// Returns an iterator over the frames of the partition.
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.frames.values()
    }

    /// Applies the transformation to every frame.
    /// It must not change the call kind or class interval of a frame.
    pub fn transform<F: FnMut(&mut Frame)>(&mut self, mut transform: F) {
        for frame in self.frames.values_mut() {
            transform(frame);
        }
    }

    /// Removes all frames not satisfying the predicate.
    pub fn retain<F: FnMut(&Frame) -> bool>(&mut self, mut predicate: F) {
        self.frames.retain(|_, frame| predicate(frame));
    }

    /// Returns the number of frames in the partition.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns whether the partition contains no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl AbstractDomain for FramesByInterval {
    fn bottom() -> Self {
        FramesByInterval {
            frames: BTreeMap::new(),
        }
    }

    fn is_bottom(&self) -> bool {
        self.frames.is_empty()
    }

    fn leq(&self, other: &Self) -> bool {
        self.frames.iter().all(|(key, frame)| match other.frames.get(key) {
            Some(other_frame) => frame.leq(other_frame),
            None => false,
        })
    }

    fn join_with(&mut self, other: &Self) {
        for (key, other_frame) in other.frames.iter() {
            match self.frames.entry(*key) {
                Entry::Occupied(mut entry) => entry.get_mut().join_with(other_frame),
                Entry::Vacant(entry) => {
                    entry.insert(other_frame.clone());
                }
            }
        }
    }

    fn meet_with(&mut self, other: &Self) {
        self.frames.retain(|key, frame| match other.frames.get(key) {
            Some(other_frame) => {
                frame.meet_with(other_frame);
                true
            }
            None => false,
        });
    }
}

impl DifferenceDomain for FramesByInterval {
    fn difference_with(&mut self, other: &Self) {
        self.frames.retain(|key, frame| match other.frames.get(key) {
            Some(other_frame) => !frame.leq(other_frame),
            None => true,
        });
    }
}

/// The frame partitions of one call position, indexed by the callee port the
/// frames were read from.
pub type CalleePortFrames = DomainMap<AccessPath, FramesByInterval, UnionMergeStrategy>;

/// The frame partitions of one callee, indexed by call position.
/// Leaf frames have no call position.
pub type CallPositionFrames = DomainMap<Option<PositionId>, CalleePortFrames, UnionMergeStrategy>;

/// The frame partitions of one kind, indexed by the next hop.
pub type CalleeFrames = DomainMap<TaintCallee, CallPositionFrames, UnionMergeStrategy>;

/// The taint reaching one value of the analyzed method.
///
/// Structurally this is a map `kind -> callee -> call position -> callee port
/// -> frames`, i.e. a partition of frames by everything a trace hop is keyed
/// on. The partition has no top element: its width is bounded by the program
/// under analysis, not by the domain itself.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct Taint {
    map: DomainMap<KindId, CalleeFrames, UnionMergeStrategy>,
}

impl Taint {
    /// Generate the taint declared by the given config.
    pub fn from_config(config: TaintConfig) -> Self {
        let mut taint = Taint::bottom();
        taint.add(Frame::from_config(config));
        taint
    }

    /// Joins the frame into the partition it belongs to.
    pub fn add(&mut self, frame: Frame) {
        self.map
            .entry(frame.kind())
            .or_default()
            .entry(TaintCallee::of(&frame))
            .or_default()
            .entry(frame.call_position())
            .or_default()
            .entry(frame.callee_port().clone())
            .or_default()
            .add(frame);
    }

    /// Returns an iterator over all frames of the taint.
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.map
            .values()
            .flat_map(|callee_frames| callee_frames.values())
            .flat_map(|position_frames| position_frames.values())
            .flat_map(|port_frames| port_frames.values())
            .flat_map(|frames| frames.frames())
    }

    /// Returns the number of frames in the taint.
    pub fn num_frames(&self) -> usize {
        self.frames().count()
    }

    /// Returns an iterator over the kinds present in the taint.
    pub fn kinds(&self) -> impl Iterator<Item = KindId> + '_ {
        self.map.keys().copied()
    }

    /// Applies the transformation to every frame.
    /// It must not change any of the components the partition is keyed on,
    /// i.e. kind, callee, field callee, call position, callee port, call
    /// kind and class interval.
    pub fn transform_frames<F: FnMut(&mut Frame)>(&mut self, mut transform: F) {
        for callee_frames in self.map.values_mut() {
            for position_frames in callee_frames.values_mut() {
                for port_frames in position_frames.values_mut() {
                    for frames in port_frames.values_mut() {
                        frames.transform(&mut transform);
                    }
                }
            }
        }
    }

    /// Removes all frames not satisfying the predicate.
    pub fn retain_frames<F: FnMut(&Frame) -> bool>(&mut self, mut predicate: F) {
        self.map.retain(|_, callee_frames| {
            callee_frames.retain(|_, position_frames| {
                position_frames.retain(|_, port_frames| {
                    port_frames.retain(|_, frames| {
                        frames.retain(&mut predicate);
                        !frames.is_bottom()
                    });
                    !port_frames.is_bottom()
                });
                !position_frames.is_bottom()
            });
            !callee_frames.is_bottom()
        });
    }

    /// Returns the taint restricted to the kinds satisfying the predicate.
    pub fn filter_by_kind<F: FnMut(KindId) -> bool>(&self, mut predicate: F) -> Taint {
        Taint {
            map: self
                .map
                .iter()
                .filter(|(kind, _)| predicate(**kind))
                .map(|(kind, callee_frames)| (*kind, callee_frames.clone()))
                .collect(),
        }
    }

    /// Splits the taint into the kinds satisfying the predicate and the rest.
    pub fn partition_by_kind<F: FnMut(KindId) -> bool>(&self, mut predicate: F) -> (Taint, Taint) {
        let mut matching = Taint::bottom();
        let mut rest = Taint::bottom();
        for (kind, callee_frames) in self.map.iter() {
            let target = if predicate(*kind) {
                &mut matching
            } else {
                &mut rest
            };
            target.map.insert(*kind, callee_frames.clone());
        }
        (matching, rest)
    }

    /// Rewrites the kind of every frame.
    /// Frames whose kind is mapped to `None` are dropped.
    pub fn map_kinds<F: FnMut(KindId) -> Option<KindId>>(&self, mut map: F) -> Taint {
        let mut result = Taint::bottom();
        for frame in self.frames() {
            if let Some(kind) = map(frame.kind()) {
                result.add(frame.with_kind(kind));
            }
        }
        result
    }

    /// Adds the features to every frame as locally inferred features.
    pub fn add_locally_inferred_features(&mut self, features: &FeatureMayAlwaysSet) {
        if features.is_bottom() || features.is_empty() {
            return;
        }
        self.transform_frames(|frame| frame.add_locally_inferred_features(features));
    }

    /// Records a position the taint passed through within the current method.
    pub fn add_local_position(&mut self, position: PositionId, max_number_local_positions: usize) {
        self.transform_frames(|frame| {
            frame.add_local_position(position, max_number_local_positions)
        });
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
        self.transform_frames(|frame| {
            frame.add_locally_inferred_features(features);
            if let Some(position) = position {
                frame.add_local_position(position, max_number_local_positions);
            }
        });
    }

    /// Returns the local positions of all frames.
    pub fn local_positions(&self) -> LocalPositionSet {
        let mut positions = LocalPositionSet::empty();
        for frame in self.frames() {
            positions.join_with(frame.local_positions());
        }
        positions
    }

    /// Returns the features of all frames, locally inferred ones included,
    /// joined into a single set.
    pub fn features_joined(&self) -> FeatureMayAlwaysSet {
        let mut features = FeatureMayAlwaysSet::bottom();
        for frame in self.frames() {
            let mut frame_features = frame.features();
            frame_features.add(frame.locally_inferred_features());
            features.join_with(&frame_features);
        }
        features
    }

    /// Attaches the method and port as origin to all declared frames,
    /// identifying the model the taint was declared on.
    pub fn add_origins_if_declaration(&mut self, method: MethodId, port: &AccessPath) {
        self.transform_frames(|frame| {
            if frame.call_kind().is_declaration() {
                frame.add_origin(MethodOrigin::new(method, port.clone()));
            }
        });
    }

    /// Attaches the field as origin to all declared frames. The field becomes
    /// the next hop of those frames, so the partition is rebuilt.
    pub fn add_field_origins_if_declaration(&mut self, field: FieldId) {
        let mut result = Taint::bottom();
        for frame in self.frames() {
            let mut frame = frame.clone();
            if frame.call_kind().is_declaration() {
                frame.add_field_origin(field);
                frame.set_field_callee(field);
            }
            result.add(frame);
        }
        *self = result;
    }

    /// Bounds the collapse depth of all propagation output paths.
    pub fn update_maximum_collapse_depth(&mut self, collapse_depth: CollapseDepth) {
        self.transform_frames(|frame| frame.update_maximum_collapse_depth(collapse_depth));
    }

    /// Records that the propagation output flows into the given path element.
    pub fn append_to_propagation_output_paths(
        &mut self,
        path_element: PathElement,
        maximum_path_size: usize,
    ) {
        self.transform_frames(|frame| {
            frame.append_to_propagation_output_paths(path_element, maximum_path_size)
        });
    }

    /// Rewrites taint read from a callee's model into taint of the caller at
    /// the given call site.
    ///
    /// Frames are dropped when their distance budget is exhausted or the
    /// class intervals prove the flow infeasible, see [`Frame::propagate`].
    #[allow(clippy::too_many_arguments)]
    pub fn propagate(
        &self,
        callee: Option<MethodId>,
        callee_port: &AccessPath,
        call_position: PositionId,
        class_interval_context: &CallClassIntervalContext,
        caller_class_interval: ClassInterval,
        source_register_types: &[Option<TypeId>],
        source_constant_arguments: &[Option<String>],
        context: &Context,
    ) -> Taint {
        let mut result = Taint::bottom();
        for frame in self.frames() {
            if let Some(propagated) = frame.propagate(
                callee,
                callee_port.clone(),
                call_position,
                class_interval_context,
                caller_class_interval,
                source_register_types,
                source_constant_arguments,
                context,
            ) {
                result.add(propagated);
            }
        }
        result
    }

    /// Attaches the given position to all leaf frames, rewriting them into
    /// origin frames as they appear in issues. Frames that already crossed a
    /// call site are dropped.
    pub fn attach_position(&self, position: PositionId) -> Taint {
        let mut result = Taint::bottom();
        for frame in self.frames() {
            if !frame.is_leaf() {
                continue;
            }
            result.add(frame.attach_position(position));
        }
        result
    }
}

impl AbstractDomain for Taint {
    fn bottom() -> Self {
        Taint {
            map: DomainMap::bottom(),
        }
    }

    fn is_bottom(&self) -> bool {
        self.map.is_bottom()
    }

    fn leq(&self, other: &Self) -> bool {
        self.map.leq(&other.map)
    }

    fn join_with(&mut self, other: &Self) {
        self.map.join_with(&other.map);
    }

    fn widen_with(&mut self, other: &Self) {
        self.map.widen_with(&other.map);
    }

    fn meet_with(&mut self, other: &Self) {
        self.map.meet_with(&other.map);
    }
}

impl DifferenceDomain for Taint {
    fn difference_with(&mut self, other: &Self) {
        self.map.difference_with(&other.map);
    }
}

impl FromIterator<Frame> for Taint {
    fn from_iter<I: IntoIterator<Item = Frame>>(iter: I) -> Self {
        let mut taint = Taint::bottom();
        for frame in iter {
            taint.add(frame);
        }
        taint
    }
}

impl fmt::Display for Taint {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{{{}}}", self.frames().join(", "))
    }
}
