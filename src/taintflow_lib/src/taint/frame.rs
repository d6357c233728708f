use std::fmt;

use crate::abstract_domain::{SetDomain, UpdateKind};
use crate::context::Context;
use crate::intermediate_representation::{
    AccessPath, ClassInterval, FieldId, MethodId, PathElement, PositionId, Root, TypeId,
};
use crate::prelude::*;

use super::{
    CallKind, CanonicalNameSet, CollapseDepth, FeatureId, FeatureMayAlwaysSet, FeatureSet,
    FieldOriginSet, KindId, MethodOrigin, MethodOriginSet, PathTreeDomain,
};

/// The class interval a frame was propagated through.
///
/// The interval restricts the receiver types for which the frame describes an
/// actual flow. If `preserves_type_context` is set, the frame was created in
/// the class context of its caller (e.g. by a `this.` call chain), so the
/// interval must be intersected with the interval of later call sites instead
/// of being replaced by it.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct CallClassIntervalContext {
    callee_interval: ClassInterval,
    preserves_type_context: bool,
}

impl CallClassIntervalContext {
    pub fn new(callee_interval: ClassInterval, preserves_type_context: bool) -> Self {
        CallClassIntervalContext {
            callee_interval,
            preserves_type_context,
        }
    }

    pub fn callee_interval(&self) -> ClassInterval {
        self.callee_interval
    }

    pub fn preserves_type_context(&self) -> bool {
        self.preserves_type_context
    }

    /// Returns whether this is the default context, i.e. the one of taint
    /// that never crossed a virtual call site.
    pub fn is_default(&self) -> bool {
        self == &CallClassIntervalContext::default()
    }
}

impl Default for CallClassIntervalContext {
    fn default() -> Self {
        CallClassIntervalContext {
            callee_interval: ClassInterval::top(),
            preserves_type_context: false,
        }
    }
}

impl fmt::Display for CallClassIntervalContext {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            "({}, preserves_type_context={})",
            self.callee_interval, self.preserves_type_context
        )
    }
}

/// The set of source positions taint passed through within one method.
pub type LocalPositionSet = SetDomain<PositionId>;

/// A user-declared or synthesized taint to attach to a model.
///
/// A config describes taint before any call site is involved. The frame built
/// from it carries distance zero and no callee; everything else is copied
/// from the config.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct TaintConfig {
    /// The kind of the taint, e.g. `UserInput`.
    pub kind: KindId,
    /// The port of the model the taint is declared on.
    pub callee_port: AccessPath,
    /// The call kind of the declared frames, `Declaration` unless the config
    /// describes a propagation.
    pub call_kind: CallKind,
    /// Features declared by the model author.
    pub user_features: FeatureSet,
    /// Ports whose runtime type materializes as a `via-type:` feature.
    pub via_type_of_ports: SetDomain<Root>,
    /// Ports whose constant argument materializes as a `via-value:` feature.
    pub via_value_of_ports: SetDomain<Root>,
    /// Naming templates for taint crossing into hand-written trace roots.
    pub canonical_names: CanonicalNameSet,
    /// The class interval of the taint.
    pub class_interval_context: CallClassIntervalContext,
    /// For propagations, the output paths the input taint flows to.
    pub output_paths: PathTreeDomain,
}

impl TaintConfig {
    pub fn new(kind: KindId, callee_port: AccessPath) -> Self {
        TaintConfig {
            kind,
            callee_port,
            call_kind: CallKind::declaration(),
            user_features: FeatureSet::empty(),
            via_type_of_ports: SetDomain::empty(),
            via_value_of_ports: SetDomain::empty(),
            canonical_names: CanonicalNameSet::empty(),
            class_interval_context: CallClassIntervalContext::default(),
            output_paths: PathTreeDomain::bottom(),
        }
    }

    /// A propagation of the input port taint into the given output paths.
    pub fn propagation(kind: KindId, callee_port: AccessPath, output_paths: PathTreeDomain) -> Self {
        TaintConfig {
            call_kind: CallKind::propagation(),
            output_paths,
            ..TaintConfig::new(kind, callee_port)
        }
    }

    pub fn with_user_features(mut self, features: impl IntoIterator<Item = FeatureId>) -> Self {
        self.user_features = features.into_iter().collect();
        self
    }

    pub fn with_via_type_of_ports(mut self, ports: impl IntoIterator<Item = Root>) -> Self {
        self.via_type_of_ports = ports.into_iter().collect();
        self
    }

    pub fn with_via_value_of_ports(mut self, ports: impl IntoIterator<Item = Root>) -> Self {
        self.via_value_of_ports = ports.into_iter().collect();
        self
    }

    pub fn with_canonical_names(
        mut self,
        names: impl IntoIterator<Item = super::CanonicalName>,
    ) -> Self {
        self.canonical_names = names.into_iter().collect();
        self
    }

    pub fn with_class_interval_context(mut self, context: CallClassIntervalContext) -> Self {
        self.class_interval_context = context;
        self
    }
}

/// A single hop of a taint trace.
///
/// A frame describes taint of one `kind` as seen from one method: where the
/// taint goes next (`callee`, `callee_port`, `call_position`), how far the
/// declared source or sink is (`distance`), which leaves it came from
/// (`origins`), and the features accumulated along the way. Two frames can
/// only be merged when everything but their lattice components is equal;
/// the containers in this module group frames accordingly.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Frame {
    kind: KindId,
    callee_port: AccessPath,
    callee: Option<MethodId>,
    field_callee: Option<FieldId>,
    call_position: Option<PositionId>,
    class_interval_context: CallClassIntervalContext,
    distance: u32,
    call_kind: CallKind,
    origins: MethodOriginSet,
    field_origins: FieldOriginSet,
    inferred_features: FeatureMayAlwaysSet,
    locally_inferred_features: FeatureMayAlwaysSet,
    user_features: FeatureSet,
    via_type_of_ports: SetDomain<Root>,
    via_value_of_ports: SetDomain<Root>,
    canonical_names: CanonicalNameSet,
    local_positions: LocalPositionSet,
    output_paths: PathTreeDomain,
}

impl Frame {
    /// Generate the frame declared by the given config.
    pub fn from_config(config: TaintConfig) -> Self {
        Frame {
            kind: config.kind,
            callee_port: config.callee_port,
            callee: None,
            field_callee: None,
            call_position: None,
            class_interval_context: config.class_interval_context,
            distance: 0,
            call_kind: config.call_kind,
            origins: MethodOriginSet::empty(),
            field_origins: FieldOriginSet::empty(),
            inferred_features: FeatureMayAlwaysSet::bottom(),
            locally_inferred_features: FeatureMayAlwaysSet::bottom(),
            user_features: config.user_features,
            via_type_of_ports: config.via_type_of_ports,
            via_value_of_ports: config.via_value_of_ports,
            canonical_names: config.canonical_names,
            local_positions: LocalPositionSet::empty(),
            output_paths: config.output_paths,
        }
    }

    pub fn kind(&self) -> KindId {
        self.kind
    }

    pub fn callee_port(&self) -> &AccessPath {
        &self.callee_port
    }

    pub fn callee(&self) -> Option<MethodId> {
        self.callee
    }

    pub fn field_callee(&self) -> Option<FieldId> {
        self.field_callee
    }

    pub fn call_position(&self) -> Option<PositionId> {
        self.call_position
    }

    pub fn class_interval_context(&self) -> CallClassIntervalContext {
        self.class_interval_context
    }

    pub fn distance(&self) -> u32 {
        self.distance
    }

    pub fn call_kind(&self) -> CallKind {
        self.call_kind
    }

    pub fn origins(&self) -> &MethodOriginSet {
        &self.origins
    }

    pub fn field_origins(&self) -> &FieldOriginSet {
        &self.field_origins
    }

    pub fn inferred_features(&self) -> &FeatureMayAlwaysSet {
        &self.inferred_features
    }

    pub fn locally_inferred_features(&self) -> &FeatureMayAlwaysSet {
        &self.locally_inferred_features
    }

    pub fn user_features(&self) -> &FeatureSet {
        &self.user_features
    }

    pub fn via_type_of_ports(&self) -> &SetDomain<Root> {
        &self.via_type_of_ports
    }

    pub fn via_value_of_ports(&self) -> &SetDomain<Root> {
        &self.via_value_of_ports
    }

    pub fn canonical_names(&self) -> &CanonicalNameSet {
        &self.canonical_names
    }

    pub fn local_positions(&self) -> &LocalPositionSet {
        &self.local_positions
    }

    pub fn output_paths(&self) -> &PathTreeDomain {
        &self.output_paths
    }

    /// Returns whether this is a leaf frame, i.e. the start or the end of a
    /// trace.
    pub fn is_leaf(&self) -> bool {
        self.callee.is_none()
    }

    /// Returns all features of the frame as seen from a caller, i.e. the
    /// inferred features plus the user features as always-features. Locally
    /// inferred features are not included.
    pub fn features(&self) -> FeatureMayAlwaysSet {
        let user_features = FeatureMayAlwaysSet::make_always(self.user_features.iter().copied());
        let mut features = self.inferred_features.clone();
        if features.is_bottom() {
            return user_features;
        }
        features.add(&user_features);
        features
    }

    /// Returns the frame with the kind replaced.
    pub fn with_kind(&self, kind: KindId) -> Frame {
        let mut frame = self.clone();
        frame.kind = kind;
        frame
    }

    /// Returns the frame with the callee port replaced.
    pub fn with_callee_port(&self, callee_port: AccessPath) -> Frame {
        let mut frame = self.clone();
        frame.callee_port = callee_port;
        frame
    }

    /// Returns the frame rewritten as the endpoint of a trace at the given
    /// position, as used when leaf taint becomes part of an issue.
    ///
    /// The rebuilt frame is an origin frame at distance zero. Features that
    /// were visible to callers are folded into the inferred set and user
    /// features reappear as locally inferred always-features, so that the
    /// issue reports them at its own position.
    pub fn attach_position(&self, position: PositionId) -> Frame {
        let mut inferred_features = self.features();
        inferred_features.add(&self.locally_inferred_features);
        let locally_inferred_features = if self.user_features.is_empty() {
            FeatureMayAlwaysSet::bottom()
        } else {
            FeatureMayAlwaysSet::make_always(self.user_features.iter().copied())
        };
        Frame {
            kind: self.kind,
            callee_port: self.callee_port.clone(),
            callee: None,
            field_callee: self.field_callee,
            call_position: Some(position),
            class_interval_context: self.class_interval_context,
            distance: 0,
            call_kind: CallKind::origin(),
            origins: self.origins.clone(),
            field_origins: self.field_origins.clone(),
            inferred_features,
            locally_inferred_features,
            user_features: FeatureSet::empty(),
            via_type_of_ports: SetDomain::empty(),
            via_value_of_ports: SetDomain::empty(),
            canonical_names: self.canonical_names.clone(),
            local_positions: self.local_positions.clone(),
            output_paths: PathTreeDomain::bottom(),
        }
    }

    pub fn add_origin(&mut self, origin: MethodOrigin) {
        self.origins.insert(origin);
    }

    pub fn add_field_origin(&mut self, field: FieldId) {
        self.field_origins.insert(field);
    }

    pub fn set_field_callee(&mut self, field: FieldId) {
        self.field_callee = Some(field);
    }

    pub fn add_inferred_features(&mut self, features: &FeatureMayAlwaysSet) {
        if features.is_bottom() || features.is_empty() {
            return;
        }
        self.inferred_features.add(features);
    }

    pub fn add_locally_inferred_features(&mut self, features: &FeatureMayAlwaysSet) {
        if features.is_bottom() || features.is_empty() {
            return;
        }
        self.locally_inferred_features.add(features);
    }

    /// Record a position the taint passed through, widening the set to top
    /// once it holds more than `max_number_local_positions` positions.
    ///
    /// Propagation frames never carry local positions.
    pub fn add_local_position(&mut self, position: PositionId, max_number_local_positions: usize) {
        if self.call_kind.is_propagation() {
            return;
        }
        self.local_positions.insert(position);
        if matches!(self.local_positions.len(), Some(size) if size > max_number_local_positions) {
            self.local_positions.set_to_top();
        }
    }

    /// Record that the propagation output flows into the given path element,
    /// e.g. because the propagated value was stored into a field.
    ///
    /// Output paths that were collapsed to depth zero swallow the element
    /// instead of growing. The rebuilt path tree is capped at
    /// `maximum_path_size` elements.
    pub fn append_to_propagation_output_paths(
        &mut self,
        path_element: PathElement,
        maximum_path_size: usize,
    ) {
        if !self.call_kind.is_propagation() {
            return;
        }
        let mut output_paths = PathTreeDomain::bottom();
        for (mut path, depth) in self.output_paths.elements() {
            if !depth.is_zero() {
                path.push(path_element);
            }
            output_paths.write(&path, *depth, UpdateKind::Weak);
        }
        output_paths.collapse_deeper_than(maximum_path_size, &mut |_| {});
        self.output_paths = output_paths;
    }

    /// Bound the collapse depth of all propagation output paths.
    pub fn update_maximum_collapse_depth(&mut self, collapse_depth: CollapseDepth) {
        if !self.call_kind.is_propagation() {
            return;
        }
        self.output_paths
            .transform(|depth| depth.join_with(&collapse_depth));
    }

    /// Compare two frames of the same group.
    pub fn leq(&self, other: &Frame) -> bool {
        self.kind == other.kind
            && self.callee_port == other.callee_port
            && self.callee == other.callee
            && self.field_callee == other.field_callee
            && self.call_position == other.call_position
            && self.call_kind == other.call_kind
            && self.class_interval_context == other.class_interval_context
            && self.distance <= other.distance
            && self.origins.leq(&other.origins)
            && self.field_origins.leq(&other.field_origins)
            && self.inferred_features.leq(&other.inferred_features)
            && self
                .locally_inferred_features
                .leq(&other.locally_inferred_features)
            && self.user_features.leq(&other.user_features)
            && self.via_type_of_ports.leq(&other.via_type_of_ports)
            && self.via_value_of_ports.leq(&other.via_value_of_ports)
            && self.canonical_names.leq(&other.canonical_names)
            && self.local_positions.leq(&other.local_positions)
            && self.output_paths.leq(&other.output_paths)
    }

    /// Merge two frames of the same group.
    ///
    /// The merged distance is the larger of the two distances, so that the
    /// distance keeps covering every described flow.
    pub fn join_with(&mut self, other: &Frame) {
        debug_assert_eq!(self.kind, other.kind);
        debug_assert_eq!(self.callee_port, other.callee_port);
        debug_assert_eq!(self.callee, other.callee);
        debug_assert_eq!(self.field_callee, other.field_callee);
        debug_assert_eq!(self.call_position, other.call_position);
        debug_assert_eq!(self.call_kind, other.call_kind);
        debug_assert_eq!(self.class_interval_context, other.class_interval_context);

        self.distance = std::cmp::max(self.distance, other.distance);
        self.origins.join_with(&other.origins);
        self.field_origins.join_with(&other.field_origins);
        self.inferred_features.join_with(&other.inferred_features);
        self.locally_inferred_features
            .join_with(&other.locally_inferred_features);
        self.user_features.join_with(&other.user_features);
        self.via_type_of_ports.join_with(&other.via_type_of_ports);
        self.via_value_of_ports.join_with(&other.via_value_of_ports);
        self.canonical_names.join_with(&other.canonical_names);
        self.local_positions.join_with(&other.local_positions);
        self.output_paths.join_with(&other.output_paths);
    }

    /// Intersect two frames of the same group.
    pub fn meet_with(&mut self, other: &Frame) {
        debug_assert_eq!(self.kind, other.kind);
        debug_assert_eq!(self.call_kind, other.call_kind);
        debug_assert_eq!(self.class_interval_context, other.class_interval_context);

        self.distance = std::cmp::min(self.distance, other.distance);
        self.origins.meet_with(&other.origins);
        self.field_origins.meet_with(&other.field_origins);
        self.inferred_features.meet_with(&other.inferred_features);
        self.locally_inferred_features
            .meet_with(&other.locally_inferred_features);
        self.user_features.meet_with(&other.user_features);
        self.via_type_of_ports.meet_with(&other.via_type_of_ports);
        self.via_value_of_ports.meet_with(&other.via_value_of_ports);
        self.canonical_names.meet_with(&other.canonical_names);
        self.local_positions.meet_with(&other.local_positions);
        if !(self.output_paths.is_bottom() && other.output_paths.is_bottom()) {
            self.output_paths.meet_with(&other.output_paths);
        }
    }

    /// Propagate the frame through a call site.
    ///
    /// `callee` is the resolved target of the call, `callee_port` the port of
    /// the callee model the frame was read from and `call_position` the
    /// position of the call. Declared frames first materialize into origin
    /// frames, then take the hop to the call site like any other frame.
    ///
    /// Returns `None` when the frame must not cross the call site, either
    /// because the source-sink distance budget is exhausted or because the
    /// class intervals prove the flow infeasible.
    #[allow(clippy::too_many_arguments)]
    pub fn propagate(
        &self,
        callee: Option<MethodId>,
        callee_port: AccessPath,
        call_position: PositionId,
        class_interval_context: &CallClassIntervalContext,
        caller_class_interval: ClassInterval,
        source_register_types: &[Option<TypeId>],
        source_constant_arguments: &[Option<String>],
        context: &Context,
    ) -> Option<Frame> {
        if self.distance >= context.options.maximum_source_sink_distance {
            return None;
        }

        let materializing = self.call_kind.is_declaration();
        let call_kind = if materializing {
            self.call_kind.propagate().propagate()
        } else {
            self.call_kind.propagate()
        };

        let class_interval_context =
            self.propagate_interval(materializing, class_interval_context, caller_class_interval);
        if class_interval_context.callee_interval().is_bottom() {
            return None;
        }

        let mut inferred_features = self.locally_inferred_features.clone();
        let user_features = if materializing {
            debug_assert!(self.inferred_features.is_bottom() || self.inferred_features.is_empty());
            self.user_features.clone()
        } else {
            // Non-local features of the callee frame, user-declared ones
            // included, become plain inferred features of the caller frame.
            inferred_features.add(&self.features());
            FeatureSet::empty()
        };

        let mut via_type_of_features = Vec::new();
        if let Some(callee) = callee {
            via_type_of_features =
                self.materialize_via_type_of_ports(callee, source_register_types, context);
            let via_value_of_features =
                self.materialize_via_value_of_ports(callee, source_constant_arguments, context);
            let materialized: Vec<FeatureId> = via_type_of_features
                .iter()
                .copied()
                .chain(via_value_of_features)
                .collect();
            if !materialized.is_empty() {
                inferred_features.add(&FeatureMayAlwaysSet::make_always(materialized));
            }
        }

        let canonical_names =
            self.propagate_canonical_names(callee, &via_type_of_features, context);

        let output_paths = if call_kind.is_propagation() {
            self.output_paths.clone()
        } else {
            PathTreeDomain::bottom()
        };

        Some(Frame {
            kind: self.kind,
            callee_port,
            callee,
            field_callee: None,
            call_position: Some(call_position),
            class_interval_context,
            distance: self.distance + 1,
            call_kind,
            origins: self.origins.clone(),
            field_origins: self.field_origins.clone(),
            inferred_features,
            locally_inferred_features: FeatureMayAlwaysSet::bottom(),
            user_features,
            via_type_of_ports: SetDomain::empty(),
            via_value_of_ports: SetDomain::empty(),
            canonical_names,
            local_positions: LocalPositionSet::empty(),
            output_paths,
        })
    }

    fn propagate_interval(
        &self,
        materializing: bool,
        class_interval_context: &CallClassIntervalContext,
        caller_class_interval: ClassInterval,
    ) -> CallClassIntervalContext {
        if materializing {
            // The new origin frame is tied to the class context of the
            // method that calls the declared source or sink.
            return CallClassIntervalContext::new(caller_class_interval, true);
        }
        if self.class_interval_context.preserves_type_context() {
            CallClassIntervalContext::new(
                self.class_interval_context
                    .callee_interval()
                    .meet(&class_interval_context.callee_interval()),
                class_interval_context.preserves_type_context(),
            )
        } else {
            *class_interval_context
        }
    }

    fn materialize_via_type_of_ports(
        &self,
        callee: MethodId,
        source_register_types: &[Option<TypeId>],
        context: &Context,
    ) -> Vec<FeatureId> {
        let mut features = Vec::new();
        for port in self.via_type_of_ports.iter() {
            let port_type = match port {
                Root::Return => context.method(callee).return_type,
                Root::Argument(position) => {
                    match source_register_types.get(*position as usize) {
                        Some(register_type) => *register_type,
                        None => {
                            log::error!(
                                "Invalid via-type-of port {port} for method {}",
                                context.method_signature(callee)
                            );
                            continue;
                        }
                    }
                }
                Root::CallEffect => {
                    log::error!(
                        "Invalid via-type-of port {port} for method {}",
                        context.method_signature(callee)
                    );
                    continue;
                }
            };
            features.push(context.via_type_of_feature(port_type));
        }
        features
    }

    fn materialize_via_value_of_ports(
        &self,
        callee: MethodId,
        source_constant_arguments: &[Option<String>],
        context: &Context,
    ) -> Vec<FeatureId> {
        let mut features = Vec::new();
        for port in self.via_value_of_ports.iter() {
            let constant = match port {
                Root::Argument(position) => {
                    match source_constant_arguments.get(*position as usize) {
                        Some(constant) => constant.as_deref(),
                        None => {
                            log::error!(
                                "Invalid via-value-of port {port} for method {}",
                                context.method_signature(callee)
                            );
                            continue;
                        }
                    }
                }
                _ => {
                    log::error!(
                        "Invalid via-value-of port {port} for method {}",
                        context.method_signature(callee)
                    );
                    continue;
                }
            };
            features.push(context.via_value_of_feature(constant));
        }
        features
    }

    fn propagate_canonical_names(
        &self,
        callee: Option<MethodId>,
        via_type_of_features: &[FeatureId],
        context: &Context,
    ) -> CanonicalNameSet {
        let names = match self.canonical_names.as_set() {
            Some(names) if !names.is_empty() => names,
            _ => return CanonicalNameSet::empty(),
        };
        // The names are either all templates or all instantiated values.
        // Instantiated values do not propagate any further.
        if names.iter().any(|name| name.instantiated_value().is_some()) {
            return CanonicalNameSet::empty();
        }
        let callee = match callee {
            Some(callee) => callee,
            None => {
                log::error!("Canonical names can only be instantiated with a method callee");
                return CanonicalNameSet::empty();
            }
        };

        let callee_name = context.method_signature(callee);
        let feature_names: Vec<String> = via_type_of_features
            .iter()
            .map(|feature| context.features.name(*feature))
            .collect();
        let mut instantiated = CanonicalNameSet::empty();
        for name in names {
            if let Some(instance) = name.instantiate(&callee_name, &feature_names) {
                instantiated.insert(instance);
            }
        }
        instantiated
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            "Frame(kind={}, callee_port={}",
            self.kind, self.callee_port
        )?;
        if let Some(callee) = self.callee {
            write!(formatter, ", callee={callee}")?;
        }
        if let Some(field_callee) = self.field_callee {
            write!(formatter, ", field_callee={field_callee}")?;
        }
        if let Some(call_position) = self.call_position {
            write!(formatter, ", call_position={call_position}")?;
        }
        write!(formatter, ", call_kind={}", self.call_kind)?;
        if self.distance > 0 {
            write!(formatter, ", distance={}", self.distance)?;
        }
        if !self.class_interval_context.is_default() {
            write!(formatter, ", interval={}", self.class_interval_context)?;
        }
        if !self.origins.is_empty() {
            write!(formatter, ", origins={}", self.origins)?;
        }
        if !(self.inferred_features.is_bottom() || self.inferred_features.is_empty()) {
            write!(formatter, ", inferred_features={}", self.inferred_features)?;
        }
        if !(self.locally_inferred_features.is_bottom()
            || self.locally_inferred_features.is_empty())
        {
            write!(
                formatter,
                ", locally_inferred_features={}",
                self.locally_inferred_features
            )?;
        }
        if !self.user_features.is_empty() {
            write!(formatter, ", user_features={}", self.user_features)?;
        }
        if !self.output_paths.is_bottom() {
            write!(formatter, ", output_paths=...")?;
        }
        write!(formatter, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Heuristics, Options};
    use crate::intermediate_representation::{Method, Position, StringId};
    use crate::taint::CanonicalName;

    fn test_context() -> Context {
        Context::new(Options::default(), Heuristics::default())
    }

    fn test_callee(context: &mut Context, return_type: Option<TypeId>) -> MethodId {
        let class = context.type_named("Lcom/example/Data;");
        let name = context.strings.intern("getValue");
        context
            .methods
            .add(Method::new(class, name, vec![class], return_type, false, None))
    }

    fn test_position(context: &mut Context, line: u32) -> PositionId {
        context.positions.intern(Position::new(None, Some(line)))
    }

    #[test]
    fn declared_frames_materialize_at_the_call_site() {
        let mut context = test_context();
        let callee = test_callee(&mut context, None);
        let position = test_position(&mut context, 10);
        let kind = context.kinds.named("UserInput");
        let feature = context.features.intern("via-user");

        let frame = Frame::from_config(
            TaintConfig::new(kind, AccessPath::from_root(Root::Return))
                .with_user_features([feature]),
        );
        assert!(frame.is_leaf());
        assert_eq!(frame.call_kind(), CallKind::declaration());

        let propagated = frame
            .propagate(
                Some(callee),
                AccessPath::from_root(Root::Return),
                position,
                &CallClassIntervalContext::default(),
                ClassInterval::top(),
                &[],
                &[],
                &context,
            )
            .unwrap();
        assert_eq!(propagated.call_kind(), CallKind::callsite());
        assert_eq!(propagated.distance(), 1);
        assert_eq!(propagated.callee(), Some(callee));
        assert_eq!(propagated.call_position(), Some(position));
        // User features survive the materializing hop as user features.
        assert!(propagated.user_features().contains(&feature));
        assert!(propagated.inferred_features().is_bottom());
        assert!(propagated
            .class_interval_context()
            .preserves_type_context());
    }

    #[test]
    fn propagate_increments_the_distance_and_folds_features() {
        let mut context = test_context();
        let callee = test_callee(&mut context, None);
        let position = test_position(&mut context, 10);
        let kind = context.kinds.named("UserInput");
        let feature = context.features.intern("via-user");

        let frame = Frame::from_config(
            TaintConfig::new(kind, AccessPath::from_root(Root::Return))
                .with_user_features([feature]),
        );
        let first_hop = frame
            .propagate(
                Some(callee),
                AccessPath::from_root(Root::Return),
                position,
                &CallClassIntervalContext::default(),
                ClassInterval::top(),
                &[],
                &[],
                &context,
            )
            .unwrap();
        let second_hop = first_hop
            .propagate(
                Some(callee),
                AccessPath::from_root(Root::Return),
                position,
                &CallClassIntervalContext::default(),
                ClassInterval::top(),
                &[],
                &[],
                &context,
            )
            .unwrap();
        assert_eq!(second_hop.distance(), 2);
        assert_eq!(second_hop.call_kind(), CallKind::callsite());
        // The user features of the callee frame become inferred features.
        assert!(second_hop.user_features().is_empty());
        assert!(second_hop.inferred_features().always().contains(&feature));
    }

    #[test]
    fn propagate_stops_at_the_maximum_distance() {
        let mut context = test_context();
        context.options.maximum_source_sink_distance = 2;
        let callee = test_callee(&mut context, None);
        let position = test_position(&mut context, 10);
        let kind = context.kinds.named("UserInput");

        let mut frame =
            Frame::from_config(TaintConfig::new(kind, AccessPath::from_root(Root::Return)));
        for _ in 0..2 {
            frame = frame
                .propagate(
                    Some(callee),
                    AccessPath::from_root(Root::Return),
                    position,
                    &CallClassIntervalContext::default(),
                    ClassInterval::top(),
                    &[],
                    &[],
                    &context,
                )
                .unwrap();
        }
        assert_eq!(frame.distance(), 2);
        assert!(frame
            .propagate(
                Some(callee),
                AccessPath::from_root(Root::Return),
                position,
                &CallClassIntervalContext::default(),
                ClassInterval::top(),
                &[],
                &[],
                &context,
            )
            .is_none());
    }

    #[test]
    fn propagate_drops_infeasible_class_intervals() {
        let mut context = test_context();
        let callee = test_callee(&mut context, None);
        let position = test_position(&mut context, 10);
        let kind = context.kinds.named("UserInput");

        let frame = Frame::from_config(
            TaintConfig::new(kind, AccessPath::from_root(Root::Return))
                .with_class_interval_context(CallClassIntervalContext::new(
                    ClassInterval::new(2, 3),
                    true,
                )),
        );
        // Materialize the declared frame into a call-site frame first, with
        // an interval that preserves the type context.
        let materialized = Frame {
            call_kind: CallKind::callsite(),
            distance: 1,
            ..frame
        };
        assert!(materialized
            .propagate(
                Some(callee),
                AccessPath::from_root(Root::Return),
                position,
                &CallClassIntervalContext::new(ClassInterval::new(10, 20), false),
                ClassInterval::top(),
                &[],
                &[],
                &context,
            )
            .is_none());
    }

    #[test]
    fn propagate_materializes_via_features() {
        let mut context = test_context();
        let argument_type = context.type_named("Landroid/content/Intent;");
        let return_type = context.type_named("Ljava/lang/String;");
        let callee = test_callee(&mut context, Some(return_type));
        let position = test_position(&mut context, 10);
        let kind = context.kinds.named("UserInput");

        let frame = Frame::from_config(
            TaintConfig::new(kind, AccessPath::from_root(Root::Return))
                .with_via_type_of_ports([Root::Argument(0), Root::Return])
                .with_via_value_of_ports([Root::Argument(1)]),
        );
        let propagated = frame
            .propagate(
                Some(callee),
                AccessPath::from_root(Root::Return),
                position,
                &CallClassIntervalContext::default(),
                ClassInterval::top(),
                &[Some(argument_type)],
                &[None, Some("mode=append".to_string())],
                &context,
            )
            .unwrap();

        let always = propagated.inferred_features().always();
        assert!(always.contains(&context.features.intern("via-type:Landroid/content/Intent;")));
        assert!(always.contains(&context.features.intern("via-type:Ljava/lang/String;")));
        assert!(always.contains(&context.features.intern("via-value:mode=append")));
        // Via-ports are consumed by the materialization.
        assert!(propagated.via_type_of_ports().is_empty());
        assert!(propagated.via_value_of_ports().is_empty());
    }

    #[test]
    fn propagate_instantiates_canonical_names() {
        let mut context = test_context();
        let argument_type = context.type_named("Landroid/content/Intent;");
        let callee = test_callee(&mut context, None);
        let position = test_position(&mut context, 10);
        let kind = context.kinds.named("CrossRepositorySink");

        let frame = Frame::from_config(
            TaintConfig::new(kind, AccessPath::from_root(Root::Argument(0)))
                .with_via_type_of_ports([Root::Argument(0)])
                .with_canonical_names([CanonicalName::template("%via_type_of%")]),
        );
        let propagated = frame
            .propagate(
                Some(callee),
                AccessPath::from_root(Root::Argument(0)),
                position,
                &CallClassIntervalContext::default(),
                ClassInterval::top(),
                &[Some(argument_type)],
                &[],
                &context,
            )
            .unwrap();
        assert!(propagated.canonical_names().contains(&CanonicalName::instantiated(
            "via-type:Landroid/content/Intent;",
        )));
    }

    #[test]
    fn join_takes_the_longest_distance() {
        let mut context = test_context();
        let callee = test_callee(&mut context, None);
        let position = test_position(&mut context, 10);
        let kind = context.kinds.named("UserInput");
        let first_origin = MethodOrigin::new(MethodId(7), AccessPath::from_root(Root::Return));
        let second_origin = MethodOrigin::new(MethodId(8), AccessPath::from_root(Root::Return));

        let declared =
            Frame::from_config(TaintConfig::new(kind, AccessPath::from_root(Root::Return)));
        let mut shorter = declared
            .propagate(
                Some(callee),
                AccessPath::from_root(Root::Return),
                position,
                &CallClassIntervalContext::default(),
                ClassInterval::top(),
                &[],
                &[],
                &context,
            )
            .unwrap();
        shorter.add_origin(first_origin.clone());
        let mut longer = shorter.clone();
        longer.distance = 5;
        longer.origins = MethodOriginSet::singleton(second_origin.clone());

        assert!(!shorter.leq(&longer));
        shorter.join_with(&longer);
        assert_eq!(shorter.distance(), 5);
        assert!(shorter.origins().contains(&first_origin));
        assert!(shorter.origins().contains(&second_origin));
    }

    #[test]
    fn local_positions_widen_to_top() {
        let mut context = test_context();
        let kind = context.kinds.named("UserInput");
        let mut frame =
            Frame::from_config(TaintConfig::new(kind, AccessPath::from_root(Root::Return)));
        for line in 0..3 {
            let position = test_position(&mut context, line);
            frame.add_local_position(position, 2);
        }
        assert!(frame.local_positions().is_top());
    }

    #[test]
    fn output_paths_follow_field_reads() {
        let context = test_context();
        let kind = context.kinds.local_return();

        let field_x = PathElement::Field(StringId(1));
        let field_y = PathElement::Field(StringId(2));

        let mut output_paths = PathTreeDomain::bottom();
        output_paths.write(&[], CollapseDepth::no_collapse(), UpdateKind::Strong);
        let mut frame = Frame::from_config(TaintConfig::propagation(
            kind,
            AccessPath::from_root(Root::Argument(0)),
            output_paths,
        ));

        frame.append_to_propagation_output_paths(field_x, 2);
        assert_eq!(
            frame.output_paths().raw_read(&[field_x]).root(),
            &CollapseDepth::no_collapse()
        );

        // A path collapsed to depth zero swallows further elements.
        frame.update_maximum_collapse_depth(CollapseDepth::zero());
        frame.append_to_propagation_output_paths(field_y, 2);
        assert_eq!(
            frame.output_paths().raw_read(&[field_x]).root(),
            &CollapseDepth::zero()
        );
        assert!(frame
            .output_paths()
            .raw_read(&[field_x, field_y])
            .is_bottom());
    }
}
