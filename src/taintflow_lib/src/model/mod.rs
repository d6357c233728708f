//! Models summarize the taint behavior of methods and fields.
//!
//! A [`Model`] is both the input and the output of the per-method analysis:
//! user declarations seed it with sources, sinks, propagations and
//! sanitizers, the analysis adds what it infers from the method's body, and
//! call sites of the method instantiate it instead of descending into the
//! callee. The [`Registry`] holds the models of the whole program between
//! rounds of the global fixpoint, and [`Rules`] decides which source-sink
//! pairings are reported as [`Issue`]s.

use std::fmt;

use crate::abstract_domain::{DomainMap, UnionMergeStrategy, UpdateKind};
use crate::context::Context;
use crate::intermediate_representation::{
    AccessPath, ClassInterval, MethodId, PositionId, Root, TypeId,
};
use crate::prelude::*;
use crate::taint::{
    CallClassIntervalContext, CollapseDepth, FeatureId, FeatureMayAlwaysSet, Frame, PathTreeDomain,
    Taint, TaintAccessPathTree, TaintConfig,
};

mod field_model;
pub use field_model::FieldModel;

mod issue;
pub use issue::{Issue, IssueSet};

mod registry;
pub use registry::Registry;

mod rule;
pub use rule::{Rule, RuleDetail, RuleId, Rules};

mod sanitizer;
pub use sanitizer::{Sanitizer, SanitizerKind, SanitizerSet};

/// Mode flags switching parts of a method's analysis on or off.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct Modes(u32);

impl Modes {
    /// Keep the default mode heuristics from firing for this method.
    pub const OVERRIDE_DEFAULT: Modes = Modes(1 << 0);
    /// Do not analyze the method's body; its declared model is final.
    pub const SKIP_ANALYSIS: Modes = Modes(1 << 1);
    /// Mark taint propagated through the method with the obscure feature.
    pub const ADD_VIA_OBSCURE_FEATURE: Modes = Modes(1 << 2);
    /// Assume taint on any argument flows into the return value.
    pub const TAINT_IN_TAINT_OUT: Modes = Modes(1 << 3);
    /// Assume taint on any argument flows into the receiver.
    pub const TAINT_IN_TAINT_THIS: Modes = Modes(1 << 4);
    /// Do not join this model with the models of overriding methods at
    /// virtual call sites.
    pub const NO_JOIN_VIRTUAL_OVERRIDES: Modes = Modes(1 << 5);

    pub fn empty() -> Self {
        Modes(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Modes) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Modes) {
        self.0 |= other.0;
    }

    pub fn is_subset_of(self, other: Modes) -> bool {
        other.contains(self)
    }
}

impl std::ops::BitOr for Modes {
    type Output = Modes;

    fn bitor(self, other: Modes) -> Modes {
        Modes(self.0 | other.0)
    }
}

impl fmt::Display for Modes {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        let names = [
            (Modes::OVERRIDE_DEFAULT, "override-default"),
            (Modes::SKIP_ANALYSIS, "skip-analysis"),
            (Modes::ADD_VIA_OBSCURE_FEATURE, "add-via-obscure-feature"),
            (Modes::TAINT_IN_TAINT_OUT, "taint-in-taint-out"),
            (Modes::TAINT_IN_TAINT_THIS, "taint-in-taint-this"),
            (Modes::NO_JOIN_VIRTUAL_OVERRIDES, "no-join-virtual-overrides"),
        ];
        let mut first = true;
        for (mode, name) in names {
            if self.contains(mode) {
                if !first {
                    write!(formatter, "|")?;
                }
                write!(formatter, "{name}")?;
                first = false;
            }
        }
        if first {
            write!(formatter, "none")?;
        }
        Ok(())
    }
}

/// The taint summary of one method.
///
/// Sources are split into *generations*, taint appearing on a port when the
/// method returns, and *parameter sources*, taint a parameter already
/// carries when the method is entered. *Sinks* describe taint leaving the
/// program through a port and *propagations* describe taint flowing from an
/// input port to output ports. Each piece is a [`TaintAccessPathTree`], so
/// declarations and inferences can talk about fields of a value, not just
/// whole values.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct Model {
    method: Option<MethodId>,
    modes: Modes,
    generations: TaintAccessPathTree,
    parameter_sources: TaintAccessPathTree,
    sinks: TaintAccessPathTree,
    /// Propagations are keyed by their input port; the output ports live in
    /// the frames' propagation kinds and output paths.
    propagations: TaintAccessPathTree,
    global_sanitizers: SanitizerSet,
    port_sanitizers: DomainMap<Root, SanitizerSet, UnionMergeStrategy>,
    issues: IssueSet,
}

impl Model {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates the model of `method`, applying the default mode heuristics
    /// unless `OVERRIDE_DEFAULT` is given.
    ///
    /// A method without a body cannot be analyzed; taint on its arguments is
    /// conservatively assumed to flow into its return value and receiver. A
    /// method with many overrides is expensive to join at virtual call
    /// sites, so joining is disabled above `join_override_threshold`.
    pub fn new(
        method: MethodId,
        context: &Context,
        number_of_overrides: usize,
        modes: Modes,
    ) -> Self {
        let mut modes = modes;
        if !modes.contains(Modes::OVERRIDE_DEFAULT) {
            if context.method(method).body.is_none() {
                modes.insert(
                    Modes::SKIP_ANALYSIS
                        | Modes::TAINT_IN_TAINT_OUT
                        | Modes::TAINT_IN_TAINT_THIS
                        | Modes::ADD_VIA_OBSCURE_FEATURE,
                );
            }
            if number_of_overrides >= context.heuristics.join_override_threshold {
                modes.insert(Modes::NO_JOIN_VIRTUAL_OVERRIDES);
            }
        }
        let mut model = Model {
            method: Some(method),
            ..Default::default()
        };
        model.add_mode(context, modes);
        model
    }

    pub fn method(&self) -> Option<MethodId> {
        self.method
    }

    pub fn modes(&self) -> Modes {
        self.modes
    }

    pub fn skip_analysis(&self) -> bool {
        self.modes.contains(Modes::SKIP_ANALYSIS)
    }

    pub fn add_via_obscure_feature(&self) -> bool {
        self.modes.contains(Modes::ADD_VIA_OBSCURE_FEATURE)
    }

    pub fn is_taint_in_taint_out(&self) -> bool {
        self.modes.contains(Modes::TAINT_IN_TAINT_OUT)
    }

    pub fn is_taint_in_taint_this(&self) -> bool {
        self.modes.contains(Modes::TAINT_IN_TAINT_THIS)
    }

    pub fn no_join_virtual_overrides(&self) -> bool {
        self.modes.contains(Modes::NO_JOIN_VIRTUAL_OVERRIDES)
    }

    pub fn add_mode(&mut self, context: &Context, mode: Modes) {
        self.modes.insert(mode);
        if mode.contains(Modes::TAINT_IN_TAINT_OUT) {
            self.add_taint_in_taint_out(context);
        }
        if mode.contains(Modes::TAINT_IN_TAINT_THIS) {
            self.add_taint_in_taint_this(context);
        }
    }

    fn add_taint_in_taint_out(&mut self, context: &Context) {
        let Some(method_id) = self.method else {
            return;
        };
        let method = context.method(method_id);
        if method.return_type.is_none() {
            return;
        }
        let user_features: Vec<FeatureId> = if self.modes.contains(Modes::ADD_VIA_OBSCURE_FEATURE)
        {
            vec![FeatureId::OBSCURE, FeatureId::OBSCURE_TAINT_IN_TAINT_OUT]
        } else {
            Vec::new()
        };
        for parameter in 0..method.number_of_parameters() {
            let port = AccessPath::from_root(Root::Argument(parameter));
            let taint = Taint::from_config(
                TaintConfig::propagation(
                    context.kinds.local_return(),
                    port.clone(),
                    PathTreeDomain::leaf(CollapseDepth::zero()),
                )
                .with_user_features(user_features.iter().copied()),
            );
            self.add_propagation(context, port, taint);
        }
    }

    fn add_taint_in_taint_this(&mut self, context: &Context) {
        let Some(method_id) = self.method else {
            return;
        };
        let method = context.method(method_id);
        if method.is_static {
            return;
        }
        let user_features: Vec<FeatureId> = if self.modes.contains(Modes::ADD_VIA_OBSCURE_FEATURE)
        {
            vec![
                FeatureId::OBSCURE,
                context.features.intern("via-obscure-taint-in-taint-this"),
            ]
        } else {
            Vec::new()
        };
        for parameter in 1..method.number_of_parameters() {
            let port = AccessPath::from_root(Root::Argument(parameter));
            let taint = Taint::from_config(
                TaintConfig::propagation(
                    context.kinds.local_argument(0),
                    port.clone(),
                    PathTreeDomain::leaf(CollapseDepth::zero()),
                )
                .with_user_features(user_features.iter().copied()),
            );
            self.add_propagation(context, port, taint);
        }
    }

    /// Adds a user-declared source: taint appearing on `port` when the
    /// method returns. The modeled method becomes the origin of frames that
    /// do not declare one.
    pub fn add_generation(&mut self, context: &Context, port: AccessPath, frame: Frame) {
        let mut taint = Taint::bottom();
        taint.add(frame);
        if let Some(method) = self.method {
            taint.add_origins_if_declaration(method, &port);
        }
        self.add_generation_taint(context, port, taint);
    }

    /// Adds generations inferred from the method's body, after applying the
    /// model's source sanitizers.
    pub fn add_inferred_generations(&mut self, context: &Context, port: AccessPath, taint: Taint) {
        let taint = self.sanitize(SanitizerKind::Sources, &port, taint);
        self.add_generation_taint(context, port, taint);
    }

    fn add_generation_taint(&mut self, context: &Context, mut port: AccessPath, taint: Taint) {
        if taint.is_bottom() {
            return;
        }
        port.truncate(context.heuristics.generation_max_port_size);
        self.generations.write(&port, taint, UpdateKind::Weak);
    }

    /// Adds a user-declared source a parameter already carries when the
    /// method is entered.
    pub fn add_parameter_source(&mut self, context: &Context, port: AccessPath, frame: Frame) {
        debug_assert!(matches!(port.root(), Root::Argument(_)));
        let mut taint = Taint::bottom();
        taint.add(frame);
        if let Some(method) = self.method {
            taint.add_origins_if_declaration(method, &port);
        }
        if taint.is_bottom() {
            return;
        }
        let mut port = port;
        port.truncate(context.heuristics.parameter_source_max_port_size);
        self.parameter_sources.write(&port, taint, UpdateKind::Weak);
    }

    /// Adds a user-declared sink on `port`.
    pub fn add_sink(&mut self, context: &Context, port: AccessPath, frame: Frame) {
        let mut taint = Taint::bottom();
        taint.add(frame);
        if let Some(method) = self.method {
            taint.add_origins_if_declaration(method, &port);
        }
        self.add_sink_taint(context, port, taint);
    }

    /// Adds sinks inferred from the method's body, after applying the
    /// model's sink sanitizers.
    pub fn add_inferred_sinks(&mut self, context: &Context, port: AccessPath, taint: Taint) {
        let taint = self.sanitize(SanitizerKind::Sinks, &port, taint);
        self.add_sink_taint(context, port, taint);
    }

    fn add_sink_taint(&mut self, context: &Context, mut port: AccessPath, taint: Taint) {
        if taint.is_bottom() {
            return;
        }
        port.truncate(context.heuristics.sink_max_port_size);
        self.sinks.write(&port, taint, UpdateKind::Weak);
    }

    /// Adds a propagation: taint on the input port flows into the ports
    /// named by the taint's propagation kinds and output paths.
    pub fn add_propagation(&mut self, context: &Context, mut input: AccessPath, taint: Taint) {
        debug_assert!(matches!(input.root(), Root::Argument(_)));
        if taint.is_bottom() {
            return;
        }
        input.truncate(context.heuristics.propagation_max_path_size);
        self.propagations.write(&input, taint, UpdateKind::Weak);
    }

    /// Adds a propagation inferred from the method's body, unless a
    /// sanitizer covers the input port.
    pub fn add_inferred_propagation(&mut self, context: &Context, input: AccessPath, taint: Taint) {
        if self
            .global_sanitizers
            .kinds(SanitizerKind::Propagations)
            .is_top()
        {
            return;
        }
        if !self.port_sanitizers.get_or_bottom(&input.root()).is_bottom() {
            return;
        }
        self.add_propagation(context, input, taint);
    }

    pub fn add_global_sanitizer(&mut self, sanitizer: &Sanitizer) {
        self.global_sanitizers.add(sanitizer);
    }

    pub fn add_port_sanitizer(&mut self, root: Root, sanitizer: &Sanitizer) {
        self.port_sanitizers.entry(root).or_default().add(sanitizer);
    }

    fn sanitize(&self, sanitizer_kind: SanitizerKind, port: &AccessPath, taint: Taint) -> Taint {
        let taint = self.global_sanitizers.sanitize(sanitizer_kind, taint);
        self.port_sanitizers
            .get_or_bottom(&port.root())
            .sanitize(sanitizer_kind, taint)
    }

    pub fn generations(&self) -> &TaintAccessPathTree {
        &self.generations
    }

    pub fn parameter_sources(&self) -> &TaintAccessPathTree {
        &self.parameter_sources
    }

    pub fn sinks(&self) -> &TaintAccessPathTree {
        &self.sinks
    }

    pub fn propagations(&self) -> &TaintAccessPathTree {
        &self.propagations
    }

    pub fn issues(&self) -> &IssueSet {
        &self.issues
    }

    pub fn add_issue(&mut self, issue: Issue) {
        self.issues.add(issue);
    }

    /// Instantiates this model at a call site of the modeled method.
    ///
    /// Sources and sinks take one hop towards the caller, dropping frames
    /// whose distance budget is exhausted or whose class intervals rule the
    /// flow out. Propagations cross unchanged; the caller's transfer
    /// function applies them to its own state. Parameter sources only seed
    /// the analysis of the method itself and are not instantiated.
    pub fn at_callsite(
        &self,
        context: &Context,
        call_position: PositionId,
        class_interval_context: &CallClassIntervalContext,
        caller_class_interval: ClassInterval,
        source_register_types: &[Option<TypeId>],
        source_constant_arguments: &[Option<String>],
    ) -> Model {
        let mut model = Model {
            method: self.method,
            modes: self.modes,
            ..Default::default()
        };
        for (callee_port, generations) in self.generations.elements() {
            model.generations.write(
                &callee_port,
                generations.propagate(
                    self.method,
                    &callee_port,
                    call_position,
                    class_interval_context,
                    caller_class_interval,
                    source_register_types,
                    source_constant_arguments,
                    context,
                ),
                UpdateKind::Weak,
            );
        }
        for (callee_port, sinks) in self.sinks.elements() {
            model.sinks.write(
                &callee_port,
                sinks.propagate(
                    self.method,
                    &callee_port,
                    call_position,
                    class_interval_context,
                    caller_class_interval,
                    source_register_types,
                    source_constant_arguments,
                    context,
                ),
                UpdateKind::Weak,
            );
        }
        model.propagations = self.propagations.clone();
        model
    }

    /// Shrinks the model trees to the configured leaf budget. Applied
    /// before a model is stored in the registry.
    pub fn approximate(&mut self, context: &Context) {
        let broadening = FeatureMayAlwaysSet::make_always([FeatureId::WIDEN_BROADENING]);
        let max_leaves = context.heuristics.model_tree_max_leaves;
        self.generations.limit_leaves(max_leaves, &broadening);
        self.parameter_sources.limit_leaves(max_leaves, &broadening);
        self.sinks.limit_leaves(max_leaves, &broadening);
        self.propagations.limit_leaves(max_leaves, &broadening);
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
            && self.generations.is_bottom()
            && self.parameter_sources.is_bottom()
            && self.sinks.is_bottom()
            && self.propagations.is_bottom()
            && self.global_sanitizers.is_bottom()
            && self.port_sanitizers.is_bottom()
            && self.issues.is_bottom()
    }

    /// Pointwise order on models of the same method. Used by the global
    /// fixpoint to detect that a method's model stopped changing.
    pub fn leq(&self, other: &Model) -> bool {
        self.modes.is_subset_of(other.modes)
            && self.generations.leq(&other.generations)
            && self.parameter_sources.leq(&other.parameter_sources)
            && self.sinks.leq(&other.sinks)
            && self.propagations.leq(&other.propagations)
            && self.global_sanitizers.leq(&other.global_sanitizers)
            && self.port_sanitizers.leq(&other.port_sanitizers)
            && self.issues.leq(&other.issues)
    }

    pub fn join_with(&mut self, other: &Model) {
        debug_assert!(
            self.method.is_none() || other.method.is_none() || self.method == other.method
        );
        self.modes.insert(other.modes);
        self.generations.join_with(&other.generations);
        self.parameter_sources.join_with(&other.parameter_sources);
        self.sinks.join_with(&other.sinks);
        self.propagations.join_with(&other.propagations);
        self.global_sanitizers.join_with(&other.global_sanitizers);
        self.port_sanitizers.join_with(&other.port_sanitizers);
        self.issues.join_with(&other.issues);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Heuristics, Options};
    use crate::intermediate_representation::{
        Method, MethodBody, Path, PathElement, Position, StringId,
    };
    use crate::taint::Kind;

    fn test_context() -> Context {
        Context::new(Options::default(), Heuristics::default())
    }

    fn test_method(context: &mut Context, body: Option<MethodBody>) -> MethodId {
        let class = context.type_named("Lcom/example/Service;");
        let name = context.strings.intern("handle");
        let string_type = context.type_named("Ljava/lang/String;");
        context.methods.add(Method::new(
            class,
            name,
            vec![class, string_type],
            Some(string_type),
            false,
            body,
        ))
    }

    fn field(name: u32) -> PathElement {
        PathElement::Field(StringId(name))
    }

    fn source_frame(context: &Context, kind: &str) -> Frame {
        Frame::from_config(TaintConfig::new(
            context.kinds.named(kind),
            AccessPath::from_root(Root::Return),
        ))
    }

    fn sink_frame(context: &Context, kind: &str, parameter: u32) -> Frame {
        Frame::from_config(TaintConfig::new(
            context.kinds.named(kind),
            AccessPath::from_root(Root::Argument(parameter)),
        ))
    }

    #[test]
    fn methods_without_code_default_to_obscure_propagation() {
        let mut context = test_context();
        let method = test_method(&mut context, None);
        let model = Model::new(method, &context, 0, Modes::empty());

        assert!(model.skip_analysis());
        assert!(model.add_via_obscure_feature());
        assert!(model.is_taint_in_taint_out());
        assert!(model.is_taint_in_taint_this());

        // The non-receiver argument flows into both the return value and
        // the receiver.
        let argument = model
            .propagations()
            .raw_read(&AccessPath::from_root(Root::Argument(1)));
        let kinds: Vec<Kind> = argument.kinds().map(|kind| context.kinds.get(kind)).collect();
        assert!(kinds.contains(&Kind::LocalReturn));
        assert!(kinds.contains(&Kind::LocalArgument { parameter: 0 }));
        assert!(argument
            .frames()
            .all(|frame| frame.user_features().contains(&FeatureId::OBSCURE)));

        // The receiver flows into the return value only.
        let receiver = model
            .propagations()
            .raw_read(&AccessPath::from_root(Root::Argument(0)));
        assert_eq!(
            receiver.kinds().collect::<Vec<_>>(),
            vec![context.kinds.local_return()]
        );
    }

    #[test]
    fn void_methods_get_no_taint_in_taint_out() {
        let mut context = test_context();
        let class = context.type_named("Lcom/example/Logger;");
        let name = context.strings.intern("log");
        let string_type = context.type_named("Ljava/lang/String;");
        let method = context.methods.add(Method::new(
            class,
            name,
            vec![class, string_type],
            None,
            false,
            None,
        ));

        let model = Model::new(method, &context, 0, Modes::empty());
        assert!(model
            .propagations()
            .raw_read(&AccessPath::from_root(Root::Argument(0)))
            .is_bottom());
        let argument = model
            .propagations()
            .raw_read(&AccessPath::from_root(Root::Argument(1)));
        assert_eq!(
            argument.kinds().collect::<Vec<_>>(),
            vec![context.kinds.local_argument(0)]
        );
    }

    #[test]
    fn mode_heuristics_respect_override_default() {
        let mut context = test_context();
        let obscure = test_method(&mut context, None);
        let model = Model::new(obscure, &context, 0, Modes::OVERRIDE_DEFAULT);
        assert!(!model.skip_analysis());
        assert!(model.propagations().is_bottom());

        let analyzed = test_method(&mut context, Some(MethodBody::linear(Vec::new())));
        assert!(Model::new(analyzed, &context, 40, Modes::empty()).no_join_virtual_overrides());
        assert!(!Model::new(analyzed, &context, 39, Modes::empty()).no_join_virtual_overrides());
    }

    #[test]
    fn declared_ports_are_truncated_and_get_origins() {
        let mut context = test_context();
        let method = test_method(&mut context, Some(MethodBody::linear(Vec::new())));
        let mut model = Model::new(method, &context, 0, Modes::empty());

        let deep_port = AccessPath::new(
            Root::Return,
            Path::new(vec![field(1), field(2), field(3), field(4), field(5)]),
        );
        model.add_generation(&context, deep_port, source_frame(&context, "UserInput"));

        let elements = model.generations().elements();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].0.path().len(), 4);
        assert!(elements[0]
            .1
            .frames()
            .all(|frame| !frame.origins().is_empty()));
    }

    #[test]
    fn sanitizers_filter_inferred_taint_only() {
        let mut context = test_context();
        let method = test_method(&mut context, Some(MethodBody::linear(Vec::new())));
        let sql = context.kinds.named("SqlSink");
        let mut model = Model::new(method, &context, 0, Modes::empty());
        model.add_global_sanitizer(&Sanitizer::new(SanitizerKind::Sinks, [sql]));
        model.add_port_sanitizer(Root::Argument(1), &Sanitizer::all(SanitizerKind::Sinks));

        let mut taint = Taint::bottom();
        taint.add(sink_frame(&context, "SqlSink", 0));
        taint.add(sink_frame(&context, "LogSink", 0));

        model.add_inferred_sinks(
            &context,
            AccessPath::from_root(Root::Argument(0)),
            taint.clone(),
        );
        let kept = model
            .sinks()
            .raw_read(&AccessPath::from_root(Root::Argument(0)));
        assert_eq!(
            kept.kinds().collect::<Vec<_>>(),
            vec![context.kinds.named("LogSink")]
        );

        // The port sanitizer suppresses every kind on Argument(1).
        model.add_inferred_sinks(&context, AccessPath::from_root(Root::Argument(1)), taint);
        assert!(model
            .sinks()
            .raw_read(&AccessPath::from_root(Root::Argument(1)))
            .is_bottom());

        // User declarations bypass sanitizers.
        model.add_sink(
            &context,
            AccessPath::from_root(Root::Argument(1)),
            sink_frame(&context, "SqlSink", 1),
        );
        assert!(!model
            .sinks()
            .raw_read(&AccessPath::from_root(Root::Argument(1)))
            .is_bottom());
    }

    #[test]
    fn inferred_propagations_respect_sanitizers() {
        let mut context = test_context();
        let method = test_method(&mut context, Some(MethodBody::linear(Vec::new())));
        let propagation = Taint::from_config(TaintConfig::propagation(
            context.kinds.local_return(),
            AccessPath::from_root(Root::Argument(0)),
            PathTreeDomain::leaf(CollapseDepth::zero()),
        ));

        let mut sanitized = Model::new(method, &context, 0, Modes::empty());
        sanitized.add_global_sanitizer(&Sanitizer::all(SanitizerKind::Propagations));
        sanitized.add_inferred_propagation(
            &context,
            AccessPath::from_root(Root::Argument(0)),
            propagation.clone(),
        );
        assert!(sanitized.propagations().is_bottom());

        // Any sanitizer on the input port blocks propagation inference.
        let mut port_sanitized = Model::new(method, &context, 0, Modes::empty());
        port_sanitized.add_port_sanitizer(
            Root::Argument(0),
            &Sanitizer::new(SanitizerKind::Sources, [context.kinds.named("UserInput")]),
        );
        port_sanitized.add_inferred_propagation(
            &context,
            AccessPath::from_root(Root::Argument(0)),
            propagation.clone(),
        );
        assert!(port_sanitized.propagations().is_bottom());
        port_sanitized.add_inferred_propagation(
            &context,
            AccessPath::from_root(Root::Argument(1)),
            Taint::from_config(TaintConfig::propagation(
                context.kinds.local_return(),
                AccessPath::from_root(Root::Argument(1)),
                PathTreeDomain::leaf(CollapseDepth::zero()),
            )),
        );
        assert!(!port_sanitized.propagations().is_bottom());
    }

    #[test]
    fn at_callsite_takes_one_hop_towards_the_caller() {
        let mut context = test_context();
        let method = test_method(&mut context, Some(MethodBody::linear(Vec::new())));
        let position = context.positions.intern(Position::new(None, Some(42)));

        let mut model = Model::new(method, &context, 0, Modes::empty());
        model.add_generation(
            &context,
            AccessPath::from_root(Root::Return),
            source_frame(&context, "UserInput"),
        );
        model.add_sink(
            &context,
            AccessPath::from_root(Root::Argument(1)),
            sink_frame(&context, "SqlSink", 1),
        );
        model.add_parameter_source(
            &context,
            AccessPath::from_root(Root::Argument(1)),
            sink_frame(&context, "UserInput", 1),
        );
        model.add_propagation(
            &context,
            AccessPath::from_root(Root::Argument(1)),
            Taint::from_config(TaintConfig::propagation(
                context.kinds.local_return(),
                AccessPath::from_root(Root::Argument(1)),
                PathTreeDomain::leaf(CollapseDepth::zero()),
            )),
        );

        let instantiated = model.at_callsite(
            &context,
            position,
            &CallClassIntervalContext::default(),
            ClassInterval::top(),
            &[],
            &[],
        );

        let generation = instantiated
            .generations()
            .raw_read(&AccessPath::from_root(Root::Return));
        let frame = generation.frames().next().unwrap();
        assert_eq!(frame.distance(), 1);
        assert_eq!(frame.callee(), Some(method));
        assert_eq!(frame.call_position(), Some(position));

        let sink = instantiated
            .sinks()
            .raw_read(&AccessPath::from_root(Root::Argument(1)));
        assert_eq!(sink.frames().next().unwrap().distance(), 1);

        // Parameter sources seed the method's own analysis only, and
        // propagations cross call sites unchanged.
        assert!(instantiated.parameter_sources().is_bottom());
        assert_eq!(instantiated.propagations(), model.propagations());
    }

    #[test]
    fn at_callsite_honors_the_distance_budget() {
        let options = Options {
            maximum_source_sink_distance: 0,
            ..Default::default()
        };
        let mut context = Context::new(options, Heuristics::default());
        let method = test_method(&mut context, Some(MethodBody::linear(Vec::new())));
        let position = context.positions.intern(Position::new(None, Some(42)));

        let mut model = Model::new(method, &context, 0, Modes::empty());
        model.add_generation(
            &context,
            AccessPath::from_root(Root::Return),
            source_frame(&context, "UserInput"),
        );

        let instantiated = model.at_callsite(
            &context,
            position,
            &CallClassIntervalContext::default(),
            ClassInterval::top(),
            &[],
            &[],
        );
        assert!(instantiated.generations().is_bottom());
    }

    #[test]
    fn approximate_limits_model_trees() {
        let heuristics = Heuristics {
            model_tree_max_leaves: 2,
            ..Default::default()
        };
        let mut context = Context::new(Options::default(), heuristics);
        let method = test_method(&mut context, Some(MethodBody::linear(Vec::new())));

        let mut model = Model::new(method, &context, 0, Modes::empty());
        for name in 1..=3 {
            model.add_generation(
                &context,
                AccessPath::new(Root::Return, Path::new(vec![field(name)])),
                source_frame(&context, "UserInput"),
            );
        }
        assert_eq!(model.generations().elements().len(), 3);

        model.approximate(&context);
        let elements = model.generations().elements();
        assert_eq!(elements.len(), 1);
        assert!(elements[0].0.path().is_empty());
        assert!(elements[0]
            .1
            .features_joined()
            .always()
            .contains(&FeatureId::WIDEN_BROADENING));
    }

    #[test]
    fn join_accumulates_and_leq_detects_stability() {
        let mut context = test_context();
        let method = test_method(&mut context, Some(MethodBody::linear(Vec::new())));

        let mut model = Model::new(method, &context, 0, Modes::empty());
        model.add_generation(
            &context,
            AccessPath::from_root(Root::Return),
            source_frame(&context, "UserInput"),
        );
        let mut other = Model::new(method, &context, 0, Modes::empty());
        other.add_sink(
            &context,
            AccessPath::from_root(Root::Argument(1)),
            sink_frame(&context, "SqlSink", 1),
        );

        let before = model.clone();
        model.join_with(&other);
        assert!(before.leq(&model));
        assert!(other.leq(&model));
        assert!(!model.leq(&before));
        assert!(model.leq(&model.clone()));
    }
}
