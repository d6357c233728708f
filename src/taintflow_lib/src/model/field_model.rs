use crate::intermediate_representation::FieldId;
use crate::prelude::*;
use crate::taint::{Frame, Taint};

/// The taint summary of a field.
///
/// Field models are declared by the user and never inferred; the analysis
/// only reads them when a field access loads or stores taint. Sources and
/// sinks on a field are unaffected by assignments in the analyzed code.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct FieldModel {
    field: Option<FieldId>,
    sources: Taint,
    sinks: Taint,
}

impl FieldModel {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(field: FieldId) -> Self {
        FieldModel {
            field: Some(field),
            ..Default::default()
        }
    }

    pub fn field(&self) -> Option<FieldId> {
        self.field
    }

    pub fn sources(&self) -> &Taint {
        &self.sources
    }

    pub fn sinks(&self) -> &Taint {
        &self.sinks
    }

    /// Adds a source on the field. The frame must be a declaration; the
    /// field becomes its origin and next hop.
    pub fn add_source(&mut self, frame: Frame) {
        debug_assert!(frame.is_leaf());
        let mut taint = Taint::bottom();
        taint.add(frame);
        if let Some(field) = self.field {
            taint.add_field_origins_if_declaration(field);
        }
        self.sources.join_with(&taint);
    }

    /// Adds a sink on the field, see [`FieldModel::add_source`].
    pub fn add_sink(&mut self, frame: Frame) {
        debug_assert!(frame.is_leaf());
        let mut taint = Taint::bottom();
        taint.add(frame);
        if let Some(field) = self.field {
            taint.add_field_origins_if_declaration(field);
        }
        self.sinks.join_with(&taint);
    }

    /// Binds a model declared without a field, e.g. by a pattern matching
    /// several fields, to a concrete field.
    pub fn instantiate(&self, field: FieldId) -> FieldModel {
        let mut model = FieldModel::new(field);
        let mut sources = self.sources.clone();
        sources.add_field_origins_if_declaration(field);
        model.sources = sources;
        let mut sinks = self.sinks.clone();
        sinks.add_field_origins_if_declaration(field);
        model.sinks = sinks;
        model
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_bottom() && self.sinks.is_bottom()
    }

    pub fn leq(&self, other: &FieldModel) -> bool {
        self.sources.leq(&other.sources) && self.sinks.leq(&other.sinks)
    }

    pub fn join_with(&mut self, other: &FieldModel) {
        debug_assert!(
            self.field.is_none() || other.field.is_none() || self.field == other.field
        );
        self.sources.join_with(&other.sources);
        self.sinks.join_with(&other.sinks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Heuristics, Options};
    use crate::context::Context;
    use crate::intermediate_representation::{AccessPath, Field, Root};
    use crate::taint::TaintConfig;

    fn test_context() -> Context {
        Context::new(Options::default(), Heuristics::default())
    }

    fn test_field(context: &mut Context) -> FieldId {
        let class = context.type_named("Lcom/example/User;");
        let name = context.strings.intern("name");
        context.fields.intern(Field::new(class, name))
    }

    #[test]
    fn field_models_bind_taint_to_the_field() {
        let mut context = test_context();
        let field = test_field(&mut context);
        let kind = context.kinds.named("UserData");

        let mut model = FieldModel::new(field);
        model.add_source(Frame::from_config(TaintConfig::new(
            kind,
            AccessPath::from_root(Root::Return),
        )));

        assert!(!model.is_empty());
        assert!(model.sinks().is_bottom());
        let frame = model.sources().frames().next().unwrap();
        assert_eq!(frame.field_callee(), Some(field));
        assert!(frame.field_origins().contains(&field));
    }

    #[test]
    fn instantiate_binds_an_unbound_model() {
        let mut context = test_context();
        let field = test_field(&mut context);
        let kind = context.kinds.named("UserData");

        let mut unbound = FieldModel::empty();
        unbound.add_sink(Frame::from_config(TaintConfig::new(
            kind,
            AccessPath::from_root(Root::Return),
        )));
        assert!(unbound
            .sinks()
            .frames()
            .all(|frame| frame.field_callee().is_none()));

        let bound = unbound.instantiate(field);
        assert_eq!(bound.field(), Some(field));
        assert!(bound
            .sinks()
            .frames()
            .all(|frame| frame.field_callee() == Some(field)));
    }

    #[test]
    fn join_accumulates_declared_taint() {
        let mut context = test_context();
        let field = test_field(&mut context);

        let mut model = FieldModel::new(field);
        model.add_source(Frame::from_config(TaintConfig::new(
            context.kinds.named("UserData"),
            AccessPath::from_root(Root::Return),
        )));
        let mut other = FieldModel::new(field);
        other.add_source(Frame::from_config(TaintConfig::new(
            context.kinds.named("DeviceId"),
            AccessPath::from_root(Root::Return),
        )));

        let joined_before = model.clone();
        model.join_with(&other);
        assert!(joined_before.leq(&model));
        assert_eq!(model.sources().num_frames(), 2);
    }
}
