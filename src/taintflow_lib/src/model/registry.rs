use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::Context;
use crate::intermediate_representation::{FieldId, MethodId};
use crate::prelude::*;

use super::{FieldModel, Model, Modes};

/// The models of every method and field of the analyzed program.
///
/// A registry is the shared state of one global fixpoint round. Workers
/// read the previous round's models through clones of the registry, which
/// only copy two pointers; the driver folds the models they send back into
/// the next round's registry. The backing storage is copied on the first
/// write after a clone.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    models: Arc<Vec<Model>>,
    field_models: Arc<Vec<FieldModel>>,
}

impl Registry {
    /// Creates a registry with a default model for every known method and
    /// field. `number_of_overrides` feeds the mode heuristics of
    /// [`Model::new`].
    pub fn with_default_models(
        context: &Context,
        number_of_overrides: impl Fn(MethodId) -> usize,
    ) -> Registry {
        let models = context
            .methods
            .iter()
            .map(|(method, _)| Model::new(method, context, number_of_overrides(method), Modes::empty()))
            .collect();
        let field_models = (0..context.fields.len()).map(|_| FieldModel::empty()).collect();
        Registry {
            models: Arc::new(models),
            field_models: Arc::new(field_models),
        }
    }

    pub fn get(&self, method: MethodId) -> &Model {
        &self.models[method.0 as usize]
    }

    pub fn field_model(&self, field: FieldId) -> &FieldModel {
        &self.field_models[field.0 as usize]
    }

    /// Replaces the model of the method.
    pub fn set(&mut self, method: MethodId, model: Model) {
        Arc::make_mut(&mut self.models)[method.0 as usize] = model;
    }

    /// Joins the model into the method's entry.
    pub fn join_with(&mut self, method: MethodId, model: &Model) {
        Arc::make_mut(&mut self.models)[method.0 as usize].join_with(model);
    }

    pub fn join_with_field_model(&mut self, field: FieldId, model: &FieldModel) {
        Arc::make_mut(&mut self.field_models)[field.0 as usize].join_with(model);
    }

    pub fn models(&self) -> impl Iterator<Item = (MethodId, &Model)> {
        self.models
            .iter()
            .enumerate()
            .map(|(index, model)| (MethodId(index as u32), model))
    }

    pub fn models_size(&self) -> usize {
        self.models.len()
    }

    /// Total number of issues across all models.
    pub fn issues_size(&self) -> usize {
        self.models.iter().map(|model| model.issues().len()).sum()
    }

    /// Renders all models as JSON, keyed by method signature.
    pub fn dump_models(&self, context: &Context) -> Result<String, Error> {
        let mut by_signature = BTreeMap::new();
        for (method, model) in self.models() {
            by_signature.insert(context.method_signature(method), model);
        }
        Ok(serde_json::to_string_pretty(&by_signature)?)
    }
}
