//! Tracking of half-fulfilled multi-source rules at a call site.
//!
//! A multi-source rule fires when both halves of its partial sink receive a
//! matching source at the same call site. While the sink ports of one call
//! are checked, this state remembers which halves have already been seen; as
//! soon as the counterpart half arrives, the pair is turned into a triggered
//! sink carrying the features of both flows.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::context::Context;
use crate::model::RuleId;
use crate::prelude::*;
use crate::taint::{FeatureMayAlwaysSet, Kind, KindId, Taint};

/// One partial sink half that has received a matching source.
#[derive(Debug, Clone)]
struct FulfilledPartialKind {
    kind: KindId,
    features: FeatureMayAlwaysSet,
}

/// The partial sink halves fulfilled so far at one call site, per rule.
#[derive(Debug, Default)]
pub struct FulfilledPartialKindState {
    fulfilled: BTreeMap<RuleId, FulfilledPartialKind>,
}

impl FulfilledPartialKindState {
    /// Records that the partial sink `kind` of the given rule received a
    /// matching source carrying `source_features`.
    ///
    /// If the counterpart half of the rule was fulfilled earlier at this
    /// call site, the rule fires: the result is `sinks` with the partial
    /// kind replaced by its triggered kind and the counterpart's features
    /// attached, ready to be reported as an issue. The consumed counterpart
    /// is forgotten, so a third flow into the same half starts a new pair.
    pub fn fulfill_kind(
        &mut self,
        context: &Context,
        kind: KindId,
        rule: RuleId,
        source_features: FeatureMayAlwaysSet,
        sinks: &Taint,
    ) -> Option<Taint> {
        match self.fulfilled.entry(rule) {
            Entry::Vacant(entry) => {
                entry.insert(FulfilledPartialKind {
                    kind,
                    features: source_features,
                });
                None
            }
            Entry::Occupied(mut entry) => {
                if entry.get().kind == kind {
                    // The same half again, e.g. from another source kind.
                    entry.get_mut().features.join_with(&source_features);
                    return None;
                }
                let counterpart = entry.get().kind;
                if !context
                    .kinds
                    .get(counterpart)
                    .is_counterpart(&context.kinds.get(kind))
                {
                    return None;
                }
                let counterpart_features = entry.remove().features;

                let triggered = context
                    .kinds
                    .intern(Kind::triggered(&context.kinds.get(kind), rule));
                let mut triggered_sinks =
                    sinks.map_kinds(|sink_kind| (sink_kind == kind).then_some(triggered));
                if triggered_sinks.is_bottom() {
                    return None;
                }
                triggered_sinks.add_locally_inferred_features(&counterpart_features);
                Some(triggered_sinks)
            }
        }
    }
}
