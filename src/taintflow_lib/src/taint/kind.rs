use std::fmt;

use crate::intermediate_representation::{ParameterPosition, Root};
use crate::model::RuleId;
use crate::prelude::*;

/// Handle of an interned [`Kind`].
///
/// Kinds are interned in the kind table of the analysis context; two handles
/// are equal if and only if the kinds are equal.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct KindId(pub u32);

impl fmt::Display for KindId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "kind#{}", self.0)
    }
}

/// A taint kind, i.e. the label classifying a source or sink.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub enum Kind {
    /// A user-declared source or sink kind, e.g. `UserControlled`.
    Named { name: String },
    /// One half of the sink of a multi-source rule. The label tells the
    /// halves of the rule apart, e.g. the partial sinks `launch:intent` and
    /// `launch:context` of a rule with sink name `launch`.
    Partial { name: String, label: String },
    /// A partial sink whose counterpart half was observed at the same call
    /// site, turning the pair into an ordinary sink of the given rule.
    TriggeredPartial {
        name: String,
        label: String,
        rule: RuleId,
    },
    /// The propagation of taint from a parameter to the return value.
    LocalReturn,
    /// The propagation of taint from a parameter into another parameter.
    LocalArgument { parameter: ParameterPosition },
}

impl Kind {
    pub fn named(name: impl Into<String>) -> Self {
        Kind::Named { name: name.into() }
    }

    pub fn partial(name: impl Into<String>, label: impl Into<String>) -> Self {
        Kind::Partial {
            name: name.into(),
            label: label.into(),
        }
    }

    /// Creates the triggered counterpart of a partial kind.
    /// Panics if the kind is not partial.
    pub fn triggered(partial: &Kind, rule: RuleId) -> Self {
        match partial {
            Kind::Partial { name, label } => Kind::TriggeredPartial {
                name: name.clone(),
                label: label.clone(),
                rule,
            },
            _ => panic!("cannot trigger the non-partial kind {partial}"),
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, Kind::Partial { .. })
    }

    pub fn is_triggered(&self) -> bool {
        matches!(self, Kind::TriggeredPartial { .. })
    }

    /// Returns whether `self` and `other` are the two halves of the same
    /// multi-source sink.
    pub fn is_counterpart(&self, other: &Kind) -> bool {
        match (self, other) {
            (
                Kind::Partial { name, label },
                Kind::Partial {
                    name: other_name,
                    label: other_label,
                },
            ) => name == other_name && label != other_label,
            _ => false,
        }
    }

    /// Returns whether the kind describes a propagation instead of a source
    /// or sink.
    pub fn is_propagation(&self) -> bool {
        matches!(self, Kind::LocalReturn | Kind::LocalArgument { .. })
    }

    /// Returns the port that a propagation kind writes to.
    pub fn propagation_root(&self) -> Option<Root> {
        match self {
            Kind::LocalReturn => Some(Root::Return),
            Kind::LocalArgument { parameter } => Some(Root::Argument(*parameter)),
            _ => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Kind::Named { name } => write!(formatter, "{name}"),
            Kind::Partial { name, label } => write!(formatter, "Partial:{name}:{label}"),
            Kind::TriggeredPartial { name, label, .. } => {
                write!(formatter, "TriggeredPartial:{name}:{label}")
            }
            Kind::LocalReturn => write!(formatter, "LocalReturn"),
            Kind::LocalArgument { parameter } => {
                write!(formatter, "LocalArgument({parameter})")
            }
        }
    }
}
