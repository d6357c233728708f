use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use fnv::FnvHashMap;

use crate::context::Context;
use crate::prelude::*;
use crate::taint::{Kind, KindId};

/// Handle of a rule in the rule table of the analysis context.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct RuleId(pub u32);

impl fmt::Display for RuleId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "rule#{}", self.0)
    }
}

/// A pattern of source-to-sink flows that shall be reported as issues.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Rule {
    pub name: String,
    /// Number identifying the rule in reports, unique across the rule table.
    pub code: u32,
    pub description: String,
    pub detail: RuleDetail,
}

/// The shape of the flows a rule matches.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub enum RuleDetail {
    /// A flow of any of the source kinds into any of the sink kinds.
    SourceSink {
        source_kinds: BTreeSet<KindId>,
        sink_kinds: BTreeSet<KindId>,
    },
    /// Flows of two source kinds into the two halves of a partial sink at
    /// the same call site. The keys of `source_kinds` are the labels of the
    /// partial sink kinds each source group must reach.
    MultiSource {
        source_kinds: BTreeMap<String, BTreeSet<KindId>>,
        partial_sink_kinds: BTreeSet<KindId>,
    },
}

impl Rule {
    pub fn source_sink(
        name: impl Into<String>,
        code: u32,
        description: impl Into<String>,
        source_kinds: impl IntoIterator<Item = KindId>,
        sink_kinds: impl IntoIterator<Item = KindId>,
    ) -> Self {
        Rule {
            name: name.into(),
            code,
            description: description.into(),
            detail: RuleDetail::SourceSink {
                source_kinds: source_kinds.into_iter().collect(),
                sink_kinds: sink_kinds.into_iter().collect(),
            },
        }
    }

    pub fn multi_source(
        name: impl Into<String>,
        code: u32,
        description: impl Into<String>,
        source_kinds: BTreeMap<String, BTreeSet<KindId>>,
        partial_sink_kinds: impl IntoIterator<Item = KindId>,
    ) -> Self {
        Rule {
            name: name.into(),
            code,
            description: description.into(),
            detail: RuleDetail::MultiSource {
                source_kinds,
                partial_sink_kinds: partial_sink_kinds.into_iter().collect(),
            },
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{} ({})", self.name, self.code)
    }
}

/// The rule table, indexed by the kind pairings the analysis queries at
/// every source-meets-sink check.
#[derive(Debug, Default)]
pub struct Rules {
    rules: Vec<Rule>,
    by_source_sink: FnvHashMap<(KindId, KindId), Vec<RuleId>>,
    by_source_partial_sink: FnvHashMap<(KindId, KindId), Vec<RuleId>>,
}

impl Rules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule and indexes its kind pairings.
    ///
    /// A source-sink rule is indexed under every source/sink kind pair. For
    /// a multi-source rule, every source kind is paired with the partial
    /// sinks carrying its label, and additionally with the triggered
    /// counterparts of those sinks: once one half of the rule is fulfilled,
    /// the other half flows into a triggered sink, which must resolve back
    /// to the same rule even when several rules share the partial sink.
    pub fn add(&mut self, context: &Context, rule: Rule) -> Result<RuleId, Error> {
        if let Some(existing) = self.rules.iter().find(|existing| existing.code == rule.code) {
            return Err(anyhow!(
                "rules {} and {} declare the same code {}",
                existing.name,
                rule.name,
                rule.code,
            ));
        }
        let id = RuleId(self.rules.len() as u32);
        match &rule.detail {
            RuleDetail::SourceSink {
                source_kinds,
                sink_kinds,
            } => {
                if source_kinds.is_empty() || sink_kinds.is_empty() {
                    return Err(anyhow!("rule {rule} has no source or sink kinds"));
                }
                for &source in source_kinds {
                    for &sink in sink_kinds {
                        self.by_source_sink.entry((source, sink)).or_default().push(id);
                    }
                }
            }
            RuleDetail::MultiSource {
                source_kinds,
                partial_sink_kinds,
            } => {
                if source_kinds.len() != 2 {
                    return Err(anyhow!(
                        "multi-source rule {rule} must have exactly two source labels"
                    ));
                }
                let mut sinks_by_label: BTreeMap<String, Vec<KindId>> = BTreeMap::new();
                for &partial_sink in partial_sink_kinds {
                    match context.kinds.get(partial_sink) {
                        Kind::Partial { label, .. } => {
                            sinks_by_label.entry(label).or_default().push(partial_sink)
                        }
                        kind => {
                            return Err(anyhow!(
                                "multi-source rule {rule} has the non-partial sink kind {kind}"
                            ));
                        }
                    }
                }
                for (label, sources) in source_kinds {
                    for &source in sources {
                        for &partial_sink in sinks_by_label.get(label).into_iter().flatten() {
                            let triggered = context
                                .kinds
                                .intern(Kind::triggered(&context.kinds.get(partial_sink), id));
                            self.by_source_partial_sink
                                .entry((source, partial_sink))
                                .or_default()
                                .push(id);
                            self.by_source_sink
                                .entry((source, triggered))
                                .or_default()
                                .push(id);
                        }
                    }
                }
            }
        }
        self.rules.push(rule);
        Ok(id)
    }

    pub fn get(&self, id: RuleId) -> &Rule {
        &self.rules[id.0 as usize]
    }

    /// The rules matching a flow of `source` into `sink`.
    pub fn rules(&self, source: KindId, sink: KindId) -> &[RuleId] {
        self.by_source_sink
            .get(&(source, sink))
            .map_or(&[], Vec::as_slice)
    }

    /// The multi-source rules half-fulfilled by a flow of `source` into the
    /// partial sink `partial_sink`.
    pub fn partial_rules(&self, source: KindId, partial_sink: KindId) -> &[RuleId] {
        self.by_source_partial_sink
            .get(&(source, partial_sink))
            .map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RuleId, &Rule)> {
        self.rules
            .iter()
            .enumerate()
            .map(|(index, rule)| (RuleId(index as u32), rule))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Heuristics, Options};

    fn test_context() -> Context {
        Context::new(Options::default(), Heuristics::default())
    }

    #[test]
    fn source_sink_rules_are_indexed_per_kind_pair() {
        let context = test_context();
        let user_input = context.kinds.named("UserInput");
        let cookie = context.kinds.named("Cookie");
        let code_execution = context.kinds.named("CodeExecution");
        let logging = context.kinds.named("Logging");

        let mut rules = Rules::new();
        let rule = rules
            .add(
                &context,
                Rule::source_sink(
                    "RemoteCodeExecution",
                    1,
                    "User input reaches code execution",
                    [user_input, cookie],
                    [code_execution],
                ),
            )
            .unwrap();

        assert_eq!(rules.rules(user_input, code_execution), &[rule]);
        assert_eq!(rules.rules(cookie, code_execution), &[rule]);
        assert!(rules.rules(user_input, logging).is_empty());
        assert_eq!(rules.get(rule).code, 1);
    }

    #[test]
    fn duplicate_rule_codes_are_rejected() {
        let context = test_context();
        let source = context.kinds.named("UserInput");
        let sink = context.kinds.named("Logging");

        let mut rules = Rules::new();
        rules
            .add(
                &context,
                Rule::source_sink("First", 7, "", [source], [sink]),
            )
            .unwrap();
        assert!(rules
            .add(
                &context,
                Rule::source_sink("Second", 7, "", [source], [sink]),
            )
            .is_err());
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn multi_source_rules_pair_sources_with_matching_labels() {
        let context = test_context();
        let intent_source = context.kinds.named("IntentData");
        let context_source = context.kinds.named("CallerContext");
        let launch_intent = context.kinds.intern(Kind::Partial {
            name: "Launch".to_string(),
            label: "intent".to_string(),
        });
        let launch_context = context.kinds.intern(Kind::Partial {
            name: "Launch".to_string(),
            label: "context".to_string(),
        });

        let mut rules = Rules::new();
        let rule = rules
            .add(
                &context,
                Rule::multi_source(
                    "IntentLaunch",
                    2,
                    "Attacker-controlled intent launch",
                    BTreeMap::from([
                        ("intent".to_string(), BTreeSet::from([intent_source])),
                        ("context".to_string(), BTreeSet::from([context_source])),
                    ]),
                    [launch_intent, launch_context],
                ),
            )
            .unwrap();

        // Each source group only fulfills the partial sink with its label.
        assert_eq!(rules.partial_rules(intent_source, launch_intent), &[rule]);
        assert!(rules.partial_rules(intent_source, launch_context).is_empty());
        assert_eq!(rules.partial_rules(context_source, launch_context), &[rule]);

        // The remaining half flows into the triggered counterpart.
        let triggered_context = context
            .kinds
            .intern(Kind::triggered(&context.kinds.get(launch_context), rule));
        assert_eq!(rules.rules(context_source, triggered_context), &[rule]);
        assert!(rules.rules(context_source, launch_context).is_empty());
    }

    #[test]
    fn multi_source_rules_require_two_labels_and_partial_sinks() {
        let context = test_context();
        let source = context.kinds.named("IntentData");
        let named_sink = context.kinds.named("Launch");
        let partial_sink = context.kinds.intern(Kind::Partial {
            name: "Launch".to_string(),
            label: "intent".to_string(),
        });

        let mut rules = Rules::new();
        assert!(rules
            .add(
                &context,
                Rule::multi_source(
                    "OneLabel",
                    3,
                    "",
                    BTreeMap::from([("intent".to_string(), BTreeSet::from([source]))]),
                    [partial_sink],
                ),
            )
            .is_err());
        assert!(rules
            .add(
                &context,
                Rule::multi_source(
                    "NotPartial",
                    4,
                    "",
                    BTreeMap::from([
                        ("intent".to_string(), BTreeSet::from([source])),
                        ("context".to_string(), BTreeSet::from([source])),
                    ]),
                    [named_sink],
                ),
            )
            .is_err());
        assert!(rules.is_empty());
    }
}
