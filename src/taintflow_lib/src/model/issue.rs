use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

use crate::intermediate_representation::PositionId;
use crate::prelude::*;
use crate::taint::Taint;

use super::RuleId;

/// A flow of sources into sinks matching a rule, found at one instruction
/// of the analyzed method.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Issue {
    rule: RuleId,
    /// Position of the instruction where the sources meet the sinks.
    position: PositionId,
    /// Index of the sink port among the ports of the triggering call, so
    /// that flows into different ports of the same call stay separate.
    sink_index: u32,
    sources: Taint,
    sinks: Taint,
}

impl Issue {
    pub fn new(
        rule: RuleId,
        position: PositionId,
        sink_index: u32,
        sources: Taint,
        sinks: Taint,
    ) -> Self {
        Issue {
            rule,
            position,
            sink_index,
            sources,
            sinks,
        }
    }

    pub fn rule(&self) -> RuleId {
        self.rule
    }

    pub fn position(&self) -> PositionId {
        self.position
    }

    pub fn sink_index(&self) -> u32 {
        self.sink_index
    }

    pub fn sources(&self) -> &Taint {
        &self.sources
    }

    pub fn sinks(&self) -> &Taint {
        &self.sinks
    }

    /// An issue without sources or sinks reports nothing.
    pub fn is_bottom(&self) -> bool {
        self.sources.is_bottom() || self.sinks.is_bottom()
    }

    fn key(&self) -> (RuleId, PositionId, u32) {
        (self.rule, self.position, self.sink_index)
    }

    /// Joins an issue describing the same flow, i.e. with equal rule,
    /// position and sink index.
    pub fn join_with(&mut self, other: &Issue) {
        debug_assert_eq!(self.key(), other.key());
        self.sources.join_with(&other.sources);
        self.sinks.join_with(&other.sinks);
    }

    pub fn leq(&self, other: &Issue) -> bool {
        self.key() == other.key()
            && self.sources.leq(&other.sources)
            && self.sinks.leq(&other.sinks)
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            "Issue({}, sources={}, sinks={})",
            self.rule, self.sources, self.sinks
        )
    }
}

/// The issues of a method.
///
/// Issues describing the same flow are joined instead of duplicated, so
/// that re-running the analysis on a method leaves its issue set stable.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct IssueSet {
    issues: BTreeMap<(RuleId, PositionId, u32), Issue>,
}

impl IssueSet {
    pub fn add(&mut self, issue: Issue) {
        if issue.is_bottom() {
            return;
        }
        match self.issues.entry(issue.key()) {
            Entry::Occupied(mut entry) => entry.get_mut().join_with(&issue),
            Entry::Vacant(entry) => {
                entry.insert(issue);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.issues.values()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

impl AbstractDomain for IssueSet {
    fn bottom() -> Self {
        Self::default()
    }

    fn is_bottom(&self) -> bool {
        self.issues.is_empty()
    }

    fn leq(&self, other: &Self) -> bool {
        self.issues.iter().all(|(key, issue)| {
            other
                .issues
                .get(key)
                .is_some_and(|other_issue| issue.leq(other_issue))
        })
    }

    fn join_with(&mut self, other: &Self) {
        for issue in other.issues.values() {
            self.add(issue.clone());
        }
    }

    fn widen_with(&mut self, other: &Self) {
        self.join_with(other);
    }

    fn meet_with(&mut self, other: &Self) {
        self.issues.retain(|key, issue| match other.issues.get(key) {
            Some(other_issue) => {
                issue.sources.meet_with(&other_issue.sources);
                issue.sinks.meet_with(&other_issue.sinks);
                !issue.is_bottom()
            }
            None => false,
        });
    }
}
