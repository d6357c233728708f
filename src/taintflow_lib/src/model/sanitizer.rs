use std::fmt;

use crate::abstract_domain::SetDomain;
use crate::prelude::*;
use crate::taint::{KindId, Taint};

/// What a sanitizer suppresses.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum SanitizerKind {
    Sources,
    Sinks,
    Propagations,
}

impl fmt::Display for SanitizerKind {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SanitizerKind::Sources => write!(formatter, "sources"),
            SanitizerKind::Sinks => write!(formatter, "sinks"),
            SanitizerKind::Propagations => write!(formatter, "propagations"),
        }
    }
}

/// A user declaration that a method stops certain taint from flowing
/// through it.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Sanitizer {
    sanitizer_kind: SanitizerKind,
    /// The taint kinds to suppress. Top suppresses every kind.
    kinds: SetDomain<KindId>,
}

impl Sanitizer {
    pub fn new(sanitizer_kind: SanitizerKind, kinds: impl IntoIterator<Item = KindId>) -> Self {
        Sanitizer {
            sanitizer_kind,
            kinds: kinds.into_iter().collect(),
        }
    }

    /// A sanitizer suppressing every kind.
    pub fn all(sanitizer_kind: SanitizerKind) -> Self {
        Sanitizer {
            sanitizer_kind,
            kinds: SetDomain::top(),
        }
    }

    pub fn sanitizer_kind(&self) -> SanitizerKind {
        self.sanitizer_kind
    }

    pub fn kinds(&self) -> &SetDomain<KindId> {
        &self.kinds
    }
}

impl fmt::Display for Sanitizer {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            "Sanitizer({}, kinds={})",
            self.sanitizer_kind, self.kinds
        )
    }
}

/// The sanitizers attached to a method or to one of its ports, folded into
/// one kind set per sanitizer kind.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct SanitizerSet {
    sources: SetDomain<KindId>,
    sinks: SetDomain<KindId>,
    propagations: SetDomain<KindId>,
}

impl SanitizerSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sanitizer: &Sanitizer) {
        match sanitizer.sanitizer_kind {
            SanitizerKind::Sources => self.sources.join_with(&sanitizer.kinds),
            SanitizerKind::Sinks => self.sinks.join_with(&sanitizer.kinds),
            SanitizerKind::Propagations => self.propagations.join_with(&sanitizer.kinds),
        }
    }

    pub fn kinds(&self, sanitizer_kind: SanitizerKind) -> &SetDomain<KindId> {
        match sanitizer_kind {
            SanitizerKind::Sources => &self.sources,
            SanitizerKind::Sinks => &self.sinks,
            SanitizerKind::Propagations => &self.propagations,
        }
    }

    /// Drops the sanitized kinds from the taint.
    pub fn sanitize(&self, sanitizer_kind: SanitizerKind, taint: Taint) -> Taint {
        let kinds = self.kinds(sanitizer_kind);
        if kinds.is_top() {
            return Taint::bottom();
        }
        if kinds.is_empty() {
            return taint;
        }
        taint.filter_by_kind(|kind| !kinds.contains(&kind))
    }
}

impl AbstractDomain for SanitizerSet {
    fn bottom() -> Self {
        Self::default()
    }

    fn is_bottom(&self) -> bool {
        self.sources.is_bottom() && self.sinks.is_bottom() && self.propagations.is_bottom()
    }

    fn leq(&self, other: &Self) -> bool {
        self.sources.leq(&other.sources)
            && self.sinks.leq(&other.sinks)
            && self.propagations.leq(&other.propagations)
    }

    fn join_with(&mut self, other: &Self) {
        self.sources.join_with(&other.sources);
        self.sinks.join_with(&other.sinks);
        self.propagations.join_with(&other.propagations);
    }

    fn widen_with(&mut self, other: &Self) {
        self.join_with(other);
    }

    fn meet_with(&mut self, other: &Self) {
        self.sources.meet_with(&other.sources);
        self.sinks.meet_with(&other.sinks);
        self.propagations.meet_with(&other.propagations);
    }
}
