use std::fmt;

use crate::prelude::*;

/// Describes how a taint frame relates to the place it was declared,
/// which determines how the frame contributes to traces.
///
/// A frame starts as `Declaration` in the model of the method declaring the
/// source or sink. `Origin` marks the root of a trace, i.e. taint sitting
/// directly at the call site of the declaring method. Every further hop
/// through a call site yields `CallSite`. Frames describing propagations
/// carry `Propagation`, optionally flagged with `PropagationWithTrace` when
/// the propagation gives rise to a source or sink with its own trace.
///
/// The state is bit-packed: the lower two bits hold the declaration, origin,
/// call-site or propagation state, the third bit holds the
/// propagation-with-trace flag.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct CallKind {
    encoding: u32,
}

const DECLARATION: u32 = 0b000;
const ORIGIN: u32 = 0b001;
const CALL_SITE: u32 = 0b010;
const PROPAGATION: u32 = 0b011;
const PROPAGATION_WITH_TRACE: u32 = 0b100;

const STATE_MASK: u32 = 0b011;

impl CallKind {
    /// A source or sink on the declaration of a method.
    pub fn declaration() -> Self {
        CallKind {
            encoding: DECLARATION,
        }
    }

    /// The root of a trace, i.e. the call site where a declared source or
    /// sink first materializes.
    pub fn origin() -> Self {
        CallKind { encoding: ORIGIN }
    }

    /// A hop in a trace.
    pub fn callsite() -> Self {
        CallKind {
            encoding: CALL_SITE,
        }
    }

    /// A propagation without its own trace.
    pub fn propagation() -> Self {
        CallKind {
            encoding: PROPAGATION,
        }
    }

    /// A propagation which materializes a source or sink with a trace.
    /// `kind` holds the trace state and must not itself be a propagation.
    pub fn propagation_with_trace(kind: CallKind) -> Self {
        assert!(
            !kind.is_propagation(),
            "invalid trace state for a propagation with trace: {kind}",
        );
        CallKind {
            encoding: kind.encoding | PROPAGATION_WITH_TRACE,
        }
    }

    /// Reconstructs a call kind from its bit encoding.
    /// Panics on encodings no constructor produces.
    pub fn decode(encoding: u32) -> Self {
        assert!(
            encoding <= (PROPAGATION_WITH_TRACE | STATE_MASK)
                && (encoding & PROPAGATION_WITH_TRACE == 0
                    || encoding & STATE_MASK != PROPAGATION),
            "invalid call kind encoding: {encoding:#b}",
        );
        CallKind { encoding }
    }

    /// Returns the bit encoding of the call kind.
    pub fn encode(&self) -> u32 {
        self.encoding
    }

    pub fn is_declaration(&self) -> bool {
        self.encoding & STATE_MASK == DECLARATION
    }

    pub fn is_origin(&self) -> bool {
        self.encoding & STATE_MASK == ORIGIN
    }

    pub fn is_callsite(&self) -> bool {
        self.encoding & STATE_MASK == CALL_SITE
    }

    pub fn is_propagation(&self) -> bool {
        self.is_propagation_without_trace() || self.is_propagation_with_trace()
    }

    pub fn is_propagation_with_trace(&self) -> bool {
        self.encoding & PROPAGATION_WITH_TRACE != 0
    }

    pub fn is_propagation_without_trace(&self) -> bool {
        self.encoding == PROPAGATION
    }

    /// Returns the call kind after one hop through a call site.
    ///
    /// Declarations become origins, origins and call sites become call
    /// sites. Propagations without a trace are a fixed point. For
    /// propagations with a trace, the trace state advances while the
    /// propagation flag is preserved.
    #[must_use]
    pub fn propagate(&self) -> Self {
        if self.is_propagation_without_trace() {
            return *self;
        }

        let state = match self.encoding & STATE_MASK {
            DECLARATION => ORIGIN,
            _ => CALL_SITE,
        };
        CallKind {
            encoding: state | (self.encoding & PROPAGATION_WITH_TRACE),
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        if self.is_propagation_with_trace() {
            write!(formatter, "PropagationWithTrace:")?;
        }
        match self.encoding & STATE_MASK {
            DECLARATION => write!(formatter, "Declaration"),
            ORIGIN => write!(formatter, "Origin"),
            CALL_SITE => write!(formatter, "CallSite"),
            _ => write!(formatter, "Propagation"),
        }
    }
}
