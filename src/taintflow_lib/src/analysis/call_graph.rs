//! Call resolution for invoke instructions.
//!
//! The [`CallGraph`] is built once, after the program has been registered
//! and before any method is analyzed. For every invoke instruction it holds
//! a [`CallTarget`]: the resolved base callee plus, for virtual calls, the
//! overriding methods the call could dispatch to. The [`Overrides`] store
//! maps each method to all methods overriding it anywhere below its class.

use std::collections::BTreeSet;

use fnv::FnvHashMap;

use crate::context::Context;
use crate::intermediate_representation::{
    ClassInterval, Instruction, InstructionId, MethodId, TypeId,
};

/// Maps each method to the methods overriding it in subclasses.
///
/// A method overrides another if it is an instance method of a strict
/// subclass with the same name, the same non-receiver parameter types and
/// the same return type. The sets are transitive over the class hierarchy.
#[derive(Debug, Default)]
pub struct Overrides {
    overrides: FnvHashMap<MethodId, BTreeSet<MethodId>>,
    empty: BTreeSet<MethodId>,
}

impl Overrides {
    pub fn new(context: &Context) -> Self {
        let mut methods_by_class: FnvHashMap<TypeId, Vec<MethodId>> = FnvHashMap::default();
        for (id, method) in context.methods.iter() {
            if !method.is_static {
                methods_by_class.entry(method.class).or_default().push(id);
            }
        }

        let mut overrides: FnvHashMap<MethodId, BTreeSet<MethodId>> = FnvHashMap::default();
        for (id, method) in context.methods.iter() {
            if method.is_static {
                continue;
            }
            let mut overriding = BTreeSet::new();
            for subclass in context.class_hierarchy.subclasses(method.class) {
                let Some(candidates) = methods_by_class.get(&subclass) else {
                    continue;
                };
                for candidate in candidates {
                    let candidate_method = context.method(*candidate);
                    if candidate_method.name == method.name
                        && candidate_method.return_type == method.return_type
                        && candidate_method.parameter_types.get(1..)
                            == method.parameter_types.get(1..)
                    {
                        overriding.insert(*candidate);
                    }
                }
            }
            if !overriding.is_empty() {
                overrides.insert(id, overriding);
            }
        }

        Overrides {
            overrides,
            empty: BTreeSet::new(),
        }
    }

    /// Returns the methods overriding the given method.
    pub fn get(&self, method: MethodId) -> &BTreeSet<MethodId> {
        self.overrides.get(&method).unwrap_or(&self.empty)
    }
}

/// The resolution of one invoke instruction.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct CallTarget {
    instruction: InstructionId,
    resolved_base_callee: MethodId,
    receiver_type: Option<TypeId>,
    receiver_class_interval: ClassInterval,
    /// The overriding methods the call could dispatch to, already filtered
    /// to subclasses of the receiver type. `None` for direct calls.
    overrides: Option<Vec<MethodId>>,
}

impl CallTarget {
    /// A call that dispatches to exactly the referenced method.
    pub fn direct_call(instruction: InstructionId, callee: MethodId) -> Self {
        CallTarget {
            instruction,
            resolved_base_callee: callee,
            receiver_type: None,
            receiver_class_interval: ClassInterval::top(),
            overrides: None,
        }
    }

    /// A call that dispatches on the runtime type of the receiver.
    ///
    /// The referenced method may be a bodyless declaration; the base callee
    /// is then the closest defined method in a superclass, like the runtime
    /// would resolve it. Overrides of the base callee whose class cannot
    /// extend the receiver type are filtered out:
    /// for a call on `B` resolving to `A::f`, an override `D::f` with
    /// `D` outside the subtree of `B` can never be the dispatch target.
    pub fn virtual_call(
        instruction: InstructionId,
        context: &Context,
        overrides: &Overrides,
        callee: MethodId,
    ) -> Self {
        let receiver_type = context.method(callee).class;
        let receiver_class_interval = context.class_intervals.get(receiver_type);
        let resolved_base_callee = resolve_base_callee(context, callee);
        let possible_overrides = overrides
            .get(resolved_base_callee)
            .iter()
            .copied()
            .filter(|method| {
                let override_class = context.method(*method).class;
                receiver_class_interval.contains(&context.class_intervals.get(override_class))
            })
            .collect();
        CallTarget {
            instruction,
            resolved_base_callee,
            receiver_type: Some(receiver_type),
            receiver_class_interval,
            overrides: Some(possible_overrides),
        }
    }

    pub fn instruction(&self) -> InstructionId {
        self.instruction
    }

    /// Returns whether the call dispatches on the receiver's runtime type.
    pub fn is_virtual(&self) -> bool {
        self.overrides.is_some()
    }

    /// For a direct call, the callee. For a virtual call, the base method
    /// of all possible dispatch targets.
    pub fn resolved_base_callee(&self) -> MethodId {
        self.resolved_base_callee
    }

    /// For a virtual call, the static type of the receiver.
    pub fn receiver_type(&self) -> Option<TypeId> {
        self.receiver_type
    }

    pub fn receiver_class_interval(&self) -> ClassInterval {
        self.receiver_class_interval
    }

    /// The overriding methods the call could dispatch to. This does not
    /// include the resolved base callee itself.
    pub fn overrides(&self) -> &[MethodId] {
        self.overrides.as_deref().unwrap_or(&[])
    }
}

/// Resolves a method reference to the method that would actually run.
///
/// A reference to a bodyless instance method dispatches to the closest
/// defined method up the class hierarchy. References that stay undefined all
/// the way up resolve to themselves and are treated as obscure.
fn resolve_base_callee(context: &Context, callee: MethodId) -> MethodId {
    let method = context.method(callee);
    if method.is_static || method.body.is_some() {
        return callee;
    }
    let mut class = method.class;
    while let Some(parent) = context.class_hierarchy.parent(class) {
        let defined = context.methods.iter().find(|(_, candidate)| {
            candidate.class == parent
                && !candidate.is_static
                && candidate.body.is_some()
                && candidate.name == method.name
                && candidate.return_type == method.return_type
                && candidate.parameter_types.get(1..) == method.parameter_types.get(1..)
        });
        if let Some((id, _)) = defined {
            return id;
        }
        class = parent;
    }
    callee
}

/// The resolved call targets of every invoke instruction of the program.
#[derive(Debug, Default)]
pub struct CallGraph {
    callees: FnvHashMap<MethodId, FnvHashMap<InstructionId, CallTarget>>,
}

impl CallGraph {
    pub fn new(context: &Context, overrides: &Overrides) -> Self {
        let mut callees: FnvHashMap<MethodId, FnvHashMap<InstructionId, CallTarget>> =
            FnvHashMap::default();
        for (caller, method) in context.methods.iter() {
            let Some(body) = &method.body else {
                continue;
            };
            let mut targets = FnvHashMap::default();
            for (instruction_id, instruction) in body.instructions() {
                if let Instruction::Invoke {
                    method: callee,
                    is_virtual,
                    ..
                } = instruction
                {
                    let target = if *is_virtual {
                        CallTarget::virtual_call(instruction_id, context, overrides, *callee)
                    } else {
                        CallTarget::direct_call(instruction_id, *callee)
                    };
                    targets.insert(instruction_id, target);
                }
            }
            if !targets.is_empty() {
                callees.insert(caller, targets);
            }
        }
        CallGraph { callees }
    }

    /// Returns the call target of the given invoke instruction.
    pub fn callee(&self, caller: MethodId, instruction: InstructionId) -> Option<&CallTarget> {
        self.callees.get(&caller)?.get(&instruction)
    }

    /// Returns all call targets within the given method.
    pub fn callees(&self, caller: MethodId) -> impl Iterator<Item = &CallTarget> {
        self.callees
            .get(&caller)
            .into_iter()
            .flat_map(|targets| targets.values())
    }
}
