//! Shared state of an analysis run.
//!
//! The [`Context`] owns the interned program representation (strings, types,
//! methods, fields and positions) together with the tables that the analysis
//! fills while it runs (taint kinds and features). The program tables are
//! built up front and stay immutable during the analysis; the kind and
//! feature tables are concurrent so that worker threads can intern new values
//! on the fly.

use std::hash::Hash;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fnv::{FnvBuildHasher, FnvHashMap};

use crate::config::{Heuristics, Options};
use crate::intermediate_representation::{
    ClassHierarchy, ClassIntervals, Field, FieldId, Method, MethodId, ParameterPosition, Position,
    PositionId, StringId, Type, TypeId,
};
use crate::taint::{FeatureId, Kind, KindId};

/// An identifier handed out by an interner.
pub trait InternId: Copy {
    fn from_index(index: u32) -> Self;

    fn index(self) -> u32;
}

impl InternId for StringId {
    fn from_index(index: u32) -> Self {
        StringId(index)
    }

    fn index(self) -> u32 {
        self.0
    }
}

impl InternId for TypeId {
    fn from_index(index: u32) -> Self {
        TypeId(index)
    }

    fn index(self) -> u32 {
        self.0
    }
}

impl InternId for PositionId {
    fn from_index(index: u32) -> Self {
        PositionId(index)
    }

    fn index(self) -> u32 {
        self.0
    }
}

impl InternId for FieldId {
    fn from_index(index: u32) -> Self {
        FieldId(index)
    }

    fn index(self) -> u32 {
        self.0
    }
}

impl InternId for KindId {
    fn from_index(index: u32) -> Self {
        KindId(index)
    }

    fn index(self) -> u32 {
        self.0
    }
}

impl InternId for FeatureId {
    fn from_index(index: u32) -> Self {
        FeatureId(index)
    }

    fn index(self) -> u32 {
        self.0
    }
}

/// Interns values of one family, handing out dense identifiers.
#[derive(Debug, Clone)]
pub struct Interner<T, I> {
    values: Vec<T>,
    indices: FnvHashMap<T, I>,
}

impl<T, I> Interner<T, I>
where
    T: Clone + Eq + Hash,
    I: InternId,
{
    pub fn new() -> Self {
        Interner {
            values: Vec::new(),
            indices: FnvHashMap::default(),
        }
    }

    /// Returns the identifier of the given value, interning it if necessary.
    pub fn intern(&mut self, value: impl Into<T>) -> I {
        let value = value.into();
        if let Some(id) = self.indices.get(&value) {
            return *id;
        }
        let id = I::from_index(self.values.len() as u32);
        self.values.push(value.clone());
        self.indices.insert(value, id);
        id
    }

    /// Returns the value behind the given identifier.
    pub fn get(&self, id: I) -> &T {
        &self.values[id.index() as usize]
    }

    /// Returns the identifier of the given value, if it was interned before.
    pub fn find(&self, value: &T) -> Option<I> {
        self.indices.get(value).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.values
            .iter()
            .enumerate()
            .map(|(index, value)| (I::from_index(index as u32), value))
    }
}

impl<T, I> Default for Interner<T, I>
where
    T: Clone + Eq + Hash,
    I: InternId,
{
    fn default() -> Self {
        Interner::new()
    }
}

/// A thread-safe interner for values created while the analysis runs.
#[derive(Debug)]
pub struct ConcurrentInterner<T, I>
where
    T: Eq + Hash,
    I: Eq + Hash,
{
    indices: DashMap<T, I, FnvBuildHasher>,
    values: DashMap<I, T, FnvBuildHasher>,
    next_index: AtomicU32,
}

impl<T, I> ConcurrentInterner<T, I>
where
    T: Clone + Eq + Hash,
    I: InternId + Eq + Hash,
{
    pub fn new() -> Self {
        ConcurrentInterner {
            indices: DashMap::default(),
            values: DashMap::default(),
            next_index: AtomicU32::new(0),
        }
    }

    /// Returns the identifier of the given value, interning it if necessary.
    pub fn intern(&self, value: T) -> I {
        if let Some(id) = self.indices.get(&value) {
            return *id;
        }
        match self.indices.entry(value.clone()) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let id = I::from_index(self.next_index.fetch_add(1, Ordering::Relaxed));
                // The reverse mapping must be in place before the identifier
                // becomes visible through the forward mapping.
                self.values.insert(id, value);
                entry.insert(id);
                id
            }
        }
    }

    /// Returns a copy of the value behind the given identifier.
    pub fn get(&self, id: I) -> T {
        match self.values.get(&id) {
            Some(value) => value.clone(),
            None => panic!("dangling interner identifier"),
        }
    }

    pub fn len(&self) -> usize {
        self.next_index.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T, I> Default for ConcurrentInterner<T, I>
where
    T: Clone + Eq + Hash,
    I: InternId + Eq + Hash,
{
    fn default() -> Self {
        ConcurrentInterner::new()
    }
}

/// The taint kinds encountered by the analysis.
#[derive(Debug, Default)]
pub struct Kinds {
    interner: ConcurrentInterner<Kind, KindId>,
}

impl Kinds {
    pub fn new() -> Self {
        Kinds::default()
    }

    pub fn intern(&self, kind: Kind) -> KindId {
        self.interner.intern(kind)
    }

    /// Returns the kind behind the given identifier.
    pub fn get(&self, id: KindId) -> Kind {
        self.interner.get(id)
    }

    /// The kind of a named source or sink.
    pub fn named(&self, name: impl Into<String>) -> KindId {
        self.interner.intern(Kind::named(name))
    }

    /// The propagation kind for flows into the return value.
    pub fn local_return(&self) -> KindId {
        self.interner.intern(Kind::LocalReturn)
    }

    /// The propagation kind for flows into the given parameter.
    pub fn local_argument(&self, parameter: ParameterPosition) -> KindId {
        self.interner.intern(Kind::LocalArgument { parameter })
    }
}

/// The features encountered by the analysis.
///
/// The features describing analysis approximations occupy fixed slots, see
/// the constants on [`FeatureId`].
#[derive(Debug)]
pub struct Features {
    interner: ConcurrentInterner<String, FeatureId>,
}

impl Features {
    pub fn new() -> Self {
        let features = Features {
            interner: ConcurrentInterner::new(),
        };
        let widen = features.intern("via-widen-broadening");
        let issue = features.intern("via-issue-broadening");
        let propagation = features.intern("via-propagation-broadening");
        let obscure = features.intern("via-obscure");
        let obscure_taint_in_taint_out = features.intern("via-obscure-taint-in-taint-out");
        debug_assert_eq!(widen, FeatureId::WIDEN_BROADENING);
        debug_assert_eq!(issue, FeatureId::ISSUE_BROADENING);
        debug_assert_eq!(propagation, FeatureId::PROPAGATION_BROADENING);
        debug_assert_eq!(obscure, FeatureId::OBSCURE);
        debug_assert_eq!(
            obscure_taint_in_taint_out,
            FeatureId::OBSCURE_TAINT_IN_TAINT_OUT
        );
        features
    }

    pub fn intern(&self, name: impl Into<String>) -> FeatureId {
        self.interner.intern(name.into())
    }

    /// Returns the name of the given feature.
    pub fn name(&self, id: FeatureId) -> String {
        self.interner.get(id)
    }

    /// The feature recording the runtime type flowing into a via-type-of port.
    pub fn via_type_of(&self, type_name: Option<&str>) -> FeatureId {
        self.intern(format!("via-type:{}", type_name.unwrap_or("unknown")))
    }

    /// The feature recording the constant flowing into a via-value-of port.
    pub fn via_value_of(&self, value: Option<&str>) -> FeatureId {
        self.intern(format!("via-value:{}", value.unwrap_or("unknown")))
    }
}

impl Default for Features {
    fn default() -> Self {
        Features::new()
    }
}

/// The methods of the analyzed program.
#[derive(Debug, Default)]
pub struct Methods {
    methods: Vec<Method>,
}

impl Methods {
    pub fn new() -> Self {
        Methods::default()
    }

    pub fn add(&mut self, method: Method) -> MethodId {
        let id = MethodId(self.methods.len() as u32);
        self.methods.push(method);
        id
    }

    /// Returns the method behind the given identifier.
    pub fn get(&self, id: MethodId) -> &Method {
        &self.methods[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MethodId, &Method)> {
        self.methods
            .iter()
            .enumerate()
            .map(|(index, method)| (MethodId(index as u32), method))
    }
}

/// The shared state of an analysis run.
///
/// The program tables are filled while the analyzed program is being
/// registered and stay immutable afterwards, so the context can be shared
/// freely between worker threads.
#[derive(Debug)]
pub struct Context {
    pub options: Options,
    pub heuristics: Heuristics,
    pub strings: Interner<String, StringId>,
    pub types: Interner<Type, TypeId>,
    pub positions: Interner<Position, PositionId>,
    pub fields: Interner<Field, FieldId>,
    pub methods: Methods,
    pub class_hierarchy: ClassHierarchy,
    pub class_intervals: ClassIntervals,
    pub kinds: Kinds,
    pub features: Features,
}

impl Context {
    pub fn new(options: Options, heuristics: Heuristics) -> Self {
        Context {
            options,
            heuristics,
            strings: Interner::new(),
            types: Interner::new(),
            positions: Interner::new(),
            fields: Interner::new(),
            methods: Methods::new(),
            class_hierarchy: ClassHierarchy::new(),
            class_intervals: ClassIntervals::default(),
            kinds: Kinds::new(),
            features: Features::new(),
        }
    }

    /// Compute the class intervals for the current class hierarchy.
    ///
    /// This must be called once the class hierarchy is complete and before
    /// the analysis starts.
    pub fn compute_class_intervals(&mut self) {
        self.class_intervals =
            ClassIntervals::new(self.class_hierarchy.children(), self.class_hierarchy.roots());
    }

    /// Intern a type with the given name.
    pub fn type_named(&mut self, name: &str) -> TypeId {
        let name = self.strings.intern(name);
        self.types.intern(Type::new(name))
    }

    /// Returns the method behind the given identifier.
    pub fn method(&self, method: MethodId) -> &Method {
        self.methods.get(method)
    }

    /// Returns the name of the given type.
    pub fn type_name(&self, class: TypeId) -> &str {
        self.strings.get(self.types.get(class).name)
    }

    /// Returns the fully qualified name of the given method.
    pub fn method_signature(&self, method: MethodId) -> String {
        let method = self.methods.get(method);
        format!(
            "{}.{}",
            self.type_name(method.class),
            self.strings.get(method.name)
        )
    }

    /// The feature recording the runtime type flowing into a via-type-of port.
    pub fn via_type_of_feature(&self, class: Option<TypeId>) -> FeatureId {
        self.features
            .via_type_of(class.map(|class| self.type_name(class)))
    }

    /// The feature recording the constant flowing into a via-value-of port.
    pub fn via_value_of_feature(&self, value: Option<&str>) -> FeatureId {
        self.features.via_value_of(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interner_deduplicates() {
        let mut strings: Interner<String, StringId> = Interner::new();
        let first = strings.intern("foo");
        let second = strings.intern("bar");
        let third = strings.intern("foo");
        assert_eq!(first, third);
        assert_ne!(first, second);
        assert_eq!(strings.get(second), "bar");
        assert_eq!(strings.find(&"bar".to_string()), Some(second));
        assert_eq!(strings.len(), 2);
    }

    #[test]
    fn concurrent_interner_deduplicates() {
        let features = Features::new();
        let first = features.intern("via-numerical-operator");
        let second = features.intern("via-numerical-operator");
        assert_eq!(first, second);
        assert_eq!(features.name(first), "via-numerical-operator");
    }

    #[test]
    fn well_known_features_occupy_fixed_slots() {
        let features = Features::new();
        assert_eq!(
            features.name(FeatureId::WIDEN_BROADENING),
            "via-widen-broadening"
        );
        assert_eq!(features.intern("via-obscure"), FeatureId::OBSCURE);
        assert_eq!(
            features.intern("via-propagation-broadening"),
            FeatureId::PROPAGATION_BROADENING
        );
    }

    #[test]
    fn via_feature_names() {
        let features = Features::new();
        let known = features.via_type_of(Some("Landroid/content/Intent;"));
        assert_eq!(features.name(known), "via-type:Landroid/content/Intent;");
        let unknown = features.via_value_of(None);
        assert_eq!(features.name(unknown), "via-value:unknown");
    }

    #[test]
    fn kinds_are_stable() {
        let kinds = Kinds::new();
        let source = kinds.named("UserInput");
        assert_eq!(kinds.named("UserInput"), source);
        assert_ne!(kinds.named("SqlInjection"), source);
        assert_eq!(kinds.local_return(), kinds.local_return());
        assert_eq!(kinds.get(source), Kind::named("UserInput"));
    }

    #[test]
    fn method_signatures() {
        let mut context = Context::new(Options::default(), Heuristics::default());
        let class = context.type_named("Lcom/example/Activity;");
        let name = context.strings.intern("onCreate");
        let method = context
            .methods
            .add(Method::new(class, name, vec![class], None, false, None));
        assert_eq!(
            context.method_signature(method),
            "Lcom/example/Activity;.onCreate"
        );
        assert_eq!(context.method(method).number_of_parameters(), 1);
    }
}
