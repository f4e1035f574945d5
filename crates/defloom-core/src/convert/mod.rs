//! Value converters: strategies that turn a node into a value of a
//! non-composite type.
//!
//! Converters are consulted in registration order and the first whose
//! predicate accepts a type wins. Hits are cached per type until the
//! converter list changes. Misses are not cached, since a type may become
//! convertible once more enums or assets are registered.

mod decimal;
mod enumeration;
mod integer;
mod primitive;
mod type_name;

pub use decimal::{DecimalConverter, Fixed32, Fixed64};
pub use enumeration::EnumConverter;
pub use integer::IntegerConverter;
pub use primitive::{BoolConverter, CharConverter, FloatConverter, StringConverter};
pub use type_name::TypeNameConverter;

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::diagnostic::{DiagnosticKind, Diagnostics};
use crate::document::Node;
use crate::types::{TypeKey, TypeRegistry, Value};

/// Turns a node into a value of one or more types.
pub trait Converter {
    /// Unique name; registering a second converter with the same name is
    /// rejected.
    fn name(&self) -> &'static str;

    fn can_handle(&self, ty: TypeKey, types: &TypeRegistry) -> bool;

    /// Parses `node` as a `ty`. Returns `None` after reporting a diagnostic
    /// through `ctx`, or after deferring the value with
    /// [`ConvertContext::defer`].
    fn parse(&self, node: &Node, ty: TypeKey, ctx: &mut ConvertContext<'_>) -> Option<Value>;
}

/// What a converter may see and do while parsing one node.
pub struct ConvertContext<'a> {
    types: &'a TypeRegistry,
    diagnostics: &'a mut Diagnostics,
    node_path: &'a str,
    deferred: Vec<String>,
}

impl<'a> ConvertContext<'a> {
    pub fn new(types: &'a TypeRegistry, diagnostics: &'a mut Diagnostics, node_path: &'a str) -> Self {
        Self {
            types,
            diagnostics,
            node_path,
            deferred: Vec::new(),
        }
    }

    pub fn types(&self) -> &'a TypeRegistry {
        self.types
    }

    /// Slash-separated path of the node being parsed.
    pub fn node_path(&self) -> &str {
        self.node_path
    }

    /// Reports that the node's content is not a valid value.
    pub fn parse_error(&mut self, message: impl Into<String>) {
        self.diagnostics
            .report(DiagnosticKind::ValueParse, Some(self.node_path), message);
    }

    pub fn report(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        self.diagnostics.report(kind, Some(self.node_path), message);
    }

    /// Asks for the value to be filled in later from the reference map
    /// entry `id`, at the location currently being built.
    pub fn defer(&mut self, id: impl Into<String>) {
        self.deferred.push(id.into());
    }

    pub(crate) fn into_deferred(self) -> Vec<String> {
        self.deferred
    }
}

/// Ordered list of converters with a per-type lookup cache.
pub struct ConverterRegistry {
    converters: Vec<Rc<dyn Converter>>,
    cache: RefCell<HashMap<TypeId, Rc<dyn Converter>>>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ConverterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            converters: Vec::new(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// The built-in scalar, enum and type-name converters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.add(BoolConverter);
        registry.add(CharConverter);
        registry.add(IntegerConverter);
        registry.add(FloatConverter);
        registry.add(DecimalConverter);
        registry.add(StringConverter);
        registry.add(EnumConverter);
        registry.add(TypeNameConverter);
        registry
    }

    /// Appends a converter. Returns false if one with the same name is
    /// already registered.
    pub fn add(&mut self, converter: impl Converter + 'static) -> bool {
        self.add_shared(Rc::new(converter))
    }

    pub fn add_shared(&mut self, converter: Rc<dyn Converter>) -> bool {
        if self.contains(converter.name()) {
            return false;
        }
        self.converters.push(converter);
        self.clear_cache();
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.converters.len();
        self.converters.retain(|c| c.name() != name);
        let removed = self.converters.len() != before;
        if removed {
            self.clear_cache();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.converters.clear();
        self.clear_cache();
    }

    /// Drops cached lookups, e.g. after registering more enum types.
    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.converters.iter().any(|c| c.name() == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.converters.iter().map(|c| c.name())
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    /// First converter accepting `ty`. Hits are cached by exact type.
    pub fn resolve(&self, ty: TypeKey, types: &TypeRegistry) -> Option<Rc<dyn Converter>> {
        if let Some(hit) = self.cache.borrow().get(&ty.id()) {
            return Some(Rc::clone(hit));
        }
        let found = self.find_uncached(ty, types)?;
        self.cache.borrow_mut().insert(ty.id(), Rc::clone(&found));
        Some(found)
    }

    /// First converter accepting `ty`, bypassing the cache.
    pub fn find_uncached(&self, ty: TypeKey, types: &TypeRegistry) -> Option<Rc<dyn Converter>> {
        self.converters
            .iter()
            .find(|c| c.can_handle(ty, types))
            .cloned()
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Trimmed text of a node, reporting an empty value.
pub(crate) fn value_text(node: &Node, ctx: &mut ConvertContext<'_>, what: &str) -> Option<String> {
    let text = node.inner_text();
    let text = text.trim();
    if text.is_empty() {
        ctx.parse_error(format!("expected {what}, found no text"));
        return None;
    }
    Some(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Counting {
        calls: Rc<Cell<usize>>,
    }

    impl Converter for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn can_handle(&self, ty: TypeKey, _types: &TypeRegistry) -> bool {
            self.calls.set(self.calls.get() + 1);
            ty.is::<u128>()
        }

        fn parse(&self, _node: &Node, _ty: TypeKey, _ctx: &mut ConvertContext<'_>) -> Option<Value> {
            Some(Box::new(0u128))
        }
    }

    #[test]
    fn builtins_cover_scalars() {
        let types = TypeRegistry::new();
        let converters = ConverterRegistry::with_builtins();
        for key in [
            TypeKey::of::<bool>(),
            TypeKey::of::<char>(),
            TypeKey::of::<i8>(),
            TypeKey::of::<usize>(),
            TypeKey::of::<f32>(),
            TypeKey::of::<Fixed64>(),
            TypeKey::of::<String>(),
            TypeKey::of::<TypeKey>(),
        ] {
            assert!(converters.resolve(key, &types).is_some(), "{key}");
        }
        assert!(converters.resolve(TypeKey::of::<Vec<u8>>(), &types).is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut converters = ConverterRegistry::with_builtins();
        let before = converters.len();
        assert!(!converters.add(BoolConverter));
        assert_eq!(converters.len(), before);
        assert!(converters.remove("bool"));
        assert!(!converters.contains("bool"));
        assert!(converters.add(BoolConverter));
    }

    #[test]
    fn lookups_are_cached_until_the_list_changes() {
        let types = TypeRegistry::new();
        let calls = Rc::new(Cell::new(0));
        let mut converters = ConverterRegistry::new();
        converters.add(Counting {
            calls: calls.clone(),
        });

        let key = TypeKey::of::<u128>();
        assert!(converters.resolve(key, &types).is_some());
        assert!(converters.resolve(key, &types).is_some());
        assert_eq!(calls.get(), 1);

        converters.add(BoolConverter);
        assert!(converters.resolve(key, &types).is_some());
        assert_eq!(calls.get(), 2);

        converters.clear();
        assert!(converters.resolve(key, &types).is_none());
    }

    #[test]
    fn misses_are_retried_after_new_registrations() {
        #[derive(Debug, Clone, Copy, PartialEq)]
        enum Heat {
            Cold,
            Hot,
        }

        let mut types = TypeRegistry::new();
        let converters = ConverterRegistry::with_builtins();
        let key = TypeKey::of::<Heat>();
        assert!(converters.resolve(key, &types).is_none());

        types.register(
            crate::types::Enum::new("Heat")
                .variant("Cold", Heat::Cold)
                .variant("Hot", Heat::Hot),
        );
        let found = converters.resolve(key, &types).unwrap();
        assert_eq!(found.name(), "enum");
    }

    #[test]
    fn first_match_wins() {
        struct Shout;
        impl Converter for Shout {
            fn name(&self) -> &'static str {
                "shout"
            }
            fn can_handle(&self, ty: TypeKey, _types: &TypeRegistry) -> bool {
                ty.is::<String>()
            }
            fn parse(&self, node: &Node, _ty: TypeKey, _ctx: &mut ConvertContext<'_>) -> Option<Value> {
                Some(Box::new(node.inner_text().to_uppercase()))
            }
        }

        let types = TypeRegistry::new();
        let mut converters = ConverterRegistry::new();
        converters.add(Shout);
        converters.add(StringConverter);
        let chosen = converters.resolve(TypeKey::of::<String>(), &types).unwrap();
        assert_eq!(chosen.name(), "shout");
    }
}
