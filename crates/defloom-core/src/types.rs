//! Type descriptors.
//!
//! Rust has no runtime reflection, so every type the builder can produce is
//! described up front in a [`TypeRegistry`]: composites with their named
//! fields, lists, enums with their variant names, and abstract targets that
//! only accept concrete types through registered upcasts.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use tracing::warn;

use crate::document::Node;
use crate::handle::{Anchor, Handle};
use crate::refs::ReferenceValue;

/// A built value of any registered type.
pub type Value = Box<dyn Any>;

/// The concrete type of a boxed value.
pub fn value_type_id(value: &Value) -> TypeId {
    (**value).type_id()
}

// ===========================================================================
// TypeKey
// ===========================================================================

/// Identity of a Rust type, carrying its path for messages.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Full Rust path of the type.
    pub fn rust_name(&self) -> &'static str {
        self.name
    }

    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ===========================================================================
// Hook traits
// ===========================================================================

/// Types whose instances can be the target of a reference.
pub trait Referenceable {
    /// The ID other nodes use to refer to this object. `None` is reported
    /// when the object is built.
    fn reference_id(&self) -> Option<&str>;
}

/// Post-construction hook, run once all fields have been assigned.
pub trait OnConstructed {
    fn on_constructed(&mut self, node: &Node);
}

// ===========================================================================
// Fields
// ===========================================================================

/// Type-erased access to one field of a composite.
pub(crate) trait FieldAccess {
    fn get_mut<'a>(&self, owner: &'a mut dyn Any) -> Option<&'a mut dyn Any>;
    /// Hands the value back when the owner or value has the wrong type.
    fn set(&self, owner: &mut dyn Any, value: Value) -> Result<(), Value>;
}

struct Plain<T, F> {
    access: fn(&mut T) -> &mut F,
}

impl<T: 'static, F: 'static> FieldAccess for Plain<T, F> {
    fn get_mut<'a>(&self, owner: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        let owner = owner.downcast_mut::<T>()?;
        let field: &mut dyn Any = (self.access)(owner);
        Some(field)
    }

    fn set(&self, owner: &mut dyn Any, value: Value) -> Result<(), Value> {
        let Some(owner) = owner.downcast_mut::<T>() else {
            return Err(value);
        };
        let value = value.downcast::<F>()?;
        *(self.access)(owner) = *value;
        Ok(())
    }
}

struct Optional<T, F> {
    access: fn(&mut T) -> &mut Option<F>,
}

impl<T: 'static, F: 'static> FieldAccess for Optional<T, F> {
    fn get_mut<'a>(&self, owner: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        let owner = owner.downcast_mut::<T>()?;
        (self.access)(owner).as_mut().map(|v| v as &mut dyn Any)
    }

    fn set(&self, owner: &mut dyn Any, value: Value) -> Result<(), Value> {
        let Some(owner) = owner.downcast_mut::<T>() else {
            return Err(value);
        };
        let value = value.downcast::<F>()?;
        *(self.access)(owner) = Some(*value);
        Ok(())
    }
}

/// A named field of a composite type.
///
/// `ty` is the element type the builder produces for the field. Optional
/// fields report their inner type.
pub struct FieldDesc {
    name: String,
    owner: TypeKey,
    ty: TypeKey,
    access: Box<dyn FieldAccess>,
}

impl FieldDesc {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> TypeKey {
        self.owner
    }

    pub fn ty(&self) -> TypeKey {
        self.ty
    }

    pub(crate) fn get_mut<'a>(&self, owner: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        self.access.get_mut(owner)
    }

    pub(crate) fn set(&self, owner: &mut dyn Any, value: Value) -> Result<(), Value> {
        self.access.set(owner, value)
    }
}

impl fmt::Debug for FieldDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDesc")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .finish()
    }
}

// ===========================================================================
// Lists
// ===========================================================================

/// Type-erased operations on a list type.
pub(crate) trait ListAccess {
    fn with_capacity(&self, capacity: usize) -> Value;
    fn len(&self, list: &dyn Any) -> usize;
    /// `None` leaves a placeholder in slot lists and does nothing in dense
    /// lists.
    fn push(&self, list: &mut dyn Any, item: Option<Value>) -> Result<(), Value>;
    fn item_mut<'a>(&self, list: &'a mut dyn Any, index: usize) -> Option<&'a mut dyn Any>;
    /// Fills a slot, or inserts at `index` (clamped) in a dense list.
    fn place(&self, list: &mut dyn Any, index: usize, item: Value) -> Result<(), Value>;
}

/// `Vec<E>`: items that fail to build are dropped.
struct Dense<E>(std::marker::PhantomData<E>);

impl<E: 'static> ListAccess for Dense<E> {
    fn with_capacity(&self, capacity: usize) -> Value {
        Box::new(Vec::<E>::with_capacity(capacity))
    }

    fn len(&self, list: &dyn Any) -> usize {
        list.downcast_ref::<Vec<E>>().map_or(0, Vec::len)
    }

    fn push(&self, list: &mut dyn Any, item: Option<Value>) -> Result<(), Value> {
        let Some(item) = item else { return Ok(()) };
        let Some(list) = list.downcast_mut::<Vec<E>>() else {
            return Err(item);
        };
        list.push(*item.downcast::<E>()?);
        Ok(())
    }

    fn item_mut<'a>(&self, list: &'a mut dyn Any, index: usize) -> Option<&'a mut dyn Any> {
        let list = list.downcast_mut::<Vec<E>>()?;
        list.get_mut(index).map(|v| v as &mut dyn Any)
    }

    fn place(&self, list: &mut dyn Any, index: usize, item: Value) -> Result<(), Value> {
        let Some(list) = list.downcast_mut::<Vec<E>>() else {
            return Err(item);
        };
        let item = item.downcast::<E>()?;
        let index = index.min(list.len());
        list.insert(index, *item);
        Ok(())
    }
}

/// `Vec<Option<E>>`: every item keeps its position, failures stay `None`.
struct Slots<E>(std::marker::PhantomData<E>);

impl<E: 'static> ListAccess for Slots<E> {
    fn with_capacity(&self, capacity: usize) -> Value {
        Box::new(Vec::<Option<E>>::with_capacity(capacity))
    }

    fn len(&self, list: &dyn Any) -> usize {
        list.downcast_ref::<Vec<Option<E>>>().map_or(0, Vec::len)
    }

    fn push(&self, list: &mut dyn Any, item: Option<Value>) -> Result<(), Value> {
        let Some(slots) = list.downcast_mut::<Vec<Option<E>>>() else {
            return item.map_or(Ok(()), Err);
        };
        match item {
            None => slots.push(None),
            Some(item) => slots.push(Some(*item.downcast::<E>()?)),
        }
        Ok(())
    }

    fn item_mut<'a>(&self, list: &'a mut dyn Any, index: usize) -> Option<&'a mut dyn Any> {
        let slots = list.downcast_mut::<Vec<Option<E>>>()?;
        slots.get_mut(index)?.as_mut().map(|v| v as &mut dyn Any)
    }

    fn place(&self, list: &mut dyn Any, index: usize, item: Value) -> Result<(), Value> {
        let Some(slot) = list
            .downcast_mut::<Vec<Option<E>>>()
            .and_then(|slots| slots.get_mut(index))
        else {
            return Err(item);
        };
        *slot = Some(*item.downcast::<E>()?);
        Ok(())
    }
}

/// Describes a list type and its element type.
pub struct ListDesc {
    item: TypeKey,
    slots: bool,
    access: Box<dyn ListAccess>,
}

impl ListDesc {
    pub fn item(&self) -> TypeKey {
        self.item
    }

    /// Slot lists keep a position for every item node.
    pub fn keeps_slots(&self) -> bool {
        self.slots
    }

    pub(crate) fn access(&self) -> &dyn ListAccess {
        self.access.as_ref()
    }
}

/// Registration for a list type.
pub struct ListType {
    name: String,
    key: TypeKey,
    desc: ListDesc,
}

impl ListType {
    /// `Vec<E>`.
    pub fn dense<E: 'static>() -> Self {
        Self {
            name: format!("List<{}>", std::any::type_name::<E>()),
            key: TypeKey::of::<Vec<E>>(),
            desc: ListDesc {
                item: TypeKey::of::<E>(),
                slots: false,
                access: Box::new(Dense::<E>(std::marker::PhantomData)),
            },
        }
    }

    /// `Vec<Option<E>>`.
    pub fn slots<E: 'static>() -> Self {
        Self {
            name: format!("SlotList<{}>", std::any::type_name::<E>()),
            key: TypeKey::of::<Vec<Option<E>>>(),
            desc: ListDesc {
                item: TypeKey::of::<E>(),
                slots: true,
                access: Box::new(Slots::<E>(std::marker::PhantomData)),
            },
        }
    }
}

// ===========================================================================
// Enums
// ===========================================================================

pub(crate) trait EnumVariants {
    fn parse(&self, name: &str) -> Option<Value>;
    fn names(&self) -> Vec<&str>;
}

struct Variants<E> {
    variants: Vec<(String, E)>,
}

impl<E: Clone + 'static> EnumVariants for Variants<E> {
    fn parse(&self, name: &str) -> Option<Value> {
        self.variants
            .iter()
            .find(|(variant, _)| variant == name)
            .map(|(_, value)| Box::new(value.clone()) as Value)
    }

    fn names(&self) -> Vec<&str> {
        self.variants.iter().map(|(name, _)| name.as_str()).collect()
    }
}

/// Registration for an enumeration parsed by exact variant name.
pub struct Enum<E> {
    name: String,
    variants: Vec<(String, E)>,
}

impl<E: Clone + 'static> Enum<E> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variants: Vec::new(),
        }
    }

    pub fn variant(mut self, name: impl Into<String>, value: E) -> Self {
        self.variants.push((name.into(), value));
        self
    }
}

pub struct EnumDesc {
    variants: Box<dyn EnumVariants>,
}

impl EnumDesc {
    pub(crate) fn parse(&self, name: &str) -> Option<Value> {
        self.variants.parse(name)
    }

    pub fn variant_names(&self) -> Vec<&str> {
        self.variants.names()
    }
}

// ===========================================================================
// Composites
// ===========================================================================

/// Type-erased lifecycle of a composite type `T`.
pub(crate) trait CompositeOps {
    fn construct(&self) -> Value;
    fn on_constructed(&self, value: &mut Value, node: &Node);
    fn is_referenceable(&self) -> bool;
    /// `T` into `Handle<T>`. Anything else passes through.
    fn share(&self, value: Value) -> Value;
    /// ID of a shared `Handle<T>` value.
    fn reference_id(&self, value: &Value) -> Option<String>;
    fn reference_entry(&self, value: &Value) -> Option<Rc<dyn ReferenceValue>>;
    /// Type-erased view of a shared `Handle<T>` value.
    fn anchor_of(&self, value: &Value) -> Option<Anchor>;
}

struct CompositeVTable<T> {
    on_constructed: Option<fn(&mut T, &Node)>,
    reference_id: Option<fn(&T) -> Option<String>>,
}

impl<T: Default + 'static> CompositeOps for CompositeVTable<T> {
    fn construct(&self) -> Value {
        Box::new(T::default())
    }

    fn on_constructed(&self, value: &mut Value, node: &Node) {
        let Some(hook) = self.on_constructed else { return };
        if let Some(instance) = value.downcast_mut::<T>() {
            hook(instance, node);
        } else if let Some(handle) = value.downcast_ref::<Handle<T>>() {
            hook(&mut handle.borrow_mut(), node);
        }
    }

    fn is_referenceable(&self) -> bool {
        self.reference_id.is_some()
    }

    fn share(&self, value: Value) -> Value {
        match value.downcast::<T>() {
            Ok(instance) => Box::new(Handle::new(*instance)),
            Err(value) => value,
        }
    }

    fn reference_id(&self, value: &Value) -> Option<String> {
        let id_of = self.reference_id?;
        let handle = value.downcast_ref::<Handle<T>>()?;
        id_of(&handle.borrow())
    }

    fn reference_entry(&self, value: &Value) -> Option<Rc<dyn ReferenceValue>> {
        let handle = value.downcast_ref::<Handle<T>>()?.clone();
        let entry: Rc<dyn ReferenceValue> = Rc::new(handle);
        Some(entry)
    }

    fn anchor_of(&self, value: &Value) -> Option<Anchor> {
        let handle = value.downcast_ref::<Handle<T>>()?;
        let anchor: Anchor = handle.as_rc().clone();
        Some(anchor)
    }
}

pub struct CompositeDesc {
    fields: HashMap<String, Rc<FieldDesc>>,
    handle_key: TypeKey,
    ops: Box<dyn CompositeOps>,
}

impl CompositeDesc {
    pub fn field(&self, name: &str) -> Option<&Rc<FieldDesc>> {
        self.fields.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Key of `Handle<T>` for this composite.
    pub fn handle_key(&self) -> TypeKey {
        self.handle_key
    }

    pub fn is_referenceable(&self) -> bool {
        self.ops.is_referenceable()
    }

    pub(crate) fn ops(&self) -> &dyn CompositeOps {
        self.ops.as_ref()
    }
}

/// Typed registration for a composite type `T`.
///
/// ```ignore
/// types.register(
///     Composite::<Recipe>::new("Recipe")
///         .field("Duration", |r| &mut r.duration)
///         .list("Inputs", |r| &mut r.inputs)
///         .optional("Output", |r| &mut r.output),
/// );
/// ```
pub struct Composite<T> {
    name: String,
    fields: Vec<FieldDesc>,
    lists: Vec<ListType>,
    on_constructed: Option<fn(&mut T, &Node)>,
    reference_id: Option<fn(&T) -> Option<String>>,
    custom_parse: Option<fn(&Node) -> Option<T>>,
}

impl<T: Default + 'static> Composite<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            lists: Vec::new(),
            on_constructed: None,
            reference_id: None,
            custom_parse: None,
        }
    }

    fn push_field(&mut self, name: &str, ty: TypeKey, access: Box<dyn FieldAccess>) {
        self.fields.retain(|f| f.name != name);
        self.fields.push(FieldDesc {
            name: name.to_string(),
            owner: TypeKey::of::<T>(),
            ty,
            access,
        });
    }

    /// A field built as an `F`.
    pub fn field<F: 'static>(mut self, name: &str, access: fn(&mut T) -> &mut F) -> Self {
        self.push_field(name, TypeKey::of::<F>(), Box::new(Plain { access }));
        self
    }

    /// A nullable field. The builder produces the inner `F`.
    pub fn optional<F: 'static>(mut self, name: &str, access: fn(&mut T) -> &mut Option<F>) -> Self {
        self.push_field(name, TypeKey::of::<F>(), Box::new(Optional { access }));
        self
    }

    /// A `Vec<E>` field. Items that fail to build are dropped.
    pub fn list<E: 'static>(mut self, name: &str, access: fn(&mut T) -> &mut Vec<E>) -> Self {
        self.push_field(name, TypeKey::of::<Vec<E>>(), Box::new(Plain { access }));
        self.lists.push(ListType::dense::<E>());
        self
    }

    /// A `Vec<Option<E>>` field. Every item node keeps its position.
    pub fn slot_list<E: 'static>(
        mut self,
        name: &str,
        access: fn(&mut T) -> &mut Vec<Option<E>>,
    ) -> Self {
        self.push_field(name, TypeKey::of::<Vec<Option<E>>>(), Box::new(Plain { access }));
        self.lists.push(ListType::slots::<E>());
        self
    }

    /// Marks the type reference-capable through its [`Referenceable`] impl.
    pub fn referenceable(self) -> Self
    where
        T: Referenceable,
    {
        self.reference_id_with(|value: &T| value.reference_id().map(str::to_owned))
    }

    /// Marks the type reference-capable with an explicit ID accessor.
    pub fn reference_id_with(mut self, id_of: fn(&T) -> Option<String>) -> Self {
        self.reference_id = Some(id_of);
        self
    }

    /// Runs the type's [`OnConstructed`] impl after its fields are set.
    pub fn with_on_constructed(self) -> Self
    where
        T: OnConstructed,
    {
        self.on_constructed_with(|value: &mut T, node: &Node| value.on_constructed(node))
    }

    pub fn on_constructed_with(mut self, hook: fn(&mut T, &Node)) -> Self {
        self.on_constructed = Some(hook);
        self
    }

    /// Replaces field-by-field construction. Returning `None` falls back to
    /// the default walk.
    pub fn custom_parse(mut self, parse: fn(&Node) -> Option<T>) -> Self {
        self.custom_parse = Some(parse);
        self
    }
}

// ===========================================================================
// Abstract targets
// ===========================================================================

/// Registration for a type that is only ever filled with a concrete type
/// named by a `Class` attribute, e.g. `Handle<dyn Trait>` or
/// `Box<dyn Trait>`.
pub struct AbstractType {
    name: String,
    key: TypeKey,
    referenceable: bool,
}

impl AbstractType {
    pub fn of<K: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: TypeKey::of::<K>(),
            referenceable: false,
        }
    }

    /// Fields of this type are references to shared objects.
    pub fn referenceable(mut self) -> Self {
        self.referenceable = true;
        self
    }
}

// ===========================================================================
// TypeDesc
// ===========================================================================

pub enum TypeKind {
    Composite(CompositeDesc),
    List(ListDesc),
    Enum(EnumDesc),
    Abstract { referenceable: bool },
}

/// A registered type.
pub struct TypeDesc {
    name: String,
    key: TypeKey,
    kind: TypeKind,
}

impl TypeDesc {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    pub fn as_composite(&self) -> Option<&CompositeDesc> {
        match &self.kind {
            TypeKind::Composite(composite) => Some(composite),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListDesc> {
        match &self.kind {
            TypeKind::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumDesc> {
        match &self.kind {
            TypeKind::Enum(variants) => Some(variants),
            _ => None,
        }
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self.kind, TypeKind::Abstract { .. })
    }

    pub fn is_referenceable(&self) -> bool {
        match &self.kind {
            TypeKind::Composite(composite) => composite.is_referenceable(),
            TypeKind::Abstract { referenceable } => *referenceable,
            _ => false,
        }
    }
}

impl fmt::Debug for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            TypeKind::Composite(_) => "composite",
            TypeKind::List(_) => "list",
            TypeKind::Enum(_) => "enum",
            TypeKind::Abstract { .. } => "abstract",
        };
        f.debug_struct("TypeDesc")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("kind", &kind)
            .finish()
    }
}

// ===========================================================================
// Registration
// ===========================================================================

/// Anything that can be added to a [`TypeRegistry`].
pub trait Register {
    fn register_into(self, types: &mut TypeRegistry);
}

impl<T: Default + 'static> Register for Composite<T> {
    fn register_into(self, types: &mut TypeRegistry) {
        for list in self.lists {
            if !types.contains(list.key) {
                list.register_into(types);
            }
        }
        if let Some(parse) = self.custom_parse {
            types.register_custom_parser::<T>(parse);
        }
        let referenceable = self.reference_id.is_some();
        let handle_key = TypeKey::of::<Handle<T>>();
        let fields = self
            .fields
            .into_iter()
            .map(|field| (field.name.clone(), Rc::new(field)))
            .collect();
        let desc = TypeDesc {
            name: self.name,
            key: TypeKey::of::<T>(),
            kind: TypeKind::Composite(CompositeDesc {
                fields,
                handle_key,
                ops: Box::new(CompositeVTable::<T> {
                    on_constructed: self.on_constructed,
                    reference_id: self.reference_id,
                }),
            }),
        };
        types.insert(desc, Some(handle_key));
        if referenceable {
            types.shared.insert(handle_key.id());
        }
    }
}

impl Register for ListType {
    fn register_into(self, types: &mut TypeRegistry) {
        types.insert(
            TypeDesc {
                name: self.name,
                key: self.key,
                kind: TypeKind::List(self.desc),
            },
            None,
        );
    }
}

impl<E: Clone + 'static> Register for Enum<E> {
    fn register_into(self, types: &mut TypeRegistry) {
        types.insert(
            TypeDesc {
                name: self.name,
                key: TypeKey::of::<E>(),
                kind: TypeKind::Enum(EnumDesc {
                    variants: Box::new(Variants {
                        variants: self.variants,
                    }),
                }),
            },
            None,
        );
    }
}

impl Register for AbstractType {
    fn register_into(self, types: &mut TypeRegistry) {
        if self.referenceable {
            types.shared.insert(self.key.id());
        }
        types.insert(
            TypeDesc {
                name: self.name,
                key: self.key,
                kind: TypeKind::Abstract {
                    referenceable: self.referenceable,
                },
            },
            None,
        );
    }
}

type CustomParser = Rc<dyn Fn(&Node) -> Option<Value>>;
type Upcast = Box<dyn Fn(Value) -> Result<Value, Value>>;
type NameResolver = Box<dyn Fn(&str) -> Option<TypeKey>>;

// ===========================================================================
// TypeRegistry
// ===========================================================================

/// Every type the builder knows how to produce, plus the name table used
/// to resolve `Class` attributes and type-name values.
#[derive(Default)]
pub struct TypeRegistry {
    descs: Vec<TypeDesc>,
    by_key: HashMap<TypeId, usize>,
    /// Keys whose fields are references: `Handle<T>` of reference-capable
    /// composites and reference-capable abstract targets.
    shared: HashSet<TypeId>,
    names: HashMap<String, TypeKey>,
    ambiguous: HashSet<String>,
    custom: HashMap<TypeId, CustomParser>,
    upcasts: HashMap<(TypeId, TypeId), Upcast>,
    resolver: Option<NameResolver>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, registration: impl Register) -> &mut Self {
        registration.register_into(self);
        self
    }

    fn insert(&mut self, desc: TypeDesc, alias: Option<TypeKey>) {
        let key = desc.key;
        let name = desc.name.clone();
        let index = match self.by_key.get(&key.id()) {
            Some(&index) => {
                self.descs[index] = desc;
                index
            }
            None => {
                self.descs.push(desc);
                self.descs.len() - 1
            }
        };
        self.by_key.insert(key.id(), index);
        if let Some(alias) = alias {
            self.by_key.insert(alias.id(), index);
        }
        self.names.insert(key.rust_name().to_string(), key);
        self.register_name_for(name, key);
    }

    /// Makes `name` resolve to `T`, e.g. to let `Class="i32"` pick a scalar.
    pub fn register_name<T: ?Sized + 'static>(&mut self, name: impl Into<String>) -> &mut Self {
        self.register_name_for(name.into(), TypeKey::of::<T>());
        self
    }

    fn register_name_for(&mut self, name: String, key: TypeKey) {
        if self.ambiguous.contains(&name) {
            return;
        }
        match self.names.get(&name) {
            Some(existing) if *existing != key => {
                warn!(
                    name = %name,
                    first = existing.rust_name(),
                    second = key.rust_name(),
                    "ambiguous type name; only full paths resolve it"
                );
                self.names.remove(&name);
                self.ambiguous.insert(name);
            }
            _ => {
                self.names.insert(name, key);
            }
        }
    }

    /// Installs a host lookup consulted before the registered names.
    pub fn set_name_resolver(&mut self, resolver: impl Fn(&str) -> Option<TypeKey> + 'static) {
        self.resolver = Some(Box::new(resolver));
    }

    /// Resolves a type name: host resolver first, then registered short
    /// names, then full Rust paths.
    pub fn resolve_name(&self, name: &str) -> Option<TypeKey> {
        if let Some(key) = self.resolver.as_ref().and_then(|resolve| resolve(name)) {
            return Some(key);
        }
        self.names.get(name).copied()
    }

    pub fn is_ambiguous(&self, name: &str) -> bool {
        self.ambiguous.contains(name)
    }

    pub fn contains(&self, key: TypeKey) -> bool {
        self.by_key.contains_key(&key.id())
    }

    /// The descriptor for `key`. `Handle<T>` of a registered composite
    /// resolves to `T`'s descriptor.
    pub fn get(&self, key: TypeKey) -> Option<&TypeDesc> {
        self.get_by_id(key.id())
    }

    pub fn get_by_id(&self, id: TypeId) -> Option<&TypeDesc> {
        self.by_key.get(&id).map(|&index| &self.descs[index])
    }

    /// True when fields of this type hold references to shared objects.
    pub fn is_shared(&self, key: TypeKey) -> bool {
        self.shared.contains(&key.id())
    }

    /// Registered name for `key`, or its Rust path.
    pub fn display_name(&self, key: TypeKey) -> String {
        self.get(key)
            .map_or_else(|| key.rust_name().to_string(), |desc| desc.name.clone())
    }

    pub fn len(&self) -> usize {
        self.descs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeDesc> {
        self.descs.iter()
    }

    // -----------------------------------------------------------------------
    // Custom parsers
    // -----------------------------------------------------------------------

    /// Replaces the default construction of `T` for every node that
    /// produces one.
    pub fn register_custom_parser<T: 'static>(&mut self, parse: fn(&Node) -> Option<T>) -> &mut Self {
        let parser: CustomParser =
            Rc::new(move |node: &Node| parse(node).map(|value| Box::new(value) as Value));
        self.custom.insert(TypeId::of::<T>(), parser);
        self
    }

    pub(crate) fn custom_parser(&self, key: TypeKey) -> Option<CustomParser> {
        self.custom.get(&key.id()).cloned()
    }

    // -----------------------------------------------------------------------
    // Upcasts
    // -----------------------------------------------------------------------

    /// Lets a `V` fill a slot declared as `U`, e.g. `Handle<Sword>` into
    /// `Handle<dyn Item>`.
    pub fn register_upcast<V: 'static, U: 'static>(&mut self, cast: fn(V) -> U) -> &mut Self {
        let upcast: Upcast = Box::new(move |value: Value| {
            let value = value.downcast::<V>()?;
            Ok(Box::new(cast(*value)) as Value)
        });
        self.upcasts
            .insert((TypeId::of::<V>(), TypeId::of::<U>()), upcast);
        self
    }

    /// True when a value of type `from` can fill a `to` slot.
    pub fn is_assignable(&self, from: TypeId, to: TypeKey) -> bool {
        from == to.id() || self.upcasts.contains_key(&(from, to.id()))
    }

    /// Converts `value` to `to`, handing it back when no conversion exists.
    pub fn coerce(&self, value: Value, to: TypeKey) -> Result<Value, Value> {
        let from = value_type_id(&value);
        if from == to.id() {
            return Ok(value);
        }
        match self.upcasts.get(&(from, to.id())) {
            Some(upcast) => upcast(value),
            None => Err(value),
        }
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.descs)
            .field("upcasts", &self.upcasts.len())
            .finish_non_exhaustive()
    }
}
