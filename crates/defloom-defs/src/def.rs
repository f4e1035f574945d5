//! The `Def` contract shared by every data record.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use defloom_core::document::{Node, attr};
use defloom_core::{Composite, Handle, Object, ReferenceRequest, ReferenceResolver, TypeKey};

use crate::config_errors::ConfigErrors;

// ===========================================================================
// DefBase
// ===========================================================================

/// Fields every def carries.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DefBase {
    /// Unique ID, taken from the node name.
    pub id: String,
    /// Direct parent as written in the document. The parent may be abstract
    /// and therefore absent from the database.
    pub parent_name: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
}

impl DefBase {
    pub fn on_constructed(&mut self, node: &Node) {
        self.id = node.name().to_string();
        self.parent_name = node.attr(attr::PARENT_NAME).map(str::to_owned);
    }
}

// ===========================================================================
// Def
// ===========================================================================

/// A data container loaded from a document. Defs hold data, not behavior.
///
/// Hooks run in this order:
///
/// 1. [`Def::on_constructed`] once the fields are set, before any
///    reference is resolved.
/// 2. [`Def::pre_resolve_references`] before the database is populated.
///    Add manual reference requests here.
/// 3. [`Def::config_errors`] after references are resolved and the
///    database is populated.
/// 4. [`Def::post_load`] last.
pub trait Def: Any {
    fn base(&self) -> &DefBase;

    fn base_mut(&mut self) -> &mut DefBase;

    fn id(&self) -> &str {
        &self.base().id
    }

    fn label(&self) -> Option<&str> {
        self.base().label.as_deref()
    }

    fn description(&self) -> Option<&str> {
        self.base().description.as_deref()
    }

    /// Overrides must keep calling [`DefBase::on_constructed`].
    fn on_constructed(&mut self, node: &Node) {
        self.base_mut().on_constructed(node);
    }

    fn pre_resolve_references(&mut self, _refs: &mut PreResolve<'_>) {}

    fn config_errors(&self, _report: &mut ConfigErrors) {}

    fn post_load(&mut self) {}
}

/// Starts a def type registration with the shared `Label` and
/// `Description` fields, the ID accessor and the construction hook.
pub fn def_type<T: Def + Default>(name: impl Into<String>) -> Composite<T> {
    Composite::<T>::new(name)
        .optional("Label", |def| &mut def.base_mut().label)
        .optional("Description", |def| &mut def.base_mut().description)
        .reference_id_with(|def| (!def.id().is_empty()).then(|| def.id().to_string()))
        .on_constructed_with(|def, node| Def::on_constructed(def, node))
}

pub fn as_def<T: Def>(handle: Handle<T>) -> Handle<dyn Def> {
    let rc: Rc<std::cell::RefCell<dyn Def>> = handle.into_rc();
    Handle::from_rc(rc)
}

// ===========================================================================
// DefHandle
// ===========================================================================

/// A loaded def: the shared object seen through [`Def`] plus its concrete
/// handle.
#[derive(Clone)]
pub struct DefHandle {
    id: String,
    def: Handle<dyn Def>,
    typed: Rc<dyn Any>,
    key: TypeKey,
}

pub(crate) type Caster = fn(&Object) -> Option<DefHandle>;

impl DefHandle {
    pub fn new<T: Def>(handle: Handle<T>) -> Self {
        let typed: Rc<dyn Any> = Rc::new(handle.clone());
        let id = handle.borrow().id().to_string();
        Self {
            id,
            def: as_def(handle),
            typed,
            key: TypeKey::of::<T>(),
        }
    }

    pub(crate) fn cast<T: Def>(object: &Object) -> Option<DefHandle> {
        object.downcast::<T>().map(DefHandle::new)
    }

    /// The ID the def had when the handle was made. Readable while the
    /// def itself is borrowed.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn def(&self) -> &Handle<dyn Def> {
        &self.def
    }

    /// Key of the concrete def type.
    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn is<T: Def>(&self) -> bool {
        self.key.is::<T>()
    }

    pub fn downcast<T: Def>(&self) -> Option<Handle<T>> {
        self.typed.downcast_ref::<Handle<T>>().cloned()
    }

    pub fn ptr_eq(&self, other: &DefHandle) -> bool {
        self.def.ptr_eq(&other.def)
    }
}

impl fmt::Display for DefHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let type_name = self.key.rust_name().rsplit("::").next().unwrap_or_default();
        let label = self
            .def
            .as_rc()
            .try_borrow()
            .ok()
            .and_then(|def| def.label().map(str::to_owned));
        match label {
            Some(label) => write!(f, "[{type_name}] {} '{label}'", self.id),
            None => write!(f, "[{type_name}] {}", self.id),
        }
    }
}

impl fmt::Debug for DefHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DefHandle").field(&self.to_string()).finish()
    }
}

// ===========================================================================
// PreResolve
// ===========================================================================

/// What a def sees during [`Def::pre_resolve_references`].
pub struct PreResolve<'a> {
    this: &'a DefHandle,
    resolver: &'a mut ReferenceResolver,
}

impl<'a> PreResolve<'a> {
    pub(crate) fn new(this: &'a DefHandle, resolver: &'a mut ReferenceResolver) -> Self {
        Self { this, resolver }
    }

    /// The def being prepared. It is mutably borrowed for the duration of
    /// the hook; clone it into callbacks instead of borrowing it here.
    pub fn this(&self) -> &DefHandle {
        self.this
    }

    /// Asks for `id` once every def is built. `deliver` runs during
    /// resolution if the object is a `T`.
    pub fn request<T: 'static>(&mut self, id: impl Into<String>, deliver: impl FnOnce(T) + 'static) {
        self.resolver.add_request(ReferenceRequest::callback(id, deliver));
    }

    pub fn resolver(&mut self) -> &mut ReferenceResolver {
        self.resolver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Probe {
        base: DefBase,
    }

    impl Def for Probe {
        fn base(&self) -> &DefBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut DefBase {
            &mut self.base
        }
    }

    #[test]
    fn base_takes_id_and_parent_from_node() {
        let node = Node::new("IronOre").with_attr("ParentName", "OreBase");
        let mut probe = Probe::default();
        Def::on_constructed(&mut probe, &node);
        assert_eq!(probe.id(), "IronOre");
        assert_eq!(probe.base.parent_name.as_deref(), Some("OreBase"));
    }

    #[test]
    fn handle_keeps_both_views() {
        let mut probe = Probe::default();
        probe.base.id = "probe".into();
        probe.base.label = Some("A probe".into());
        let handle = DefHandle::new(Handle::new(probe));

        assert!(handle.is::<Probe>());
        assert_eq!(handle.id(), "probe");
        assert_eq!(handle.to_string(), "[Probe] probe 'A probe'");

        let typed = handle.downcast::<Probe>().unwrap();
        typed.borrow_mut().base.label = None;
        assert_eq!(handle.to_string(), "[Probe] probe");
    }

    #[test]
    fn handle_is_readable_while_the_def_is_borrowed() {
        let mut probe = Probe::default();
        probe.base.id = "busy".into();
        probe.base.label = Some("Busy".into());
        let handle = DefHandle::new(Handle::new(probe));

        let _guard = handle.def().borrow_mut();
        assert_eq!(handle.id(), "busy");
        assert_eq!(handle.to_string(), "[Probe] busy");
        assert_eq!(format!("{handle:?}"), "DefHandle(\"[Probe] busy\")");
    }
}
