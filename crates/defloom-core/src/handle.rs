//! Shared object handles.
//!
//! Reference-capable objects are built straight into a [`Handle`] so every
//! field that points at them shares one allocation. Root objects are handed
//! back to the caller as [`Object`]s wrapping the handle of their concrete
//! type.

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::types::{TypeKey, Value};

/// A type-erased mutable view of a shared object. Reference requests keep
/// one of these so they can patch the object after it has been moved into
/// its owner.
pub type Anchor = Rc<RefCell<dyn Any>>;

/// Shared, identity-comparable pointer to a built object.
pub struct Handle<T: ?Sized>(Rc<RefCell<T>>);

impl<T> Handle<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }
}

impl<T: ?Sized> Handle<T> {
    pub fn from_rc(rc: Rc<RefCell<T>>) -> Self {
        Self(rc)
    }

    pub fn into_rc(self) -> Rc<RefCell<T>> {
        self.0
    }

    pub fn as_rc(&self) -> &Rc<RefCell<T>> {
        &self.0
    }

    /// Panics if the object is currently mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    /// Panics if the object is currently borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }

    /// True when both handles point at the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: ?Sized> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

// Handles may form cycles, so Debug never walks into the pointee.
impl<T: ?Sized> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&Rc::as_ptr(&self.0)).finish()
    }
}

// ===========================================================================
// Object
// ===========================================================================

/// A root-level object produced by the builder.
///
/// Composite roots hold the `Handle<T>` of the concrete type `T` that was
/// built, whether or not `T` is reference-capable. Lists and scalars built
/// at the top level hold the plain value.
pub struct Object {
    key: TypeKey,
    type_name: String,
    value: Value,
}

impl Object {
    pub(crate) fn new(key: TypeKey, type_name: String, value: Value) -> Self {
        Self {
            key,
            type_name,
            value,
        }
    }

    /// Key of the concrete type that was built.
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// Registered name of the concrete type.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.value.is::<Handle<T>>()
    }

    /// The shared handle, when the object was built as a `T`.
    pub fn downcast<T: 'static>(&self) -> Option<Handle<T>> {
        self.value.downcast_ref::<Handle<T>>().cloned()
    }

    /// The plain value, for roots that are not composites.
    pub fn downcast_value<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn value(&self) -> &dyn Any {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}
