//! Deferred reference resolution.
//!
//! While building, every reference-capable object with an ID is entered in
//! a [`ReferenceMap`] and every textual reference becomes a
//! [`ReferenceRequest`] aimed at the slot that should receive the object.
//! Nothing is patched until [`ReferenceResolver::resolve`] runs, so forward
//! references and cycles between objects both work.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::diagnostic::{DiagnosticKind, Diagnostics};
use crate::handle::Anchor;
use crate::types::{FieldDesc, TypeKey, TypeRegistry, Value, value_type_id};

// ===========================================================================
// ReferenceMap
// ===========================================================================

/// A value that can be handed out to any number of referencing slots.
pub trait ReferenceValue: Any {
    fn as_any(&self) -> &dyn Any;
    fn clone_value(&self) -> Value;
}

impl<T: Clone + 'static> ReferenceValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_value(&self) -> Value {
        Box::new(self.clone())
    }
}

/// Map from reference ID to the shared object it names.
///
/// Entries added with [`ReferenceMap::inject_for`] live in a separate
/// keyspace per type. A request expecting that type sees them before any
/// object registered under the same ID.
#[derive(Default)]
pub struct ReferenceMap {
    entries: HashMap<String, Rc<dyn ReferenceValue>>,
    typed: HashMap<TypeId, HashMap<String, Rc<dyn ReferenceValue>>>,
}

impl ReferenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry unless the ID is taken. Returns false on a duplicate.
    pub(crate) fn register(&mut self, id: String, value: Rc<dyn ReferenceValue>) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, value);
        true
    }

    /// Adds or replaces an entry. Usually a `Handle<T>` or an externally
    /// loaded asset.
    pub fn inject<T: Clone + 'static>(&mut self, id: impl Into<String>, value: T) -> bool {
        self.entries.insert(id.into(), Rc::new(value)).is_some()
    }

    /// Like [`ReferenceMap::inject`] for a value whose type is only known
    /// at runtime, e.g. one handed out by an asset catalog.
    pub fn inject_shared(&mut self, id: impl Into<String>, value: Rc<dyn ReferenceValue>) -> bool {
        self.entries.insert(id.into(), value).is_some()
    }

    /// Adds or replaces an entry visible only to requests expecting `ty`,
    /// e.g. an asset that shares its name with a registered object.
    pub fn inject_for(
        &mut self,
        id: impl Into<String>,
        ty: TypeKey,
        value: Rc<dyn ReferenceValue>,
    ) -> bool {
        self.typed
            .entry(ty.id())
            .or_default()
            .insert(id.into(), value)
            .is_some()
    }

    /// A clone of the entry, when it is a `T`. Entries injected for `T`
    /// come first.
    pub fn get<T: Clone + 'static>(&self, id: &str) -> Option<T> {
        self.entry_for(id, TypeId::of::<T>())
            .and_then(|entry| (**entry).as_any().downcast_ref::<T>())
            .cloned()
    }

    /// True when an object is registered or injected under `id`, ignoring
    /// per-type entries.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// True when a per-type entry for `ty` exists under `id`.
    pub fn contains_for(&self, id: &str, ty: TypeKey) -> bool {
        self.typed
            .get(&ty.id())
            .is_some_and(|entries| entries.contains_key(id))
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_for(&self, id: &str, ty: TypeId) -> Option<&Rc<dyn ReferenceValue>> {
        self.typed
            .get(&ty)
            .and_then(|entries| entries.get(id))
            .or_else(|| self.entries.get(id))
    }
}

impl fmt::Debug for ReferenceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceMap")
            .field("ids", &self.entries.keys().collect::<Vec<_>>())
            .field("typed", &self.typed.values().map(HashMap::len).sum::<usize>())
            .finish()
    }
}

// ===========================================================================
// Requests
// ===========================================================================

/// One hop from an anchored object down to the slot a reference fills.
#[derive(Clone)]
pub(crate) enum Step {
    Field(Rc<FieldDesc>),
    /// `index` counts every item node of the list, including ones whose
    /// value is still pending.
    Item { list: TypeKey, index: usize },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Field(field) => f.write_str(field.name()),
            Step::Item { index, .. } => write!(f, "{index}"),
        }
    }
}

pub(crate) fn render_path(path: &[Step]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("/")
}

enum Target {
    Slot { anchor: Anchor, path: Vec<Step> },
    Callback(Box<dyn FnOnce(Value)>),
}

/// A pending request to fill a slot with the object named by `id`.
pub struct ReferenceRequest {
    id: String,
    expected: TypeKey,
    target: Target,
    node: Option<String>,
}

impl ReferenceRequest {
    pub(crate) fn at_slot(
        id: String,
        expected: TypeKey,
        anchor: Anchor,
        path: Vec<Step>,
        node: Option<String>,
    ) -> Self {
        Self {
            id,
            expected,
            target: Target::Slot { anchor, path },
            node,
        }
    }

    /// A request delivered to a callback instead of a field, e.g. to wire
    /// objects together after loading.
    pub fn callback<T: 'static>(id: impl Into<String>, deliver: impl FnOnce(T) + 'static) -> Self {
        let deliver = move |value: Value| {
            if let Ok(value) = value.downcast::<T>() {
                deliver(*value);
            }
        };
        Self {
            id: id.into(),
            expected: TypeKey::of::<T>(),
            target: Target::Callback(Box::new(deliver)),
            node: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn expected(&self) -> TypeKey {
        self.expected
    }

    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }
}

impl fmt::Debug for ReferenceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match &self.target {
            Target::Slot { path, .. } => render_path(path),
            Target::Callback(_) => "<callback>".to_string(),
        };
        f.debug_struct("ReferenceRequest")
            .field("id", &self.id)
            .field("expected", &self.expected)
            .field("target", &target)
            .finish()
    }
}

// ===========================================================================
// Resolver
// ===========================================================================

/// Outcome of one resolution pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResolutionReport {
    pub resolved: usize,
    /// IDs that were not in the map.
    pub missing: Vec<String>,
    /// IDs whose object could not fill the requesting slot.
    pub mismatched: Vec<String>,
}

impl ResolutionReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty()
    }
}

enum Failure {
    Missing,
    Mismatch(String),
    Unreachable,
}

/// Key of one dense list: the anchored object plus the path to the list.
type ListKey = (usize, String);

/// Holds the reference map and the requests recorded against it.
#[derive(Default)]
pub struct ReferenceResolver {
    map: ReferenceMap,
    requests: Vec<ReferenceRequest>,
}

impl ReferenceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&self) -> &ReferenceMap {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut ReferenceMap {
        &mut self.map
    }

    pub fn into_map(self) -> ReferenceMap {
        self.map
    }

    /// Adds or replaces an entry, overriding anything the builder found.
    pub fn inject<T: Clone + 'static>(&mut self, id: impl Into<String>, value: T) {
        self.map.inject(id, value);
    }

    pub fn add_request(&mut self, request: ReferenceRequest) {
        self.requests.push(request);
    }

    pub fn pending_count(&self) -> usize {
        self.requests.len()
    }

    /// IDs still waiting for resolution, with the type each slot expects.
    pub fn pending(&self) -> impl Iterator<Item = (&str, TypeKey)> {
        self.requests.iter().map(|r| (r.id.as_str(), r.expected))
    }

    /// Enters a built object under `id`. Duplicates keep the first entry.
    pub(crate) fn register(
        &mut self,
        id: String,
        value: Rc<dyn ReferenceValue>,
        diagnostics: &mut Diagnostics,
        node: Option<&str>,
    ) {
        if !self.map.register(id.clone(), value) {
            diagnostics.report(
                DiagnosticKind::DuplicateReferenceId,
                node,
                format!("reference id '{id}' is already taken; keeping the first object"),
            );
        }
    }

    /// Resolves every recorded request once, in the order recorded.
    /// Failures are reported and their slots left at their defaults.
    pub fn resolve(&mut self, types: &TypeRegistry, diagnostics: &mut Diagnostics) -> ResolutionReport {
        let mut report = ResolutionReport::default();
        let mut failed_in_list: HashMap<ListKey, usize> = HashMap::new();
        let requests = std::mem::take(&mut self.requests);
        debug!(requests = requests.len(), entries = self.map.len(), "resolving references");

        for request in requests {
            let ReferenceRequest {
                id,
                expected,
                target,
                node,
            } = request;
            let fetched = self.fetch(&id, expected, types);
            let outcome = match target {
                Target::Callback(deliver) => match fetched {
                    Err(Failure::Mismatch(found)) => {
                        debug!(id = %id, found = %found, "callback request dropped");
                        continue;
                    }
                    fetched => fetched.map(deliver),
                },
                Target::Slot { anchor, path } => {
                    let outcome = fetched
                        .and_then(|value| place(types, &anchor, &path, value, &failed_in_list));
                    if outcome.is_err() {
                        if let Some(list) = dense_list_key(types, &anchor, &path) {
                            *failed_in_list.entry(list).or_default() += 1;
                        }
                    }
                    outcome
                }
            };
            match outcome {
                Ok(()) => report.resolved += 1,
                Err(failure) => {
                    let node = node.as_deref();
                    match failure {
                        Failure::Missing => {
                            diagnostics.report(
                                DiagnosticKind::MissingReference,
                                node,
                                format!("no object with reference id '{id}'"),
                            );
                            report.missing.push(id);
                        }
                        Failure::Mismatch(found) => {
                            diagnostics.report(
                                DiagnosticKind::ReferenceTypeMismatch,
                                node,
                                format!(
                                    "'{id}' is a {found}, which cannot fill a {}",
                                    types.display_name(expected)
                                ),
                            );
                            report.mismatched.push(id);
                        }
                        Failure::Unreachable => {
                            diagnostics.report(
                                DiagnosticKind::UnsupportedReference,
                                node,
                                format!("slot for '{id}' no longer exists"),
                            );
                        }
                    }
                }
            }
        }
        report
    }

    fn fetch(&self, id: &str, expected: TypeKey, types: &TypeRegistry) -> Result<Value, Failure> {
        let entry = self.map.entry_for(id, expected.id()).ok_or(Failure::Missing)?;
        let found = (**entry).as_any().type_id();
        if !types.is_assignable(found, expected) {
            let name = types
                .get_by_id(found)
                .map_or_else(|| "value of another type".to_string(), |d| d.name().to_string());
            return Err(Failure::Mismatch(name));
        }
        types
            .coerce((**entry).clone_value(), expected)
            .map_err(|value| Failure::Mismatch(format!("{:?}", value_type_id(&value))))
    }
}

impl fmt::Debug for ReferenceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceResolver")
            .field("map", &self.map)
            .field("pending", &self.requests.len())
            .finish()
    }
}

fn anchor_addr(anchor: &Anchor) -> usize {
    Rc::as_ptr(anchor) as *const () as usize
}

/// The dense list a path ends in, if its last hop is a list item.
fn dense_list_key(types: &TypeRegistry, anchor: &Anchor, path: &[Step]) -> Option<ListKey> {
    let (Step::Item { list, .. }, prefix) = path.split_last()? else {
        return None;
    };
    let desc = types.get(*list)?.as_list()?;
    (!desc.keeps_slots()).then(|| (anchor_addr(anchor), render_path(prefix)))
}

/// Physical position of a logical item index: dense lists never received
/// the items that failed before it.
fn physical_index(
    types: &TypeRegistry,
    anchor: &Anchor,
    prefix: &[Step],
    list: TypeKey,
    index: usize,
    failed_in_list: &HashMap<ListKey, usize>,
) -> Option<usize> {
    let desc = types.get(list)?.as_list()?;
    if desc.keeps_slots() {
        return Some(index);
    }
    let failed = failed_in_list
        .get(&(anchor_addr(anchor), render_path(prefix)))
        .copied()
        .unwrap_or(0);
    Some(index.saturating_sub(failed))
}

fn place(
    types: &TypeRegistry,
    anchor: &Anchor,
    path: &[Step],
    value: Value,
    failed_in_list: &HashMap<ListKey, usize>,
) -> Result<(), Failure> {
    let Some((last, parents)) = path.split_last() else {
        return Err(Failure::Unreachable);
    };
    let mut object = anchor.borrow_mut();
    let mut current: &mut dyn Any = &mut *object;
    for (depth, step) in parents.iter().enumerate() {
        current = match step {
            Step::Field(field) => field.get_mut(current),
            Step::Item { list, index } => {
                let physical =
                    physical_index(types, anchor, &path[..depth], *list, *index, failed_in_list)
                        .ok_or(Failure::Unreachable)?;
                let desc = types
                    .get(*list)
                    .and_then(|d| d.as_list())
                    .ok_or(Failure::Unreachable)?;
                desc.access().item_mut(current, physical)
            }
        }
        .ok_or(Failure::Unreachable)?;
    }

    let placed = match last {
        Step::Field(field) => field.set(current, value),
        Step::Item { list, index } => {
            let physical = physical_index(types, anchor, parents, *list, *index, failed_in_list)
                .ok_or(Failure::Unreachable)?;
            let desc = types
                .get(*list)
                .and_then(|d| d.as_list())
                .ok_or(Failure::Unreachable)?;
            desc.access().place(current, physical, value)
        }
    };
    placed.map_err(|_| Failure::Unreachable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Handle;
    use crate::types::{Composite, Referenceable};
    use std::cell::RefCell;

    #[derive(Debug, Default)]
    struct Node {
        name: String,
        next: Option<Handle<Node>>,
        all: Vec<Handle<Node>>,
    }

    impl Referenceable for Node {
        fn reference_id(&self) -> Option<&str> {
            Some(&self.name)
        }
    }

    fn types() -> TypeRegistry {
        let mut types = TypeRegistry::new();
        types.register(
            Composite::<Node>::new("Node")
                .field("Name", |n| &mut n.name)
                .optional("Next", |n| &mut n.next)
                .list("All", |n| &mut n.all)
                .referenceable(),
        );
        types
    }

    fn named(name: &str) -> Handle<Node> {
        Handle::new(Node {
            name: name.to_string(),
            ..Node::default()
        })
    }

    fn field(types: &TypeRegistry, name: &str) -> Rc<FieldDesc> {
        types
            .get(TypeKey::of::<Node>())
            .and_then(|d| d.as_composite())
            .and_then(|c| c.field(name))
            .cloned()
            .unwrap()
    }

    fn slot_request(id: &str, handle: &Handle<Node>, path: Vec<Step>, expected: TypeKey) -> ReferenceRequest {
        let anchor: Anchor = handle.as_rc().clone();
        ReferenceRequest::at_slot(id.to_string(), expected, anchor, path, None)
    }

    #[test]
    fn resolves_forward_and_self_references() {
        let types = types();
        let a = named("a");
        let b = named("b");
        let mut resolver = ReferenceResolver::new();
        let mut diagnostics = Diagnostics::new();
        let next = TypeKey::of::<Handle<Node>>();

        resolver.add_request(slot_request("b", &a, vec![Step::Field(field(&types, "Next"))], next));
        resolver.add_request(slot_request("b", &b, vec![Step::Field(field(&types, "Next"))], next));
        resolver.register("a".into(), Rc::new(a.clone()), &mut diagnostics, None);
        resolver.register("b".into(), Rc::new(b.clone()), &mut diagnostics, None);

        let report = resolver.resolve(&types, &mut diagnostics);
        assert_eq!(report.resolved, 2);
        assert!(report.is_clean());
        assert!(a.borrow().next.as_ref().unwrap().ptr_eq(&b));
        assert!(b.borrow().next.as_ref().unwrap().ptr_eq(&b));
        assert_eq!(resolver.pending_count(), 0);
    }

    #[test]
    fn duplicate_registration_keeps_first() {
        let mut resolver = ReferenceResolver::new();
        let mut diagnostics = Diagnostics::new();
        let first = named("x");
        resolver.register("x".into(), Rc::new(first.clone()), &mut diagnostics, None);
        resolver.register("x".into(), Rc::new(named("x")), &mut diagnostics, None);
        assert_eq!(diagnostics.count(DiagnosticKind::DuplicateReferenceId), 1);
        assert!(resolver.map().get::<Handle<Node>>("x").unwrap().ptr_eq(&first));

        let injected = named("x");
        resolver.inject("x", injected.clone());
        assert!(resolver.map().get::<Handle<Node>>("x").unwrap().ptr_eq(&injected));
    }

    #[test]
    fn typed_entries_win_for_their_type_only() {
        let types = types();
        let a = named("a");
        let shadow = named("shared");
        let mut resolver = ReferenceResolver::new();
        let mut diagnostics = Diagnostics::new();
        resolver.register("shared".into(), Rc::new(shadow.clone()), &mut diagnostics, None);
        resolver
            .map_mut()
            .inject_for("shared", TypeKey::of::<u32>(), Rc::new(9u32));
        assert!(resolver.map().contains_for("shared", TypeKey::of::<u32>()));
        assert!(!resolver.map().contains_for("shared", TypeKey::of::<u8>()));

        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        resolver.add_request(ReferenceRequest::callback::<u32>("shared", move |v| {
            *sink.borrow_mut() = Some(v);
        }));
        let next = TypeKey::of::<Handle<Node>>();
        resolver.add_request(slot_request("shared", &a, vec![Step::Field(field(&types, "Next"))], next));

        let report = resolver.resolve(&types, &mut diagnostics);
        assert!(report.is_clean());
        assert_eq!(report.resolved, 2);
        assert_eq!(*seen.borrow(), Some(9));
        assert!(a.borrow().next.as_ref().unwrap().ptr_eq(&shadow));
        assert_eq!(resolver.map().get::<u32>("shared"), Some(9));
    }

    #[test]
    fn missing_and_mismatched_are_reported_and_skipped() {
        let types = types();
        let a = named("a");
        let mut resolver = ReferenceResolver::new();
        let mut diagnostics = Diagnostics::new();
        resolver.inject("number", 7u32);
        let next = TypeKey::of::<Handle<Node>>();
        resolver.add_request(slot_request("ghost", &a, vec![Step::Field(field(&types, "Next"))], next));
        resolver.add_request(slot_request("number", &a, vec![Step::Field(field(&types, "Next"))], next));

        let report = resolver.resolve(&types, &mut diagnostics);
        assert_eq!(report.missing, vec!["ghost".to_string()]);
        assert_eq!(report.mismatched, vec!["number".to_string()]);
        assert!(a.borrow().next.is_none());
        assert_eq!(diagnostics.count(DiagnosticKind::MissingReference), 1);
        assert_eq!(diagnostics.count(DiagnosticKind::ReferenceTypeMismatch), 1);
    }

    #[test]
    fn dense_list_items_land_in_document_order_around_failures() {
        let types = types();
        let owner = named("owner");
        let list = TypeKey::of::<Vec<Handle<Node>>>();
        let all = field(&types, "All");
        let item = TypeKey::of::<Handle<Node>>();
        // Logical items: [p (pending), q (built), missing (pending), r (pending)]
        owner.borrow_mut().all.push(named("q"));
        let mut resolver = ReferenceResolver::new();
        let mut diagnostics = Diagnostics::new();
        for (id, index) in [("p", 0), ("missing", 2), ("r", 3)] {
            resolver.add_request(slot_request(
                id,
                &owner,
                vec![Step::Field(all.clone()), Step::Item { list, index }],
                item,
            ));
        }
        resolver.inject("p", named("p"));
        resolver.inject("r", named("r"));

        let report = resolver.resolve(&types, &mut diagnostics);
        assert_eq!(report.resolved, 2);
        let names: Vec<String> = owner.borrow().all.iter().map(|n| n.borrow().name.clone()).collect();
        assert_eq!(names, vec!["p", "q", "r"]);
    }

    #[test]
    fn callback_requests_receive_the_value() {
        let types = types();
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        let mut resolver = ReferenceResolver::new();
        let mut diagnostics = Diagnostics::new();
        resolver.inject("speed", 3.5f64);
        resolver.add_request(ReferenceRequest::callback::<f64>("speed", move |v| {
            *sink.borrow_mut() = Some(v);
        }));
        let pending: Vec<_> = resolver.pending().map(|(id, _)| id.to_string()).collect();
        assert_eq!(pending, vec!["speed"]);
        assert!(resolver.resolve(&types, &mut diagnostics).is_clean());
        assert_eq!(*seen.borrow(), Some(3.5));
    }

    #[test]
    fn callback_of_wrong_type_is_dropped_quietly() {
        let types = types();
        let called = Rc::new(RefCell::new(false));
        let sink = called.clone();
        let mut resolver = ReferenceResolver::new();
        let mut diagnostics = Diagnostics::new();
        resolver.inject("speed", 3.5f64);
        resolver.add_request(ReferenceRequest::callback::<u32>("speed", move |_| {
            *sink.borrow_mut() = true;
        }));

        let report = resolver.resolve(&types, &mut diagnostics);
        assert!(report.is_clean());
        assert_eq!(report.resolved, 0);
        assert!(!*called.borrow());
        assert!(diagnostics.is_empty());
    }
}
