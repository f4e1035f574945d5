//! Object graph builder.
//!
//! Walks a resolved document and turns each top-level node into an object,
//! driven entirely by the [`TypeRegistry`]. Child failures are reported and
//! skipped. References found on the way are staged with a path from the
//! nearest shared object and handed to the [`ReferenceResolver`] once that
//! object exists.

use std::rc::Rc;

use tracing::debug;

use crate::convert::{ConvertContext, ConverterRegistry};
use crate::diagnostic::{DiagnosticKind, Diagnostics};
use crate::document::{Document, Node, attr};
use crate::handle::{Anchor, Object};
use crate::refs::{ReferenceRequest, ReferenceResolver, ResolutionReport, Step};
use crate::types::{
    CompositeDesc, ListDesc, TypeDesc, TypeKey, TypeKind, TypeRegistry, Value, value_type_id,
};

// ===========================================================================
// Errors
// ===========================================================================

/// Why a single node could not be built. Caught per node and reported as a
/// diagnostic; the rest of the document still builds.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// A `Class` attribute named no known type.
    #[error("unknown type '{name}'")]
    UnknownType { name: String },

    /// An abstract type was reached without a `Class` attribute.
    #[error("cannot construct abstract type {type_name} without a Class attribute")]
    AbstractType { type_name: String },

    /// The built value cannot fill its slot.
    #[error("{found} is not assignable to {expected}")]
    NotAssignable { found: String, expected: String },

    /// No custom parser, converter, list or composite descriptor applies.
    #[error("no way to build {type_name}")]
    Unbuildable { type_name: String },
}

/// Result of building one node.
enum Built {
    Value(Value),
    /// No value yet; a request for this slot was staged.
    Pending,
    Nothing,
}

/// A reference seen during the walk. `path` is relative to `anchor`, which
/// is filled in when the enclosing shared object is finished.
struct Staged {
    id: String,
    expected: TypeKey,
    path: Vec<Step>,
    node: String,
    anchor: Option<Anchor>,
}

// ===========================================================================
// BuildSession
// ===========================================================================

/// One build over one or more documents. Owns the reference map and the
/// pending requests until [`BuildSession::resolve_references`] runs.
pub struct BuildSession<'r> {
    types: &'r TypeRegistry,
    converters: &'r ConverterRegistry,
    resolver: ReferenceResolver,
    diagnostics: Diagnostics,
    include_abstracts: bool,

    path: Vec<Step>,
    staged: Vec<Staged>,
    no_ref: bool,
    depth: usize,
    node_path: Vec<String>,
}

impl<'r> BuildSession<'r> {
    pub fn new(types: &'r TypeRegistry, converters: &'r ConverterRegistry) -> Self {
        Self {
            types,
            converters,
            resolver: ReferenceResolver::new(),
            diagnostics: Diagnostics::new(),
            include_abstracts: false,
            path: Vec::new(),
            staged: Vec::new(),
            no_ref: false,
            depth: 0,
            node_path: Vec::new(),
        }
    }

    /// Also build top-level nodes marked `Abstract`.
    pub fn with_abstracts(mut self, include: bool) -> Self {
        self.include_abstracts = include;
        self
    }

    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut ReferenceResolver {
        &mut self.resolver
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    /// Runs the single resolution pass over everything staged so far.
    pub fn resolve_references(&mut self) -> ResolutionReport {
        self.resolver.resolve(self.types, &mut self.diagnostics)
    }

    pub fn into_parts(self) -> (ReferenceResolver, Diagnostics) {
        (self.resolver, self.diagnostics)
    }

    /// Builds every top-level node of `doc`, using `default` for nodes
    /// without a `Class` attribute. Abstract nodes are skipped unless
    /// enabled with [`BuildSession::with_abstracts`].
    pub fn build_all(&mut self, doc: &Document, default: TypeKey) -> Vec<Object> {
        let root = doc.root();
        self.node_path.push(root.name().to_string());
        let mut objects = Vec::new();
        let mut skipped = 0usize;
        for node in root.elements() {
            if !self.include_abstracts && node.bool_attr(attr::ABSTRACT, false) {
                skipped += 1;
                continue;
            }
            if let Some(object) = self.build_root(node, default) {
                objects.push(object);
            }
        }
        self.node_path.pop();
        debug!(
            built = objects.len(),
            skipped_abstract = skipped,
            pending = self.resolver.pending_count(),
            "built objects"
        );
        objects
    }

    /// Builds one top-level node. Failures are reported and yield `None`.
    pub fn build_root(&mut self, node: &Node, default: TypeKey) -> Option<Object> {
        let types = self.types;
        let mark = self.staged.len();
        self.node_path.push(node.name().to_string());

        let built = self
            .effective_type(node, default, true)
            .and_then(|ty| Ok((ty, self.build_as(node, default, ty, true)?)));
        let object = match built {
            Ok((ty, Built::Value(value))) => {
                let key = types.get(ty).map_or(ty, TypeDesc::key);
                Some(Object::new(key, types.display_name(key), value))
            }
            Ok(_) => None,
            Err(err) => {
                self.report(DiagnosticKind::NodeFailed, err.to_string());
                None
            }
        };

        let unanchored = self.staged[mark..]
            .iter()
            .filter(|s| s.anchor.is_none())
            .count();
        if unanchored > 0 && object.is_some() {
            self.report(
                DiagnosticKind::UnsupportedReference,
                format!("{unanchored} reference(s) inside a root that is not a composite were dropped"),
            );
        }
        self.discard_unanchored(mark);
        self.flush_staged();
        self.node_path.pop();
        object
    }

    // -----------------------------------------------------------------------
    // Walk
    // -----------------------------------------------------------------------

    /// Builds a child node for a slot of type `slot`, catching failures.
    fn build_child(&mut self, node: &Node, slot: TypeKey) -> Built {
        let mark = self.staged.len();
        self.depth += 1;
        self.node_path.push(node.name().to_string());
        let built = self
            .effective_type(node, slot, false)
            .and_then(|ty| self.build_as(node, slot, ty, false));
        let built = match built {
            Ok(built) => built,
            Err(err) => {
                self.report(DiagnosticKind::NodeFailed, err.to_string());
                self.discard_unanchored(mark);
                Built::Nothing
            }
        };
        self.node_path.pop();
        self.depth -= 1;
        built
    }

    /// The `Class` override, or the slot type.
    fn effective_type(&self, node: &Node, slot: TypeKey, at_root: bool) -> Result<TypeKey, BuildError> {
        let Some(class) = node.attr(attr::CLASS) else {
            return Ok(slot);
        };
        let types = self.types;
        let ty = types
            .resolve_name(class)
            .ok_or_else(|| BuildError::UnknownType {
                name: class.to_string(),
            })?;
        if at_root || ty == slot {
            return Ok(ty);
        }
        let produced = if self.is_handle_slot(slot) {
            types
                .get(ty)
                .and_then(TypeDesc::as_composite)
                .map_or(ty, CompositeDesc::handle_key)
        } else {
            ty
        };
        if types.is_assignable(produced.id(), slot) {
            Ok(ty)
        } else {
            Err(BuildError::NotAssignable {
                found: types.display_name(ty),
                expected: types.display_name(slot),
            })
        }
    }

    fn build_as(&mut self, node: &Node, slot: TypeKey, ty: TypeKey, at_root: bool) -> Result<Built, BuildError> {
        let saved_no_ref = self.no_ref;
        self.no_ref |= node.bool_attr(attr::NO_REF, false);
        let built = self.build_typed(node, slot, ty, at_root);
        self.no_ref = saved_no_ref;
        built
    }

    fn build_typed(&mut self, node: &Node, slot: TypeKey, ty: TypeKey, at_root: bool) -> Result<Built, BuildError> {
        let types = self.types;
        let desc = types.get(ty);
        let base = desc.map_or(ty, TypeDesc::key);
        let shared = at_root || self.is_handle_slot(slot);

        // A leaf where a shared object is expected names that object.
        let referenceable = desc.is_some_and(TypeDesc::is_referenceable);
        if referenceable && shared && !at_root && !self.no_ref && node.is_leaf() {
            let id = node.inner_text().trim().to_string();
            self.stage(id, slot);
            return Ok(Built::Pending);
        }

        let mut value = types.custom_parser(base).and_then(|parse| parse(node));

        if value.is_none() {
            if let Some(converter) = self.converters.resolve(base, types) {
                let node_path = self.node_path_string();
                let mut ctx = ConvertContext::new(types, &mut self.diagnostics, &node_path);
                let parsed = converter.parse(node, base, &mut ctx);
                let deferred = ctx.into_deferred();
                let pending = !deferred.is_empty();
                for id in deferred {
                    self.stage(id, slot);
                }
                match parsed {
                    Some(parsed) => value = Some(parsed),
                    None if pending && !at_root => return Ok(Built::Pending),
                    None => return Ok(Built::Nothing),
                }
            }
        }

        let composite = desc.and_then(TypeDesc::as_composite);
        let mut walked = None;
        let mut value = match value {
            Some(value) => value,
            None => match desc.map(TypeDesc::kind) {
                Some(TypeKind::List(list)) => {
                    let Some(list_value) = self.build_list(node, base, list) else {
                        return Ok(Built::Nothing);
                    };
                    return self.fit(list_value, slot, at_root).map(Built::Value);
                }
                Some(TypeKind::Composite(composite)) => {
                    let mark = self.staged.len();
                    let saved_path = shared.then(|| std::mem::take(&mut self.path));
                    let value = self.build_composite(node, desc.map_or("", TypeDesc::name), composite);
                    if let Some(saved) = saved_path {
                        self.path = saved;
                        walked = Some(mark);
                    }
                    value
                }
                Some(TypeKind::Abstract { .. }) => {
                    return Err(BuildError::AbstractType {
                        type_name: types.display_name(ty),
                    });
                }
                Some(TypeKind::Enum(_)) | None => {
                    return Err(BuildError::Unbuildable {
                        type_name: types.display_name(ty),
                    });
                }
            },
        };

        if let Some(composite) = composite {
            let ops = composite.ops();
            ops.on_constructed(&mut value, node);
            if shared {
                value = ops.share(value);
                if let Some(mark) = walked {
                    if let Some(anchor) = ops.anchor_of(&value) {
                        self.anchor_staged(mark, &anchor);
                    }
                }
                if !self.no_ref && ops.is_referenceable() {
                    self.register(ops.reference_id(&value), &value, composite);
                }
            }
        }

        self.fit(value, slot, at_root).map(Built::Value)
    }

    /// Slots that hold a `Handle`: shared slots and the handle alias of any
    /// composite.
    fn is_handle_slot(&self, slot: TypeKey) -> bool {
        let types = self.types;
        types.is_shared(slot)
            || types
                .get(slot)
                .and_then(TypeDesc::as_composite)
                .is_some_and(|composite| composite.handle_key() == slot)
    }

    /// Upcasts a finished value into its slot. Roots keep their own type.
    fn fit(&self, value: Value, slot: TypeKey, at_root: bool) -> Result<Value, BuildError> {
        if at_root {
            return Ok(value);
        }
        let types = self.types;
        types.coerce(value, slot).map_err(|value| {
            let found = types
                .get_by_id(value_type_id(&value))
                .map_or_else(|| "value".to_string(), |d| d.name().to_string());
            BuildError::NotAssignable {
                found,
                expected: types.display_name(slot),
            }
        })
    }

    fn build_composite(&mut self, node: &Node, type_name: &str, composite: &CompositeDesc) -> Value {
        let mut value = composite.ops().construct();
        let mut matched = 0usize;
        for child in node.elements() {
            if !child.has_children() {
                continue;
            }
            let Some(field) = composite.field(child.name()).map(Rc::clone) else {
                self.report(
                    DiagnosticKind::UnmatchedField,
                    format!("{type_name} has no field '{}'", child.name()),
                );
                continue;
            };
            matched += 1;
            self.path.push(Step::Field(Rc::clone(&field)));
            let built = self.build_child(child, field.ty());
            self.path.pop();
            if let Built::Value(child_value) = built {
                if field.set(&mut *value, child_value).is_err() {
                    self.report(
                        DiagnosticKind::NodeFailed,
                        format!("could not assign field '{}' of {type_name}", field.name()),
                    );
                }
            }
        }
        if matched == 0 {
            self.report(
                DiagnosticKind::EmptyComposite,
                format!("no data provided for '{}' of type {type_name}", node.name()),
            );
        }
        value
    }

    fn build_list(&mut self, node: &Node, list_key: TypeKey, list: &ListDesc) -> Option<Value> {
        if !node.has_children() {
            return None;
        }
        if !node.is_list() {
            self.report(
                DiagnosticKind::ListShape,
                format!(
                    "'{}' is a list but its items are not all <li>; rename them or add IsList=\"true\"",
                    node.name()
                ),
            );
        }
        let access = list.access();
        let mut value = access.with_capacity(node.element_count());
        let mut index = 0usize;
        for child in node.elements() {
            if !child.has_children() {
                continue;
            }
            self.path.push(Step::Item {
                list: list_key,
                index,
            });
            let built = self.build_child(child, list.item());
            self.path.pop();
            match built {
                Built::Value(item) => {
                    if access.push(&mut *value, Some(item)).is_err() {
                        self.report(
                            DiagnosticKind::NodeFailed,
                            format!("could not add item {index} to '{}'", node.name()),
                        );
                        continue;
                    }
                    index += 1;
                }
                Built::Pending => {
                    // Dense lists ignore the placeholder; the slot index is
                    // still reserved for the resolver.
                    let _ = access.push(&mut *value, None);
                    index += 1;
                }
                Built::Nothing if list.keeps_slots() => {
                    let _ = access.push(&mut *value, None);
                    index += 1;
                }
                Built::Nothing => {}
            }
        }
        Some(value)
    }

    // -----------------------------------------------------------------------
    // References
    // -----------------------------------------------------------------------

    fn stage(&mut self, id: String, expected: TypeKey) {
        if self.depth == 0 {
            self.report(
                DiagnosticKind::UnsupportedReference,
                format!("reference '{id}' on a top-level node has no slot to fill"),
            );
            return;
        }
        self.staged.push(Staged {
            id,
            expected,
            path: self.path.clone(),
            node: self.node_path_string(),
            anchor: None,
        });
    }

    fn anchor_staged(&mut self, mark: usize, anchor: &Anchor) {
        for staged in &mut self.staged[mark..] {
            if staged.anchor.is_none() {
                staged.anchor = Some(Rc::clone(anchor));
            }
        }
    }

    /// Drops requests from `mark` on that never found their object.
    fn discard_unanchored(&mut self, mark: usize) {
        let mut index = 0;
        self.staged.retain(|staged| {
            let keep = index < mark || staged.anchor.is_some();
            index += 1;
            keep
        });
    }

    fn flush_staged(&mut self) {
        if self.depth > 0 {
            return;
        }
        for staged in self.staged.drain(..) {
            if let Some(anchor) = staged.anchor {
                self.resolver.add_request(ReferenceRequest::at_slot(
                    staged.id,
                    staged.expected,
                    anchor,
                    staged.path,
                    Some(staged.node),
                ));
            }
        }
    }

    fn register(&mut self, id: Option<String>, value: &Value, composite: &CompositeDesc) {
        let node = self.node_path_string();
        let Some(id) = id else {
            self.diagnostics.report(
                DiagnosticKind::NullReferenceId,
                Some(&node),
                "reference-capable object has no reference id; it cannot be referenced",
            );
            return;
        };
        if let Some(entry) = composite.ops().reference_entry(value) {
            self.resolver
                .register(id, entry, &mut self.diagnostics, Some(&node));
        }
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    fn node_path_string(&self) -> String {
        self.node_path.join("/")
    }

    fn report(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        let node = self.node_path_string();
        self.diagnostics.report(kind, Some(&node), message);
    }
}

impl std::fmt::Debug for BuildSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildSession")
            .field("resolver", &self.resolver)
            .field("diagnostics", &self.diagnostics.len())
            .finish_non_exhaustive()
    }
}
