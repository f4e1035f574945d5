//! External assets: values named in documents but loaded by the host.
//!
//! A field whose type is registered as an asset is never built from the
//! document. The node text becomes a pending reference ID, and before
//! resolution the loader asks the [`AssetCatalog`] for every such ID.
//! Catalog values are keyed by asset type, apart from def IDs.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use defloom_core::convert::{ConvertContext, Converter};
use defloom_core::document::Node;
use defloom_core::{ReferenceValue, TypeKey, TypeRegistry, Value};

/// Source of asset values, keyed by ID and the type the field expects.
pub trait AssetCatalog {
    fn load(&self, id: &str, ty: TypeKey) -> Option<Rc<dyn ReferenceValue>>;
}

/// In-memory catalog, mostly for tests and tools.
#[derive(Default)]
pub struct MemoryCatalog {
    entries: HashMap<(String, TypeId), Rc<dyn ReferenceValue>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Clone + 'static>(&mut self, id: impl Into<String>, value: T) -> &mut Self {
        self.entries
            .insert((id.into(), TypeId::of::<T>()), Rc::new(value));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl AssetCatalog for MemoryCatalog {
    fn load(&self, id: &str, ty: TypeKey) -> Option<Rc<dyn ReferenceValue>> {
        self.entries.get(&(id.to_string(), ty.id())).cloned()
    }
}

/// Turns the text of an asset-typed node into a deferred request.
pub struct AssetConverter {
    assets: HashSet<TypeId>,
}

impl AssetConverter {
    pub const NAME: &'static str = "asset";

    pub fn new(assets: impl IntoIterator<Item = TypeId>) -> Self {
        Self {
            assets: assets.into_iter().collect(),
        }
    }
}

impl Converter for AssetConverter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn can_handle(&self, ty: TypeKey, _types: &TypeRegistry) -> bool {
        self.assets.contains(&ty.id())
    }

    fn parse(&self, node: &Node, _ty: TypeKey, ctx: &mut ConvertContext<'_>) -> Option<Value> {
        let id = node.inner_text().trim().to_string();
        if id.is_empty() {
            ctx.parse_error("empty asset name");
            return None;
        }
        ctx.defer(id);
        None
    }
}
