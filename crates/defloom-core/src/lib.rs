//! defloom core -- turns XML definition documents into a live object graph.
//!
//! Authors describe typed records declaratively, inherit from each other by
//! name and reference each other by ID regardless of load order. The engine
//! is driven by a [`types::TypeRegistry`] of descriptors instead of runtime
//! reflection.
//!
//! # Load Pipeline
//!
//! [`pipeline::Loader`] runs the phases in a fixed order:
//!
//! 1. **Digest** -- Parse each document and merge its top-level nodes into
//!    one tree. A duplicate top-level name rejects the whole document.
//! 2. **Inherit** -- Flatten `Parent` chains oldest-first. `Abstract` nodes
//!    stay available as parents.
//! 3. **Build** -- Walk every top-level node and construct its value.
//!    Failures are reported per node and the walk continues.
//! 4. **Hook** -- The host sees the built objects and pending reference
//!    IDs and may inject objects or add callbacks.
//! 5. **Resolve** -- Fill every recorded reference slot in one pass.
//!
//! ```rust,ignore
//! let mut types = TypeRegistry::new();
//! types.register(Composite::<Recipe>::new("Recipe").field("Name", |r| &mut r.name).referenceable());
//! let converters = ConverterRegistry::with_builtins();
//! let mut loader = Loader::new(&types, &converters);
//! loader.digest_str(xml)?;
//! let output = loader.finish(TypeKey::of::<Handle<Recipe>>())?;
//! ```
//!
//! # Key Types
//!
//! - [`document::Document`] -- Mutable node tree parsed with `roxmltree`.
//! - [`merge::DocumentMerger`] -- Document folding and inheritance.
//! - [`types::TypeRegistry`] -- Composite, list, enum and abstract
//!   descriptors plus upcasts and the type-name table.
//! - [`convert::ConverterRegistry`] -- Ordered, cached scalar converters.
//! - [`build::BuildSession`] -- The object graph builder.
//! - [`refs::ReferenceResolver`] -- Reference map and deferred requests.
//! - [`diagnostic::Diagnostics`] -- Every non-fatal problem, also emitted
//!   through `tracing`.

pub mod build;
pub mod config;
pub mod convert;
pub mod diagnostic;
pub mod document;
pub mod handle;
pub mod merge;
pub mod pipeline;
pub mod refs;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use build::{BuildError, BuildSession};
pub use config::{ConfigError, LoaderConfig};
pub use convert::{ConvertContext, Converter, ConverterRegistry, Fixed32, Fixed64};
pub use diagnostic::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
pub use document::{Document, DocumentError, Node, NodeShape};
pub use handle::{Handle, Object};
pub use merge::{DocumentMerger, MergeError};
pub use pipeline::{LoadError, LoadOutput, Loader};
pub use refs::{
    ReferenceMap, ReferenceRequest, ReferenceResolver, ReferenceValue, ResolutionReport,
};
pub use types::{
    AbstractType, Composite, Enum, ListType, OnConstructed, Referenceable, TypeKey, TypeRegistry,
    Value,
};
