//! Load pipeline: digest documents, merge and flatten inheritance, build,
//! run the host hook, then resolve references in one pass.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::build::BuildSession;
use crate::config::LoaderConfig;
use crate::convert::ConverterRegistry;
use crate::diagnostic::Diagnostics;
use crate::document::{Document, DocumentError};
use crate::handle::Object;
use crate::merge::{DocumentMerger, MergeError};
use crate::refs::{ReferenceMap, ReferenceResolver, ResolutionReport};
use crate::types::{TypeKey, TypeRegistry};

// ===========================================================================
// Errors
// ===========================================================================

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    /// A document file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ===========================================================================
// Output
// ===========================================================================

/// Everything one load produced.
#[derive(Debug)]
pub struct LoadOutput {
    /// One entry per built top-level node, in document order.
    pub objects: Vec<Object>,
    pub diagnostics: Diagnostics,
    pub report: ResolutionReport,
    /// Every object registered under a reference ID, plus injections.
    pub references: ReferenceMap,
}

impl LoadOutput {
    fn empty() -> Self {
        Self {
            objects: Vec::new(),
            diagnostics: Diagnostics::new(),
            report: ResolutionReport::default(),
            references: ReferenceMap::new(),
        }
    }
}

// ===========================================================================
// Loader
// ===========================================================================

/// Drives one load. Documents are merged as they are digested; nothing is
/// built until [`Loader::finish`].
pub struct Loader<'r> {
    types: &'r TypeRegistry,
    converters: &'r ConverterRegistry,
    config: LoaderConfig,
    merger: DocumentMerger,
    digested: usize,
}

impl<'r> Loader<'r> {
    pub fn new(types: &'r TypeRegistry, converters: &'r ConverterRegistry) -> Self {
        Self::with_config(types, converters, LoaderConfig::default())
    }

    pub fn with_config(
        types: &'r TypeRegistry,
        converters: &'r ConverterRegistry,
        config: LoaderConfig,
    ) -> Self {
        let merger = match &config.root_name {
            Some(name) => DocumentMerger::with_root_name(name.clone()),
            None => DocumentMerger::new(),
        };
        Self {
            types,
            converters,
            config,
            merger,
            digested: 0,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Number of documents merged so far.
    pub fn digested(&self) -> usize {
        self.digested
    }

    /// Parses and merges one document. On error nothing from it is kept.
    pub fn digest_str(&mut self, text: &str) -> Result<(), LoadError> {
        let document = Document::parse(text)?;
        self.digest_document(document)
    }

    pub fn digest_document(&mut self, document: Document) -> Result<(), LoadError> {
        self.merger.merge(document)?;
        self.digested += 1;
        Ok(())
    }

    pub fn digest_file(&mut self, path: &Path) -> Result<(), LoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.digest_str(&text)?;
        debug!(path = %path.display(), "digested document file");
        Ok(())
    }

    /// Builds and resolves with no host hook.
    pub fn finish(self, default: TypeKey) -> Result<LoadOutput, LoadError> {
        self.finish_with(default, |_, _| {})
    }

    /// Flattens inheritance, builds every top-level node as `default`
    /// unless a `Class` attribute says otherwise, hands the objects and the
    /// resolver to `hook`, then resolves references.
    ///
    /// The hook is the place to inject externally loaded objects for
    /// pending IDs or to add callback requests.
    pub fn finish_with(
        self,
        default: TypeKey,
        hook: impl FnOnce(&[Object], &mut ReferenceResolver),
    ) -> Result<LoadOutput, LoadError> {
        let Some(document) = self.merger.resolve()? else {
            return Ok(LoadOutput::empty());
        };
        if self.config.log_merged_document {
            debug!(document = %document.root().to_pretty_xml(), "merged document");
        }

        let mut session = BuildSession::new(self.types, self.converters)
            .with_abstracts(self.config.include_abstracts);
        let objects = session.build_all(&document, default);
        hook(&objects, session.resolver_mut());
        let report = session.resolve_references();
        let (resolver, diagnostics) = session.into_parts();

        info!(
            documents = self.digested,
            objects = objects.len(),
            resolved = report.resolved,
            missing = report.missing.len(),
            diagnostics = diagnostics.len(),
            "load finished"
        );
        Ok(LoadOutput {
            objects,
            diagnostics,
            report,
            references: resolver.into_map(),
        })
    }
}
