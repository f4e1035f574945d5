//! Drives a full def load: documents in, populated [`DefDatabase`] out.

use std::any::TypeId;
use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, error, info, warn};

use defloom_core::pipeline::{LoadError, Loader};
use defloom_core::{
    AbstractType, Composite, ConverterRegistry, Diagnostics, Handle, LoaderConfig, Object,
    ReferenceMap, ReferenceResolver, ResolutionReport, TypeKey, TypeRegistry,
};

use crate::asset::{AssetCatalog, AssetConverter};
use crate::config_errors::ConfigErrors;
use crate::database::DefDatabase;
use crate::def::{Caster, Def, DefHandle, PreResolve, as_def};

/// Result of [`DefLoad::finish`].
#[derive(Debug)]
pub struct LoadedDefs {
    /// Every built def in document order, including any the database
    /// rejected.
    pub defs: Vec<DefHandle>,
    pub database: DefDatabase,
    pub config_errors: ConfigErrors,
    pub diagnostics: Diagnostics,
    pub report: ResolutionReport,
    pub references: ReferenceMap,
}

// ===========================================================================
// DefLoader
// ===========================================================================

/// Registry of def and asset types. Create one, register types, then call
/// [`DefLoader::start`] for each load.
pub struct DefLoader {
    types: TypeRegistry,
    converters: ConverterRegistry,
    casters: HashMap<TypeId, Caster>,
    assets: HashMap<TypeId, String>,
    catalog: Option<Box<dyn AssetCatalog>>,
    config: LoaderConfig,
}

impl Default for DefLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DefLoader {
    pub fn new() -> Self {
        let mut types = TypeRegistry::new();
        types.register(AbstractType::of::<Handle<dyn Def>>("Def").referenceable());
        Self {
            types,
            converters: ConverterRegistry::with_builtins(),
            casters: HashMap::new(),
            assets: HashMap::new(),
            catalog: None,
            config: LoaderConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a def type, usually built with [`crate::def_type`]. Its
    /// handles also fill `Handle<dyn Def>` slots.
    pub fn register_def<T: Def + Default>(&mut self, registration: Composite<T>) -> &mut Self {
        self.types
            .register(registration)
            .register_upcast::<Handle<T>, Handle<dyn Def>>(as_def);
        self.casters
            .insert(TypeId::of::<T>(), DefHandle::cast::<T> as Caster);
        self
    }

    /// Marks `A` as an asset type supplied by the catalog.
    pub fn register_asset<A: Clone + 'static>(&mut self, name: impl Into<String>) -> &mut Self {
        self.assets.insert(TypeId::of::<A>(), name.into());
        self.converters.remove(AssetConverter::NAME);
        self.converters
            .add(AssetConverter::new(self.assets.keys().copied()));
        self
    }

    pub fn set_catalog(&mut self, catalog: impl AssetCatalog + 'static) -> &mut Self {
        self.catalog = Some(Box::new(catalog));
        self
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// For registrations that are not defs: value composites, enums,
    /// custom parsers and upcasts.
    pub fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.types
    }

    pub fn converters_mut(&mut self) -> &mut ConverterRegistry {
        &mut self.converters
    }

    pub fn start(&self) -> DefLoad<'_> {
        debug!(
            def_types = self.casters.len(),
            asset_types = self.assets.len(),
            "starting def load"
        );
        DefLoad {
            owner: self,
            loader: Loader::with_config(&self.types, &self.converters, self.config.clone()),
            failed: 0,
        }
    }

    fn collect_defs(&self, objects: &[Object]) -> Vec<DefHandle> {
        objects
            .iter()
            .filter_map(|object| {
                let def = self
                    .casters
                    .get(&object.key().id())
                    .and_then(|cast| cast(object));
                if def.is_none() {
                    warn!(type_name = object.type_name(), "top-level object is not a registered def");
                }
                def
            })
            .collect()
    }

    /// Injects catalog values for pending asset requests, keyed by asset
    /// type so a def with the same ID never hides them.
    fn load_assets(&self, resolver: &mut ReferenceResolver) {
        let mut wanted: Vec<(String, TypeKey)> = Vec::new();
        for (id, ty) in resolver.pending() {
            if self.assets.contains_key(&ty.id())
                && !resolver.map().contains_for(id, ty)
                && !wanted.iter().any(|(seen, seen_ty)| seen == id && *seen_ty == ty)
            {
                wanted.push((id.to_string(), ty));
            }
        }
        debug!(count = wanted.len(), "loading asset references");
        let Some(catalog) = self.catalog.as_ref() else {
            return;
        };
        for (id, ty) in wanted {
            match catalog.load(&id, ty) {
                Some(value) => {
                    resolver.map_mut().inject_for(id, ty, value);
                }
                None => {
                    let kind = self.assets.get(&ty.id()).map_or("asset", String::as_str);
                    warn!(id = %id, kind, "asset not found in catalog");
                }
            }
        }
    }
}

// ===========================================================================
// DefLoad
// ===========================================================================

/// One load in progress.
pub struct DefLoad<'a> {
    owner: &'a DefLoader,
    loader: Loader<'a>,
    failed: usize,
}

impl DefLoad<'_> {
    /// Merges one document. A document that fails to parse or merge is
    /// logged and skipped; returns whether it was kept.
    pub fn digest_str(&mut self, name: &str, text: &str) -> bool {
        match self.loader.digest_str(text) {
            Ok(()) => true,
            Err(err) => {
                error!(document = name, %err, "failed to digest def document");
                self.failed += 1;
                false
            }
        }
    }

    pub fn digest_file(&mut self, path: &Path) -> bool {
        match self.loader.digest_file(path) {
            Ok(()) => true,
            Err(err) => {
                error!(path = %path.display(), %err, "failed to digest def file");
                self.failed += 1;
                false
            }
        }
    }

    /// Documents skipped so far.
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Builds every def, runs the def hooks around reference resolution and
    /// fills the database.
    pub fn finish(self) -> Result<LoadedDefs, LoadError> {
        let owner = self.owner;
        let mut defs = Vec::new();
        let output = self
            .loader
            .finish_with(TypeKey::of::<Handle<dyn Def>>(), |objects, resolver| {
                defs = owner.collect_defs(objects);
                for def in &defs {
                    let mut refs = PreResolve::new(def, resolver);
                    def.def().borrow_mut().pre_resolve_references(&mut refs);
                }
                owner.load_assets(resolver);
            })?;

        let mut database = DefDatabase::new();
        for def in &defs {
            if let Err(err) = database.add(def.clone()) {
                error!(%err, def = %def, "failed to register loaded def");
            }
        }

        let mut config_errors = ConfigErrors::new();
        for def in &defs {
            config_errors.set_current(def.id());
            def.def().borrow().config_errors(&mut config_errors);
        }
        report_config_errors(&config_errors);

        for def in &defs {
            def.def().borrow_mut().post_load();
        }

        info!(defs = database.len(), "finished loading defs");
        Ok(LoadedDefs {
            defs,
            database,
            config_errors,
            diagnostics: output.diagnostics,
            report: output.report,
            references: output.references,
        })
    }
}

fn report_config_errors(report: &ConfigErrors) {
    if report.errors().is_empty() {
        info!("there are no def errors");
    } else {
        error!(count = report.errors().len(), "def errors");
    }
    for issue in report.errors() {
        error!("{issue}");
    }

    if report.warnings().is_empty() {
        info!("there are no def warnings");
    } else {
        warn!(count = report.warnings().len(), "def warnings");
    }
    for issue in report.warnings() {
        warn!("{issue}");
    }
}
