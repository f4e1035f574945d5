//! defloom defs -- typed data records ("defs") loaded through the defloom
//! engine.
//!
//! A def is any type implementing [`Def`]: it gets its ID from its node
//! name, may inherit from other defs by name, and can be referenced from
//! any other def by ID. [`DefLoader`] runs the whole load and returns a
//! [`DefDatabase`] plus the config-error report.
//!
//! ```rust,ignore
//! let mut loader = DefLoader::new();
//! loader.register_def(def_type::<ItemDef>("ItemDef").field("MaxStack", |d| &mut d.max_stack));
//! let mut load = loader.start();
//! load.digest_file(Path::new("defs/items.xml"));
//! let loaded = load.finish()?;
//! let iron = loaded.database.get_as::<ItemDef>("IronPlate");
//! ```

pub mod asset;
pub mod config_errors;
pub mod database;
pub mod def;
pub mod loader;

pub use asset::{AssetCatalog, AssetConverter, MemoryCatalog};
pub use config_errors::{ConfigErrors, ConfigIssue};
pub use database::{DatabaseError, DefDatabase};
pub use def::{Def, DefBase, DefHandle, PreResolve, as_def, def_type};
pub use loader::{DefLoad, DefLoader, LoadedDefs};
