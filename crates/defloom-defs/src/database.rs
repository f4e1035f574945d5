use std::collections::HashMap;

use defloom_core::{Handle, TypeKey};

use crate::def::{Def, DefHandle};

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Another def already uses this ID.
    #[error("duplicate def id '{id}'")]
    DuplicateId { id: String },

    /// The def was never given an ID.
    #[error("def {def} has no id")]
    MissingId { def: String },
}

/// Every loaded def, by ID and by concrete type.
#[derive(Debug, Default)]
pub struct DefDatabase {
    defs: Vec<DefHandle>,
    by_id: HashMap<String, usize>,
    by_type: HashMap<TypeKey, Vec<usize>>,
}

impl DefDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a def under its ID. Fails when the ID is empty or taken.
    pub fn add(&mut self, def: DefHandle) -> Result<(), DatabaseError> {
        let id = def.id().to_string();
        if id.is_empty() {
            return Err(DatabaseError::MissingId {
                def: def.to_string(),
            });
        }
        if self.by_id.contains_key(&id) {
            return Err(DatabaseError::DuplicateId { id });
        }
        let index = self.defs.len();
        self.by_type.entry(def.key()).or_default().push(index);
        self.by_id.insert(id, index);
        self.defs.push(def);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&DefHandle> {
        self.by_id.get(id).map(|&index| &self.defs[index])
    }

    /// The def with this ID, when it is a `T`.
    pub fn get_as<T: Def>(&self, id: &str) -> Option<Handle<T>> {
        self.get(id)?.downcast::<T>()
    }

    /// Every def whose concrete type is `T`, in load order.
    pub fn all_of<T: Def>(&self) -> Vec<Handle<T>> {
        self.by_type
            .get(&TypeKey::of::<T>())
            .into_iter()
            .flatten()
            .filter_map(|&index| self.defs[index].downcast::<T>())
            .collect()
    }

    pub fn count_of<T: Def>(&self) -> usize {
        self.by_type.get(&TypeKey::of::<T>()).map_or(0, Vec::len)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DefHandle> {
        self.defs.iter()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}
