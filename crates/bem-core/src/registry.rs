//! Name index over the dataset arena.

use bem_error::{BemError, Result};
use bem_types::DatasetId;
use std::collections::HashMap;

/// Fully-qualified name to node lookup.
///
/// Kept in lockstep with the tree: every node reachable from a root has
/// exactly one entry, keyed by its current name.
#[derive(Debug, Default)]
pub struct DatasetRegistry {
    by_name: HashMap<String, DatasetId>,
}

impl DatasetRegistry {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<DatasetId> {
        self.by_name.get(name).copied()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DatasetId)> {
        self.by_name.iter().map(|(name, id)| (name.as_str(), *id))
    }

    /// Register a new name. Fails if it is already taken.
    pub(crate) fn insert(&mut self, name: String, id: DatasetId) -> Result<()> {
        if let Some(existing) = self.by_name.get(&name) {
            return Err(BemError::InternalConsistency(format!(
                "{name:?} registered twice ({existing} and {id})"
            )));
        }
        self.by_name.insert(name, id);
        Ok(())
    }

    /// Move `id` from `old` to `new`: the new key is inserted before the old
    /// one is removed.
    pub(crate) fn rename(&mut self, old: &str, new: String, id: DatasetId) -> Result<()> {
        match self.by_name.get(old) {
            Some(current) if *current == id => {}
            other => {
                return Err(BemError::InternalConsistency(format!(
                    "{old:?} is not registered as {id} (found {other:?})"
                )));
            }
        }
        self.insert(new, id)?;
        self.by_name.remove(old);
        Ok(())
    }
}
