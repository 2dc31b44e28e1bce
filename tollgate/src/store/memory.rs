//! An in-memory store

use std::collections::HashMap;

use parking_lot::RwLock;

use super::KeyValueStore;
use crate::error::StoreError;

/// An in-memory key–value store
///
/// Contents live only as long as the store, mirroring browser session
/// storage.
#[derive(Default, Debug)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Constructs a new, empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() -> color_eyre::Result<()> {
        let store = MemoryStore::new();
        assert_eq!(store.get("k")?, None);

        store.set("k", "v1")?;
        store.set("k", "v2")?;
        assert_eq!(store.get("k")?.as_deref(), Some("v2"));
        assert_eq!(store.len(), 1);

        store.remove("k")?;
        store.remove("missing")?;
        assert!(store.is_empty());
        Ok(())
    }
}
