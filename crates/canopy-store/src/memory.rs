//! In-process object store.

use crate::{validate_key, ObjectStore, Result, StoreError};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An object store held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every key currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ObjectStore for MemoryStore {
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.objects.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_by_prefix() {
        let store = MemoryStore::new();
        store.put("tiles/a.laz", b"a").unwrap();
        store.put("tiles/b.laz", b"b").unwrap();
        store.put("tilesets/c.laz", b"c").unwrap();
        store.put("dsm/a.tif", b"d").unwrap();

        assert_eq!(store.list("tiles/").unwrap(), vec!["tiles/a.laz", "tiles/b.laz"]);
        assert_eq!(store.list("").unwrap().len(), 4);
    }

    #[test]
    fn test_get_missing() {
        let store = MemoryStore::new();
        assert!(matches!(store.get("nope"), Err(StoreError::NotFound(_))));
    }
}
