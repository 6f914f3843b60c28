//! In-memory storage backend.
//!
//! Non-persistent backend used by tests and by deployments that treat all
//! device state as rebuildable.

use std::collections::BTreeMap;
use std::sync::RwLock;

use hearth_core::storage::{Result, StorageBackend, StorageError};

fn make_key(table: &str, key: &str) -> String {
    format!("{}:{}", table, key)
}

/// BTreeMap-backed storage backend. Keys are namespaced `table:key` so
/// prefix scans stay ordered.
#[derive(Default)]
pub struct MemoryBackend {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    /// Create a new empty memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err() -> StorageError {
        StorageError::Backend("memory backend lock poisoned".to_string())
    }
}

impl StorageBackend for MemoryBackend {
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut data = self.data.write().map_err(|_| Self::lock_err())?;
        data.insert(make_key(table, key), value.to_vec());
        Ok(())
    }

    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let data = self.data.read().map_err(|_| Self::lock_err())?;
        Ok(data.get(&make_key(table, key)).cloned())
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool> {
        let mut data = self.data.write().map_err(|_| Self::lock_err())?;
        Ok(data.remove(&make_key(table, key)).is_some())
    }

    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let full_prefix = make_key(table, prefix);
        let strip = table.len() + 1;
        let data = self.data.read().map_err(|_| Self::lock_err())?;
        Ok(data
            .range(full_prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&full_prefix))
            .map(|(k, v)| (k[strip..].to_string(), v.clone()))
            .collect())
    }

    fn write_batch(&self, table: &str, items: Vec<(String, Vec<u8>)>) -> Result<()> {
        let mut data = self.data.write().map_err(|_| Self::lock_err())?;
        for (key, value) in items {
            data.insert(make_key(table, &key), value);
        }
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_delete() {
        let backend = MemoryBackend::new();
        backend.write("devices", "a", b"one").unwrap();
        assert_eq!(backend.read("devices", "a").unwrap(), Some(b"one".to_vec()));
        assert!(backend.delete("devices", "a").unwrap());
        assert_eq!(backend.read("devices", "a").unwrap(), None);
    }

    #[test]
    fn test_scan_respects_table_namespace() {
        let backend = MemoryBackend::new();
        backend.write("devices", "a", b"1").unwrap();
        backend.write("devices", "b", b"2").unwrap();
        backend.write("history", "a", b"3").unwrap();

        let items = backend.scan("devices", "").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].0, "a");
        assert_eq!(items[1].0, "b");
    }
}
