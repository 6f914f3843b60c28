//! Redb storage backend implementation.
//!
//! Provides persistent storage using the redb embedded database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use hearth_core::storage::{Result, StorageBackend, StorageError};

// Single unified table for all data - using namespaced keys
// Format: "table_name:key"
const UNIFIED_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("unified_storage");

/// Configuration for RedbBackend.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct RedbBackendConfig {
    /// Path to the database file.
    pub path: String,

    /// Create parent directories if they don't exist.
    #[serde(default = "default_create_dirs")]
    pub create_dirs: bool,
}

fn default_create_dirs() -> bool {
    true
}

impl RedbBackendConfig {
    /// Create a new config with the given path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            create_dirs: true,
        }
    }

    /// Create a config backed by a temporary file.
    pub fn memory() -> Self {
        Self {
            path: ":memory:".to_string(),
            create_dirs: false,
        }
    }
}

/// Create a namespaced key for the unified table.
fn make_key(table: &str, key: &str) -> String {
    let mut result = String::with_capacity(table.len() + key.len() + 1);
    result.push_str(table);
    result.push(':');
    result.push_str(key);
    result
}

/// redb-based persistent storage backend.
pub struct RedbBackend {
    /// redb database instance.
    db: Arc<Database>,
    /// Storage path (":memory:" for temp-file databases).
    path: String,
    /// Actual file path for temporary databases (for cleanup).
    temp_path: Option<PathBuf>,
}

impl RedbBackend {
    /// Create a new RedbBackend with the given configuration.
    pub fn new(config: RedbBackendConfig) -> Result<Self> {
        let path = &config.path;

        let (db, temp_path) = if path == ":memory:" {
            // redb has no true in-memory mode; use a temporary file.
            let temp_path =
                std::env::temp_dir().join(format!("hearth_redb_{}", uuid::Uuid::new_v4()));
            let db =
                Database::create(&temp_path).map_err(|e| StorageError::Backend(e.to_string()))?;
            (db, Some(temp_path))
        } else {
            let path_ref = Path::new(path);
            if config.create_dirs {
                if let Some(parent) = path_ref.parent() {
                    std::fs::create_dir_all(parent).map_err(StorageError::Io)?;
                }
            }

            let db = if path_ref.exists() {
                Database::open(path_ref).map_err(|e| StorageError::Backend(e.to_string()))?
            } else {
                Database::create(path_ref).map_err(|e| StorageError::Backend(e.to_string()))?
            };
            (db, None)
        };

        Ok(Self {
            db: Arc::new(db),
            path: config.path,
            temp_path,
        })
    }

    /// Open or create a redb backend at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(RedbBackendConfig::new(
            path.as_ref().to_string_lossy().to_string(),
        ))
    }

    /// Get the storage path.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl StorageBackend for RedbBackend {
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        let namespaced = make_key(table, key);

        let txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        {
            let mut t = txn
                .open_table(UNIFIED_TABLE)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            t.insert(&*namespaced, value)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        }
        txn.commit()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let namespaced = make_key(table, key);

        let txn = self
            .db
            .begin_read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let t = txn
            .open_table(UNIFIED_TABLE)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        match t
            .get(&*namespaced)
            .map_err(|e| StorageError::Backend(e.to_string()))?
        {
            Some(value) => Ok(Some(value.value().to_vec())),
            None => Ok(None),
        }
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool> {
        let namespaced = make_key(table, key);

        let txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let removed = {
            let mut t = txn
                .open_table(UNIFIED_TABLE)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            // Bind before the block ends so the access guard borrowed from
            // the table is dropped first.
            let prior = t
                .remove(&*namespaced)
                .map_err(|e| StorageError::Backend(e.to_string()))?
                .is_some();
            prior
        };
        txn.commit()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(removed)
    }

    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let table_prefix = format!("{}:{}", table, prefix);
        let table_prefix_len = table.len() + 1; // "table:"

        let txn = self
            .db
            .begin_read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let t = txn
            .open_table(UNIFIED_TABLE)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut results = Vec::new();
        for item in t.iter().map_err(|e| StorageError::Backend(e.to_string()))? {
            let (key, value) = item.map_err(|e| StorageError::Backend(e.to_string()))?;
            let key_str = key.value();
            if key_str.starts_with(&table_prefix) {
                if let Some(rest) = key_str.get(table_prefix_len..) {
                    results.push((rest.to_string(), value.value().to_vec()));
                }
            }
        }

        Ok(results)
    }

    fn write_batch(&self, table: &str, items: Vec<(String, Vec<u8>)>) -> Result<()> {
        let txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        {
            let mut t = txn
                .open_table(UNIFIED_TABLE)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            for (key, value) in items {
                let namespaced = make_key(table, &key);
                t.insert(&*namespaced, &*value)
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
            }
        }
        txn.commit()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        self.path != ":memory:"
    }
}

/// Cleanup temporary database file when RedbBackend is dropped.
impl Drop for RedbBackend {
    fn drop(&mut self) {
        if let Some(temp_path) = &self.temp_path {
            if let Err(e) = std::fs::remove_file(temp_path) {
                tracing::debug!(
                    "Failed to remove temporary database file {}: {}",
                    temp_path.display(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = RedbBackendConfig::new("./data/test.redb");
        assert_eq!(config.path, "./data/test.redb");
        assert!(config.create_dirs);
    }

    #[test]
    fn test_make_key() {
        assert_eq!(make_key("devices", "123"), "devices:123");
    }

    #[test]
    fn test_delete_reports_prior_presence() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("store.redb")).unwrap();

        backend.write("devices", "a", b"payload").unwrap();
        assert!(backend.delete("devices", "a").unwrap());
        assert_eq!(backend.read("devices", "a").unwrap(), None);
        assert!(!backend.delete("devices", "a").unwrap());
        assert!(!backend.delete("devices", "never-written").unwrap());
    }

    #[test]
    fn test_roundtrip_on_tempfile() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("store.redb")).unwrap();

        backend.write("devices", "a", b"payload").unwrap();
        assert_eq!(
            backend.read("devices", "a").unwrap(),
            Some(b"payload".to_vec())
        );
        assert!(backend.is_persistent());

        let scanned = backend.scan("devices", "").unwrap();
        assert_eq!(scanned.len(), 1);

        assert!(backend.delete("devices", "a").unwrap());
        assert!(!backend.delete("devices", "a").unwrap());
    }
}
