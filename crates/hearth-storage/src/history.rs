//! Durable history records for sensor triggers and lock actions.
//!
//! Entries are append-only; `acknowledged` is the only field that may
//! change after a sensor entry is created.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hearth_core::StorageBackend;

use crate::error::{Error, Result};

const SENSOR_TABLE: &str = "sensor_history";
const LOCK_TABLE: &str = "lock_history";

/// Severity of a recorded sensor event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// One recorded sensor trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorHistoryEntry {
    /// Entry id
    pub id: Uuid,
    /// Device id
    pub device_id: Uuid,
    /// Device display name at capture time
    pub device_name: String,
    /// Room label at capture time
    pub room: String,
    /// Sensor type ("motion", "contact", "smoke", "leak", ...)
    pub sensor_type: String,
    /// Raw attribute value that triggered the entry
    pub value: String,
    /// Human-readable message
    pub message: String,
    /// Severity
    pub priority: Priority,
    /// Whether a user has acknowledged the entry
    pub acknowledged: bool,
    /// Capture timestamp (unix seconds)
    pub timestamp: i64,
}

/// One recorded lock action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockHistoryEntry {
    /// Entry id
    pub id: Uuid,
    /// Device id
    pub device_id: Uuid,
    /// Device display name at capture time
    pub device_name: String,
    /// Action performed ("locked", "unlocked", ...)
    pub action: String,
    /// Method used ("app", "keypad", "auto", ...)
    pub method: String,
    /// Capture timestamp (unix seconds)
    pub timestamp: i64,
}

/// Sensor history store over a storage backend.
pub struct SensorHistoryStore {
    backend: Arc<dyn StorageBackend>,
}

impl SensorHistoryStore {
    /// Create a store over the given backend.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Append an entry.
    pub fn append(&self, entry: &SensorHistoryEntry) -> Result<()> {
        let bytes = serde_json::to_vec(entry)?;
        self.backend
            .write(SENSOR_TABLE, &entry.id.to_string(), &bytes)?;
        Ok(())
    }

    /// Find an entry by id.
    pub fn find_by_id(&self, id: &Uuid) -> Result<Option<SensorHistoryEntry>> {
        match self.backend.read(SENSOR_TABLE, &id.to_string())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn load_all(&self) -> Result<Vec<SensorHistoryEntry>> {
        let items = self.backend.scan(SENSOR_TABLE, "")?;
        let mut entries = Vec::with_capacity(items.len());
        for (key, bytes) in items {
            match serde_json::from_slice::<SensorHistoryEntry>(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("Skipping undecodable sensor entry {}: {}", key, e),
            }
        }
        // Newest first.
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    /// All entries, newest first.
    pub fn find_all(&self) -> Result<Vec<SensorHistoryEntry>> {
        self.load_all()
    }

    /// Entries for one device, newest first.
    pub fn find_by_device(&self, device_id: &Uuid) -> Result<Vec<SensorHistoryEntry>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|e| &e.device_id == device_id)
            .collect())
    }

    /// Entries with the given sensor type, newest first.
    pub fn find_by_sensor_type(&self, sensor_type: &str) -> Result<Vec<SensorHistoryEntry>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|e| e.sensor_type == sensor_type)
            .collect())
    }

    /// Unacknowledged entries, newest first; optionally scoped to a device.
    pub fn find_unacknowledged(&self, device_id: Option<&Uuid>) -> Result<Vec<SensorHistoryEntry>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|e| !e.acknowledged)
            .filter(|e| device_id.map(|id| &e.device_id == id).unwrap_or(true))
            .collect())
    }

    /// Set the acknowledged flag on one entry.
    pub fn set_acknowledged(&self, id: &Uuid, acknowledged: bool) -> Result<SensorHistoryEntry> {
        let mut entry = self
            .find_by_id(id)?
            .ok_or_else(|| Error::NotFound(format!("sensor history entry {}", id)))?;
        entry.acknowledged = acknowledged;
        self.append(&entry)?;
        Ok(entry)
    }

    /// Acknowledge every unacknowledged entry, optionally scoped to a
    /// device. Returns how many entries were updated.
    pub fn acknowledge_all(&self, device_id: Option<&Uuid>) -> Result<usize> {
        let pending = self.find_unacknowledged(device_id)?;
        let count = pending.len();
        for mut entry in pending {
            entry.acknowledged = true;
            self.append(&entry)?;
        }
        Ok(count)
    }
}

/// Lock history store over a storage backend.
pub struct LockHistoryStore {
    backend: Arc<dyn StorageBackend>,
}

impl LockHistoryStore {
    /// Create a store over the given backend.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Append an entry.
    pub fn append(&self, entry: &LockHistoryEntry) -> Result<()> {
        let bytes = serde_json::to_vec(entry)?;
        self.backend
            .write(LOCK_TABLE, &entry.id.to_string(), &bytes)?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<LockHistoryEntry>> {
        let items = self.backend.scan(LOCK_TABLE, "")?;
        let mut entries = Vec::with_capacity(items.len());
        for (key, bytes) in items {
            match serde_json::from_slice::<LockHistoryEntry>(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("Skipping undecodable lock entry {}: {}", key, e),
            }
        }
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    /// All entries, newest first.
    pub fn find_all(&self) -> Result<Vec<LockHistoryEntry>> {
        self.load_all()
    }

    /// Entries for one device, newest first.
    pub fn find_by_device(&self, device_id: &Uuid) -> Result<Vec<LockHistoryEntry>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|e| &e.device_id == device_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;

    fn sensor_store() -> SensorHistoryStore {
        SensorHistoryStore::new(Arc::new(MemoryBackend::new()))
    }

    fn entry(device_id: Uuid, ts: i64, acknowledged: bool) -> SensorHistoryEntry {
        SensorHistoryEntry {
            id: Uuid::new_v4(),
            device_id,
            device_name: "Hall sensor".to_string(),
            room: "Hall".to_string(),
            sensor_type: "motion".to_string(),
            value: "true".to_string(),
            message: "Motion detected".to_string(),
            priority: Priority::Medium,
            acknowledged,
            timestamp: ts,
        }
    }

    #[test]
    fn test_ordering_newest_first() {
        let store = sensor_store();
        let device = Uuid::new_v4();
        store.append(&entry(device, 100, false)).unwrap();
        store.append(&entry(device, 300, false)).unwrap();
        store.append(&entry(device, 200, false)).unwrap();

        let all = store.find_all().unwrap();
        let timestamps: Vec<i64> = all.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![300, 200, 100]);
    }

    #[test]
    fn test_acknowledge_all_for_device() {
        let store = sensor_store();
        let device = Uuid::new_v4();
        let other = Uuid::new_v4();
        store.append(&entry(device, 1, false)).unwrap();
        store.append(&entry(device, 2, false)).unwrap();
        store.append(&entry(device, 3, true)).unwrap();
        store.append(&entry(other, 4, false)).unwrap();

        let count = store.acknowledge_all(Some(&device)).unwrap();
        assert_eq!(count, 2);
        assert!(store.find_unacknowledged(Some(&device)).unwrap().is_empty());
        // The other device's entry is untouched.
        assert_eq!(store.find_unacknowledged(Some(&other)).unwrap().len(), 1);
    }

    #[test]
    fn test_set_acknowledged_missing() {
        let store = sensor_store();
        let err = store.set_acknowledged(&Uuid::new_v4(), true).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_lock_history_by_device() {
        let store = LockHistoryStore::new(Arc::new(MemoryBackend::new()));
        let device = Uuid::new_v4();
        store
            .append(&LockHistoryEntry {
                id: Uuid::new_v4(),
                device_id: device,
                device_name: "Front door".to_string(),
                action: "locked".to_string(),
                method: "app".to_string(),
                timestamp: 10,
            })
            .unwrap();

        let entries = store.find_by_device(&device).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "locked");
    }
}
