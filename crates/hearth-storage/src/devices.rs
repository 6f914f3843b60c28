//! Persisted device records.
//!
//! The device store is the authoritative owner of device state. The
//! orchestration layer reads a record, works on it transiently, and writes
//! it back; `save_versioned` gives callers optimistic conflict detection
//! for that read-modify-write cycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hearth_core::StorageBackend;

use crate::error::{Error, Result};

const DEVICE_TABLE: &str = "devices";

/// Transport protocol a device is reachable over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Message-bus transport (MQTT broker).
    Mqtt,
    /// In-process simulated transport.
    Virtual,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mqtt => write!(f, "mqtt"),
            Self::Virtual => write!(f, "virtual"),
        }
    }
}

/// Reachability status of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "ONLINE"),
            Self::Offline => write!(f, "OFFLINE"),
        }
    }
}

/// Persisted device record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Device unique identifier
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Classification category (e.g. "LIGHTING", "SECURITY")
    pub category: Option<String>,
    /// Classification sub-type (e.g. "MOTION_SENSOR")
    pub sub_type: Option<String>,
    /// Legacy coarse type ("light", "thermostat", "sensor", "switch", "lock")
    pub device_type: String,
    /// Transport protocol
    pub protocol: Protocol,
    /// Current reachability status
    pub status: DeviceStatus,
    /// Opaque transport-specific connection parameters
    pub connection_params: Option<serde_json::Value>,
    /// Live/cached attribute set
    #[serde(default)]
    pub properties: HashMap<String, String>,
    /// Advertised feature flags
    #[serde(default)]
    pub capabilities: HashMap<String, String>,
    /// External-platform access token, if the device is mirrored
    pub platform_token: Option<String>,
    /// External-platform device id
    pub platform_device_id: Option<String>,
    /// Room label
    pub room: Option<String>,
    /// Last activity timestamp (unix seconds)
    pub last_seen: Option<i64>,
    /// Optimistic concurrency counter, bumped on every save
    #[serde(default)]
    pub version: u64,
}

impl DeviceRecord {
    /// Create a new device record with a fresh id, initially OFFLINE.
    pub fn new(name: impl Into<String>, device_type: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            category: None,
            sub_type: None,
            device_type: device_type.into(),
            protocol,
            status: DeviceStatus::Offline,
            connection_params: None,
            properties: HashMap::new(),
            capabilities: HashMap::new(),
            platform_token: None,
            platform_device_id: None,
            room: None,
            last_seen: None,
            version: 0,
        }
    }

    /// Set the classification sub-type.
    pub fn with_sub_type(mut self, sub_type: impl Into<String>) -> Self {
        self.sub_type = Some(sub_type.into());
        self
    }

    /// Set the classification category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Set the room label.
    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    /// Link the device to the external platform.
    pub fn with_platform_token(mut self, token: impl Into<String>) -> Self {
        self.platform_token = Some(token.into());
        self
    }

    /// Set a property value.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Whether the device carries an external-platform linkage.
    pub fn has_platform_link(&self) -> bool {
        self.platform_token
            .as_deref()
            .map(|t| !t.is_empty())
            .unwrap_or(false)
    }
}

/// Device store over a storage backend.
pub struct DeviceStore {
    backend: Arc<dyn StorageBackend>,
    /// Serializes read-compare-write in `save_versioned` so the version
    /// check cannot interleave with another writer's commit.
    write_lock: Mutex<()>,
}

impl DeviceStore {
    /// Create a store over the given backend.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    /// Save (upsert) a device, bumping its version.
    pub fn save(&self, record: &DeviceRecord) -> Result<DeviceRecord> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.save_inner(record)
    }

    /// Save a device only if the stored version still matches the version
    /// the caller read. Returns `Error::Conflict` otherwise.
    pub fn save_versioned(&self, record: &DeviceRecord) -> Result<DeviceRecord> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(current) = self.find_by_id_inner(&record.id)? {
            if current.version != record.version {
                return Err(Error::Conflict(
                    format!("device:{}", record.id),
                    record.version,
                ));
            }
        }
        self.save_inner(record)
    }

    fn save_inner(&self, record: &DeviceRecord) -> Result<DeviceRecord> {
        let mut stored = record.clone();
        stored.version = record.version.wrapping_add(1);
        let bytes = serde_json::to_vec(&stored)?;
        self.backend
            .write(DEVICE_TABLE, &stored.id.to_string(), &bytes)?;
        Ok(stored)
    }

    /// Find a device by id.
    pub fn find_by_id(&self, id: &Uuid) -> Result<Option<DeviceRecord>> {
        self.find_by_id_inner(id)
    }

    fn find_by_id_inner(&self, id: &Uuid) -> Result<Option<DeviceRecord>> {
        match self.backend.read(DEVICE_TABLE, &id.to_string())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List all devices.
    pub fn find_all(&self) -> Result<Vec<DeviceRecord>> {
        let items = self.backend.scan(DEVICE_TABLE, "")?;
        let mut result = Vec::with_capacity(items.len());
        for (key, bytes) in items {
            match serde_json::from_slice::<DeviceRecord>(&bytes) {
                Ok(record) => result.push(record),
                Err(e) => tracing::warn!("Skipping undecodable device record {}: {}", key, e),
            }
        }
        Ok(result)
    }

    /// List devices with the given status.
    pub fn find_by_status(&self, status: DeviceStatus) -> Result<Vec<DeviceRecord>> {
        Ok(self
            .find_all()?
            .into_iter()
            .filter(|d| d.status == status)
            .collect())
    }

    /// Find a device by its external-platform token.
    pub fn find_by_platform_token(&self, token: &str) -> Result<Option<DeviceRecord>> {
        if token.is_empty() {
            return Ok(None);
        }
        Ok(self
            .find_all()?
            .into_iter()
            .find(|d| d.platform_token.as_deref() == Some(token)))
    }

    /// Delete a device. Returns false if it did not exist.
    pub fn delete(&self, id: &Uuid) -> Result<bool> {
        Ok(self.backend.delete(DEVICE_TABLE, &id.to_string())?)
    }

    /// Total device count.
    pub fn count(&self) -> Result<usize> {
        Ok(self.find_all()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;

    fn store() -> DeviceStore {
        DeviceStore::new(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn test_save_and_find() {
        let store = store();
        let device = DeviceRecord::new("Hall light", "light", Protocol::Virtual);
        let saved = store.save(&device).unwrap();
        assert_eq!(saved.version, 1);

        let loaded = store.find_by_id(&device.id).unwrap().unwrap();
        assert_eq!(loaded.name, "Hall light");
        assert_eq!(loaded.status, DeviceStatus::Offline);
    }

    #[test]
    fn test_versioned_save_conflict() {
        let store = store();
        let device = DeviceRecord::new("Thermostat", "thermostat", Protocol::Virtual);
        let first = store.save(&device).unwrap();

        // A writer holding the stored version succeeds.
        let updated = store.save_versioned(&first).unwrap();
        assert_eq!(updated.version, 2);

        // A writer holding the stale version conflicts.
        let err = store.save_versioned(&first).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_find_by_status_and_token() {
        let store = store();
        let mut a = DeviceRecord::new("a", "sensor", Protocol::Virtual);
        a.status = DeviceStatus::Online;
        a.platform_token = Some("tok-a".to_string());
        let b = DeviceRecord::new("b", "sensor", Protocol::Mqtt);
        store.save(&a).unwrap();
        store.save(&b).unwrap();

        assert_eq!(store.find_by_status(DeviceStatus::Online).unwrap().len(), 1);
        assert_eq!(store.find_by_status(DeviceStatus::Offline).unwrap().len(), 1);

        let found = store.find_by_platform_token("tok-a").unwrap().unwrap();
        assert_eq!(found.id, a.id);
        assert!(store.find_by_platform_token("").unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let store = store();
        let device = DeviceRecord::new("a", "switch", Protocol::Virtual);
        store.save(&device).unwrap();
        assert!(store.delete(&device.id).unwrap());
        assert!(!store.delete(&device.id).unwrap());
        assert!(store.find_by_id(&device.id).unwrap().is_none());
    }
}
