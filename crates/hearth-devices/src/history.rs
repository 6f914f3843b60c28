//! History services.
//!
//! Service-layer wrappers over the history stores. Inserts tolerate
//! missing identifying data with lenient defaults (logged loudly, since a
//! defaulted field usually means an upstream bug), and read paths degrade
//! to empty lists so a history query can never take down a caller.

use std::sync::Arc;

use tracing::{error, warn};
use uuid::Uuid;

use hearth_storage::{
    LockHistoryEntry, LockHistoryStore, Priority, SensorHistoryEntry, SensorHistoryStore,
};

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Sensor event history.
pub struct SensorHistoryService {
    store: Arc<SensorHistoryStore>,
}

impl SensorHistoryService {
    pub fn new(store: Arc<SensorHistoryStore>) -> Self {
        Self { store }
    }

    /// Append a sensor history entry. Missing name/room fall back to
    /// defaults rather than rejecting the event.
    pub fn add_entry(
        &self,
        device_id: Uuid,
        device_name: Option<&str>,
        room: Option<&str>,
        sensor_type: &str,
        value: &str,
        message: &str,
        priority: Priority,
    ) -> Option<SensorHistoryEntry> {
        let device_name = match device_name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                warn!(
                    "Sensor history insert for {} carries no device name, defaulting",
                    device_id
                );
                "Unknown device".to_string()
            }
        };
        let room = room.unwrap_or("Unassigned").to_string();

        let entry = SensorHistoryEntry {
            id: Uuid::new_v4(),
            device_id,
            device_name,
            room,
            sensor_type: sensor_type.to_string(),
            value: value.to_string(),
            message: message.to_string(),
            priority,
            acknowledged: false,
            timestamp: now_unix(),
        };

        match self.store.append(&entry) {
            Ok(()) => Some(entry),
            Err(e) => {
                error!("Failed to append sensor history: {}", e);
                None
            }
        }
    }

    pub fn all(&self) -> Vec<SensorHistoryEntry> {
        self.store.find_all().unwrap_or_else(|e| {
            error!("Sensor history query failed: {}", e);
            Vec::new()
        })
    }

    pub fn for_device(&self, device_id: &Uuid) -> Vec<SensorHistoryEntry> {
        self.store.find_by_device(device_id).unwrap_or_else(|e| {
            error!("Sensor history query failed: {}", e);
            Vec::new()
        })
    }

    pub fn by_sensor_type(&self, sensor_type: &str) -> Vec<SensorHistoryEntry> {
        self.store
            .find_by_sensor_type(sensor_type)
            .unwrap_or_else(|e| {
                error!("Sensor history query failed: {}", e);
                Vec::new()
            })
    }

    /// Unacknowledged entries, optionally scoped to one device.
    pub fn unacknowledged(&self, device_id: Option<&Uuid>) -> Vec<SensorHistoryEntry> {
        self.store.find_unacknowledged(device_id).unwrap_or_else(|e| {
            error!("Sensor history query failed: {}", e);
            Vec::new()
        })
    }

    /// Acknowledge a single entry. False when the entry does not exist.
    pub fn acknowledge(&self, id: &Uuid) -> bool {
        match self.store.set_acknowledged(id, true) {
            Ok(_) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => {
                error!("Failed to acknowledge history entry {}: {}", id, e);
                false
            }
        }
    }

    /// Acknowledge every unacknowledged entry, optionally scoped to one
    /// device. Returns how many entries were flipped.
    pub fn acknowledge_all(&self, device_id: Option<&Uuid>) -> usize {
        self.store.acknowledge_all(device_id).unwrap_or_else(|e| {
            error!("Bulk acknowledge failed: {}", e);
            0
        })
    }
}

/// Lock action history.
pub struct LockHistoryService {
    store: Arc<LockHistoryStore>,
}

impl LockHistoryService {
    pub fn new(store: Arc<LockHistoryStore>) -> Self {
        Self { store }
    }

    /// Append a lock action. A missing method defaults to "Automatic".
    pub fn add_entry(
        &self,
        device_id: Uuid,
        device_name: Option<&str>,
        action: &str,
        method: Option<&str>,
    ) -> Option<LockHistoryEntry> {
        let device_name = match device_name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                warn!(
                    "Lock history insert for {} carries no device name, defaulting",
                    device_id
                );
                "Unknown device".to_string()
            }
        };
        let method = match method {
            Some(method) if !method.is_empty() => method.to_string(),
            _ => {
                warn!(
                    "Lock history insert for {} carries no method, defaulting",
                    device_id
                );
                "Automatic".to_string()
            }
        };

        let entry = LockHistoryEntry {
            id: Uuid::new_v4(),
            device_id,
            device_name,
            action: action.to_string(),
            method,
            timestamp: now_unix(),
        };

        match self.store.append(&entry) {
            Ok(()) => Some(entry),
            Err(e) => {
                error!("Failed to append lock history: {}", e);
                None
            }
        }
    }

    pub fn all(&self) -> Vec<LockHistoryEntry> {
        self.store.find_all().unwrap_or_else(|e| {
            error!("Lock history query failed: {}", e);
            Vec::new()
        })
    }

    pub fn for_device(&self, device_id: &Uuid) -> Vec<LockHistoryEntry> {
        self.store.find_by_device(device_id).unwrap_or_else(|e| {
            error!("Lock history query failed: {}", e);
            Vec::new()
        })
    }
}
