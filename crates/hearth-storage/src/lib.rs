//! Persistence layer for the Hearth smart-home engine.
//!
//! Domain stores (devices, sensor/lock history) layered over pluggable
//! `StorageBackend` implementations (redb for persistence, memory for
//! tests and throwaway deployments). Values are JSON-encoded records in a
//! single namespaced table per backend.

pub mod backends;
pub mod devices;
pub mod error;
pub mod history;

pub use backends::available_backends;
#[cfg(feature = "memory")]
pub use backends::MemoryBackend;
#[cfg(feature = "redb")]
pub use backends::{RedbBackend, RedbBackendConfig};

pub use devices::{DeviceRecord, DeviceStatus, DeviceStore, Protocol};
pub use error::{Error, Result};
pub use history::{
    LockHistoryEntry, LockHistoryStore, Priority, SensorHistoryEntry, SensorHistoryStore,
};
