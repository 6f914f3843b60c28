//! Storage backend implementations.
//!
//! Implementations of the `StorageBackend` trait for the engines Hearth
//! supports, feature-gated for conditional compilation.

#[cfg(feature = "redb")]
pub mod redb;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "redb")]
pub use redb::{RedbBackend, RedbBackendConfig};

#[cfg(feature = "memory")]
pub use memory::MemoryBackend;

/// Get list of available backend types (based on enabled features).
pub fn available_backends() -> Vec<&'static str> {
    let mut backends = Vec::new();
    #[cfg(feature = "redb")]
    backends.push("redb");
    #[cfg(feature = "memory")]
    backends.push("memory");
    backends
}
