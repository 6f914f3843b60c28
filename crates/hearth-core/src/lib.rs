//! Core abstractions shared across the Hearth smart-home engine.
//!
//! This crate holds the storage backend trait that persistence
//! implementations plug into, and the configuration constants used by the
//! device orchestration layer.

pub mod config;
pub mod storage;

pub use storage::{Result as StorageResult, StorageBackend, StorageError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
