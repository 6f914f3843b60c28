//! Domain model re-exports and property-key helpers.
//!
//! Device records are owned by the persistence layer; the orchestration
//! code works on transient copies of them. Property keys intended for
//! external-platform mirroring carry the platform prefix; these helpers
//! keep the prefix handling in one place.

use hearth_core::config::platform::ATTRIBUTE_PREFIX;

pub use hearth_storage::{DeviceRecord as Device, DeviceStatus, Protocol};

/// Add the platform prefix to a property key unless it is already present.
pub fn platform_key(key: &str) -> String {
    if key.starts_with(ATTRIBUTE_PREFIX) {
        key.to_string()
    } else {
        format!("{}{}", ATTRIBUTE_PREFIX, key)
    }
}

/// Strip the platform prefix from a key, if present.
pub fn logical_key(key: &str) -> &str {
    key.strip_prefix(ATTRIBUTE_PREFIX).unwrap_or(key)
}

/// Whether a key carries the platform prefix.
pub fn is_platform_key(key: &str) -> bool {
    key.starts_with(ATTRIBUTE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_key_idempotent() {
        assert_eq!(platform_key("power"), "tb_power");
        assert_eq!(platform_key("tb_power"), "tb_power");
    }

    #[test]
    fn test_logical_key() {
        assert_eq!(logical_key("tb_motion"), "motion");
        assert_eq!(logical_key("motion"), "motion");
    }
}
