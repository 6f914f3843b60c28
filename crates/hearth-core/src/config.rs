//! Engine-wide configuration defaults and environment helpers.
//!
//! Central place for the timing constants the orchestration layer depends
//! on, so the numbers are not scattered across crates.

/// Synchronization / anti-echo constants.
pub mod sync {
    /// Seconds after a successful command during which externally-sourced
    /// reconciliation is suppressed for that device.
    pub const DEFAULT_SYNC_BLOCK_SECS: u64 = 90;

    /// Seconds without activity after which an ONLINE device is flipped to
    /// OFFLINE by the supervisor.
    pub const DEFAULT_STALENESS_SECS: u64 = 30 * 60;

    /// Period of the status supervisor tick.
    pub const DEFAULT_SUPERVISOR_PERIOD_SECS: u64 = 60;
}

/// Adapter constants.
pub mod adapters {
    /// Minimum interval between virtual-device sensor refreshes, per
    /// device. Signed because it is compared against unix-second clocks.
    pub const VIRTUAL_REFRESH_SECS: i64 = 30;

    /// Default MQTT command topic template; `+` is replaced with the
    /// device id.
    pub const DEFAULT_COMMAND_TOPIC: &str = "hearth/devices/+/command";

    /// Default transport operation timeout.
    pub const DEFAULT_TRANSPORT_TIMEOUT_SECS: u64 = 10;
}

/// External telemetry platform constants.
pub mod platform {
    /// Prefix used for properties mirrored to the external platform.
    pub const ATTRIBUTE_PREFIX: &str = "tb_";

    /// Default HTTP timeout for platform calls.
    pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
}

/// Environment variable names recognized by the engine.
pub mod env_vars {
    pub const PLATFORM_URL: &str = "HEARTH_PLATFORM_URL";
    pub const PLATFORM_USERNAME: &str = "HEARTH_PLATFORM_USERNAME";
    pub const PLATFORM_PASSWORD: &str = "HEARTH_PLATFORM_PASSWORD";
    pub const MQTT_BROKER: &str = "HEARTH_MQTT_BROKER";
    pub const SYNC_BLOCK_SECS: &str = "HEARTH_SYNC_BLOCK_SECS";

    use super::sync;

    /// Sync-block window from the environment, or the default.
    pub fn sync_block_secs() -> u64 {
        std::env::var(SYNC_BLOCK_SECS)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(sync::DEFAULT_SYNC_BLOCK_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_sane() {
        assert_eq!(sync::DEFAULT_SYNC_BLOCK_SECS, 90);
        assert_eq!(sync::DEFAULT_STALENESS_SECS, 1800);
        assert!(adapters::DEFAULT_COMMAND_TOPIC.contains('+'));
    }

    #[test]
    fn test_env_fallback() {
        // Unset variable falls back to the default.
        std::env::remove_var(env_vars::SYNC_BLOCK_SECS);
        assert_eq!(env_vars::sync_block_secs(), 90);
    }
}
