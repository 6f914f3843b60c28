//! Engine configuration.
//!
//! Serde-deserializable settings for the orchestration layer, the MQTT
//! transport and the external telemetry platform. Defaults come from
//! `hearth_core::config`.

use serde::{Deserialize, Serialize};

use hearth_core::config::{adapters, platform, sync};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds after a successful command during which platform-sourced
    /// reconciliation is suppressed for that device.
    #[serde(default = "default_sync_block_secs")]
    pub sync_block_secs: u64,
    /// Seconds without activity after which an ONLINE device is flipped
    /// OFFLINE.
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
    /// Supervisor tick period.
    #[serde(default = "default_supervisor_period_secs")]
    pub supervisor_period_secs: u64,
    /// MQTT transport settings.
    #[serde(default)]
    pub mqtt: MqttSettings,
    /// External telemetry platform settings.
    #[serde(default)]
    pub platform: PlatformSettings,
}

fn default_sync_block_secs() -> u64 {
    sync::DEFAULT_SYNC_BLOCK_SECS
}

fn default_staleness_secs() -> u64 {
    sync::DEFAULT_STALENESS_SECS
}

fn default_supervisor_period_secs() -> u64 {
    sync::DEFAULT_SUPERVISOR_PERIOD_SECS
}

impl EngineConfig {
    /// Read the full configuration from the environment, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            sync_block_secs: hearth_core::config::env_vars::sync_block_secs(),
            mqtt: MqttSettings::from_env(),
            platform: PlatformSettings::from_env(),
            ..Self::default()
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_block_secs: default_sync_block_secs(),
            staleness_secs: default_staleness_secs(),
            supervisor_period_secs: default_supervisor_period_secs(),
            mqtt: MqttSettings::default(),
            platform: PlatformSettings::default(),
        }
    }
}

/// MQTT transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSettings {
    /// Broker host.
    #[serde(default = "default_broker")]
    pub broker: String,
    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Client id used on the broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Command topic template; `+` is replaced with the device id.
    #[serde(default = "default_command_topic")]
    pub command_topic: String,
    /// State topic pattern subscribed for inbound device state.
    #[serde(default = "default_state_topic")]
    pub state_topic: String,
    /// Transport operation timeout in seconds.
    #[serde(default = "default_transport_timeout")]
    pub timeout_secs: u64,
}

fn default_broker() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "hearth".to_string()
}

fn default_command_topic() -> String {
    adapters::DEFAULT_COMMAND_TOPIC.to_string()
}

fn default_state_topic() -> String {
    "hearth/devices/+/state".to_string()
}

fn default_transport_timeout() -> u64 {
    adapters::DEFAULT_TRANSPORT_TIMEOUT_SECS
}

impl MqttSettings {
    /// Read settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        use hearth_core::config::env_vars;
        let mut settings = Self::default();
        if let Ok(broker) = std::env::var(env_vars::MQTT_BROKER) {
            settings.broker = broker;
        }
        settings
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker: default_broker(),
            port: default_port(),
            client_id: default_client_id(),
            command_topic: default_command_topic(),
            state_topic: default_state_topic(),
            timeout_secs: default_transport_timeout(),
        }
    }
}

/// External telemetry platform settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSettings {
    /// Base address of the platform, e.g. `http://localhost:9090`.
    #[serde(default = "default_platform_url")]
    pub base_url: String,
    /// Login username.
    #[serde(default)]
    pub username: String,
    /// Login password.
    #[serde(default)]
    pub password: String,
    /// HTTP timeout in seconds.
    #[serde(default = "default_platform_timeout")]
    pub timeout_secs: u64,
}

fn default_platform_url() -> String {
    "http://localhost:9090".to_string()
}

fn default_platform_timeout() -> u64 {
    platform::DEFAULT_HTTP_TIMEOUT_SECS
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            base_url: default_platform_url(),
            username: String::new(),
            password: String::new(),
            timeout_secs: default_platform_timeout(),
        }
    }
}

impl PlatformSettings {
    /// Read settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        use hearth_core::config::env_vars;
        let mut settings = Self::default();
        if let Ok(url) = std::env::var(env_vars::PLATFORM_URL) {
            settings.base_url = url;
        }
        if let Ok(user) = std::env::var(env_vars::PLATFORM_USERNAME) {
            settings.username = user;
        }
        if let Ok(pass) = std::env::var(env_vars::PLATFORM_PASSWORD) {
            settings.password = pass;
        }
        settings
    }
}
