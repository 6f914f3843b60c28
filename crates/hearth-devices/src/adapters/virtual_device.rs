//! Virtual protocol adapter.
//!
//! Simulates devices entirely in memory so the engine can run without any
//! physical hardware or broker. Each device gets a lazily-initialized state
//! keyed by its type, commands mutate that state, and a throttled refresh
//! drifts sensor readings so repeated reads look alive.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use tracing::{debug, warn};

use hearth_core::config::adapters::VIRTUAL_REFRESH_SECS;

use crate::adapter::ProtocolAdapter;
use crate::model::{logical_key, Device, Protocol};

/// Virtual adapter: in-memory device simulation.
pub struct VirtualAdapter {
    /// Simulated state per device id.
    state: DashMap<String, HashMap<String, String>>,
    /// Unix seconds of the last drift pass per device id.
    last_refresh: DashMap<String, i64>,
    /// Probability that a recognized command succeeds.
    success_rate: f64,
}

impl Default for VirtualAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualAdapter {
    pub fn new() -> Self {
        Self {
            state: DashMap::new(),
            last_refresh: DashMap::new(),
            success_rate: 0.99,
        }
    }

    /// Override the simulated success rate. Tests use 1.0 to make command
    /// outcomes deterministic.
    pub fn with_success_rate(mut self, rate: f64) -> Self {
        self.success_rate = rate.clamp(0.0, 1.0);
        self
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Initial state for a device that has never been touched.
    fn default_state(device_type: &str) -> HashMap<String, String> {
        let mut state = HashMap::new();
        match device_type {
            "light" => {
                state.insert("power".to_string(), "off".to_string());
                state.insert("brightness".to_string(), "0".to_string());
                state.insert("color".to_string(), "FFFFFF".to_string());
            }
            "thermostat" => {
                state.insert("power".to_string(), "on".to_string());
                state.insert("mode".to_string(), "heat".to_string());
                state.insert("temperature".to_string(), "21.5".to_string());
                state.insert("target_temperature".to_string(), "22.0".to_string());
            }
            "sensor" => {
                let mut rng = rand::thread_rng();
                state.insert(
                    "temperature".to_string(),
                    format!("{:.1}", 18.0 + rng.gen::<f64>() * 8.0),
                );
                state.insert(
                    "humidity".to_string(),
                    format!("{:.0}", 30.0 + rng.gen::<f64>() * 40.0),
                );
                state.insert("battery".to_string(), "100".to_string());
            }
            _ => {
                state.insert("state".to_string(), "off".to_string());
            }
        }
        state
    }

    fn ensure_state(&self, device: &Device) {
        self.state
            .entry(device.id.to_string())
            .or_insert_with(|| Self::default_state(&device.device_type));
    }

    /// Apply a command to the simulated state. Returns false for commands
    /// the simulation does not understand.
    fn apply_command(
        state: &mut HashMap<String, String>,
        command: &str,
        parameters: &HashMap<String, String>,
    ) -> bool {
        // Parameters may still carry platform-prefixed keys.
        let params: HashMap<String, String> = parameters
            .iter()
            .map(|(k, v)| (logical_key(k).to_string(), v.clone()))
            .collect();

        match command.to_lowercase().as_str() {
            "setstate" => {
                for (key, value) in &params {
                    state.insert(key.clone(), value.clone());
                }
                true
            }
            "toggle" => {
                let flipped = match state.get("power").map(String::as_str) {
                    Some("on") => "off",
                    _ => "on",
                };
                state.insert("power".to_string(), flipped.to_string());
                true
            }
            "power" | "setpower" => {
                let next = match params.get("power").or_else(|| params.get("value")) {
                    Some(value) => value.clone(),
                    // No explicit value acts as a toggle.
                    None => match state.get("power").map(String::as_str) {
                        Some("on") => "off".to_string(),
                        _ => "on".to_string(),
                    },
                };
                state.insert("power".to_string(), next);
                true
            }
            "brightness" | "setbrightness" => {
                if let Some(value) = params
                    .get("brightness")
                    .or_else(|| params.get("level"))
                    .or_else(|| params.get("value"))
                {
                    state.insert("brightness".to_string(), value.clone());
                    true
                } else {
                    false
                }
            }
            "color" | "setcolor" => {
                if let Some(value) = params.get("color").or_else(|| params.get("value")) {
                    state.insert("color".to_string(), value.clone());
                    true
                } else {
                    false
                }
            }
            "settargettemperature" | "settemperature" | "temperature" => {
                if let Some(value) = params
                    .get("target_temperature")
                    .or_else(|| params.get("temperature"))
                    .or_else(|| params.get("value"))
                {
                    state.insert("target_temperature".to_string(), value.clone());
                    true
                } else {
                    false
                }
            }
            other => {
                debug!("Virtual adapter ignoring unrecognized command '{}'", other);
                false
            }
        }
    }

    /// Drift the simulated readings, at most once per refresh interval.
    fn refresh_at(&self, device: &Device, now: i64) {
        let device_id = device.id.to_string();
        {
            let last = self.last_refresh.get(&device_id).map(|v| *v).unwrap_or(0);
            if now - last < VIRTUAL_REFRESH_SECS {
                return;
            }
        }
        self.last_refresh.insert(device_id.clone(), now);

        let Some(mut state) = self.state.get_mut(&device_id) else {
            return;
        };
        let mut rng = rand::thread_rng();

        match device.device_type.as_str() {
            "sensor" => {
                if let Some(temp) = state.get("temperature").and_then(|v| v.parse::<f64>().ok()) {
                    let drift = (rng.gen::<f64>() - 0.5) * 0.5;
                    state.insert("temperature".to_string(), format!("{:.1}", temp + drift));
                }
                if let Some(hum) = state.get("humidity").and_then(|v| v.parse::<f64>().ok()) {
                    let drift = (rng.gen::<f64>() - 0.5) * 2.0;
                    let next = (hum + drift).clamp(0.0, 100.0);
                    state.insert("humidity".to_string(), format!("{:.0}", next));
                }
                if let Some(batt) = state.get("battery").and_then(|v| v.parse::<f64>().ok()) {
                    if batt > 0.0 && rng.gen::<f64>() < 0.1 {
                        state.insert("battery".to_string(), format!("{:.0}", batt - 1.0));
                    }
                }
            }
            "thermostat" => {
                let current = state
                    .get("temperature")
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(21.5);
                let target = state
                    .get("target_temperature")
                    .and_then(|v| v.parse::<f64>().ok())
                    .unwrap_or(current);
                // Damped approach toward the setpoint plus a little noise.
                let noise = (rng.gen::<f64>() - 0.5) * 0.2;
                let next = current + (target - current) * 0.1 + noise;
                state.insert("temperature".to_string(), format!("{:.1}", next));
            }
            _ => {}
        }
    }
}

#[async_trait]
impl ProtocolAdapter for VirtualAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Virtual
    }

    async fn send_command(
        &self,
        device: &Device,
        command: &str,
        parameters: &HashMap<String, String>,
    ) -> bool {
        self.ensure_state(device);

        if rand::thread_rng().gen::<f64>() >= self.success_rate {
            warn!(
                "Simulated transport failure for device {} command '{}'",
                device.name, command
            );
            return false;
        }

        let mut state = match self.state.get_mut(&device.id.to_string()) {
            Some(state) => state,
            None => return false,
        };
        let applied = Self::apply_command(&mut state, command, parameters);
        if applied {
            debug!(
                "Virtual device {} applied command '{}'",
                device.name, command
            );
        }
        applied
    }

    async fn probe_status(&self, device: &Device) -> bool {
        // Virtual hardware never goes away once it exists.
        self.ensure_state(device);
        true
    }

    async fn read_properties(&self, device: &Device) -> HashMap<String, String> {
        self.ensure_state(device);
        self.refresh_at(device, Self::now());
        self.state
            .get(&device.id.to_string())
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }
}
