//! MQTT protocol adapter.
//!
//! Commands are encoded as JSON `{command, parameters}` payloads and
//! published at QoS 1 to a topic derived from the command-topic template
//! (`+` replaced with the device id). The adapter keeps a local cache of
//! last-known device properties: the background event loop refreshes it
//! from inbound state messages, and a successful publish optimistically
//! updates it for recognized state-bearing keys so reads reflect the
//! command before any confirmation arrives.
//!
//! The cache is process-scoped and rebuilt from scratch on restart; it is
//! derived state, never source of truth.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::adapter::ProtocolAdapter;
use crate::config::MqttSettings;
use crate::model::{Device, Protocol};

/// Parameter keys that are mirrored into the property cache on a
/// successful publish.
const STATE_BEARING_KEYS: [&str; 3] = ["state", "power", "value"];

/// MQTT adapter: publishes commands to the broker and tracks last-known
/// device properties from inbound state messages.
pub struct MqttAdapter {
    settings: MqttSettings,
    client: AsyncClient,
    /// Event loop handed to `start()`; present until the loop is spawned.
    event_loop: Mutex<Option<rumqttc::EventLoop>>,
    /// Last-known properties per device id, shared with the event loop.
    properties: Arc<DashMap<String, HashMap<String, String>>>,
}

impl MqttAdapter {
    /// Create the adapter. No network traffic happens until `start()`.
    pub fn new(settings: MqttSettings) -> Self {
        let mut options = MqttOptions::new(
            settings.client_id.clone(),
            settings.broker.clone(),
            settings.port,
        );
        options.set_keep_alive(Duration::from_secs(30));

        let (client, event_loop) = AsyncClient::new(options, 64);

        Self {
            settings,
            client,
            event_loop: Mutex::new(Some(event_loop)),
            properties: Arc::new(DashMap::new()),
        }
    }

    /// Connect to the broker: subscribe to the state topic and spawn the
    /// event loop that feeds the property cache.
    pub async fn start(&self) {
        if let Err(e) = self
            .client
            .subscribe(self.settings.state_topic.as_str(), QoS::AtLeastOnce)
            .await
        {
            warn!(
                "Failed to subscribe to state topic {}: {}",
                self.settings.state_topic, e
            );
        }

        let Some(mut event_loop) = self.event_loop.lock().await.take() else {
            debug!("MQTT event loop already running");
            return;
        };

        let properties = self.properties.clone();
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        Self::handle_state_message(&properties, &publish.topic, &publish.payload);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT event loop error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        info!(
            "MQTT adapter connected to {}:{}",
            self.settings.broker, self.settings.port
        );
    }

    /// Command topic for a device, from the configured template.
    fn command_topic_for(&self, device_id: &str) -> String {
        self.settings.command_topic.replace('+', device_id)
    }

    /// Inbound state message: payload is a flat JSON object of properties.
    /// The device id is the second-to-last topic segment
    /// (`.../devices/{id}/state`).
    fn handle_state_message(
        properties: &DashMap<String, HashMap<String, String>>,
        topic: &str,
        payload: &[u8],
    ) {
        let segments: Vec<&str> = topic.split('/').collect();
        let Some(device_id) = segments.iter().rev().nth(1) else {
            debug!("Ignoring state message on unroutable topic {}", topic);
            return;
        };

        let parsed: serde_json::Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!("Undecodable state payload on {}: {}", topic, e);
                return;
            }
        };
        let Some(object) = parsed.as_object() else {
            warn!("State payload on {} is not a JSON object", topic);
            return;
        };

        let mut snapshot = HashMap::with_capacity(object.len());
        for (key, value) in object {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            snapshot.insert(key.clone(), text);
        }
        properties.insert(device_id.to_string(), snapshot);
    }

    /// Mirror state-bearing parameters into the cache after a successful
    /// publish so reads reflect the command optimistically.
    fn apply_optimistic_update(&self, device_id: &str, parameters: &HashMap<String, String>) {
        if !STATE_BEARING_KEYS.iter().any(|k| parameters.contains_key(*k)) {
            return;
        }
        let mut entry = self.properties.entry(device_id.to_string()).or_default();
        for key in STATE_BEARING_KEYS {
            if let Some(value) = parameters.get(key) {
                entry.insert(key.to_string(), value.clone());
            }
        }
    }
}

#[async_trait]
impl ProtocolAdapter for MqttAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Mqtt
    }

    async fn send_command(
        &self,
        device: &Device,
        command: &str,
        parameters: &HashMap<String, String>,
    ) -> bool {
        let device_id = device.id.to_string();
        let topic = self.command_topic_for(&device_id);

        let payload = json!({
            "command": command,
            "parameters": parameters,
        });
        let bytes = match serde_json::to_vec(&payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode command '{}' for {}: {}", command, device.name, e);
                return false;
            }
        };

        debug!(
            "Publishing command '{}' for device {} ({}) on {}",
            command, device.name, device_id, topic
        );

        let publish = self.client.publish(topic.as_str(), QoS::AtLeastOnce, false, bytes);
        match tokio::time::timeout(Duration::from_secs(self.settings.timeout_secs), publish).await
        {
            Ok(Ok(())) => {
                self.apply_optimistic_update(&device_id, parameters);
                true
            }
            Ok(Err(e)) => {
                warn!("MQTT publish failed for device {}: {}", device.name, e);
                false
            }
            Err(_) => {
                warn!(
                    "MQTT publish timed out after {}s for device {}",
                    self.settings.timeout_secs, device.name
                );
                false
            }
        }
    }

    async fn probe_status(&self, device: &Device) -> bool {
        // A device is considered reachable while we hold cached state for
        // it; the state listener keeps the cache fresh.
        self.properties.contains_key(&device.id.to_string())
    }

    async fn read_properties(&self, device: &Device) -> HashMap<String, String> {
        self.properties
            .get(&device.id.to_string())
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }
}
