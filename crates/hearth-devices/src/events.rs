//! Inbound device event handling.
//!
//! Events arrive as loose `{device_id, attributes}` bags from whatever
//! transport delivered them. The handler resolves the device, classifies
//! sensor events into a closed set of sensor kinds right at the boundary,
//! persists notable transitions to history, and fires the motion reset
//! command back through the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hearth_storage::Priority;

use crate::history::{LockHistoryService, SensorHistoryService};
use crate::model::{platform_key, Device};
use crate::service::{DeviceError, DeviceService};

/// Inbound event as delivered by a transport: opaque device id plus a
/// flat string attribute bag.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEvent {
    pub device_id: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// The closed set of sensor kinds the handler understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Motion,
    Contact,
    Smoke,
    Leak,
}

impl SensorKind {
    /// All kinds, in classification-priority order.
    const ALL: [SensorKind; 4] = [Self::Motion, Self::Contact, Self::Smoke, Self::Leak];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Motion => "motion",
            Self::Contact => "contact",
            Self::Smoke => "smoke",
            Self::Leak => "leak",
        }
    }

    /// The attribute key carrying this kind's reading.
    fn attribute_key(&self) -> &'static str {
        self.as_str()
    }

    /// Match a free-form tag (sub-type, sensorType property) to a kind.
    fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.to_lowercase();
        if tag.contains("motion") {
            Some(Self::Motion)
        } else if tag.contains("contact") || tag.contains("door") || tag.contains("window") {
            Some(Self::Contact)
        } else if tag.contains("smoke") {
            Some(Self::Smoke)
        } else if tag.contains("leak") || tag.contains("water") {
            Some(Self::Leak)
        } else {
            None
        }
    }

    /// Is this reading a notable transition worth persisting?
    fn is_notable(&self, value: &str) -> bool {
        match self {
            Self::Contact => value.eq_ignore_ascii_case("open"),
            Self::Motion | Self::Smoke | Self::Leak => value.eq_ignore_ascii_case("true"),
        }
    }

    fn priority(&self) -> Priority {
        match self {
            Self::Motion | Self::Contact => Priority::Medium,
            Self::Smoke | Self::Leak => Priority::Critical,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Self::Motion => "Motion detected",
            Self::Contact => "Door/window opened",
            Self::Smoke => "Smoke detected!",
            Self::Leak => "Water leak detected!",
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routes inbound events to sensor classification or lock handling.
pub struct DeviceEventHandler {
    service: Arc<DeviceService>,
    sensor_history: Arc<SensorHistoryService>,
    lock_history: Arc<LockHistoryService>,
}

impl DeviceEventHandler {
    pub fn new(
        service: Arc<DeviceService>,
        sensor_history: Arc<SensorHistoryService>,
        lock_history: Arc<LockHistoryService>,
    ) -> Self {
        Self {
            service,
            sensor_history,
            lock_history,
        }
    }

    /// Process one inbound event. Unresolvable events are dropped with a
    /// diagnostic, never surfaced as errors.
    pub async fn handle_event(&self, event: DeviceEvent) {
        let Ok(device_id) = Uuid::parse_str(&event.device_id) else {
            warn!("Dropping event with malformed device id '{}'", event.device_id);
            return;
        };

        let device = match self.service.find_by_id(&device_id) {
            Ok(Some(device)) => device,
            Ok(None) => {
                warn!("Dropping event for unknown device {}", device_id);
                return;
            }
            Err(e) => {
                warn!("Device lookup failed for event on {}: {}", device_id, e);
                return;
            }
        };

        match device.device_type.to_lowercase().as_str() {
            "sensor" => self.handle_sensor_event(&device, &event.attributes).await,
            "lock" => self.handle_lock_event(&device, &event.attributes),
            other => {
                debug!(
                    "No event handling for device type '{}' (device {})",
                    other, device.name
                );
            }
        }
    }

    /// Classify the sensor by priority chain: explicit sub-type, then the
    /// sensorType property, then presence of a type-specific attribute
    /// key. First match wins.
    fn classify(device: &Device, attributes: &HashMap<String, String>) -> Option<SensorKind> {
        if let Some(sub_type) = &device.sub_type {
            if let Some(kind) = SensorKind::from_tag(sub_type) {
                return Some(kind);
            }
        }

        let type_property = device
            .properties
            .get(&platform_key("sensorType"))
            .or_else(|| device.properties.get("sensorType"));
        if let Some(tag) = type_property {
            if let Some(kind) = SensorKind::from_tag(tag) {
                return Some(kind);
            }
        }

        SensorKind::ALL
            .into_iter()
            .find(|kind| Self::reading(kind, attributes).is_some())
    }

    /// The attribute value for a kind, accepting the plain or
    /// platform-prefixed key.
    fn reading<'a>(kind: &SensorKind, attributes: &'a HashMap<String, String>) -> Option<&'a String> {
        attributes
            .get(kind.attribute_key())
            .or_else(|| attributes.get(&platform_key(kind.attribute_key())))
    }

    async fn handle_sensor_event(&self, device: &Device, attributes: &HashMap<String, String>) {
        let Some(kind) = Self::classify(device, attributes) else {
            debug!(
                "Dropping unclassifiable sensor event for {} (attributes: {:?})",
                device.name,
                attributes.keys().collect::<Vec<_>>()
            );
            return;
        };

        let Some(value) = Self::reading(&kind, attributes) else {
            debug!(
                "Sensor event for {} classified as {} but carries no reading",
                device.name, kind
            );
            return;
        };

        if !kind.is_notable(value) {
            debug!(
                "Non-notable {} reading '{}' for {}, not persisted",
                kind, value, device.name
            );
            return;
        }

        info!("{} event for device {}: {}", kind, device.name, kind.message());
        self.sensor_history.add_entry(
            device.id,
            Some(&device.name),
            device.room.as_deref(),
            kind.as_str(),
            value,
            kind.message(),
            kind.priority(),
        );

        if kind == SensorKind::Motion {
            self.reset_motion(device).await;
        }
    }

    /// Return an edge-triggered motion sensor to its armed baseline. The
    /// reset runs through the orchestrator like any user command so the
    /// stored properties and platform attributes stay in step.
    async fn reset_motion(&self, device: &Device) {
        let mut parameters = HashMap::new();
        parameters.insert("motion".to_string(), "false".to_string());

        match self
            .service
            .send_command_to_device(&device.id, "setState", &parameters)
            .await
        {
            Ok(true) => debug!("Motion sensor {} reset to baseline", device.name),
            Ok(false) => warn!("Motion reset for {} failed at the transport", device.name),
            Err(DeviceError::NotFound(_)) => {
                warn!("Motion sensor {} vanished before reset", device.name)
            }
            Err(e) => warn!("Motion reset for {} failed: {}", device.name, e),
        }
    }

    /// Lock events: capture the action in history. No transition logic
    /// beyond that yet.
    fn handle_lock_event(&self, device: &Device, attributes: &HashMap<String, String>) {
        let action = attributes
            .get("action")
            .or_else(|| attributes.get(&platform_key("action")))
            .or_else(|| attributes.get("state"))
            .or_else(|| attributes.get(&platform_key("state")));

        let Some(action) = action else {
            debug!("Lock event for {} carries no action, dropped", device.name);
            return;
        };

        let method = attributes
            .get("method")
            .or_else(|| attributes.get(&platform_key("method")))
            .map(String::as_str);

        self.lock_history
            .add_entry(device.id, Some(&device.name), action, method);
    }
}
