//! Device Command & Synchronization Engine
//!
//! This crate is the heart of the Hearth smart-home hub: it dispatches
//! commands to devices over pluggable protocol transports, keeps local
//! device state authoritative against a cloud platform that echoes stale
//! reads, supervises device liveness, and turns raw inbound sensor events
//! into durable, classified history.
//!
//! ## Architecture
//!
//! - **ProtocolAdapter**: the transport seam. MQTT and Virtual adapters
//!   ship in-tree; new transports add an enum variant plus an impl.
//! - **AdapterRegistry**: routes every transport call by the device's
//!   protocol, failing closed for unregistered protocols.
//! - **DeviceService**: the orchestrator. Command dispatch with the
//!   anti-echo window, property persistence with optimistic-write retry,
//!   the periodic status supervisor, and platform mirroring.
//! - **DeviceEventHandler**: classifies inbound sensor events into a
//!   closed kind set, persists notable transitions, and fires the motion
//!   reset command back through the orchestrator.
//! - **PlatformClient**: best-effort REST mirror to the external
//!   telemetry platform; its failures never block local state.

pub mod adapter;
pub mod adapters;
pub mod config;
pub mod dispatch;
pub mod events;
pub mod history;
pub mod model;
pub mod platform;
pub mod service;

pub use adapter::ProtocolAdapter;
pub use adapters::{MqttAdapter, VirtualAdapter};
pub use config::{EngineConfig, MqttSettings, PlatformSettings};
pub use dispatch::AdapterRegistry;
pub use events::{DeviceEvent, DeviceEventHandler, SensorKind};
pub use history::{LockHistoryService, SensorHistoryService};
pub use model::{Device, DeviceStatus, Protocol};
pub use platform::PlatformClient;
pub use service::{DeviceError, DeviceResult, DeviceService, SupervisorHandle, SyncGuard};
