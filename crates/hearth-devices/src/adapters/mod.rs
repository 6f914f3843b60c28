//! Protocol adapter implementations.

pub mod mqtt;
pub mod virtual_device;

pub use mqtt::MqttAdapter;
pub use virtual_device::VirtualAdapter;
