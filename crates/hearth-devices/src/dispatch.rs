//! Protocol-keyed adapter registry.
//!
//! The engine never talks to a transport directly: every command, probe,
//! and property read is routed through the registry by the device's
//! protocol. A device whose protocol has no registered adapter fails
//! closed.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::adapter::ProtocolAdapter;
use crate::model::{Device, Protocol};

/// Routes transport operations to the adapter registered for each protocol.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Protocol, Arc<dyn ProtocolAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for the same
    /// protocol.
    pub fn register(&mut self, adapter: Arc<dyn ProtocolAdapter>) {
        let protocol = adapter.protocol();
        info!("Registered {} protocol adapter", protocol);
        self.adapters.insert(protocol, adapter);
    }

    pub fn get(&self, protocol: Protocol) -> Option<Arc<dyn ProtocolAdapter>> {
        self.adapters.get(&protocol).cloned()
    }

    pub async fn send_command(
        &self,
        device: &Device,
        command: &str,
        parameters: &HashMap<String, String>,
    ) -> bool {
        match self.get(device.protocol) {
            Some(adapter) => adapter.send_command(device, command, parameters).await,
            None => {
                warn!(
                    "No adapter registered for protocol {} (device {})",
                    device.protocol, device.name
                );
                false
            }
        }
    }

    pub async fn probe_status(&self, device: &Device) -> bool {
        match self.get(device.protocol) {
            Some(adapter) => adapter.probe_status(device).await,
            None => {
                warn!(
                    "No adapter registered for protocol {} (device {})",
                    device.protocol, device.name
                );
                false
            }
        }
    }

    pub async fn read_properties(&self, device: &Device) -> HashMap<String, String> {
        match self.get(device.protocol) {
            Some(adapter) => adapter.read_properties(device).await,
            None => HashMap::new(),
        }
    }
}
