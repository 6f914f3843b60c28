//! Protocol adapter contract.
//!
//! An adapter translates abstract commands into transport-specific wire
//! actions. Ordinary transport failures never raise out of the contract:
//! `send_command` and `probe_status` report them as `false`, and
//! `read_properties` returns an empty map when nothing is known. Callers
//! log and decide what to do.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::model::{Device, Protocol};

/// Per-transport implementation of send/probe/read.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// The transport this adapter serves.
    fn protocol(&self) -> Protocol;

    /// Encode and deliver a command. Returns false on any transport or
    /// encoding failure.
    async fn send_command(
        &self,
        device: &Device,
        command: &str,
        parameters: &HashMap<String, String>,
    ) -> bool;

    /// Best-effort liveness check, bounded by the transport timeout.
    async fn probe_status(&self, device: &Device) -> bool;

    /// Current best-known property snapshot; empty when unknown, never
    /// a failure.
    async fn read_properties(&self, device: &Device) -> HashMap<String, String>;
}
