//! Device orchestrator.
//!
//! Owns command dispatch, the anti-echo suppression window, and the
//! background status supervisor. All transport and platform traffic flows
//! through here; the HTTP layer above and the event handler beside it
//! only ever talk to `DeviceService`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use hearth_storage::DeviceStore;

use crate::config::EngineConfig;
use crate::dispatch::AdapterRegistry;
use crate::model::{platform_key, Device, DeviceStatus};
use crate::platform::PlatformClient;

/// Errors surfaced to the caller layer. Transport and platform failures
/// are reported as boolean results instead.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    NotFound(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] hearth_storage::Error),
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Anti-echo suppression window.
///
/// Tracks the unix-second timestamp of the last successful command per
/// device. Reconciliation paths consult `is_blocked` before overwriting
/// local properties with externally-sourced values. Process-scoped by
/// design: a restart loses the window, which at worst admits one extra
/// external overwrite.
pub struct SyncGuard {
    stamps: DashMap<Uuid, i64>,
    window_secs: i64,
}

impl SyncGuard {
    pub fn new(window_secs: u64) -> Self {
        Self {
            stamps: DashMap::new(),
            window_secs: window_secs as i64,
        }
    }

    /// Record a successful command for the device.
    pub fn stamp(&self, device_id: &Uuid) {
        self.stamp_at(device_id, now_unix());
    }

    pub(crate) fn stamp_at(&self, device_id: &Uuid, now: i64) {
        self.stamps.insert(*device_id, now);
    }

    /// Is external reconciliation currently suppressed for this device?
    pub fn is_blocked(&self, device_id: &Uuid) -> bool {
        self.is_blocked_at(device_id, now_unix())
    }

    pub(crate) fn is_blocked_at(&self, device_id: &Uuid, now: i64) -> bool {
        match self.stamps.get(device_id) {
            Some(stamped) => now - *stamped < self.window_secs,
            None => false,
        }
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Shutdown handle for the status supervisor task.
pub struct SupervisorHandle {
    shutdown: watch::Sender<bool>,
}

impl SupervisorHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Central device orchestrator.
pub struct DeviceService {
    store: Arc<DeviceStore>,
    adapters: Arc<AdapterRegistry>,
    platform: Option<Arc<PlatformClient>>,
    sync_guard: SyncGuard,
    /// Per-device dispatch locks so read-modify-write cycles on the same
    /// record never interleave.
    device_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    config: EngineConfig,
}

impl DeviceService {
    pub fn new(
        store: Arc<DeviceStore>,
        adapters: Arc<AdapterRegistry>,
        platform: Option<Arc<PlatformClient>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            adapters,
            platform,
            sync_guard: SyncGuard::new(config.sync_block_secs),
            device_locks: DashMap::new(),
            config,
        }
    }

    fn lock_for(&self, device_id: &Uuid) -> Arc<Mutex<()>> {
        self.device_locks
            .entry(*device_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ---- queries ----

    pub fn find_by_id(&self, id: &Uuid) -> DeviceResult<Option<Device>> {
        Ok(self.store.find_by_id(id)?)
    }

    pub fn find_all(&self) -> DeviceResult<Vec<Device>> {
        Ok(self.store.find_all()?)
    }

    pub fn find_by_status(&self, status: DeviceStatus) -> DeviceResult<Vec<Device>> {
        Ok(self.store.find_by_status(status)?)
    }

    pub fn find_by_platform_token(&self, token: &str) -> DeviceResult<Option<Device>> {
        Ok(self.store.find_by_platform_token(token)?)
    }

    /// Find the local device mirroring a given platform-side device id.
    pub fn find_by_platform_id(&self, platform_device_id: &str) -> DeviceResult<Option<Device>> {
        if platform_device_id.is_empty() {
            return Ok(None);
        }
        Ok(self
            .store
            .find_all()?
            .into_iter()
            .find(|d| d.platform_device_id.as_deref() == Some(platform_device_id)))
    }

    /// Register or update a device record.
    pub fn save_device(&self, device: &Device) -> DeviceResult<Device> {
        Ok(self.store.save(device)?)
    }

    /// Remove a device, deleting its platform twin best-effort first.
    pub async fn delete_device(&self, id: &Uuid) -> DeviceResult<bool> {
        let Some(device) = self.store.find_by_id(id)? else {
            return Ok(false);
        };

        if let Some(platform) = &self.platform {
            if let Some(remote_id) = &device.platform_device_id {
                if !platform.delete_remote_device(remote_id).await {
                    warn!(
                        "Platform twin of {} not deleted, removing local record anyway",
                        device.name
                    );
                }
            }
        }

        Ok(self.store.delete(id)?)
    }

    // ---- command dispatch ----

    /// Dispatch a command to a device through its protocol adapter.
    ///
    /// On transport success: parameters (except the command name itself
    /// and empty values) are normalized to platform-prefixed property
    /// keys, compared to the stored properties, and persisted only if
    /// anything actually changed. The anti-echo window is stamped on any
    /// successful command, delta or not. Changed properties are pushed to
    /// the platform when the device is linked.
    ///
    /// Returns the adapter's success boolean; only a missing device is an
    /// error.
    pub async fn send_command_to_device(
        &self,
        device_id: &Uuid,
        command: &str,
        parameters: &HashMap<String, String>,
    ) -> DeviceResult<bool> {
        let lock = self.lock_for(device_id);
        let _guard = lock.lock().await;

        let Some(device) = self.store.find_by_id(device_id)? else {
            return Err(DeviceError::NotFound(*device_id));
        };

        if !self.adapters.send_command(&device, command, parameters).await {
            debug!(
                "Command '{}' failed at the transport for device {}",
                command, device.name
            );
            return Ok(false);
        }

        // Stamped regardless of whether any property changed: the platform
        // may echo pre-command state for a while either way.
        self.sync_guard.stamp(device_id);

        let delta = Self::property_delta(&device, parameters);
        if delta.is_empty() {
            return Ok(true);
        }

        let updated = match self.persist_delta(device, &delta) {
            Some(updated) => updated,
            None => return Ok(false),
        };

        if updated.has_platform_link() {
            if let Some(platform) = &self.platform {
                if !platform.push_attribute_delta(&updated, &delta).await {
                    warn!(
                        "Attribute push for {} failed, local state kept",
                        updated.name
                    );
                }
            }
        }

        Ok(true)
    }

    /// Properties a successful command would change, keyed by their
    /// platform-prefixed names. The command-name parameter and empty
    /// values never count.
    fn property_delta(device: &Device, parameters: &HashMap<String, String>) -> HashMap<String, String> {
        let mut delta = HashMap::new();
        for (key, value) in parameters {
            if key == "command" || value.is_empty() {
                continue;
            }
            let stored_key = platform_key(key);
            if device.properties.get(&stored_key) != Some(value) {
                delta.insert(stored_key, value.clone());
            }
        }
        delta
    }

    /// Merge a property delta and save, retrying once on a version
    /// conflict with a fresh read. `None` means the write lost twice.
    fn persist_delta(&self, mut device: Device, delta: &HashMap<String, String>) -> Option<Device> {
        for attempt in 0..2 {
            device.properties.extend(delta.clone());
            match self.store.save_versioned(&device) {
                Ok(saved) => return Some(saved),
                Err(e) if e.is_conflict() && attempt == 0 => {
                    debug!("Version conflict saving {}, retrying with fresh read", device.id);
                    match self.store.find_by_id(&device.id) {
                        Ok(Some(fresh)) => device = fresh,
                        _ => return None,
                    }
                }
                Err(e) => {
                    warn!("Failed to persist properties for {}: {}", device.id, e);
                    return None;
                }
            }
        }
        None
    }

    /// Update a single stored property, without touching the transport.
    /// Returns `Ok(false)` when the device does not carry the property.
    /// Linked devices get the change mirrored to the platform.
    pub async fn update_device_property(
        &self,
        device_id: &Uuid,
        key: &str,
        value: &str,
    ) -> DeviceResult<bool> {
        let lock = self.lock_for(device_id);
        let _guard = lock.lock().await;

        let Some(device) = self.store.find_by_id(device_id)? else {
            return Err(DeviceError::NotFound(*device_id));
        };

        let stored_key = platform_key(key);
        if !device.properties.contains_key(&stored_key) {
            return Ok(false);
        }

        let mut delta = HashMap::new();
        delta.insert(stored_key, value.to_string());
        let Some(updated) = self.persist_delta(device, &delta) else {
            return Ok(false);
        };

        if updated.has_platform_link() {
            if let Some(platform) = &self.platform {
                if !platform.push_attribute_delta(&updated, &delta).await {
                    warn!(
                        "Attribute push for {} failed, local state kept",
                        updated.name
                    );
                }
            }
        }
        Ok(true)
    }

    /// Explicit status transition. Stamps `last_seen` on any transition
    /// into ONLINE. Takes the per-device lock so the read-modify-write
    /// cannot interleave with a concurrent command dispatch.
    pub async fn update_device_status(
        &self,
        device_id: &Uuid,
        status: DeviceStatus,
    ) -> DeviceResult<Device> {
        let lock = self.lock_for(device_id);
        let _guard = lock.lock().await;

        let Some(mut device) = self.store.find_by_id(device_id)? else {
            return Err(DeviceError::NotFound(*device_id));
        };

        if device.status != status {
            info!("Device {} transitioning {} -> {}", device.name, device.status, status);
        }
        device.status = status;
        if status == DeviceStatus::Online {
            device.last_seen = Some(now_unix());
        }
        Ok(self.store.save(&device)?)
    }

    /// Live reachability probe. A device that answers while OFFLINE comes
    /// back ONLINE (stamping `last_seen`); one that stays silent while
    /// ONLINE goes OFFLINE. Returns the probe result.
    pub async fn probe_device(&self, device_id: &Uuid) -> DeviceResult<bool> {
        let Some(device) = self.store.find_by_id(device_id)? else {
            return Err(DeviceError::NotFound(*device_id));
        };

        let reachable = self.adapters.probe_status(&device).await;
        match (reachable, device.status) {
            (true, DeviceStatus::Offline) => {
                self.update_device_status(device_id, DeviceStatus::Online).await?;
            }
            (false, DeviceStatus::Online) => {
                self.update_device_status(device_id, DeviceStatus::Offline).await?;
            }
            _ => {}
        }
        Ok(reachable)
    }

    // ---- anti-echo reconciliation ----

    /// Should a reconciliation pass skip this device right now?
    pub fn should_block_sync(&self, device_id: &Uuid) -> bool {
        self.sync_guard.is_blocked(device_id)
    }

    /// Apply an externally-sourced property snapshot, unless the device
    /// is inside its anti-echo window. Returns true when the snapshot was
    /// applied.
    pub fn apply_platform_snapshot(
        &self,
        device_id: &Uuid,
        snapshot: &HashMap<String, String>,
    ) -> DeviceResult<bool> {
        if self.should_block_sync(device_id) {
            debug!(
                "Skipping platform snapshot for {}: inside anti-echo window",
                device_id
            );
            return Ok(false);
        }

        let Some(device) = self.store.find_by_id(device_id)? else {
            return Err(DeviceError::NotFound(*device_id));
        };

        let mut delta = HashMap::new();
        for (key, value) in snapshot {
            let stored_key = platform_key(key);
            if device.properties.get(&stored_key) != Some(value) {
                delta.insert(stored_key, value.clone());
            }
        }
        if delta.is_empty() {
            return Ok(false);
        }
        Ok(self.persist_delta(device, &delta).is_some())
    }

    // ---- status supervisor ----

    /// One supervisor pass at the given clock over all ONLINE devices.
    /// A device flips OFFLINE when its `last_seen` is older than the
    /// staleness threshold, or when a live probe says it is unreachable.
    /// Each candidate is re-read under its per-device lock immediately
    /// before the flip, so a record a concurrent command just wrote is
    /// never overwritten with a stale copy.
    pub async fn sweep_once(&self, now: i64) -> DeviceResult<usize> {
        let staleness = self.config.staleness_secs as i64;
        let mut flipped = 0;

        for candidate in self.store.find_by_status(DeviceStatus::Online)? {
            let lock = self.lock_for(&candidate.id);
            let _guard = lock.lock().await;

            let Some(current) = self.store.find_by_id(&candidate.id)? else {
                continue;
            };
            if current.status != DeviceStatus::Online {
                continue;
            }

            let stale = current
                .last_seen
                .map(|seen| now - seen > staleness)
                .unwrap_or(true);
            if stale {
                info!(
                    "Device {} marked OFFLINE (last seen {:?})",
                    current.name, current.last_seen
                );
            } else {
                // Fresh device: trust it only if the transport still
                // answers.
                if self.adapters.probe_status(&current).await {
                    continue;
                }
                info!("Device {} marked OFFLINE (probe failed)", current.name);
            }

            let mut offline = current;
            offline.status = DeviceStatus::Offline;
            self.store.save(&offline)?;
            flipped += 1;
        }
        Ok(flipped)
    }

    /// Spawn the periodic status supervisor. Returns a handle that stops
    /// the task.
    pub fn spawn_supervisor(self: &Arc<Self>) -> SupervisorHandle {
        let (tx, mut rx) = watch::channel(false);
        let service = Arc::clone(self);
        let period = Duration::from_secs(self.config.supervisor_period_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match service.sweep_once(now_unix()).await {
                            Ok(0) => {}
                            Ok(n) => debug!("Status supervisor flipped {} devices offline", n),
                            Err(e) => warn!("Status supervisor pass failed: {}", e),
                        }
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            info!("Status supervisor shutting down");
                            break;
                        }
                    }
                }
            }
        });

        SupervisorHandle { shutdown: tx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_guard_window() {
        let guard = SyncGuard::new(90);
        let id = Uuid::new_v4();

        assert!(!guard.is_blocked_at(&id, 1_000));
        guard.stamp_at(&id, 1_000);
        assert!(guard.is_blocked_at(&id, 1_000));
        assert!(guard.is_blocked_at(&id, 1_089));
        assert!(!guard.is_blocked_at(&id, 1_090));
    }

    #[test]
    fn test_sync_guard_restamp_extends_window() {
        let guard = SyncGuard::new(90);
        let id = Uuid::new_v4();

        guard.stamp_at(&id, 1_000);
        guard.stamp_at(&id, 1_080);
        assert!(guard.is_blocked_at(&id, 1_150));
        assert!(!guard.is_blocked_at(&id, 1_170));
    }

    #[test]
    fn test_property_delta_skips_command_and_empty() {
        let device = Device::new("lamp", "light", crate::model::Protocol::Virtual)
            .with_property("tb_power", "off");

        let mut params = HashMap::new();
        params.insert("command".to_string(), "toggle".to_string());
        params.insert("power".to_string(), "on".to_string());
        params.insert("note".to_string(), String::new());

        let delta = DeviceService::property_delta(&device, &params);
        assert_eq!(delta.len(), 1);
        assert_eq!(delta.get("tb_power").map(String::as_str), Some("on"));
    }

    #[test]
    fn test_property_delta_short_circuits_equal_values() {
        let device = Device::new("lamp", "light", crate::model::Protocol::Virtual)
            .with_property("tb_power", "on");

        let mut params = HashMap::new();
        params.insert("power".to_string(), "on".to_string());

        assert!(DeviceService::property_delta(&device, &params).is_empty());
    }
}
