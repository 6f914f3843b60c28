//! End-to-end engine tests over in-memory storage and the virtual
//! transport.

use std::collections::HashMap;
use std::sync::Arc;

use hearth_devices::{
    AdapterRegistry, Device, DeviceError, DeviceEvent, DeviceEventHandler, DeviceService,
    DeviceStatus, EngineConfig, LockHistoryService, Protocol, ProtocolAdapter,
    SensorHistoryService, VirtualAdapter,
};
use hearth_storage::{
    DeviceStore, LockHistoryStore, MemoryBackend, Priority, SensorHistoryStore,
};
use uuid::Uuid;

struct Harness {
    service: Arc<DeviceService>,
    store: Arc<DeviceStore>,
    sensor_history: Arc<SensorHistoryService>,
    handler: DeviceEventHandler,
    adapter: Arc<VirtualAdapter>,
}

fn harness() -> Harness {
    harness_with_config(EngineConfig::default())
}

fn harness_with_config(config: EngineConfig) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let backend = Arc::new(MemoryBackend::new());
    let store = Arc::new(DeviceStore::new(backend.clone()));

    let adapter = Arc::new(VirtualAdapter::new().with_success_rate(1.0));
    let mut registry = AdapterRegistry::new();
    registry.register(adapter.clone());

    let service = Arc::new(DeviceService::new(
        store.clone(),
        Arc::new(registry),
        None,
        config,
    ));

    let sensor_history = Arc::new(SensorHistoryService::new(Arc::new(SensorHistoryStore::new(
        backend.clone(),
    ))));
    let lock_history = Arc::new(LockHistoryService::new(Arc::new(LockHistoryStore::new(
        backend,
    ))));
    let handler = DeviceEventHandler::new(
        service.clone(),
        sensor_history.clone(),
        lock_history,
    );

    Harness {
        service,
        store,
        sensor_history,
        handler,
        adapter,
    }
}

fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn command_with_no_delta_stamps_anti_echo() {
    let h = harness();
    let device = h
        .store
        .save(&Device::new("lamp", "light", Protocol::Virtual).with_property("tb_power", "on"))
        .unwrap();

    assert!(!h.service.should_block_sync(&device.id));

    let sent = h
        .service
        .send_command_to_device(&device.id, "setState", &params(&[("power", "on")]))
        .await
        .unwrap();
    assert!(sent);

    // No property changed, so no new version was written.
    let stored = h.store.find_by_id(&device.id).unwrap().unwrap();
    assert_eq!(stored.version, device.version);

    // The anti-echo window is stamped regardless.
    assert!(h.service.should_block_sync(&device.id));
}

#[tokio::test]
async fn double_send_is_idempotent_on_storage() {
    let h = harness();
    let device = h
        .store
        .save(&Device::new("lamp", "light", Protocol::Virtual))
        .unwrap();

    let p = params(&[("power", "on")]);
    assert!(h.service.send_command_to_device(&device.id, "setState", &p).await.unwrap());
    let after_first = h.store.find_by_id(&device.id).unwrap().unwrap();
    assert_eq!(after_first.properties.get("tb_power").map(String::as_str), Some("on"));

    assert!(h.service.send_command_to_device(&device.id, "setState", &p).await.unwrap());
    let after_second = h.store.find_by_id(&device.id).unwrap().unwrap();

    // Second identical send persisted nothing new.
    assert_eq!(after_second.version, after_first.version);
    assert!(h.service.should_block_sync(&device.id));
}

#[tokio::test]
async fn command_to_unknown_device_is_not_found() {
    let h = harness();
    let missing = Uuid::new_v4();

    let result = h
        .service
        .send_command_to_device(&missing, "toggle", &HashMap::new())
        .await;
    assert!(matches!(result, Err(DeviceError::NotFound(id)) if id == missing));
}

#[tokio::test]
async fn snapshot_blocked_inside_window_applied_outside() {
    // Zero-width window: the stamp exists but never blocks.
    let mut config = EngineConfig::default();
    config.sync_block_secs = 0;
    let open = harness_with_config(config);

    let device = open
        .store
        .save(&Device::new("lamp", "light", Protocol::Virtual))
        .unwrap();
    open.service
        .send_command_to_device(&device.id, "setState", &params(&[("power", "on")]))
        .await
        .unwrap();

    let applied = open
        .service
        .apply_platform_snapshot(&device.id, &params(&[("power", "off")]))
        .unwrap();
    assert!(applied);
    let stored = open.store.find_by_id(&device.id).unwrap().unwrap();
    assert_eq!(stored.properties.get("tb_power").map(String::as_str), Some("off"));

    // Default 90s window: the echo is suppressed.
    let guarded = harness();
    let device = guarded
        .store
        .save(&Device::new("lamp", "light", Protocol::Virtual))
        .unwrap();
    guarded
        .service
        .send_command_to_device(&device.id, "setState", &params(&[("power", "on")]))
        .await
        .unwrap();

    let applied = guarded
        .service
        .apply_platform_snapshot(&device.id, &params(&[("power", "off")]))
        .unwrap();
    assert!(!applied);
    let stored = guarded.store.find_by_id(&device.id).unwrap().unwrap();
    assert_eq!(stored.properties.get("tb_power").map(String::as_str), Some("on"));
}

#[tokio::test]
async fn motion_event_persists_one_entry_and_resets_sensor() {
    let h = harness();
    let mut sensor = Device::new("hall-sensor", "sensor", Protocol::Virtual);
    sensor.sub_type = Some("MOTION_SENSOR".to_string());
    let sensor = h.store.save(&sensor).unwrap();

    h.handler
        .handle_event(DeviceEvent {
            device_id: sensor.id.to_string(),
            attributes: params(&[("tb_motion", "true")]),
        })
        .await;

    let entries = h.sensor_history.for_device(&sensor.id);
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.sensor_type, "motion");
    assert_eq!(entry.priority, Priority::Medium);
    assert_eq!(entry.message, "Motion detected");
    assert!(!entry.acknowledged);

    // The reset ran through the orchestrator: the stored property is back
    // to false and the anti-echo window is stamped.
    let stored = h.store.find_by_id(&sensor.id).unwrap().unwrap();
    assert_eq!(stored.properties.get("tb_motion").map(String::as_str), Some("false"));
    assert!(h.service.should_block_sync(&sensor.id));
}

#[tokio::test]
async fn smoke_event_is_critical_and_clear_is_dropped() {
    let h = harness();
    let sensor = h
        .store
        .save(&Device::new("kitchen-smoke", "sensor", Protocol::Virtual))
        .unwrap();

    h.handler
        .handle_event(DeviceEvent {
            device_id: sensor.id.to_string(),
            attributes: params(&[("smoke", "true")]),
        })
        .await;
    let entries = h.sensor_history.for_device(&sensor.id);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].priority, Priority::Critical);

    // The all-clear reading is not notable and leaves no trace.
    h.handler
        .handle_event(DeviceEvent {
            device_id: sensor.id.to_string(),
            attributes: params(&[("smoke", "false")]),
        })
        .await;
    assert_eq!(h.sensor_history.for_device(&sensor.id).len(), 1);
}

#[tokio::test]
async fn device_type_dispatch_ignores_case() {
    let h = harness();
    let sensor = h
        .store
        .save(&Device::new("attic-smoke", "Sensor", Protocol::Virtual))
        .unwrap();

    h.handler
        .handle_event(DeviceEvent {
            device_id: sensor.id.to_string(),
            attributes: params(&[("smoke", "true")]),
        })
        .await;

    assert_eq!(h.sensor_history.for_device(&sensor.id).len(), 1);
}

#[tokio::test]
async fn event_for_unknown_device_is_dropped() {
    let h = harness();
    h.handler
        .handle_event(DeviceEvent {
            device_id: Uuid::new_v4().to_string(),
            attributes: params(&[("motion", "true")]),
        })
        .await;
    assert!(h.sensor_history.all().is_empty());
}

#[tokio::test]
async fn supervisor_flips_stale_online_device() {
    let h = harness();
    let now = 10_000_000;

    let mut stale = Device::new("porch-cam", "camera", Protocol::Virtual);
    stale.status = DeviceStatus::Online;
    stale.last_seen = Some(now - 31 * 60);
    let stale = h.store.save(&stale).unwrap();

    let mut fresh = Device::new("door-cam", "camera", Protocol::Virtual);
    fresh.status = DeviceStatus::Online;
    fresh.last_seen = Some(now - 60);
    let fresh = h.store.save(&fresh).unwrap();

    let flipped = h.service.sweep_once(now).await.unwrap();
    assert_eq!(flipped, 1);

    assert_eq!(
        h.store.find_by_id(&stale.id).unwrap().unwrap().status,
        DeviceStatus::Offline
    );
    assert_eq!(
        h.store.find_by_id(&fresh.id).unwrap().unwrap().status,
        DeviceStatus::Online
    );
}

#[tokio::test]
async fn supervisor_flips_unreachable_device_despite_fresh_last_seen() {
    // Only the virtual adapter is registered, so a probe on an MQTT
    // device fails closed.
    let h = harness();
    let now = 10_000_000;

    let mut unreachable = Device::new("gate-lock", "lock", Protocol::Mqtt);
    unreachable.status = DeviceStatus::Online;
    unreachable.last_seen = Some(now - 60);
    let unreachable = h.store.save(&unreachable).unwrap();

    let mut reachable = Device::new("lamp", "light", Protocol::Virtual);
    reachable.status = DeviceStatus::Online;
    reachable.last_seen = Some(now - 60);
    let reachable = h.store.save(&reachable).unwrap();

    let flipped = h.service.sweep_once(now).await.unwrap();
    assert_eq!(flipped, 1);

    assert_eq!(
        h.store.find_by_id(&unreachable.id).unwrap().unwrap().status,
        DeviceStatus::Offline
    );
    assert_eq!(
        h.store.find_by_id(&reachable.id).unwrap().unwrap().status,
        DeviceStatus::Online
    );
}

#[tokio::test]
async fn supervisor_flip_keeps_freshly_written_properties() {
    let h = harness();
    let now = 10_000_000;

    let mut stale = Device::new("hall-sensor", "sensor", Protocol::Virtual);
    stale.status = DeviceStatus::Online;
    stale.last_seen = Some(now - 31 * 60);
    let stale = h.store.save(&stale).unwrap();

    // A command persists a property after the device became stale.
    assert!(h
        .service
        .send_command_to_device(&stale.id, "setState", &params(&[("motion", "false")]))
        .await
        .unwrap());

    let flipped = h.service.sweep_once(now).await.unwrap();
    assert_eq!(flipped, 1);

    // The flip re-read the record, so the command's write survived it.
    let stored = h.store.find_by_id(&stale.id).unwrap().unwrap();
    assert_eq!(stored.status, DeviceStatus::Offline);
    assert_eq!(stored.properties.get("tb_motion").map(String::as_str), Some("false"));
}

#[tokio::test]
async fn status_transition_to_online_stamps_last_seen() {
    let h = harness();
    let device = h
        .store
        .save(&Device::new("lamp", "light", Protocol::Virtual))
        .unwrap();
    assert!(device.last_seen.is_none());

    let updated = h
        .service
        .update_device_status(&device.id, DeviceStatus::Online)
        .await
        .unwrap();
    assert_eq!(updated.status, DeviceStatus::Online);
    assert!(updated.last_seen.is_some());
}

#[tokio::test]
async fn probe_brings_offline_device_back_online() {
    let h = harness();
    let device = h
        .store
        .save(&Device::new("lamp", "light", Protocol::Virtual))
        .unwrap();
    assert_eq!(device.status, DeviceStatus::Offline);

    // The virtual transport always answers.
    assert!(h.service.probe_device(&device.id).await.unwrap());

    let stored = h.store.find_by_id(&device.id).unwrap().unwrap();
    assert_eq!(stored.status, DeviceStatus::Online);
    assert!(stored.last_seen.is_some());
}

#[tokio::test]
async fn toggle_round_trip_through_the_stack() {
    let h = harness();
    let light = h
        .store
        .save(&Device::new("lamp", "light", Protocol::Virtual))
        .unwrap();

    // First read seeds the virtual default: power off.
    let props = h.adapter.read_properties(&light).await;
    assert_eq!(props.get("power").map(String::as_str), Some("off"));

    assert!(h
        .service
        .send_command_to_device(&light.id, "toggle", &HashMap::new())
        .await
        .unwrap());

    let props = h.adapter.read_properties(&light).await;
    assert_eq!(props.get("power").map(String::as_str), Some("on"));
}

#[tokio::test]
async fn update_device_property_requires_existing_key() {
    let h = harness();
    let device = h
        .store
        .save(&Device::new("lamp", "light", Protocol::Virtual).with_property("tb_power", "off"))
        .unwrap();

    assert!(h
        .service
        .update_device_property(&device.id, "power", "on")
        .await
        .unwrap());
    let stored = h.store.find_by_id(&device.id).unwrap().unwrap();
    assert_eq!(stored.properties.get("tb_power").map(String::as_str), Some("on"));

    // Unknown key: reported but not created.
    assert!(!h
        .service
        .update_device_property(&device.id, "brightness", "50")
        .await
        .unwrap());
}

#[tokio::test]
async fn acknowledge_all_counts_and_clears() {
    let h = harness();
    let sensor = h
        .store
        .save(&Device::new("kitchen-smoke", "sensor", Protocol::Virtual))
        .unwrap();
    let other = h
        .store
        .save(&Device::new("hall-leak", "sensor", Protocol::Virtual))
        .unwrap();

    for _ in 0..3 {
        h.handler
            .handle_event(DeviceEvent {
                device_id: sensor.id.to_string(),
                attributes: params(&[("smoke", "true")]),
            })
            .await;
    }
    h.handler
        .handle_event(DeviceEvent {
            device_id: other.id.to_string(),
            attributes: params(&[("leak", "true")]),
        })
        .await;

    assert_eq!(h.sensor_history.unacknowledged(Some(&sensor.id)).len(), 3);

    let acknowledged = h.sensor_history.acknowledge_all(Some(&sensor.id));
    assert_eq!(acknowledged, 3);
    assert!(h.sensor_history.unacknowledged(Some(&sensor.id)).is_empty());

    // The other device's entry is untouched.
    assert_eq!(h.sensor_history.unacknowledged(Some(&other.id)).len(), 1);
}

#[tokio::test]
async fn delete_device_removes_local_record() {
    let h = harness();
    let device = h
        .store
        .save(&Device::new("lamp", "light", Protocol::Virtual))
        .unwrap();

    assert!(h.service.delete_device(&device.id).await.unwrap());
    assert!(h.store.find_by_id(&device.id).unwrap().is_none());
    assert!(!h.service.delete_device(&device.id).await.unwrap());
}
