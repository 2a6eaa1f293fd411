//! Session tests against a scripted in-memory peripheral.
//!
//! The fake implements the GATT transport seam with a programmable service
//! table, failure injection for CCCD writes and connects, and a channel
//! the tests push notifications through.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use rigmon_ble::ble::gatt::{
    CccdValue, CharacteristicInfo, DeviceTarget, GattCentral, GattPeripheral, Ops, RawNotification,
    ServiceHandle,
};
use rigmon_ble::ble::resolver::{Resolution, ServiceResolver};
use rigmon_ble::ble::uuids::{
    BATTERY_LEVEL_UUID, RUNTIME_CHARACTERISTIC_UUID, SPEED_CHARACTERISTIC_UUID,
    TELEMETRY_SERVICE_UUID, TEMP_CHARACTERISTIC_UUID,
};
use rigmon_ble::{Error, MonitorSession, Result, Role, Severity, SessionState, ValueSource, NO_DATA};

#[derive(Default)]
struct FakeState {
    connected: bool,
    connect_fails: bool,
    connect_count: usize,
    disconnect_count: usize,
    discover_count: usize,
    services: Vec<ServiceHandle>,
    characteristics: HashMap<Uuid, Vec<CharacteristicInfo>>,
    /// Characteristic UUIDs whose CCCD enable write fails.
    fail_cccd_enable: HashSet<Uuid>,
    /// Every CCCD write, in order.
    cccd_writes: Vec<(Uuid, CccdValue)>,
    /// Live notification senders, one per open stream.
    notif_senders: Vec<mpsc::UnboundedSender<RawNotification>>,
}

#[derive(Clone)]
struct FakePeripheral {
    state: Arc<Mutex<FakeState>>,
}

impl FakePeripheral {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
        }
    }

    fn with_service(service: Uuid, characteristics: Vec<CharacteristicInfo>) -> Self {
        let fake = Self::new();
        {
            let mut state = fake.state.lock();
            state.services = vec![ServiceHandle { uuid: service }];
            state.characteristics.insert(service, characteristics);
        }
        fake
    }

    fn fail_cccd_enable(&self, uuid: Uuid) {
        self.state.lock().fail_cccd_enable.insert(uuid);
    }

    fn fail_connect(&self) {
        self.state.lock().connect_fails = true;
    }

    fn push(&self, uuid: Uuid, data: &[u8]) {
        let senders = self.state.lock().notif_senders.clone();
        for tx in senders {
            let _ = tx.send(RawNotification {
                uuid,
                data: data.to_vec(),
            });
        }
    }

    fn cccd_writes(&self) -> Vec<(Uuid, CccdValue)> {
        self.state.lock().cccd_writes.clone()
    }

    fn disconnect_count(&self) -> usize {
        self.state.lock().disconnect_count
    }

    fn discover_count(&self) -> usize {
        self.state.lock().discover_count
    }
}

#[async_trait]
impl GattPeripheral for FakePeripheral {
    async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.connect_count += 1;
        if state.connect_fails {
            return Err(Error::DeviceNotFound {
                identifier: "fake".to_string(),
            });
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.disconnect_count += 1;
        state.connected = false;
        Ok(())
    }

    async fn discover_services(&self) -> Result<()> {
        self.state.lock().discover_count += 1;
        Ok(())
    }

    async fn services(&self) -> Result<Vec<ServiceHandle>> {
        Ok(self.state.lock().services.clone())
    }

    async fn characteristics(&self, service: &ServiceHandle) -> Result<Vec<CharacteristicInfo>> {
        self.state
            .lock()
            .characteristics
            .get(&service.uuid)
            .cloned()
            .ok_or(Error::CharacteristicDiscoveryFailed {
                service: service.uuid.to_string(),
            })
    }

    async fn read(&self, characteristic: &CharacteristicInfo) -> Result<Vec<u8>> {
        Err(Error::ReadFailed {
            uuid: characteristic.uuid.to_string(),
            reason: "not scripted".to_string(),
        })
    }

    async fn write(
        &self,
        characteristic: &CharacteristicInfo,
        _data: &[u8],
        _with_response: bool,
    ) -> Result<()> {
        Err(Error::WriteFailed {
            uuid: characteristic.uuid.to_string(),
            reason: "not scripted".to_string(),
        })
    }

    async fn write_cccd(
        &self,
        characteristic: &CharacteristicInfo,
        value: CccdValue,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if value != CccdValue::None && state.fail_cccd_enable.contains(&characteristic.uuid) {
            return Err(Error::DescriptorWriteFailed {
                uuid: characteristic.uuid.to_string(),
                reason: "injected".to_string(),
            });
        }
        state.cccd_writes.push((characteristic.uuid, value));
        Ok(())
    }

    async fn notifications(&self) -> Result<BoxStream<'static, RawNotification>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().notif_senders.push(tx);

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    fn display_name(&self) -> String {
        "fake-rig".to_string()
    }
}

struct FakeCentral {
    peripheral: Option<FakePeripheral>,
}

#[async_trait]
impl GattCentral<FakePeripheral> for FakeCentral {
    async fn locate(&self, target: &DeviceTarget) -> Result<FakePeripheral> {
        self.peripheral
            .clone()
            .ok_or_else(|| Error::DeviceNotFound {
                identifier: target.to_string(),
            })
    }
}

fn notify_char(uuid: Uuid) -> CharacteristicInfo {
    CharacteristicInfo {
        uuid,
        service_uuid: TELEMETRY_SERVICE_UUID,
        ops: Ops::READ | Ops::NOTIFY,
        formats: vec![],
    }
}

fn role_characteristics() -> Vec<CharacteristicInfo> {
    vec![
        notify_char(SPEED_CHARACTERISTIC_UUID),
        notify_char(TEMP_CHARACTERISTIC_UUID),
        notify_char(RUNTIME_CHARACTERISTIC_UUID),
    ]
}

fn session_for(fake: &FakePeripheral) -> MonitorSession<FakePeripheral> {
    MonitorSession::new(Arc::new(FakeCentral {
        peripheral: Some(fake.clone()),
    }))
}

async fn expect_no_value(
    rx: &mut tokio::sync::broadcast::Receiver<rigmon_ble::DecodedValue>,
) {
    let outcome = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(outcome.is_err(), "expected no value event, got {:?}", outcome);
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[tokio::test]
async fn all_roles_subscribe_and_stream() {
    init_tracing();
    let fake = FakePeripheral::with_service(TELEMETRY_SERVICE_UUID, role_characteristics());
    let session = session_for(&fake);
    let mut status_rx = session.subscribe_status();

    assert!(session.start("fake-rig").await);
    assert_eq!(session.state(), SessionState::Monitoring);
    assert_eq!(session.subscription_count(), 3);

    // All three CCCD enables, notify preferred, in role order.
    let enables: Vec<_> = fake
        .cccd_writes()
        .into_iter()
        .filter(|(_, v)| *v == CccdValue::Notify)
        .map(|(u, _)| u)
        .collect();
    assert_eq!(
        enables,
        vec![
            SPEED_CHARACTERISTIC_UUID,
            TEMP_CHARACTERISTIC_UUID,
            RUNTIME_CHARACTERISTIC_UUID
        ]
    );

    let mut saw_subscribed = false;
    while let Ok(event) = status_rx.try_recv() {
        if event.message == "Connected and subscribed." {
            saw_subscribed = true;
            assert_eq!(event.severity, Severity::Info);
        }
    }
    assert!(saw_subscribed);

    // Notifications decode, trim, and land in the role fields.
    let mut values = session.subscribe_values();
    fake.push(SPEED_CHARACTERISTIC_UUID, b" 1234 \r\n");

    let value = tokio::time::timeout(Duration::from_secs(1), values.recv())
        .await
        .expect("value within a second")
        .expect("channel open");
    assert_eq!(value.source, ValueSource::Role(Role::Speed));
    assert_eq!(value.text, "1234");
    assert_eq!(session.display(Role::Speed), "SPEED: 1234");

    session.stop().await;
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.display(Role::Speed), "SPEED: -");
}

#[tokio::test]
async fn no_role_matches_still_reaches_monitoring() {
    let fake = FakePeripheral::with_service(
        TELEMETRY_SERVICE_UUID,
        vec![notify_char(BATTERY_LEVEL_UUID)],
    );
    let session = session_for(&fake);

    assert!(session.start("fake-rig").await);
    assert_eq!(session.subscription_count(), 0);
    for role in Role::MONITOR {
        assert_eq!(session.display(role), format!("{}: {}", role.label(), NO_DATA));
    }
}

#[tokio::test]
async fn descriptor_write_failure_only_skips_that_role() {
    let fake = FakePeripheral::with_service(TELEMETRY_SERVICE_UUID, role_characteristics());
    fake.fail_cccd_enable(TEMP_CHARACTERISTIC_UUID);
    let session = session_for(&fake);
    let mut status_rx = session.subscribe_status();

    assert!(session.start("fake-rig").await);
    assert_eq!(session.subscription_count(), 2);
    assert_eq!(session.display(Role::Temp), "TEMP: -");

    // Speed and Runtime still stream.
    let mut values = session.subscribe_values();
    fake.push(RUNTIME_CHARACTERISTIC_UUID, b"3600");
    let value = tokio::time::timeout(Duration::from_secs(1), values.recv())
        .await
        .expect("value within a second")
        .expect("channel open");
    assert_eq!(value.source, ValueSource::Role(Role::Runtime));
    assert_eq!(value.text, "3600");

    let mut warnings = 0;
    while let Ok(event) = status_rx.try_recv() {
        if event.severity == Severity::Error {
            warnings += 1;
            assert!(event.message.contains("TEMP"));
        }
    }
    assert_eq!(warnings, 1);
}

#[tokio::test]
async fn missing_service_falls_back_to_enumeration() {
    let other = Uuid::from_u128(0xdead_beef);
    let fake = FakePeripheral::with_service(other, vec![notify_char(BATTERY_LEVEL_UUID)]);
    let session = session_for(&fake);

    assert!(session.start("fake-rig").await);
    assert_eq!(session.subscription_count(), 0);

    // The fallback enumeration is surfaced to the explorer.
    let services = session.explorer_services().await.expect("explorer services");
    assert_eq!(services, vec![ServiceHandle { uuid: other }]);

    // One discovery per connect attempt; the fallback never re-resolves.
    assert_eq!(fake.discover_count(), 1);
}

#[tokio::test]
async fn fallback_runs_once_per_connect_attempt() {
    let fake = FakePeripheral::new();
    let resolver = ServiceResolver::new();

    let first = resolver
        .resolve(&fake, TELEMETRY_SERVICE_UUID)
        .await
        .expect("first miss falls back");
    assert_eq!(first, Resolution::Fallback(vec![]));

    let second = resolver.resolve(&fake, TELEMETRY_SERVICE_UUID).await;
    assert!(matches!(second, Err(Error::ServiceNotFound { .. })));

    // A new connect attempt re-arms the fallback.
    resolver.reset();
    let third = resolver
        .resolve(&fake, TELEMETRY_SERVICE_UUID)
        .await
        .expect("re-armed fallback");
    assert_eq!(third, Resolution::Fallback(vec![]));
}

#[tokio::test]
async fn failed_connect_retains_no_handles() {
    let fake = FakePeripheral::with_service(TELEMETRY_SERVICE_UUID, role_characteristics());
    fake.fail_connect();
    let session = session_for(&fake);
    let mut status_rx = session.subscribe_status();

    assert!(!session.start("fake-rig").await);
    assert_eq!(session.state(), SessionState::Disconnected);

    // No handle was retained, so teardown never touches the peripheral.
    session.stop().await;
    assert_eq!(fake.disconnect_count(), 0);

    let mut saw_error = false;
    while let Ok(event) = status_rx.try_recv() {
        if event.severity == Severity::Error {
            saw_error = true;
        }
    }
    assert!(saw_error);
}

#[tokio::test]
async fn unknown_target_reports_device_not_found() {
    let session = MonitorSession::new(Arc::new(FakeCentral { peripheral: None }));
    let mut status_rx = session.subscribe_status();

    assert!(!session.start(0x001122334455u64).await);
    assert_eq!(session.state(), SessionState::Disconnected);

    let mut saw_not_found = false;
    while let Ok(event) = status_rx.try_recv() {
        if event.message.contains("Device not found") {
            saw_not_found = true;
        }
    }
    assert!(saw_not_found);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let fake = FakePeripheral::with_service(TELEMETRY_SERVICE_UUID, role_characteristics());
    let session = session_for(&fake);

    assert!(session.start("fake-rig").await);
    session.stop().await;
    session.stop().await;

    assert_eq!(session.subscription_count(), 0);
    assert_eq!(session.state(), SessionState::Disconnected);
    for role in Role::MONITOR {
        assert_eq!(session.display(role), format!("{}: {}", role.label(), NO_DATA));
    }

    // Every enabled subscription got a disable write, exactly once.
    let disables = fake
        .cccd_writes()
        .into_iter()
        .filter(|(_, v)| *v == CccdValue::None)
        .count();
    assert_eq!(disables, 3);
}

#[tokio::test]
async fn reconnect_cleans_up_previous_session() {
    let fake = FakePeripheral::with_service(TELEMETRY_SERVICE_UUID, role_characteristics());
    let session = session_for(&fake);

    assert!(session.start("fake-rig").await);
    assert!(session.start("fake-rig").await);

    assert_eq!(session.state(), SessionState::Monitoring);
    assert_eq!(session.subscription_count(), 3);
    // The first session's handle was released before the second connect.
    assert_eq!(fake.disconnect_count(), 1);
}

#[tokio::test]
async fn late_notification_after_unwatch_is_dropped() {
    let characteristics = vec![
        notify_char(SPEED_CHARACTERISTIC_UUID),
        notify_char(TEMP_CHARACTERISTIC_UUID),
        notify_char(RUNTIME_CHARACTERISTIC_UUID),
        notify_char(BATTERY_LEVEL_UUID),
    ];
    let fake = FakePeripheral::with_service(TELEMETRY_SERVICE_UUID, characteristics);
    let session = session_for(&fake);

    assert!(session.start("fake-rig").await);

    let battery = notify_char(BATTERY_LEVEL_UUID);
    session.watch(&battery).await.expect("watch battery");
    assert_eq!(session.subscription_count(), 4);

    let mut values = session.subscribe_values();
    fake.push(BATTERY_LEVEL_UUID, &[0x55]);
    let value = tokio::time::timeout(Duration::from_secs(1), values.recv())
        .await
        .expect("value within a second")
        .expect("channel open");
    assert_eq!(value.source, ValueSource::Characteristic(BATTERY_LEVEL_UUID));
    assert_eq!(value.text, "Battery Level: 85%");

    // The local slot clears before the disable write; an event racing the
    // teardown finds no owner and is dropped.
    session.unwatch().await;
    assert_eq!(session.subscription_count(), 3);

    let mut values = session.subscribe_values();
    fake.push(BATTERY_LEVEL_UUID, &[0x60]);
    expect_no_value(&mut values).await;
}

#[tokio::test]
async fn explorer_slot_holds_one_subscription() {
    let characteristics = vec![
        notify_char(BATTERY_LEVEL_UUID),
        notify_char(rigmon_ble::ble::uuids::RESULT_CHARACTERISTIC_UUID),
    ];
    let fake = FakePeripheral::with_service(TELEMETRY_SERVICE_UUID, characteristics.clone());
    let session = session_for(&fake);

    assert!(session.start("fake-rig").await);

    session.watch(&characteristics[0]).await.expect("watch first");
    session.watch(&characteristics[1]).await.expect("watch second");
    assert_eq!(session.subscription_count(), 1);

    // The first watch was torn down when the second took the slot.
    assert!(fake
        .cccd_writes()
        .contains(&(BATTERY_LEVEL_UUID, CccdValue::None)));
}

#[tokio::test]
async fn indicate_only_characteristic_uses_indicate() {
    let mut characteristics = role_characteristics();
    characteristics[0].ops = Ops::READ | Ops::INDICATE;
    let fake = FakePeripheral::with_service(TELEMETRY_SERVICE_UUID, characteristics);
    let session = session_for(&fake);

    assert!(session.start("fake-rig").await);
    assert!(fake
        .cccd_writes()
        .contains(&(SPEED_CHARACTERISTIC_UUID, CccdValue::Indicate)));
}

#[tokio::test]
async fn read_only_role_characteristic_is_unsupported() {
    let mut characteristics = role_characteristics();
    characteristics[1].ops = Ops::READ;
    let fake = FakePeripheral::with_service(TELEMETRY_SERVICE_UUID, characteristics);
    let session = session_for(&fake);

    // Temp cannot stream; the other two still do.
    assert!(session.start("fake-rig").await);
    assert_eq!(session.subscription_count(), 2);
    assert_eq!(session.display(Role::Temp), "TEMP: -");
}
