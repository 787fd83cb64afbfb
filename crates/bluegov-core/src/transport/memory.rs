// ── In-memory simulated radio ──
//
// A Transport backed by a mutable model of adapters and devices. Used by
// the test suites and by the CLI (fed from a TOML radio fixture) so the
// whole engine can run without hardware.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use super::{AdapterInfo, DeviceInfo, Transport, TransportError, TransportEvent};
use crate::error::CoreError;
use crate::model::{
    BluetoothUrl, CharacteristicFlag, GattCharacteristic, GattService, MacAddress,
    parse_characteristic_uuid,
};

const EVENT_CHANNEL_SIZE: usize = 256;

// ── Fixture ─────────────────────────────────────────────────────────

/// Serializable description of a simulated radio.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RadioFixture {
    #[serde(default)]
    pub adapters: Vec<AdapterFixture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdapterFixture {
    pub address: String,
    pub name: Option<String>,
    pub alias: Option<String>,
    #[serde(default = "default_true")]
    pub powered: bool,
    #[serde(default)]
    pub discovering: bool,
    #[serde(default)]
    pub devices: Vec<DeviceFixture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceFixture {
    pub address: String,
    pub name: Option<String>,
    pub alias: Option<String>,
    pub rssi: Option<i16>,
    pub bluetooth_class: Option<u32>,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub services: Vec<ServiceFixture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceFixture {
    pub uuid: String,
    #[serde(default)]
    pub characteristics: Vec<CharacteristicFixture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CharacteristicFixture {
    pub uuid: String,
    #[serde(default)]
    pub flags: Vec<CharacteristicFlag>,
    /// Initial value, hex encoded.
    pub value: Option<String>,
}

fn default_true() -> bool {
    true
}

// ── Simulated state ─────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Radio {
    adapters: BTreeMap<MacAddress, SimAdapter>,
    scan_failure: bool,
    calls: HashMap<(&'static str, BluetoothUrl), u32>,
}

#[derive(Debug)]
struct SimAdapter {
    info: AdapterInfo,
    devices: BTreeMap<MacAddress, SimDevice>,
}

#[derive(Debug)]
struct SimDevice {
    info: DeviceInfo,
    connect_failure: bool,
    services: Vec<GattService>,
    values: HashMap<Uuid, Bytes>,
    notifying: HashSet<Uuid>,
}

impl SimDevice {
    fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            connect_failure: false,
            services: Vec::new(),
            values: HashMap::new(),
            notifying: HashSet::new(),
        }
    }

    fn has_characteristic(&self, uuid: &Uuid) -> bool {
        self.services.iter().any(|s| s.characteristic(uuid).is_some())
    }
}

impl Radio {
    fn adapter(&mut self, url: &BluetoothUrl) -> Result<&mut SimAdapter, TransportError> {
        self.adapters
            .get_mut(url.adapter_address())
            .ok_or_else(|| TransportError::not_found(&url.adapter_url()))
    }

    fn device(&mut self, url: &BluetoothUrl) -> Result<&mut SimDevice, TransportError> {
        let address = url
            .device_address()
            .ok_or_else(|| TransportError::not_found(url))?;
        self.adapter(url)?
            .devices
            .get_mut(address)
            .ok_or_else(|| TransportError::not_found(url))
    }

    /// A device behind a powered adapter.
    fn reachable_device(&mut self, url: &BluetoothUrl) -> Result<&mut SimDevice, TransportError> {
        if !self.adapter(url)?.info.powered {
            return Err(TransportError::not_found(url));
        }
        self.device(url)
    }

    fn connected_device(&mut self, url: &BluetoothUrl) -> Result<&mut SimDevice, TransportError> {
        let device = self.reachable_device(url)?;
        if !device.info.connected {
            return Err(TransportError::not_connected(url));
        }
        Ok(device)
    }

    fn record(&mut self, op: &'static str, url: &BluetoothUrl) {
        *self.calls.entry((op, url.clone())).or_default() += 1;
    }
}

// ── MemoryTransport ─────────────────────────────────────────────────

/// Simulated transport. All mutators are synchronous and cheap.
pub struct MemoryTransport {
    radio: Mutex<Radio>,
    events: broadcast::Sender<TransportEvent>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            radio: Mutex::new(Radio::default()),
            events,
        }
    }

    /// Build a radio from a fixture document.
    pub fn from_fixture(fixture: &RadioFixture) -> Result<Self, CoreError> {
        let transport = Self::new();
        for adapter in &fixture.adapters {
            let adapter_address = MacAddress::new(&adapter.address)?;
            transport.add_adapter(AdapterInfo {
                address: adapter_address.clone(),
                name: adapter.name.clone(),
                alias: adapter.alias.clone(),
                powered: adapter.powered,
                discovering: adapter.discovering,
            });
            let adapter_url = BluetoothUrl::adapter(adapter_address);

            for device in &adapter.devices {
                let device_url = adapter_url.child_device(MacAddress::new(&device.address)?);
                transport.add_device(
                    &adapter_url,
                    DeviceInfo {
                        address: MacAddress::new(&device.address)?,
                        name: device.name.clone(),
                        alias: device.alias.clone(),
                        rssi: device.rssi,
                        bluetooth_class: device.bluetooth_class,
                        connected: false,
                        blocked: device.blocked,
                    },
                );
                for service in &device.services {
                    let mut characteristics = Vec::with_capacity(service.characteristics.len());
                    for c in &service.characteristics {
                        let uuid = parse_characteristic_uuid(&c.uuid)?;
                        if let Some(hex) = &c.value {
                            let value = decode_hex(hex).ok_or_else(|| CoreError::Config {
                                message: format!("invalid hex value for {}: {hex}", c.uuid),
                            })?;
                            transport.set_value(&device_url.child_characteristic(uuid)?, value);
                        }
                        characteristics.push(GattCharacteristic {
                            uuid,
                            flags: c.flags.clone(),
                        });
                    }
                    transport.add_service(
                        &device_url,
                        GattService {
                            uuid: parse_characteristic_uuid(&service.uuid)?,
                            characteristics,
                        },
                    );
                }
            }
        }
        Ok(transport)
    }

    fn radio(&self) -> MutexGuard<'_, Radio> {
        self.radio.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: TransportEvent) {
        // No receivers is fine; the manager only subscribes while started.
        let _ = self.events.send(event);
    }

    // ── Scenario mutators ────────────────────────────────────────────

    pub fn add_adapter(&self, info: AdapterInfo) {
        let mut radio = self.radio();
        radio
            .adapters
            .entry(info.address.clone())
            .and_modify(|a| a.info = info.clone())
            .or_insert_with(|| SimAdapter {
                info,
                devices: BTreeMap::new(),
            });
    }

    pub fn remove_adapter(&self, address: &MacAddress) -> bool {
        self.radio().adapters.remove(address).is_some()
    }

    /// Add (or replace the presence record of) a device under `adapter`.
    pub fn add_device(&self, adapter: &BluetoothUrl, info: DeviceInfo) -> bool {
        let mut radio = self.radio();
        let Some(sim) = radio.adapters.get_mut(adapter.adapter_address()) else {
            return false;
        };
        match sim.devices.get_mut(&info.address) {
            Some(existing) => existing.info = info,
            None => {
                sim.devices.insert(info.address.clone(), SimDevice::new(info));
            }
        }
        true
    }

    pub fn remove_device(&self, device: &BluetoothUrl) -> bool {
        let mut radio = self.radio();
        let (Some(sim), Some(address)) = (
            radio.adapters.get_mut(device.adapter_address()),
            device.device_address(),
        ) else {
            return false;
        };
        sim.devices.remove(address).is_some()
    }

    pub fn add_service(&self, device: &BluetoothUrl, service: GattService) {
        let mut radio = self.radio();
        if let Ok(sim) = radio.device(device) {
            sim.services.retain(|s| s.uuid != service.uuid);
            sim.services.push(service);
        }
    }

    pub fn set_value(&self, characteristic: &BluetoothUrl, value: impl Into<Bytes>) {
        let Some(uuid) = characteristic.characteristic_uuid().copied() else {
            return;
        };
        let mut radio = self.radio();
        if let Ok(sim) = radio.device(characteristic) {
            sim.values.insert(uuid, value.into());
        }
    }

    /// Store a new value and emit `ValueChanged` if notifications are on.
    pub fn push_value(&self, characteristic: &BluetoothUrl, value: impl Into<Bytes>) -> bool {
        let Some(uuid) = characteristic.characteristic_uuid().copied() else {
            return false;
        };
        let value = value.into();
        let notifying = {
            let mut radio = self.radio();
            let Ok(sim) = radio.device(characteristic) else {
                return false;
            };
            sim.values.insert(uuid, value.clone());
            sim.info.connected && sim.notifying.contains(&uuid)
        };
        if notifying {
            self.emit(TransportEvent::ValueChanged {
                url: characteristic.clone(),
                value,
            });
        }
        notifying
    }

    pub fn set_rssi(&self, device: &BluetoothUrl, rssi: i16) {
        let changed = {
            let mut radio = self.radio();
            radio.device(device).is_ok_and(|sim| {
                sim.info.rssi = Some(rssi);
                sim.info.connected
            })
        };
        if changed {
            self.emit(TransportEvent::RssiChanged {
                url: device.clone(),
                rssi,
            });
        }
    }

    /// Make subsequent `connect` calls for `device` fail (or succeed again).
    pub fn fail_connect(&self, device: &BluetoothUrl, fail: bool) {
        let mut radio = self.radio();
        if let Ok(sim) = radio.device(device) {
            sim.connect_failure = fail;
        }
    }

    /// Make `adapters()` fail, simulating a wedged host stack.
    pub fn fail_scan(&self, fail: bool) {
        self.radio().scan_failure = fail;
    }

    /// Drop a live connection from the peripheral side.
    pub fn drop_connection(&self, device: &BluetoothUrl) {
        let dropped = {
            let mut radio = self.radio();
            radio.device(device).is_ok_and(|sim| {
                let was = sim.info.connected;
                sim.info.connected = false;
                sim.notifying.clear();
                was
            })
        };
        if dropped {
            self.emit(TransportEvent::Disconnected {
                url: device.clone(),
            });
        }
    }

    // ── Inspection ───────────────────────────────────────────────────

    /// How many times `op` was invoked for `url`.
    pub fn call_count(&self, op: &str, url: &BluetoothUrl) -> u32 {
        self.radio()
            .calls
            .iter()
            .filter(|((o, u), _)| *o == op && u == url)
            .map(|(_, n)| *n)
            .sum()
    }

    pub fn is_connected(&self, device: &BluetoothUrl) -> bool {
        self.radio()
            .device(device)
            .is_ok_and(|sim| sim.info.connected)
    }

    pub fn is_discovering(&self, adapter: &BluetoothUrl) -> bool {
        self.radio()
            .adapter(adapter)
            .is_ok_and(|a| a.info.discovering)
    }

    pub fn is_powered(&self, adapter: &BluetoothUrl) -> bool {
        self.radio().adapter(adapter).is_ok_and(|a| a.info.powered)
    }

    pub fn is_notifying(&self, characteristic: &BluetoothUrl) -> bool {
        let Some(uuid) = characteristic.characteristic_uuid() else {
            return false;
        };
        self.radio()
            .device(characteristic)
            .is_ok_and(|sim| sim.notifying.contains(uuid))
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn adapters(&self) -> Result<Vec<AdapterInfo>, TransportError> {
        let radio = self.radio();
        if radio.scan_failure {
            return Err(TransportError::failed("host controller not responding"));
        }
        Ok(radio.adapters.values().map(|a| a.info.clone()).collect())
    }

    async fn devices(&self, adapter: &BluetoothUrl) -> Result<Vec<DeviceInfo>, TransportError> {
        let mut radio = self.radio();
        let sim = radio.adapter(adapter)?;
        if !sim.info.powered {
            return Ok(Vec::new());
        }
        Ok(sim.devices.values().map(|d| d.info.clone()).collect())
    }

    async fn set_powered(
        &self,
        adapter: &BluetoothUrl,
        powered: bool,
    ) -> Result<(), TransportError> {
        let mut radio = self.radio();
        radio.record("set_powered", adapter);
        let sim = radio.adapter(adapter)?;
        sim.info.powered = powered;
        if !powered {
            sim.info.discovering = false;
            for device in sim.devices.values_mut() {
                device.info.connected = false;
                device.notifying.clear();
            }
        }
        Ok(())
    }

    async fn set_discovering(
        &self,
        adapter: &BluetoothUrl,
        discovering: bool,
    ) -> Result<(), TransportError> {
        let mut radio = self.radio();
        radio.record("set_discovering", adapter);
        let sim = radio.adapter(adapter)?;
        if discovering && !sim.info.powered {
            return Err(TransportError::failed("adapter is not powered"));
        }
        sim.info.discovering = discovering;
        Ok(())
    }

    async fn connect(&self, device: &BluetoothUrl) -> Result<(), TransportError> {
        {
            let mut radio = self.radio();
            radio.record("connect", device);
            let sim = radio.reachable_device(device)?;
            if sim.info.blocked {
                return Err(TransportError::failed("device is blocked"));
            }
            if sim.connect_failure {
                return Err(TransportError::failed("connection refused by peripheral"));
            }
            sim.info.connected = true;
        }
        trace!(url = %device, "simulated connect");
        self.emit(TransportEvent::Connected {
            url: device.clone(),
        });
        Ok(())
    }

    async fn disconnect(&self, device: &BluetoothUrl) -> Result<(), TransportError> {
        {
            let mut radio = self.radio();
            radio.record("disconnect", device);
            let sim = radio.reachable_device(device)?;
            sim.info.connected = false;
            sim.notifying.clear();
        }
        self.emit(TransportEvent::Disconnected {
            url: device.clone(),
        });
        Ok(())
    }

    async fn set_blocked(
        &self,
        device: &BluetoothUrl,
        blocked: bool,
    ) -> Result<(), TransportError> {
        let mut radio = self.radio();
        radio.record("set_blocked", device);
        let sim = radio.reachable_device(device)?;
        sim.info.blocked = blocked;
        if blocked {
            sim.info.connected = false;
        }
        Ok(())
    }

    async fn services(&self, device: &BluetoothUrl) -> Result<Vec<GattService>, TransportError> {
        let mut radio = self.radio();
        radio.record("services", device);
        Ok(radio.connected_device(device)?.services.clone())
    }

    async fn read(&self, characteristic: &BluetoothUrl) -> Result<Bytes, TransportError> {
        let uuid = *characteristic
            .characteristic_uuid()
            .ok_or_else(|| TransportError::not_found(characteristic))?;
        let mut radio = self.radio();
        radio.record("read", characteristic);
        let sim = radio.connected_device(characteristic)?;
        sim.values
            .get(&uuid)
            .cloned()
            .ok_or_else(|| TransportError::not_found(characteristic))
    }

    async fn write(
        &self,
        characteristic: &BluetoothUrl,
        value: &[u8],
    ) -> Result<(), TransportError> {
        let uuid = *characteristic
            .characteristic_uuid()
            .ok_or_else(|| TransportError::not_found(characteristic))?;
        let mut radio = self.radio();
        radio.record("write", characteristic);
        let sim = radio.connected_device(characteristic)?;
        if !sim.has_characteristic(&uuid) {
            return Err(TransportError::not_found(characteristic));
        }
        sim.values.insert(uuid, Bytes::copy_from_slice(value));
        Ok(())
    }

    async fn set_notifying(
        &self,
        characteristic: &BluetoothUrl,
        enabled: bool,
    ) -> Result<(), TransportError> {
        let uuid = *characteristic
            .characteristic_uuid()
            .ok_or_else(|| TransportError::not_found(characteristic))?;
        let mut radio = self.radio();
        radio.record("set_notifying", characteristic);
        let sim = radio.connected_device(characteristic)?;
        if enabled {
            sim.notifying.insert(uuid);
        } else {
            sim.notifying.remove(&uuid);
        }
        Ok(())
    }

    fn events(&self) -> Option<broadcast::Receiver<TransportEvent>> {
        Some(self.events.subscribe())
    }
}

fn decode_hex(raw: &str) -> Option<Bytes> {
    let digits: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| digits.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect::<Option<Vec<u8>>>()
        .map(Bytes::from)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"
        [[adapters]]
        address = "11:22:33:44:55:66"
        name = "hci0"
        discovering = true

        [[adapters.devices]]
        address = "aa:bb:cc:dd:ee:ff"
        name = "Thermometer"
        rssi = -60

        [[adapters.devices.services]]
        uuid = "180f"

        [[adapters.devices.services.characteristics]]
        uuid = "2a19"
        flags = ["read", "notify"]
        value = "64"
    "#;

    fn battery() -> BluetoothUrl {
        "/11:22:33:44:55:66/AA:BB:CC:DD:EE:FF/2a19".parse().unwrap()
    }

    #[test]
    fn decode_hex_handles_spacing_and_rejects_odd_length() {
        assert_eq!(decode_hex("de ad").unwrap().to_vec(), vec![0xde, 0xad]);
        assert!(decode_hex("abc").is_none());
        assert!(decode_hex("zz").is_none());
    }

    #[tokio::test]
    async fn fixture_builds_radio() {
        let fixture: RadioFixture = toml::from_str(FIXTURE).unwrap();
        let transport = MemoryTransport::from_fixture(&fixture).unwrap();

        let adapters = transport.adapters().await.unwrap();
        assert_eq!(adapters.len(), 1);
        assert!(adapters[0].powered);

        let devices = transport.devices(&battery().adapter_url()).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].rssi, Some(-60));
    }

    #[tokio::test]
    async fn read_requires_connection() {
        let fixture: RadioFixture = toml::from_str(FIXTURE).unwrap();
        let transport = MemoryTransport::from_fixture(&fixture).unwrap();
        let device = battery().device_url().unwrap();

        assert!(matches!(
            transport.read(&battery()).await,
            Err(TransportError::NotConnected { .. })
        ));

        transport.connect(&device).await.unwrap();
        assert_eq!(transport.read(&battery()).await.unwrap().to_vec(), vec![0x64]);
        assert_eq!(transport.call_count("connect", &device), 1);
    }

    #[tokio::test]
    async fn push_value_only_emits_while_notifying() {
        let fixture: RadioFixture = toml::from_str(FIXTURE).unwrap();
        let transport = MemoryTransport::from_fixture(&fixture).unwrap();
        let mut events = transport.events().unwrap();
        let device = battery().device_url().unwrap();

        transport.connect(&device).await.unwrap();
        assert!(!transport.push_value(&battery(), vec![1]));

        transport.set_notifying(&battery(), true).await.unwrap();
        assert!(transport.push_value(&battery(), vec![2]));

        assert!(matches!(events.recv().await.unwrap(), TransportEvent::Connected { .. }));
        assert!(matches!(
            events.recv().await.unwrap(),
            TransportEvent::ValueChanged { value, .. } if value.to_vec() == vec![2]
        ));
    }

    #[tokio::test]
    async fn failing_connect_is_reported() {
        let fixture: RadioFixture = toml::from_str(FIXTURE).unwrap();
        let transport = MemoryTransport::from_fixture(&fixture).unwrap();
        let device = battery().device_url().unwrap();

        transport.fail_connect(&device, true);
        assert!(transport.connect(&device).await.is_err());
        assert!(!transport.is_connected(&device));
    }
}
