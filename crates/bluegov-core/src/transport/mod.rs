// ── Transport contract ──
//
// The platform radio stack (BlueZ, WinRT, CoreBluetooth, ...) sits behind
// this trait. Every call is potentially slow or failing I/O; the core never
// holds a registry lock across one.

mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::model::{BluetoothUrl, GattService, MacAddress};

pub use memory::{MemoryTransport, RadioFixture};

// ── Errors ──────────────────────────────────────────────────────────

/// Errors reported by a transport implementation.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("{url} is not present")]
    NotFound { url: String },

    #[error("{url} is not connected")]
    NotConnected { url: String },

    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("{message}")]
    Failed { message: String },
}

impl TransportError {
    pub fn not_found(url: &BluetoothUrl) -> Self {
        Self::NotFound {
            url: url.to_string(),
        }
    }

    pub fn not_connected(url: &BluetoothUrl) -> Self {
        Self::NotConnected {
            url: url.to_string(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

// ── Presence records ────────────────────────────────────────────────

/// Raw adapter presence as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterInfo {
    pub address: MacAddress,
    pub name: Option<String>,
    pub alias: Option<String>,
    pub powered: bool,
    pub discovering: bool,
}

/// Raw device presence as reported by the transport for one adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub address: MacAddress,
    pub name: Option<String>,
    pub alias: Option<String>,
    pub rssi: Option<i16>,
    pub bluetooth_class: Option<u32>,
    pub connected: bool,
    pub blocked: bool,
}

/// Unsolicited notifications pushed by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ValueChanged { url: BluetoothUrl, value: Bytes },
    Connected { url: BluetoothUrl },
    Disconnected { url: BluetoothUrl },
    RssiChanged { url: BluetoothUrl, rssi: i16 },
}

// ── Transport ───────────────────────────────────────────────────────

/// Radio access used by the discovery and refresh engines.
///
/// Adapter calls take adapter URLs, device calls device URLs and
/// characteristic calls characteristic URLs; all are physical (never
/// combined) URLs.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Adapters currently visible to the host.
    async fn adapters(&self) -> Result<Vec<AdapterInfo>, TransportError>;

    /// Devices currently visible through `adapter`.
    async fn devices(&self, adapter: &BluetoothUrl) -> Result<Vec<DeviceInfo>, TransportError>;

    async fn set_powered(&self, adapter: &BluetoothUrl, powered: bool)
    -> Result<(), TransportError>;

    async fn set_discovering(
        &self,
        adapter: &BluetoothUrl,
        discovering: bool,
    ) -> Result<(), TransportError>;

    async fn connect(&self, device: &BluetoothUrl) -> Result<(), TransportError>;

    async fn disconnect(&self, device: &BluetoothUrl) -> Result<(), TransportError>;

    async fn set_blocked(&self, device: &BluetoothUrl, blocked: bool)
    -> Result<(), TransportError>;

    /// GATT services of a connected device.
    async fn services(&self, device: &BluetoothUrl) -> Result<Vec<GattService>, TransportError>;

    async fn read(&self, characteristic: &BluetoothUrl) -> Result<Bytes, TransportError>;

    async fn write(&self, characteristic: &BluetoothUrl, value: &[u8])
    -> Result<(), TransportError>;

    async fn set_notifying(
        &self,
        characteristic: &BluetoothUrl,
        enabled: bool,
    ) -> Result<(), TransportError>;

    /// Push event feed, if the transport has one.
    fn events(&self) -> Option<broadcast::Receiver<TransportEvent>> {
        None
    }
}
