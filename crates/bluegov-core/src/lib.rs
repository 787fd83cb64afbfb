//! Governor registry and discovery engine for Bluetooth Low Energy.
//!
//! This crate owns the long-lived control objects ("governors") for
//! adapters, devices and GATT characteristics, and the background machinery
//! that keeps them in step with a volatile radio:
//!
//! - **[`BluetoothManager`]**: Central facade. [`start()`](BluetoothManager::start)
//!   spawns a discovery task, a refresh task and a transport event pump;
//!   [`stop()`](BluetoothManager::stop) and [`dispose()`](BluetoothManager::dispose)
//!   shut them down cleanly through a cancellation token.
//!
//! - **Governors** ([`AdapterGovernor`], [`DeviceGovernor`],
//!   [`CharacteristicGovernor`]): One per [`BluetoothUrl`], created on
//!   first request or first discovery, kept until explicitly disposed.
//!   State lives in `watch` channels; intent is expressed through
//!   `*_control` flags that the refresh task drives to the radio.
//!
//! - **Combination**: Optional folding of all adapters into one combined
//!   adapter, and of same-address devices seen through several adapters
//!   into one combined device.
//!
//! - **Listeners** ([`listener`]): Callback traits delivered from a
//!   dedicated notification thread, so slow listeners never stall a scan.
//!
//! - **[`Transport`]**: The radio stack contract. [`MemoryTransport`]
//!   simulates one in memory.

pub mod config;
pub mod error;
pub mod governor;
pub mod listener;
pub mod manager;
pub mod model;
pub mod stream;
pub mod transport;

mod combine;
mod engine;
mod registry;
mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::ManagerConfig;
pub use error::CoreError;
pub use governor::{
    AdapterGovernor, AdapterState, CharacteristicGovernor, CharacteristicState, DeviceGovernor,
    DeviceState, Governor, GovernorBase,
};
pub use listener::{
    AdapterDiscoveryListener, AdapterListener, DeviceDiscoveryListener, DeviceListener,
    GovernorListener, ListenerSet, ManagerListener, ManagerState, ValueListener,
};
pub use manager::BluetoothManager;
pub use stream::{PresenceStream, PresenceWatchStream};
pub use transport::{
    AdapterInfo, DeviceInfo, MemoryTransport, RadioFixture, Transport, TransportError,
    TransportEvent,
};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    BluetoothUrl, CharacteristicFlag, DiscoveredAdapter, DiscoveredDevice, GattCharacteristic,
    GattService, MacAddress, UrlKind,
};
