// ── Domain model ──
//
// Addressing, discovery snapshots and GATT value objects. Everything here
// is an immutable value; the mutable per-entity state lives in governors.

mod discovered;
mod gatt;
mod url;

pub use discovered::{DiscoveredAdapter, DiscoveredDevice};
pub use gatt::{CharacteristicFlag, GattCharacteristic, GattService};
pub use url::{BluetoothUrl, MacAddress, UrlKind, parse_characteristic_uuid};
