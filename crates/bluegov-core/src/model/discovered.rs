// ── Discovery snapshots ──
//
// Produced once per discovery cycle and handed to listeners. Never
// mutated after construction; governors are the long-lived handles.

use serde::{Deserialize, Serialize};

use super::url::BluetoothUrl;

/// An adapter seen by the transport during a discovery cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredAdapter {
    pub url: BluetoothUrl,
    pub name: Option<String>,
    pub alias: Option<String>,
    pub powered: bool,
    pub discovering: bool,
}

impl DiscoveredAdapter {
    /// Alias if set, otherwise name, otherwise the address.
    pub fn display_name(&self) -> String {
        self.alias
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| self.url.adapter_address().to_string())
    }
}

/// A device seen by the transport during a discovery cycle.
///
/// With device combination enabled, `url` is the combined URL and
/// `combined` is set; `rssi` is the strongest reading across adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub url: BluetoothUrl,
    pub name: Option<String>,
    pub alias: Option<String>,
    pub rssi: Option<i16>,
    pub bluetooth_class: Option<u32>,
    #[serde(default)]
    pub combined: bool,
}

impl DiscoveredDevice {
    pub fn display_name(&self) -> String {
        self.alias
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| {
                self.url
                    .device_address()
                    .map(ToString::to_string)
                    .unwrap_or_default()
            })
    }
}
