// ── Bluetooth addressing ──
//
// MacAddress and BluetoothUrl are the only keys the registry knows.
// Both are validated at construction; nothing downstream re-checks them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::Display;
use uuid::Uuid;

use crate::error::CoreError;

/// Scheme prefix accepted (and ignored) when parsing.
const SCHEME: &str = "bluetooth:";

/// Bluetooth base UUID used to expand 16/32-bit short characteristic ids.
const BASE_UUID_SUFFIX: &str = "-0000-1000-8000-00805f9b34fb";

// ── MacAddress ──────────────────────────────────────────────────────

/// MAC address, normalized to upper-case colon-separated format (AA:BB:CC:DD:EE:FF).
///
/// The reserved address `XX:XX:XX:XX:XX:XX` names the combined adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    /// Address reserved for combined (virtual) adapters and devices.
    pub const COMBINED: &'static str = "XX:XX:XX:XX:XX:XX";

    /// Parse and normalize from any common format.
    /// Accepts colon-separated, dash-separated, or bare hex.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, CoreError> {
        let raw = raw.as_ref().trim();
        let upper = raw.to_uppercase().replace('-', ":");
        if upper == Self::COMBINED {
            return Ok(Self::combined());
        }

        let octets: Vec<String> = if upper.contains(':') {
            upper.split(':').map(str::to_owned).collect()
        } else if upper.len() == 12 {
            upper
                .as_bytes()
                .chunks(2)
                .map(|pair| String::from_utf8_lossy(pair).into_owned())
                .collect()
        } else {
            return Err(CoreError::invalid_url(raw, "expected 6 hex octets"));
        };

        let valid = octets.len() == 6
            && octets
                .iter()
                .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
        if !valid {
            return Err(CoreError::invalid_url(raw, "expected 6 hex octets"));
        }
        Ok(Self(octets.join(":")))
    }

    /// The reserved combined address.
    pub fn combined() -> Self {
        Self(Self::COMBINED.to_owned())
    }

    pub fn is_combined(&self) -> bool {
        self.0 == Self::COMBINED
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for MacAddress {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}

/// Parse a characteristic UUID, expanding Bluetooth SIG short forms.
pub fn parse_characteristic_uuid(raw: &str) -> Result<Uuid, CoreError> {
    let raw = raw.trim();
    let is_hex = raw.chars().all(|c| c.is_ascii_hexdigit());
    let expanded = match raw.len() {
        4 if is_hex => format!("0000{raw}{BASE_UUID_SUFFIX}"),
        8 if is_hex => format!("{raw}{BASE_UUID_SUFFIX}"),
        _ => raw.to_owned(),
    };
    Uuid::parse_str(&expanded).map_err(|e| CoreError::invalid_url(raw, e.to_string()))
}

// ── UrlKind ─────────────────────────────────────────────────────────

/// Which level of the hierarchy a URL addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UrlKind {
    Adapter,
    Device,
    Characteristic,
}

// ── BluetoothUrl ────────────────────────────────────────────────────

/// Hierarchical address of an adapter, a device under it, or a
/// characteristic under that device.
///
/// Text form is `/ADAPTER[/DEVICE[/CHARACTERISTIC]]`. A characteristic
/// component without a device component cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BluetoothUrl {
    adapter: MacAddress,
    device: Option<MacAddress>,
    characteristic: Option<Uuid>,
}

impl BluetoothUrl {
    /// Adapter-level URL.
    pub fn adapter(adapter: MacAddress) -> Self {
        Self {
            adapter,
            device: None,
            characteristic: None,
        }
    }

    /// Device-level URL under `adapter`.
    pub fn device(adapter: MacAddress, device: MacAddress) -> Self {
        Self {
            adapter,
            device: Some(device),
            characteristic: None,
        }
    }

    /// Characteristic-level URL under `adapter`/`device`.
    pub fn characteristic(adapter: MacAddress, device: MacAddress, uuid: Uuid) -> Self {
        Self {
            adapter,
            device: Some(device),
            characteristic: Some(uuid),
        }
    }

    /// The combined adapter URL.
    pub fn combined_adapter() -> Self {
        Self::adapter(MacAddress::combined())
    }

    /// A device URL under the same adapter as `self`.
    pub fn child_device(&self, device: MacAddress) -> Self {
        Self::device(self.adapter.clone(), device)
    }

    /// A characteristic URL under the device of `self`.
    pub fn child_characteristic(&self, uuid: Uuid) -> Result<Self, CoreError> {
        let device = self.device.clone().ok_or_else(|| {
            CoreError::invalid_url(self.to_string(), "characteristic requires a device component")
        })?;
        Ok(Self::characteristic(self.adapter.clone(), device, uuid))
    }

    pub fn kind(&self) -> UrlKind {
        match (&self.device, &self.characteristic) {
            (None, _) => UrlKind::Adapter,
            (Some(_), None) => UrlKind::Device,
            (Some(_), Some(_)) => UrlKind::Characteristic,
        }
    }

    /// 1 for adapters, 2 for devices, 3 for characteristics.
    pub fn depth(&self) -> usize {
        match self.kind() {
            UrlKind::Adapter => 1,
            UrlKind::Device => 2,
            UrlKind::Characteristic => 3,
        }
    }

    pub fn adapter_address(&self) -> &MacAddress {
        &self.adapter
    }

    pub fn device_address(&self) -> Option<&MacAddress> {
        self.device.as_ref()
    }

    pub fn characteristic_uuid(&self) -> Option<&Uuid> {
        self.characteristic.as_ref()
    }

    /// The next level up, or `None` for adapters.
    pub fn parent(&self) -> Option<Self> {
        match self.kind() {
            UrlKind::Adapter => None,
            UrlKind::Device => Some(self.adapter_url()),
            UrlKind::Characteristic => self.device_url(),
        }
    }

    pub fn adapter_url(&self) -> Self {
        Self::adapter(self.adapter.clone())
    }

    /// Device-level prefix of a device or characteristic URL.
    pub fn device_url(&self) -> Option<Self> {
        self.device
            .as_ref()
            .map(|d| Self::device(self.adapter.clone(), d.clone()))
    }

    /// True iff `ancestor` is a strict prefix of `self` in the hierarchy.
    pub fn is_descendant(&self, ancestor: &Self) -> bool {
        if self.depth() <= ancestor.depth() || self.adapter != ancestor.adapter {
            return false;
        }
        match &ancestor.device {
            None => true,
            Some(device) => self.device.as_ref() == Some(device),
        }
    }

    /// Same URL with the adapter component replaced.
    pub fn with_adapter(&self, adapter: MacAddress) -> Self {
        Self {
            adapter,
            device: self.device.clone(),
            characteristic: self.characteristic,
        }
    }

    /// Whether this URL lives under the combined adapter.
    pub fn is_combined(&self) -> bool {
        self.adapter.is_combined()
    }

    /// The combined counterpart of a physical URL.
    pub fn to_combined(&self) -> Self {
        self.with_adapter(MacAddress::combined())
    }
}

impl fmt::Display for BluetoothUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.adapter)?;
        if let Some(device) = &self.device {
            write!(f, "/{device}")?;
        }
        if let Some(uuid) = &self.characteristic {
            write!(f, "/{uuid}")?;
        }
        Ok(())
    }
}

impl FromStr for BluetoothUrl {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.trim();
        let body = body.strip_prefix(SCHEME).unwrap_or(body);
        let Some(path) = body.strip_prefix('/') else {
            return Err(CoreError::invalid_url(s, "must start with '/'"));
        };
        let path = path.strip_suffix('/').unwrap_or(path);

        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() > 3 {
            return Err(CoreError::invalid_url(s, "too many path components"));
        }
        if let Some(pos) = parts.iter().position(|p| p.trim().is_empty()) {
            let which = ["adapter", "device", "characteristic"]
                .get(pos)
                .copied()
                .unwrap_or("path");
            return Err(CoreError::invalid_url(s, format!("empty {which} component")));
        }

        let mut parts = parts.into_iter();
        let adapter = MacAddress::new(parts.next().unwrap_or_default())
            .map_err(|e| CoreError::invalid_url(s, format!("adapter: {e}")))?;
        let device = parts
            .next()
            .map(MacAddress::new)
            .transpose()
            .map_err(|e| CoreError::invalid_url(s, format!("device: {e}")))?;
        let characteristic = parts
            .next()
            .map(parse_characteristic_uuid)
            .transpose()
            .map_err(|e| CoreError::invalid_url(s, format!("characteristic: {e}")))?;

        Ok(Self {
            adapter,
            device,
            characteristic,
        })
    }
}

impl TryFrom<String> for BluetoothUrl {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BluetoothUrl> for String {
    fn from(url: BluetoothUrl) -> Self {
        url.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const ADAPTER: &str = "/11:22:33:44:55:66";
    const DEVICE: &str = "/11:22:33:44:55:66/AA:BB:CC:DD:EE:FF";
    const BATTERY: &str = "/11:22:33:44:55:66/AA:BB:CC:DD:EE:FF/2a19";

    fn url(s: &str) -> BluetoothUrl {
        s.parse().unwrap()
    }

    #[test]
    fn mac_address_normalizes_case_and_dashes() {
        let mac = MacAddress::new("aa-bb-cc-dd-ee-ff").unwrap();
        assert_eq!(mac.as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn mac_address_accepts_bare_hex() {
        let mac = MacAddress::new("aabbccddeeff").unwrap();
        assert_eq!(mac.to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn mac_address_rejects_garbage() {
        assert!(MacAddress::new("not-a-mac").is_err());
        assert!(MacAddress::new("AA:BB:CC:DD:EE").is_err());
        assert!(MacAddress::new("AA:BB:CC:DD:EE:GG").is_err());
    }

    #[test]
    fn combined_address_is_reserved() {
        let mac = MacAddress::new("xx:xx:xx:xx:xx:xx").unwrap();
        assert!(mac.is_combined());
        assert!(BluetoothUrl::combined_adapter().is_combined());
    }

    #[test]
    fn parses_each_level() {
        assert_eq!(url(ADAPTER).kind(), UrlKind::Adapter);
        assert_eq!(url(DEVICE).kind(), UrlKind::Device);
        assert_eq!(url(BATTERY).kind(), UrlKind::Characteristic);
    }

    #[test]
    fn short_characteristic_uuid_expands_against_base() {
        let u = url(BATTERY);
        assert_eq!(
            u.characteristic_uuid().unwrap().to_string(),
            "00002a19-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn display_round_trips_through_parse() {
        let u = url("bluetooth:/11-22-33-44-55-66/aabbccddeeff/");
        assert_eq!(u.to_string(), DEVICE);
        assert_eq!(url(&u.to_string()), u);
    }

    #[test]
    fn rejects_missing_leading_slash() {
        let err = "11:22:33:44:55:66".parse::<BluetoothUrl>().unwrap_err();
        assert!(err.is_addressing());
    }

    #[test]
    fn rejects_empty_device_component() {
        let err = "/11:22:33:44:55:66//2a19".parse::<BluetoothUrl>().unwrap_err();
        assert!(err.to_string().contains("empty device component"));
    }

    #[test]
    fn rejects_empty_adapter_component() {
        let err = "//AA:BB:CC:DD:EE:FF".parse::<BluetoothUrl>().unwrap_err();
        assert!(err.to_string().contains("empty adapter component"));
    }

    #[test]
    fn rejects_too_many_components() {
        assert!("/11:22:33:44:55:66/AA:BB:CC:DD:EE:FF/2a19/extra"
            .parse::<BluetoothUrl>()
            .is_err());
    }

    #[test]
    fn descendant_is_strict() {
        let adapter = url(ADAPTER);
        let device = url(DEVICE);
        let battery = url(BATTERY);

        assert!(device.is_descendant(&adapter));
        assert!(battery.is_descendant(&adapter));
        assert!(battery.is_descendant(&device));
        assert!(!adapter.is_descendant(&adapter));
        assert!(!device.is_descendant(&battery));
    }

    #[test]
    fn descendant_requires_matching_prefix() {
        let other_adapter = url("/66:55:44:33:22:11");
        let other_device = url("/11:22:33:44:55:66/00:00:00:00:00:01");
        let battery = url(BATTERY);

        assert!(!battery.is_descendant(&other_adapter));
        assert!(!battery.is_descendant(&other_device));
    }

    #[test]
    fn parent_walks_up_one_level() {
        assert_eq!(url(BATTERY).parent(), Some(url(DEVICE)));
        assert_eq!(url(DEVICE).parent(), Some(url(ADAPTER)));
        assert_eq!(url(ADAPTER).parent(), None);
    }

    #[test]
    fn child_characteristic_requires_device() {
        let uuid = parse_characteristic_uuid("2a19").unwrap();
        assert!(url(ADAPTER).child_characteristic(uuid).is_err());
        assert_eq!(url(DEVICE).child_characteristic(uuid).unwrap(), url(BATTERY));
    }

    #[test]
    fn to_combined_keeps_device_and_characteristic() {
        let combined = url(BATTERY).to_combined();
        assert_eq!(
            combined.to_string(),
            "/XX:XX:XX:XX:XX:XX/AA:BB:CC:DD:EE:FF/00002a19-0000-1000-8000-00805f9b34fb"
        );
        assert!(combined.is_combined());
    }
}
