// ── GATT value objects ──

use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

/// Characteristic property flag, as advertised by the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum CharacteristicFlag {
    Broadcast,
    Read,
    WriteWithoutResponse,
    Write,
    Notify,
    Indicate,
    AuthenticatedSignedWrites,
    ExtendedProperties,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    #[serde(default)]
    pub flags: Vec<CharacteristicFlag>,
}

impl GattCharacteristic {
    pub fn can_notify(&self) -> bool {
        self.flags
            .iter()
            .any(|f| matches!(f, CharacteristicFlag::Notify | CharacteristicFlag::Indicate))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattService {
    pub uuid: Uuid,
    #[serde(default)]
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    /// Find a characteristic of this service by UUID.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| &c.uuid == uuid)
    }
}
