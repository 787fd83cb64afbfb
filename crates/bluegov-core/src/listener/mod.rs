// ── Listener contracts ──
//
// Callbacks run on the notification thread (see `dispatch`), never on a
// scan or refresh task. Implementations must return promptly: removing a
// listener blocks its caller until that listener's running callback
// returns. A panic is caught and logged without affecting other listeners.

mod dispatch;
mod set;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;

use crate::model::{DiscoveredAdapter, DiscoveredDevice, GattService};

pub(crate) use dispatch::Dispatcher;
pub use set::ListenerSet;

/// Lifecycle state of a [`BluetoothManager`](crate::BluetoothManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
pub enum ManagerState {
    Stopped,
    Started,
    Disposed,
}

/// Readiness of any governor.
pub trait GovernorListener: Send + Sync {
    /// The underlying physical entity became reachable (or stopped being).
    fn ready(&self, ready: bool);

    /// The governor recorded activity from its entity.
    fn last_updated(&self, _at: DateTime<Utc>) {}
}

/// Adapter status changes.
pub trait AdapterListener: Send + Sync {
    fn powered(&self, powered: bool);

    fn discovering(&self, discovering: bool);
}

/// Device status changes.
pub trait DeviceListener: Send + Sync {
    fn connected(&self, connected: bool);

    fn blocked(&self, _blocked: bool) {}

    fn rssi_changed(&self, _rssi: i16) {}

    /// An automatic connection attempt failed. The governor stays usable
    /// and the attempt is retried on the next refresh.
    fn connection_failed(&self, _reason: &str) {}

    fn services_resolved(&self, _services: &[GattService]) {}
}

/// Characteristic value notifications.
pub trait ValueListener: Send + Sync {
    fn changed(&self, value: &[u8]);
}

pub trait DeviceDiscoveryListener: Send + Sync {
    fn discovered(&self, device: &DiscoveredDevice);

    /// The device was present in the previous cycle and is gone now.
    fn lost(&self, _device: &DiscoveredDevice) {}
}

pub trait AdapterDiscoveryListener: Send + Sync {
    fn discovered(&self, adapter: &DiscoveredAdapter);

    fn lost(&self, _adapter: &DiscoveredAdapter) {}
}

pub trait ManagerListener: Send + Sync {
    fn state_changed(&self, state: ManagerState);
}
