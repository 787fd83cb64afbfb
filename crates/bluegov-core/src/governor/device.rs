use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::watch;

use super::GovernorBase;
use crate::error::CoreError;
use crate::listener::{DeviceListener, Dispatcher, ListenerSet};
use crate::model::{BluetoothUrl, GattService};
use crate::transport::DeviceInfo;

/// Last known device status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub connected: bool,
    pub blocked: bool,
    pub rssi: Option<i16>,
    pub name: Option<String>,
    pub alias: Option<String>,
    pub bluetooth_class: Option<u32>,
    /// Resolved after connecting; cleared on disconnect.
    pub services: Vec<GattService>,
}

/// Union of constituent states projected onto a combined device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DeviceFold {
    pub(crate) ready: bool,
    pub(crate) connected: bool,
    pub(crate) blocked: bool,
    pub(crate) rssi: Option<i16>,
    pub(crate) name: Option<String>,
    pub(crate) alias: Option<String>,
    pub(crate) bluetooth_class: Option<u32>,
    /// Services of the delegate, when one is connected.
    pub(crate) services: Vec<GattService>,
}

impl DeviceFold {
    /// Merge one constituent into the fold.
    pub(crate) fn absorb(&mut self, ready: bool, state: &DeviceState) {
        self.ready |= ready;
        self.connected |= state.connected;
        self.blocked |= state.blocked;
        self.rssi = match (self.rssi, state.rssi) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if self.name.is_none() {
            self.name.clone_from(&state.name);
        }
        if self.alias.is_none() {
            self.alias.clone_from(&state.alias);
        }
        self.bluetooth_class = self.bluetooth_class.or(state.bluetooth_class);
    }
}

/// Governor for one device, physical or combined.
pub struct DeviceGovernor {
    base: GovernorBase,
    state: watch::Sender<DeviceState>,
    connection_control: AtomicBool,
    blocked_control: AtomicBool,
    listeners: Arc<ListenerSet<dyn DeviceListener>>,
}

impl DeviceGovernor {
    pub(crate) fn new(url: BluetoothUrl, dispatcher: Dispatcher) -> Self {
        let (state, _) = watch::channel(DeviceState::default());
        Self {
            base: GovernorBase::new(url, dispatcher),
            state,
            connection_control: AtomicBool::new(false),
            blocked_control: AtomicBool::new(false),
            listeners: Arc::new(ListenerSet::new()),
        }
    }

    pub fn base(&self) -> &GovernorBase {
        &self.base
    }

    pub fn url(&self) -> &BluetoothUrl {
        self.base.url()
    }

    pub fn is_ready(&self) -> bool {
        self.base.is_ready()
    }

    pub fn state(&self) -> DeviceState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    pub fn is_blocked(&self) -> bool {
        self.state.borrow().blocked
    }

    pub fn rssi(&self) -> Option<i16> {
        self.state.borrow().rssi
    }

    pub fn services(&self) -> Vec<GattService> {
        self.state.borrow().services.clone()
    }

    pub fn display_name(&self) -> Option<String> {
        let state = self.state.borrow();
        state.alias.clone().or_else(|| state.name.clone())
    }

    // ── Controls ─────────────────────────────────────────────────────

    /// Whether the engine should keep this device connected.
    pub fn connection_control(&self) -> bool {
        self.connection_control.load(Ordering::Acquire)
    }

    pub fn set_connection_control(&self, connected: bool) -> Result<(), CoreError> {
        self.base.ensure_live()?;
        self.connection_control.store(connected, Ordering::Release);
        Ok(())
    }

    pub fn blocked_control(&self) -> bool {
        self.blocked_control.load(Ordering::Acquire)
    }

    pub fn set_blocked_control(&self, blocked: bool) -> Result<(), CoreError> {
        self.base.ensure_live()?;
        self.blocked_control.store(blocked, Ordering::Release);
        Ok(())
    }

    // ── Listeners ────────────────────────────────────────────────────

    pub fn add_listener(&self, listener: Arc<dyn DeviceListener>) -> Result<bool, CoreError> {
        self.base.ensure_live()?;
        Ok(self.listeners.add(listener))
    }

    pub fn remove_listener(&self, listener: &Arc<dyn DeviceListener>) -> bool {
        self.listeners.remove(listener)
    }

    // ── Engine-side updates ──────────────────────────────────────────

    pub(crate) fn apply(&self, info: &DeviceInfo) {
        self.update(|state| {
            state.name.clone_from(&info.name);
            state.alias.clone_from(&info.alias);
            state.bluetooth_class = info.bluetooth_class;
            if info.rssi.is_some() {
                state.rssi = info.rssi;
            }
            state.blocked = info.blocked;
            set_connected(state, info.connected);
        });
        self.base.set_ready(true);
    }

    pub(crate) fn apply_fold(&self, fold: &DeviceFold) {
        self.update(|state| {
            state.name.clone_from(&fold.name);
            state.alias.clone_from(&fold.alias);
            state.bluetooth_class = fold.bluetooth_class;
            state.rssi = fold.rssi;
            state.blocked = fold.blocked;
            set_connected(state, fold.connected);
            if fold.connected {
                state.services.clone_from(&fold.services);
            }
        });
        self.base.set_ready(fold.ready);
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.update(|state| set_connected(state, connected));
    }

    pub(crate) fn set_blocked(&self, blocked: bool) {
        self.update(|state| {
            state.blocked = blocked;
            if blocked {
                set_connected(state, false);
            }
        });
    }

    pub(crate) fn set_rssi(&self, rssi: i16) {
        self.update(|state| state.rssi = Some(rssi));
    }

    pub(crate) fn set_services(&self, services: Vec<GattService>) {
        self.update(|state| state.services = services);
    }

    /// Report a failed automatic connection attempt.
    pub(crate) fn connection_failed(&self, reason: String) {
        if self.base.is_disposed() {
            return;
        }
        self.base
            .dispatcher()
            .notify(&self.listeners, move |l| l.connection_failed(&reason));
    }

    pub(crate) fn finalize(&self) {
        self.listeners.clear();
        self.base.finalize();
    }

    fn update(&self, f: impl FnOnce(&mut DeviceState)) {
        if self.base.is_disposed() {
            return;
        }
        let dispatcher = self.base.dispatcher();
        let listeners = &self.listeners;
        let changed = self.state.send_if_modified(|state| {
            let previous = state.clone();
            f(state);
            if state.connected != previous.connected {
                let connected = state.connected;
                dispatcher.notify(listeners, move |l| l.connected(connected));
            }
            if state.blocked != previous.blocked {
                let blocked = state.blocked;
                dispatcher.notify(listeners, move |l| l.blocked(blocked));
            }
            if let (Some(rssi), true) = (state.rssi, state.rssi != previous.rssi) {
                dispatcher.notify(listeners, move |l| l.rssi_changed(rssi));
            }
            if !state.services.is_empty() && state.services != previous.services {
                let services = state.services.clone();
                dispatcher.notify(listeners, move |l| l.services_resolved(&services));
            }
            *state != previous
        });
        if changed {
            self.base.touch();
        }
    }
}

fn set_connected(state: &mut DeviceState, connected: bool) {
    state.connected = connected;
    if !connected {
        state.services.clear();
    }
}

impl fmt::Debug for DeviceGovernor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceGovernor")
            .field("url", self.url())
            .field("ready", &self.is_ready())
            .field("state", &*self.state.borrow())
            .field("connection_control", &self.connection_control())
            .field("blocked_control", &self.blocked_control())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::MacAddress;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl DeviceListener for Recorder {
        fn connected(&self, connected: bool) {
            self.0.lock().unwrap().push(format!("connected={connected}"));
        }

        fn rssi_changed(&self, rssi: i16) {
            self.0.lock().unwrap().push(format!("rssi={rssi}"));
        }

        fn connection_failed(&self, reason: &str) {
            self.0.lock().unwrap().push(format!("failed: {reason}"));
        }
    }

    fn governor() -> DeviceGovernor {
        let url: BluetoothUrl = "/11:22:33:44:55:66/AA:BB:CC:DD:EE:FF".parse().unwrap();
        DeviceGovernor::new(url, Dispatcher::spawn().unwrap())
    }

    fn info(rssi: i16, connected: bool) -> DeviceInfo {
        DeviceInfo {
            address: MacAddress::new("AA:BB:CC:DD:EE:FF").unwrap(),
            name: Some("Thermometer".into()),
            alias: None,
            rssi: Some(rssi),
            bluetooth_class: None,
            connected,
            blocked: false,
        }
    }

    #[tokio::test]
    async fn notifications_follow_mutation_order() {
        let gov = governor();
        let recorder = Arc::new(Recorder::default());
        gov.add_listener(recorder.clone()).unwrap();

        gov.apply(&info(-70, false));
        gov.set_connected(true);
        gov.connection_failed("link lost".into());
        gov.set_connected(false);
        gov.base().dispatcher().flush().await;

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                "rssi=-70".to_string(),
                "connected=true".to_string(),
                "failed: link lost".to_string(),
                "connected=false".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn disconnect_clears_services() {
        let gov = governor();
        gov.set_connected(true);
        gov.set_services(vec![GattService {
            uuid: crate::model::parse_characteristic_uuid("180f").unwrap(),
            characteristics: Vec::new(),
        }]);
        assert_eq!(gov.services().len(), 1);

        gov.set_connected(false);
        assert!(gov.services().is_empty());
    }

    #[test]
    fn fold_is_a_union() {
        let mut fold = DeviceFold::default();
        let weak = DeviceState {
            rssi: Some(-90),
            name: Some("left".into()),
            ..DeviceState::default()
        };
        let strong = DeviceState {
            rssi: Some(-40),
            connected: true,
            ..DeviceState::default()
        };

        fold.absorb(false, &weak);
        fold.absorb(true, &strong);

        assert!(fold.ready);
        assert!(fold.connected);
        assert!(!fold.blocked);
        assert_eq!(fold.rssi, Some(-40));
        assert_eq!(fold.name.as_deref(), Some("left"));
    }
}
