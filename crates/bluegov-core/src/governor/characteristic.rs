use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use tokio::sync::watch;
use tracing::debug;

use super::GovernorBase;
use crate::error::CoreError;
use crate::listener::{Dispatcher, ListenerSet, ValueListener};
use crate::model::{BluetoothUrl, CharacteristicFlag};
use crate::transport::Transport;

/// Last known characteristic status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacteristicState {
    pub flags: Vec<CharacteristicFlag>,
    pub notifying: bool,
    /// Most recent value, from a read or a notification.
    pub value: Option<Bytes>,
}

/// Governor for one GATT characteristic.
///
/// Transport calls go to the governor's route: its own URL for a physical
/// characteristic, or the matching characteristic of the delegate device
/// for a combined one.
pub struct CharacteristicGovernor {
    base: GovernorBase,
    state: watch::Sender<CharacteristicState>,
    notify_control: AtomicBool,
    route: ArcSwapOption<BluetoothUrl>,
    listeners: Arc<ListenerSet<dyn ValueListener>>,
    transport: Arc<dyn Transport>,
}

impl CharacteristicGovernor {
    pub(crate) fn new(
        url: BluetoothUrl,
        dispatcher: Dispatcher,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (state, _) = watch::channel(CharacteristicState::default());
        let route = (!url.is_combined()).then(|| Arc::new(url.clone()));
        Self {
            base: GovernorBase::new(url, dispatcher),
            state,
            notify_control: AtomicBool::new(false),
            route: ArcSwapOption::new(route),
            listeners: Arc::new(ListenerSet::new()),
            transport,
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

    pub fn state(&self) -> CharacteristicState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CharacteristicState> {
        self.state.subscribe()
    }

    pub fn flags(&self) -> Vec<CharacteristicFlag> {
        self.state.borrow().flags.clone()
    }

    pub fn is_notifying(&self) -> bool {
        self.state.borrow().notifying
    }

    pub fn value(&self) -> Option<Bytes> {
        self.state.borrow().value.clone()
    }

    /// Whether value notifications should be enabled on the peripheral.
    pub fn notify_control(&self) -> bool {
        self.notify_control.load(Ordering::Acquire)
    }

    pub fn set_notify_control(&self, enabled: bool) -> Result<(), CoreError> {
        self.base.ensure_live()?;
        self.notify_control.store(enabled, Ordering::Release);
        Ok(())
    }

    pub fn add_listener(&self, listener: Arc<dyn ValueListener>) -> Result<bool, CoreError> {
        self.base.ensure_live()?;
        Ok(self.listeners.add(listener))
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ValueListener>) -> bool {
        self.listeners.remove(listener)
    }

    // ── Transport operations ─────────────────────────────────────────

    /// Read the current value from the peripheral.
    pub async fn read(&self) -> Result<Bytes, CoreError> {
        let route = self.live_route()?;
        let value = self
            .transport
            .read(&route)
            .await
            .map_err(|e| CoreError::transport(&route, e))?;
        self.update(|state| state.value = Some(value.clone()));
        Ok(value)
    }

    /// Write a value to the peripheral.
    pub async fn write(&self, value: &[u8]) -> Result<(), CoreError> {
        let route = self.live_route()?;
        self.transport
            .write(&route, value)
            .await
            .map_err(|e| CoreError::transport(&route, e))?;
        debug!(url = %self.url(), len = value.len(), "characteristic written");
        Ok(())
    }

    fn live_route(&self) -> Result<Arc<BluetoothUrl>, CoreError> {
        self.base.ensure_live()?;
        let not_connected = || CoreError::NotConnected {
            url: self.url().to_string(),
        };
        if !self.is_ready() {
            return Err(not_connected());
        }
        self.route.load_full().ok_or_else(not_connected)
    }

    // ── Engine-side updates ──────────────────────────────────────────

    /// Physical URL used for transport calls, if any.
    pub(crate) fn route(&self) -> Option<Arc<BluetoothUrl>> {
        self.route.load_full()
    }

    pub(crate) fn set_route(&self, route: Option<BluetoothUrl>) {
        self.route.store(route.map(Arc::new));
    }

    pub(crate) fn set_flags(&self, flags: &[CharacteristicFlag]) {
        self.update(|state| {
            if state.flags != flags {
                state.flags = flags.to_vec();
            }
        });
    }

    pub(crate) fn set_notifying(&self, notifying: bool) {
        self.update(|state| state.notifying = notifying);
    }

    /// A notification arrived from the peripheral.
    pub(crate) fn value_changed(&self, value: Bytes) {
        if self.base.is_disposed() {
            return;
        }
        let dispatcher = self.base.dispatcher();
        let listeners = &self.listeners;
        self.state.send_modify(|state| {
            state.value = Some(value.clone());
            dispatcher.notify(listeners, move |l| l.changed(&value));
        });
        self.base.touch();
    }

    pub(crate) fn finalize(&self) {
        self.listeners.clear();
        self.route.store(None);
        self.base.finalize();
    }

    fn update(&self, f: impl FnOnce(&mut CharacteristicState)) {
        if self.base.is_disposed() {
            return;
        }
        let changed = self.state.send_if_modified(|state| {
            let previous = state.clone();
            f(state);
            *state != previous
        });
        if changed {
            self.base.touch();
        }
    }
}

impl fmt::Debug for CharacteristicGovernor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CharacteristicGovernor")
            .field("url", self.url())
            .field("ready", &self.is_ready())
            .field("route", &self.route())
            .field("state", &*self.state.borrow())
            .field("notify_control", &self.notify_control())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn governor(url: &str) -> CharacteristicGovernor {
        CharacteristicGovernor::new(
            url.parse().unwrap(),
            Dispatcher::spawn().unwrap(),
            Arc::new(MemoryTransport::new()),
        )
    }

    #[tokio::test]
    async fn read_before_ready_is_not_connected() {
        let gov = governor("/11:22:33:44:55:66/AA:BB:CC:DD:EE:FF/2a19");

        let err = gov.read().await.unwrap_err();
        assert!(matches!(err, CoreError::NotConnected { .. }));
        assert!(err.is_state());
    }

    #[tokio::test]
    async fn combined_characteristic_starts_without_route() {
        let physical = governor("/11:22:33:44:55:66/AA:BB:CC:DD:EE:FF/2a19");
        let combined = governor("/XX:XX:XX:XX:XX:XX/AA:BB:CC:DD:EE:FF/2a19");

        assert_eq!(physical.route().as_deref(), Some(physical.url()));
        assert!(combined.route().is_none());

        combined.base().set_ready(true);
        let err = combined.write(&[1]).await.unwrap_err();
        assert!(matches!(err, CoreError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn disposed_characteristic_rejects_io() {
        let gov = governor("/11:22:33:44:55:66/AA:BB:CC:DD:EE:FF/2a19");
        gov.base().set_ready(true);
        gov.base().mark_disposed();

        assert!(matches!(
            gov.read().await.unwrap_err(),
            CoreError::GovernorDisposed { .. }
        ));
    }
}
