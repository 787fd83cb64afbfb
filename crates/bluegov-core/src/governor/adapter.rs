use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::watch;

use super::GovernorBase;
use crate::error::CoreError;
use crate::listener::{AdapterListener, Dispatcher, ListenerSet};
use crate::model::BluetoothUrl;
use crate::transport::AdapterInfo;

/// Last known adapter status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdapterState {
    pub powered: bool,
    pub discovering: bool,
    pub name: Option<String>,
    pub alias: Option<String>,
}

/// Governor for one adapter, or for all adapters when combined.
pub struct AdapterGovernor {
    base: GovernorBase,
    state: watch::Sender<AdapterState>,
    powered_control: AtomicBool,
    discovering_control: AtomicBool,
    listeners: Arc<ListenerSet<dyn AdapterListener>>,
}

impl AdapterGovernor {
    pub(crate) fn new(url: BluetoothUrl, dispatcher: Dispatcher) -> Self {
        let (state, _) = watch::channel(AdapterState::default());
        Self {
            base: GovernorBase::new(url, dispatcher),
            state,
            powered_control: AtomicBool::new(true),
            discovering_control: AtomicBool::new(false),
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

    pub fn state(&self) -> AdapterState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AdapterState> {
        self.state.subscribe()
    }

    pub fn is_powered(&self) -> bool {
        self.state.borrow().powered
    }

    pub fn is_discovering(&self) -> bool {
        self.state.borrow().discovering
    }

    /// Alias if set, otherwise the reported name.
    pub fn display_name(&self) -> Option<String> {
        let state = self.state.borrow();
        state.alias.clone().or_else(|| state.name.clone())
    }

    // ── Controls ─────────────────────────────────────────────────────

    /// Desired power state. Defaults to on.
    pub fn powered_control(&self) -> bool {
        self.powered_control.load(Ordering::Acquire)
    }

    pub fn set_powered_control(&self, powered: bool) -> Result<(), CoreError> {
        self.base.ensure_live()?;
        self.powered_control.store(powered, Ordering::Release);
        Ok(())
    }

    /// Whether the adapter should be scanning for devices.
    pub fn discovering_control(&self) -> bool {
        self.discovering_control.load(Ordering::Acquire)
    }

    pub fn set_discovering_control(&self, discovering: bool) -> Result<(), CoreError> {
        self.base.ensure_live()?;
        self.discovering_control.store(discovering, Ordering::Release);
        Ok(())
    }

    // ── Listeners ────────────────────────────────────────────────────

    pub fn add_listener(&self, listener: Arc<dyn AdapterListener>) -> Result<bool, CoreError> {
        self.base.ensure_live()?;
        Ok(self.listeners.add(listener))
    }

    pub fn remove_listener(&self, listener: &Arc<dyn AdapterListener>) -> bool {
        self.listeners.remove(listener)
    }

    // ── Engine-side updates ──────────────────────────────────────────

    /// Fold a fresh presence record into the governor.
    pub(crate) fn apply(&self, info: &AdapterInfo) {
        self.update(|state| {
            state.powered = info.powered;
            state.discovering = info.discovering;
            state.name.clone_from(&info.name);
            state.alias.clone_from(&info.alias);
        });
        self.base.set_ready(true);
    }

    /// Combined-adapter projection: any member powered/discovering/ready.
    pub(crate) fn apply_fold(&self, powered: bool, discovering: bool, ready: bool) {
        self.update(|state| {
            state.powered = powered;
            state.discovering = discovering;
        });
        self.base.set_ready(ready);
    }

    pub(crate) fn set_powered(&self, powered: bool) {
        self.update(|state| {
            state.powered = powered;
            if !powered {
                state.discovering = false;
            }
        });
    }

    pub(crate) fn set_discovering(&self, discovering: bool) {
        self.update(|state| state.discovering = discovering);
    }

    pub(crate) fn finalize(&self) {
        self.listeners.clear();
        self.base.finalize();
    }

    fn update(&self, f: impl FnOnce(&mut AdapterState)) {
        if self.base.is_disposed() {
            return;
        }
        let dispatcher = self.base.dispatcher();
        let listeners = &self.listeners;
        let changed = self.state.send_if_modified(|state| {
            let previous = state.clone();
            f(state);
            if state.powered != previous.powered {
                let powered = state.powered;
                dispatcher.notify(listeners, move |l| l.powered(powered));
            }
            if state.discovering != previous.discovering {
                let discovering = state.discovering;
                dispatcher.notify(listeners, move |l| l.discovering(discovering));
            }
            *state != previous
        });
        if changed {
            self.base.touch();
        }
    }
}

impl fmt::Debug for AdapterGovernor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterGovernor")
            .field("url", self.url())
            .field("ready", &self.is_ready())
            .field("state", &*self.state.borrow())
            .field("powered_control", &self.powered_control())
            .field("discovering_control", &self.discovering_control())
            .finish()
    }
}
