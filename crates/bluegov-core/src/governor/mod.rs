// ── Governors ──
//
// A governor is the long-lived, URL-addressed handle for one adapter,
// device or characteristic. It outlives the physical entity: when the
// radio loses sight of it the governor simply reports `ready = false`
// and keeps the caller's intent (the `*_control` flags) until it returns.
//
// All observable state lives in `watch` channels. Mutators post listener
// notifications while holding the channel's write lock, so notifications
// for one URL are queued in the same order the mutations were applied.

mod adapter;
mod characteristic;
mod device;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::error::CoreError;
use crate::listener::{Dispatcher, GovernorListener, ListenerSet};
use crate::model::{BluetoothUrl, UrlKind};
use crate::transport::Transport;

pub use adapter::{AdapterGovernor, AdapterState};
pub use characteristic::{CharacteristicGovernor, CharacteristicState};
pub use device::{DeviceGovernor, DeviceState};

pub(crate) use device::DeviceFold;

/// What every governor needs from its owner at construction time.
#[derive(Clone)]
pub(crate) struct GovernorContext {
    pub(crate) dispatcher: Dispatcher,
    pub(crate) transport: Arc<dyn Transport>,
}

// ── Shared base ─────────────────────────────────────────────────────

/// State and listeners common to all governor kinds.
pub struct GovernorBase {
    url: BluetoothUrl,
    ready: watch::Sender<bool>,
    last_activity: watch::Sender<Option<DateTime<Utc>>>,
    disposed: AtomicBool,
    listeners: Arc<ListenerSet<dyn GovernorListener>>,
    dispatcher: Dispatcher,
}

impl GovernorBase {
    pub(crate) fn new(url: BluetoothUrl, dispatcher: Dispatcher) -> Self {
        let (ready, _) = watch::channel(false);
        let (last_activity, _) = watch::channel(None);
        Self {
            url,
            ready,
            last_activity,
            disposed: AtomicBool::new(false),
            listeners: Arc::new(ListenerSet::new()),
            dispatcher,
        }
    }

    pub fn url(&self) -> &BluetoothUrl {
        &self.url
    }

    /// Whether the physical entity is currently reachable.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn watch_ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// When the entity last reported a change.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        *self.last_activity.borrow()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn add_listener(&self, listener: Arc<dyn GovernorListener>) -> Result<bool, CoreError> {
        self.ensure_live()?;
        Ok(self.listeners.add(listener))
    }

    pub fn remove_listener(&self, listener: &Arc<dyn GovernorListener>) -> bool {
        self.listeners.remove(listener)
    }

    // ── Crate-internal mutators ──────────────────────────────────────

    pub(crate) fn ensure_live(&self) -> Result<(), CoreError> {
        if self.is_disposed() {
            return Err(CoreError::GovernorDisposed {
                url: self.url.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Returns `true` if readiness changed.
    pub(crate) fn set_ready(&self, ready: bool) -> bool {
        if self.is_disposed() {
            return false;
        }
        let dispatcher = &self.dispatcher;
        let listeners = &self.listeners;
        self.ready.send_if_modified(|current| {
            if *current == ready {
                return false;
            }
            *current = ready;
            dispatcher.notify(listeners, move |l| l.ready(ready));
            true
        })
    }

    /// Record activity from the physical entity.
    pub(crate) fn touch(&self) {
        if self.is_disposed() {
            return;
        }
        let now = Utc::now();
        let dispatcher = &self.dispatcher;
        let listeners = &self.listeners;
        self.last_activity.send_modify(|at| {
            *at = Some(now);
            dispatcher.notify(listeners, move |l| l.last_updated(now));
        });
    }

    /// Flag the governor as disposed. Returns `false` if it already was.
    pub(crate) fn mark_disposed(&self) -> bool {
        !self.disposed.swap(true, Ordering::AcqRel)
    }

    /// Release listeners once the governor is out of the registry.
    pub(crate) fn finalize(&self) {
        self.listeners.clear();
        self.ready.send_replace(false);
    }
}

impl fmt::Debug for GovernorBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GovernorBase")
            .field("url", &self.url)
            .field("ready", &self.is_ready())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

// ── Tagged governor handle ──────────────────────────────────────────

/// Any governor, tagged by kind.
#[derive(Clone)]
pub enum Governor {
    Adapter(Arc<AdapterGovernor>),
    Device(Arc<DeviceGovernor>),
    Characteristic(Arc<CharacteristicGovernor>),
}

impl Governor {
    /// Build the governor variant matching the URL's kind.
    pub(crate) fn create(url: &BluetoothUrl, ctx: &GovernorContext) -> Self {
        match url.kind() {
            UrlKind::Adapter => Self::Adapter(Arc::new(AdapterGovernor::new(
                url.clone(),
                ctx.dispatcher.clone(),
            ))),
            UrlKind::Device => Self::Device(Arc::new(DeviceGovernor::new(
                url.clone(),
                ctx.dispatcher.clone(),
            ))),
            UrlKind::Characteristic => Self::Characteristic(Arc::new(CharacteristicGovernor::new(
                url.clone(),
                ctx.dispatcher.clone(),
                Arc::clone(&ctx.transport),
            ))),
        }
    }

    pub fn base(&self) -> &GovernorBase {
        match self {
            Self::Adapter(g) => g.base(),
            Self::Device(g) => g.base(),
            Self::Characteristic(g) => g.base(),
        }
    }

    pub fn url(&self) -> &BluetoothUrl {
        self.base().url()
    }

    pub fn kind(&self) -> UrlKind {
        match self {
            Self::Adapter(_) => UrlKind::Adapter,
            Self::Device(_) => UrlKind::Device,
            Self::Characteristic(_) => UrlKind::Characteristic,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.base().is_ready()
    }

    pub fn is_disposed(&self) -> bool {
        self.base().is_disposed()
    }

    /// Identity comparison: both handles point at the same governor.
    pub fn same_instance(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Adapter(a), Self::Adapter(b)) => Arc::ptr_eq(a, b),
            (Self::Device(a), Self::Device(b)) => Arc::ptr_eq(a, b),
            (Self::Characteristic(a), Self::Characteristic(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn as_adapter(&self) -> Option<&Arc<AdapterGovernor>> {
        match self {
            Self::Adapter(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_device(&self) -> Option<&Arc<DeviceGovernor>> {
        match self {
            Self::Device(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_characteristic(&self) -> Option<&Arc<CharacteristicGovernor>> {
        match self {
            Self::Characteristic(g) => Some(g),
            _ => None,
        }
    }

    pub(crate) fn mark_disposed(&self) -> bool {
        self.base().mark_disposed()
    }

    /// Drop every listener held by the governor.
    pub(crate) fn finalize(&self) {
        match self {
            Self::Adapter(g) => g.finalize(),
            Self::Device(g) => g.finalize(),
            Self::Characteristic(g) => g.finalize(),
        }
    }
}

impl fmt::Debug for Governor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adapter(g) => fmt::Debug::fmt(g, f),
            Self::Device(g) => fmt::Debug::fmt(g, f),
            Self::Characteristic(g) => fmt::Debug::fmt(g, f),
        }
    }
}
