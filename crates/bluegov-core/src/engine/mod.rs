// ── Discovery and refresh engine ──
//
// Shared state behind a `BluetoothManager`: the registry, the combination
// mapping, the presence sets and the discovery listeners. The periodic
// tasks and the on-demand cycle calls all funnel into the step methods
// defined in the submodules; each step kind is serialized by its own
// async mutex so a manual cycle never overlaps a scheduled one.
//
// Lock order when both are needed: discovery, then refresh.

mod discovery;
mod events;
mod projection;
mod refresh;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, MutexGuard};

use crate::combine::Combination;
use crate::config::ManagerConfig;
use crate::error::CoreError;
use crate::governor::GovernorContext;
use crate::listener::{
    AdapterDiscoveryListener, DeviceDiscoveryListener, Dispatcher, ListenerSet,
};
use crate::model::{BluetoothUrl, DiscoveredAdapter, DiscoveredDevice};
use crate::registry::GovernorRegistry;
use crate::store::PresenceSet;
use crate::transport::Transport;

pub(crate) use events::pump_events;

pub(crate) struct Engine {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) registry: GovernorRegistry,
    pub(crate) combination: Combination,

    /// Adapters reported by the last cycle.
    pub(crate) adapters: PresenceSet<DiscoveredAdapter>,
    /// Devices reported by the last cycle (combined when device
    /// combination is on).
    pub(crate) devices: PresenceSet<DiscoveredDevice>,
    /// Physical devices seen by the last cycle, regardless of combination.
    physical_devices: PresenceSet<DiscoveredDevice>,

    pub(crate) adapter_listeners: Arc<ListenerSet<dyn AdapterDiscoveryListener>>,
    pub(crate) device_listeners: Arc<ListenerSet<dyn DeviceDiscoveryListener>>,

    rediscover: AtomicBool,
    /// Set by `start(true)`: newly seen adapters get discovery switched on.
    discover_all: AtomicBool,

    discovery_gate: Mutex<()>,
    refresh_gate: Mutex<()>,
}

impl Engine {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        config: &ManagerConfig,
    ) -> Result<Self, CoreError> {
        let dispatcher = Dispatcher::spawn()
            .map_err(|e| CoreError::Internal(format!("notification thread: {e}")))?;
        let registry = GovernorRegistry::new(GovernorContext {
            dispatcher: dispatcher.clone(),
            transport: Arc::clone(&transport),
        });
        Ok(Self {
            transport,
            dispatcher,
            registry,
            combination: Combination::new(config.combined_adapters, config.combined_devices),
            adapters: PresenceSet::new(),
            devices: PresenceSet::new(),
            physical_devices: PresenceSet::new(),
            adapter_listeners: Arc::new(ListenerSet::new()),
            device_listeners: Arc::new(ListenerSet::new()),
            rediscover: AtomicBool::new(config.rediscover),
            discover_all: AtomicBool::new(false),
            discovery_gate: Mutex::new(()),
            refresh_gate: Mutex::new(()),
        })
    }

    pub(crate) fn rediscover(&self) -> bool {
        self.rediscover.load(Ordering::Acquire)
    }

    pub(crate) fn set_rediscover(&self, enabled: bool) {
        self.rediscover.store(enabled, Ordering::Release);
    }

    pub(crate) fn discover_all(&self) -> bool {
        self.discover_all.load(Ordering::Acquire)
    }

    pub(crate) fn set_discover_all(&self, enabled: bool) {
        self.discover_all.store(enabled, Ordering::Release);
    }

    /// Hold off both periodic steps.
    pub(crate) async fn quiesce(&self) -> (MutexGuard<'_, ()>, MutexGuard<'_, ()>) {
        let discovery = self.discovery_gate.lock().await;
        let refresh = self.refresh_gate.lock().await;
        (discovery, refresh)
    }

    /// Dispose `url` and everything below it. Returns the disposed URLs,
    /// leaves first.
    pub(crate) fn dispose_tree(&self, url: &BluetoothUrl) -> Vec<BluetoothUrl> {
        let mut disposed = self.registry.dispose_descendants(url);
        if self.registry.dispose(url) {
            disposed.push(url.clone());
        }
        for url in &disposed {
            self.combination.forget(url);
        }
        disposed
    }

    /// Dispose strictly below `url`.
    pub(crate) fn dispose_below(&self, url: &BluetoothUrl) -> Vec<BluetoothUrl> {
        let disposed = self.registry.dispose_descendants(url);
        for url in &disposed {
            self.combination.forget(url);
        }
        disposed
    }

    /// Tear everything down. Listener and combination subscriptions go
    /// first so nothing is dispatched to a governor being disposed.
    pub(crate) async fn shutdown(&self) -> usize {
        let _steps = self.quiesce().await;
        self.adapter_listeners.clear();
        self.device_listeners.clear();
        self.combination.clear();
        let disposed = self.registry.dispose_all();
        self.adapters.clear();
        self.devices.clear();
        self.physical_devices.clear();
        disposed.len()
    }
}
