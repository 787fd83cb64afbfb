// ── Bluetooth manager ──
//
// Facade owning the governor registry and the background tasks. One
// manager per radio stack; callers hold explicit handles and drive the
// lifecycle with `start` / `stop` / `dispose`.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ManagerConfig, validate_rate};
use crate::engine::{Engine, pump_events};
use crate::error::CoreError;
use crate::governor::{AdapterGovernor, CharacteristicGovernor, DeviceGovernor, Governor};
use crate::listener::{
    AdapterDiscoveryListener, DeviceDiscoveryListener, ListenerSet, ManagerListener, ManagerState,
};
use crate::model::{BluetoothUrl, DiscoveredAdapter, DiscoveredDevice};
use crate::stream::PresenceStream;
use crate::transport::Transport;

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ManagerInner>`. Owns every governor and
/// runs three background tasks while started: the discovery task, the
/// refresh task and (when the transport pushes events) the event pump.
#[derive(Clone)]
pub struct BluetoothManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    engine: Arc<Engine>,
    /// Rates are read at `start()`; changes while started wait for the
    /// next start.
    config: std::sync::Mutex<ManagerConfig>,
    state: watch::Sender<ManagerState>,
    listeners: Arc<ListenerSet<dyn ManagerListener>>,
    cancel: CancellationToken,
    /// Child token for the current run, replaced on every start.
    cancel_child: Mutex<CancellationToken>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BluetoothManager {
    /// Create a stopped manager over `transport`. Does NOT scan -- call
    /// [`start()`](Self::start) to spawn the background tasks.
    pub fn new(transport: Arc<dyn Transport>, config: ManagerConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let engine = Arc::new(Engine::new(transport, &config)?);
        let (state, _) = watch::channel(ManagerState::Stopped);
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();

        Ok(Self {
            inner: Arc::new(ManagerInner {
                engine,
                config: std::sync::Mutex::new(config),
                state,
                listeners: Arc::new(ListenerSet::new()),
                cancel,
                cancel_child: Mutex::new(cancel_child),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    fn config(&self) -> ManagerConfig {
        self.inner
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_config(&self, f: impl FnOnce(&mut ManagerConfig)) {
        let mut config = self
            .inner
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut *config);
    }

    fn ensure_live(&self) -> Result<(), CoreError> {
        if self.state() == ManagerState::Disposed {
            return Err(CoreError::ManagerDisposed);
        }
        Ok(())
    }

    fn set_state(&self, next: ManagerState) {
        let dispatcher = &self.engine().dispatcher;
        let listeners = &self.inner.listeners;
        self.inner.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            dispatcher.notify(listeners, move |l| l.state_changed(next));
            true
        });
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the discovery, refresh and event tasks.
    ///
    /// With `start_discovering`, every adapter seen from now on has its
    /// discovering control switched on. Starting an already started
    /// manager only applies that flag.
    pub async fn start(&self, start_discovering: bool) -> Result<(), CoreError> {
        self.ensure_live()?;
        let mut handles = self.inner.task_handles.lock().await;
        self.ensure_live()?;

        if start_discovering {
            self.engine().set_discover_all(true);
            self.engine().arm_discovery();
        }
        if self.is_started() {
            return Ok(());
        }

        let config = self.config();
        let child = self.inner.cancel.child_token();
        *self.inner.cancel_child.lock().await = child.clone();

        handles.push(tokio::spawn(discovery_task(
            Arc::clone(&self.inner.engine),
            config.discovery_rate,
            child.clone(),
        )));
        handles.push(tokio::spawn(refresh_task(
            Arc::clone(&self.inner.engine),
            config.refresh_rate,
            child.clone(),
        )));
        if let Some(events) = self.engine().transport.events() {
            handles.push(tokio::spawn(pump_events(
                Arc::clone(&self.inner.engine),
                events,
                child,
            )));
        }

        self.set_state(ManagerState::Started);
        info!(
            discovery_rate_ms = config.discovery_rate.as_millis(),
            refresh_rate_ms = config.refresh_rate.as_millis(),
            start_discovering,
            "bluetooth manager started"
        );
        Ok(())
    }

    /// Signal the background tasks to finish their current step and wait
    /// for them. Governors and presence are kept.
    pub async fn stop(&self) {
        let mut handles = self.inner.task_handles.lock().await;
        self.inner.cancel_child.lock().await.cancel();
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        self.engine().set_discover_all(false);
        if self.state() == ManagerState::Started {
            self.set_state(ManagerState::Stopped);
            info!("bluetooth manager stopped");
        }
    }

    pub fn is_started(&self) -> bool {
        self.state() == ManagerState::Started
    }

    pub fn state(&self) -> ManagerState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ManagerState> {
        self.inner.state.subscribe()
    }

    /// Stop everything and dispose every governor. Further calls on this
    /// manager (or its clones) fail with [`CoreError::ManagerDisposed`].
    pub async fn dispose(&self) {
        let mut handles = self.inner.task_handles.lock().await;
        if self.state() == ManagerState::Disposed {
            return;
        }
        self.inner.cancel.cancel();
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        let disposed = self.engine().shutdown().await;
        self.set_state(ManagerState::Disposed);
        self.engine().dispatcher.flush().await;
        self.inner.listeners.clear();
        self.engine().dispatcher.close();
        info!(governors = disposed, "bluetooth manager disposed");
    }

    // ── Governor access ──────────────────────────────────────────────

    /// Governor for any URL, created on first request.
    pub fn governor(&self, url: &BluetoothUrl) -> Result<Governor, CoreError> {
        self.ensure_live()?;
        let (governor, created) = self.engine().registry.get_or_create(url);
        if created {
            self.engine().project(&governor);
        }
        Ok(governor)
    }

    pub fn adapter_governor(&self, url: &BluetoothUrl) -> Result<Arc<AdapterGovernor>, CoreError> {
        self.ensure_live()?;
        let (governor, created) = self.engine().registry.adapter(url)?;
        if created {
            self.engine().project_adapter(&governor);
        }
        Ok(governor)
    }

    pub fn device_governor(&self, url: &BluetoothUrl) -> Result<Arc<DeviceGovernor>, CoreError> {
        self.ensure_live()?;
        let (governor, created) = self.engine().registry.device(url)?;
        if created {
            self.engine().project_device(&governor);
        }
        Ok(governor)
    }

    /// Like [`device_governor`](Self::device_governor), and switches on
    /// connection maintenance.
    pub fn device_governor_autoconnect(
        &self,
        url: &BluetoothUrl,
    ) -> Result<Arc<DeviceGovernor>, CoreError> {
        let governor = self.device_governor(url)?;
        governor.set_connection_control(true)?;
        Ok(governor)
    }

    /// Characteristic governor. It reports not ready, and its I/O fails
    /// with [`CoreError::NotConnected`], until the owning device connects.
    pub fn characteristic_governor(
        &self,
        url: &BluetoothUrl,
    ) -> Result<Arc<CharacteristicGovernor>, CoreError> {
        self.ensure_live()?;
        Ok(self.engine().registry.characteristic(url)?.0)
    }

    /// Like [`characteristic_governor`](Self::characteristic_governor),
    /// and switches on connection maintenance of the owning device.
    pub fn characteristic_governor_autoconnect(
        &self,
        url: &BluetoothUrl,
    ) -> Result<Arc<CharacteristicGovernor>, CoreError> {
        let governor = self.characteristic_governor(url)?;
        let device_url = url.device_url().ok_or_else(|| CoreError::UnexpectedUrlKind {
            url: url.to_string(),
            expected: crate::model::UrlKind::Characteristic,
        })?;
        self.device_governor_autoconnect(&device_url)?;
        Ok(governor)
    }

    /// Every live governor, shallowest first.
    pub fn governors(&self) -> Result<Vec<Governor>, CoreError> {
        self.ensure_live()?;
        Ok(self.engine().registry.snapshot())
    }

    /// Dispose the governor at `url` together with everything below it.
    /// Returns the disposed URLs, leaves first.
    pub fn dispose_governor(&self, url: &BluetoothUrl) -> Result<Vec<BluetoothUrl>, CoreError> {
        self.ensure_live()?;
        let disposed = self.engine().dispose_tree(url);
        debug!(url = %url, count = disposed.len(), "governor tree disposed");
        Ok(disposed)
    }

    /// Dispose every governor strictly below `url`.
    pub fn dispose_descendant_governors(
        &self,
        url: &BluetoothUrl,
    ) -> Result<Vec<BluetoothUrl>, CoreError> {
        self.ensure_live()?;
        Ok(self.engine().dispose_below(url))
    }

    // ── Discovery results ────────────────────────────────────────────

    pub fn discovered_devices(&self) -> Result<Vec<DiscoveredDevice>, CoreError> {
        self.ensure_live()?;
        Ok(self
            .engine()
            .devices
            .snapshot()
            .iter()
            .map(|d| DiscoveredDevice::clone(d))
            .collect())
    }

    pub fn discovered_adapters(&self) -> Result<Vec<DiscoveredAdapter>, CoreError> {
        self.ensure_live()?;
        Ok(self
            .engine()
            .adapters
            .snapshot()
            .iter()
            .map(|a| DiscoveredAdapter::clone(a))
            .collect())
    }

    pub fn watch_discovered_devices(&self) -> Result<PresenceStream<DiscoveredDevice>, CoreError> {
        self.ensure_live()?;
        Ok(PresenceStream::new(self.engine().devices.subscribe()))
    }

    pub fn watch_discovered_adapters(
        &self,
    ) -> Result<PresenceStream<DiscoveredAdapter>, CoreError> {
        self.ensure_live()?;
        Ok(PresenceStream::new(self.engine().adapters.subscribe()))
    }

    // ── Listeners ────────────────────────────────────────────────────

    pub fn add_device_discovery_listener(
        &self,
        listener: Arc<dyn DeviceDiscoveryListener>,
    ) -> Result<bool, CoreError> {
        self.ensure_live()?;
        Ok(self.engine().device_listeners.add(listener))
    }

    pub fn remove_device_discovery_listener(
        &self,
        listener: &Arc<dyn DeviceDiscoveryListener>,
    ) -> bool {
        self.engine().device_listeners.remove(listener)
    }

    pub fn add_adapter_discovery_listener(
        &self,
        listener: Arc<dyn AdapterDiscoveryListener>,
    ) -> Result<bool, CoreError> {
        self.ensure_live()?;
        Ok(self.engine().adapter_listeners.add(listener))
    }

    pub fn remove_adapter_discovery_listener(
        &self,
        listener: &Arc<dyn AdapterDiscoveryListener>,
    ) -> bool {
        self.engine().adapter_listeners.remove(listener)
    }

    pub fn add_manager_listener(
        &self,
        listener: Arc<dyn ManagerListener>,
    ) -> Result<bool, CoreError> {
        self.ensure_live()?;
        Ok(self.inner.listeners.add(listener))
    }

    pub fn remove_manager_listener(&self, listener: &Arc<dyn ManagerListener>) -> bool {
        self.inner.listeners.remove(listener)
    }

    // ── Settings ─────────────────────────────────────────────────────

    pub fn discovery_rate(&self) -> Duration {
        self.config().discovery_rate
    }

    /// Change the discovery period. Takes effect on the next `start()`.
    pub fn set_discovery_rate(&self, rate: Duration) -> Result<(), CoreError> {
        self.ensure_live()?;
        validate_rate("discovery_rate", rate)?;
        self.update_config(|c| c.discovery_rate = rate);
        if self.is_started() {
            warn!(rate_ms = rate.as_millis(), "discovery rate changed while started; applies after restart");
        }
        Ok(())
    }

    pub fn refresh_rate(&self) -> Duration {
        self.config().refresh_rate
    }

    /// Change the refresh period. Takes effect on the next `start()`.
    pub fn set_refresh_rate(&self, rate: Duration) -> Result<(), CoreError> {
        self.ensure_live()?;
        validate_rate("refresh_rate", rate)?;
        self.update_config(|c| c.refresh_rate = rate);
        if self.is_started() {
            warn!(rate_ms = rate.as_millis(), "refresh rate changed while started; applies after restart");
        }
        Ok(())
    }

    pub fn is_rediscover(&self) -> bool {
        self.engine().rediscover()
    }

    /// Re-announce still-present entities on every cycle.
    pub fn set_rediscover(&self, enabled: bool) -> Result<(), CoreError> {
        self.ensure_live()?;
        self.update_config(|c| c.rediscover = enabled);
        self.engine().set_rediscover(enabled);
        Ok(())
    }

    /// Toggle adapter combination. Waits for in-flight steps so the
    /// toggle never interleaves with a scan or refresh.
    pub async fn enable_combined_adapters(&self, enabled: bool) -> Result<(), CoreError> {
        self.ensure_live()?;
        let _steps = self.engine().quiesce().await;
        self.update_config(|c| c.combined_adapters = enabled);
        self.engine().enable_combined_adapters(enabled);
        Ok(())
    }

    pub fn is_combined_adapters_enabled(&self) -> bool {
        self.engine().combination.adapters_enabled()
    }

    /// Toggle device combination. Enabling projects every known physical
    /// device; disabling retracts the combined governors and keeps the
    /// physical ones.
    pub async fn enable_combined_devices(&self, enabled: bool) -> Result<(), CoreError> {
        self.ensure_live()?;
        let _steps = self.engine().quiesce().await;
        self.update_config(|c| c.combined_devices = enabled);
        self.engine().enable_combined_devices(enabled);
        Ok(())
    }

    pub fn is_combined_devices_enabled(&self) -> bool {
        self.engine().combination.devices_enabled()
    }

    // ── On-demand steps ──────────────────────────────────────────────

    /// Run one discovery cycle now.
    pub async fn discovery_cycle(&self) -> Result<(), CoreError> {
        self.ensure_live()?;
        self.engine().discovery_step().await;
        Ok(())
    }

    /// Run one refresh cycle now.
    pub async fn refresh_cycle(&self) -> Result<(), CoreError> {
        self.ensure_live()?;
        self.engine().refresh_step().await;
        Ok(())
    }

    /// Wait until every notification queued so far has been delivered.
    pub async fn flush_notifications(&self) {
        self.engine().dispatcher.flush().await;
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Periodic discovery. The first cycle runs immediately.
async fn discovery_task(engine: Arc<Engine>, rate: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(rate);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => engine.discovery_step().await,
        }
    }
    debug!("discovery task exited");
}

/// Periodic refresh, starting one period after start.
async fn refresh_task(engine: Arc<Engine>, rate: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(rate);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => engine.refresh_step().await,
        }
    }
    debug!("refresh task exited");
}
