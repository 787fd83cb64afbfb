// ── Refresh step ──
//
// Drive the caller's intent (the `*_control` flags) to the radio and
// recompute derived readiness. Governors are visited shallow-first, with
// combined governors ahead of physical ones at each depth, so intent
// pushed down by a combined governor is acted on within the same step.
// Transport failures are logged and retried on the next step.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Engine;
use crate::governor::{AdapterGovernor, CharacteristicGovernor, DeviceGovernor, Governor};
use crate::model::BluetoothUrl;

impl Engine {
    pub(crate) async fn refresh_step(&self) {
        let _step = self.refresh_gate.lock().await;

        let mut governors = self.registry.snapshot();
        governors.sort_by_key(|g| (g.url().depth(), !g.url().is_combined()));

        for governor in &governors {
            if governor.is_disposed() {
                continue;
            }
            match governor {
                Governor::Adapter(adapter) if adapter.url().is_combined() => {
                    self.refresh_combined_adapter(adapter);
                }
                Governor::Adapter(adapter) => self.refresh_adapter(adapter).await,
                Governor::Device(device) if device.url().is_combined() => {
                    self.refresh_combined_device(device);
                }
                Governor::Device(device) => self.refresh_device(device).await,
                Governor::Characteristic(characteristic) => {
                    self.refresh_characteristic(characteristic).await;
                }
            }
        }
        self.refold_adapters();
        debug!(governors = governors.len(), "refresh cycle complete");
    }

    // ── Adapters ─────────────────────────────────────────────────────

    /// Combined adapter controls override the physical members.
    fn refresh_combined_adapter(&self, combined: &AdapterGovernor) {
        for url in self.combination.adapter_members() {
            if let Some(member) = self.registry.find_adapter(&url) {
                let _ = member.set_powered_control(combined.powered_control());
                let _ = member.set_discovering_control(combined.discovering_control());
            }
        }
    }

    async fn refresh_adapter(&self, adapter: &AdapterGovernor) {
        if !adapter.is_ready() {
            return;
        }
        let url = adapter.url();

        let powered = adapter.powered_control();
        if powered != adapter.is_powered() {
            match self.transport.set_powered(url, powered).await {
                Ok(()) => {
                    info!(url = %url, powered, "adapter power changed");
                    adapter.set_powered(powered);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "could not change adapter power");
                    return;
                }
            }
        }

        if !adapter.is_powered() {
            return;
        }
        let discovering = adapter.discovering_control();
        if discovering != adapter.is_discovering() {
            match self.transport.set_discovering(url, discovering).await {
                Ok(()) => adapter.set_discovering(discovering),
                Err(e) => warn!(url = %url, error = %e, "could not change discovery state"),
            }
        }
    }

    // ── Devices ──────────────────────────────────────────────────────

    /// Pick (or keep) the constituent that carries the combined
    /// connection, and push blocking intent down to every member.
    fn refresh_combined_device(&self, combined: &DeviceGovernor) {
        let url = combined.url();
        let members: Vec<Arc<DeviceGovernor>> = self
            .combination
            .device_members(url)
            .iter()
            .filter_map(|m| self.registry.find_device(m))
            .collect();
        if members.is_empty() {
            return;
        }

        let blocked = combined.blocked_control();
        for member in &members {
            let _ = member.set_blocked_control(blocked);
        }

        let current = self.combination.delegate(url);
        let next = if combined.connection_control() && !blocked {
            choose_delegate(&members, current.as_ref())
        } else {
            None
        };
        if next != current {
            if let Some(previous) = current.as_ref().and_then(|u| self.registry.find_device(u)) {
                let _ = previous.set_connection_control(false);
            }
            self.combination.set_delegate(url, next.clone());
            debug!(url = %url, delegate = ?next.as_ref().map(ToString::to_string), "combined delegate changed");
        }
        if let Some(delegate) = next.as_ref().and_then(|u| self.registry.find_device(u)) {
            let _ = delegate.set_connection_control(true);
        }
        self.refold_device(url);
    }

    async fn refresh_device(&self, device: &DeviceGovernor) {
        if !device.is_ready() {
            return;
        }
        let url = device.url();

        let blocked = device.blocked_control();
        if blocked != device.is_blocked() {
            match self.transport.set_blocked(url, blocked).await {
                Ok(()) => device.set_blocked(blocked),
                Err(e) => warn!(url = %url, error = %e, "could not change blocked state"),
            }
        }

        let wanted = device.connection_control();
        let connected = device.is_connected();
        if wanted && !connected && !device.is_blocked() {
            self.connect(device).await;
        } else if !wanted && connected {
            match self.transport.disconnect(url).await {
                Ok(()) => {
                    info!(url = %url, "device disconnected");
                    device.set_connected(false);
                }
                Err(e) => warn!(url = %url, error = %e, "could not disconnect device"),
            }
        } else if connected && device.services().is_empty() {
            self.resolve_services(device).await;
        }

        self.device_changed(url);
    }

    async fn connect(&self, device: &DeviceGovernor) {
        let url = device.url();
        match self.transport.connect(url).await {
            Ok(()) => {
                info!(url = %url, "device connected");
                device.set_connected(true);
                self.resolve_services(device).await;
            }
            Err(e) => {
                warn!(url = %url, error = %e, "connection attempt failed; retrying next refresh");
                device.connection_failed(e.to_string());
            }
        }
    }

    async fn resolve_services(&self, device: &DeviceGovernor) {
        match self.transport.services(device.url()).await {
            Ok(services) => {
                debug!(url = %device.url(), count = services.len(), "services resolved");
                device.set_services(services);
            }
            Err(e) => warn!(url = %device.url(), error = %e, "could not resolve services"),
        }
    }

    // ── Characteristics ──────────────────────────────────────────────

    async fn refresh_characteristic(&self, characteristic: &CharacteristicGovernor) {
        let url = characteristic.url();
        let Some(uuid) = url.characteristic_uuid().copied() else {
            return;
        };

        if url.is_combined() {
            self.refresh_combined_characteristic(characteristic, uuid);
            return;
        }

        let ready = self.characteristic_ready(characteristic, url, &uuid);
        characteristic.base().set_ready(ready);
        if !ready {
            characteristic.set_notifying(false);
            return;
        }

        let notify = characteristic.notify_control();
        if notify != characteristic.is_notifying() {
            match self.transport.set_notifying(url, notify).await {
                Ok(()) => characteristic.set_notifying(notify),
                Err(e) => warn!(url = %url, error = %e, "could not change notification state"),
            }
        }
    }

    /// Route through the delegate's characteristic and mirror its state.
    fn refresh_combined_characteristic(&self, combined: &CharacteristicGovernor, uuid: Uuid) {
        let route = combined
            .url()
            .device_url()
            .and_then(|device| self.combination.delegate(&device))
            .and_then(|delegate| delegate.child_characteristic(uuid).ok());
        combined.set_route(route.clone());

        let Some(route) = route else {
            combined.base().set_ready(false);
            combined.set_notifying(false);
            return;
        };

        let ready = self.characteristic_ready(combined, &route, &uuid);
        combined.base().set_ready(ready);

        match self.registry.characteristic(&route) {
            Ok((physical, _)) => {
                let _ = physical.set_notify_control(combined.notify_control());
                combined.set_notifying(ready && physical.is_notifying());
            }
            Err(e) => warn!(url = %route, error = %e, "cannot track routed characteristic"),
        }
    }

    /// Ready when the owning device is connected and either advertises
    /// the characteristic or has not resolved services yet.
    fn characteristic_ready(
        &self,
        characteristic: &CharacteristicGovernor,
        route: &BluetoothUrl,
        uuid: &Uuid,
    ) -> bool {
        let Some(device) = route
            .device_url()
            .and_then(|u| self.registry.find_device(&u))
        else {
            return false;
        };
        if !device.is_ready() || !device.is_connected() {
            return false;
        }
        let services = device.services();
        match services.iter().find_map(|s| s.characteristic(uuid)) {
            Some(found) => {
                characteristic.set_flags(&found.flags);
                true
            }
            None => services.is_empty(),
        }
    }
}

/// Keep the current delegate while it stays usable, otherwise take the
/// strongest usable member.
fn choose_delegate(
    members: &[Arc<DeviceGovernor>],
    current: Option<&BluetoothUrl>,
) -> Option<BluetoothUrl> {
    let usable = |m: &&Arc<DeviceGovernor>| m.is_ready() && !m.is_blocked();
    if let Some(kept) = members
        .iter()
        .filter(usable)
        .find(|m| Some(m.url()) == current)
    {
        return Some(kept.url().clone());
    }
    members
        .iter()
        .filter(usable)
        .max_by_key(|m| m.rssi().unwrap_or(i16::MIN))
        .map(|m| m.url().clone())
}
