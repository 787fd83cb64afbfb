// ── Discovery step ──
//
// One scan: poll the transport for adapters and, behind powered and
// discovering adapters, devices. Fold what was seen into governors, then
// diff against the previous cycle to fire discovery and loss callbacks.
// Entities that vanish only lose readiness; disposal stays an explicit
// caller action.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::Engine;
use crate::governor::{AdapterGovernor, Governor};
use crate::listener::ListenerSet;
use crate::model::{BluetoothUrl, DiscoveredAdapter, DiscoveredDevice};
use crate::store::Reconciled;
use crate::transport::{AdapterInfo, DeviceInfo};

impl Engine {
    pub(crate) async fn discovery_step(&self) {
        let _step = self.discovery_gate.lock().await;

        let adapters = match self.transport.adapters().await {
            Ok(adapters) => adapters,
            Err(e) => {
                warn!(error = %e, "adapter scan failed; skipping cycle");
                return;
            }
        };

        let mut seen_adapters = Vec::with_capacity(adapters.len());
        let mut seen_devices = Vec::new();
        for info in adapters {
            let Some(adapter) = self.observe_adapter(&info).await else {
                continue;
            };
            if adapter.powered && adapter.discovering {
                match self.transport.devices(&adapter.url).await {
                    Ok(devices) => {
                        seen_devices.extend(
                            devices
                                .into_iter()
                                .filter_map(|d| self.observe_device(&adapter.url, d)),
                        );
                    }
                    Err(e) => {
                        warn!(url = %adapter.url, error = %e, "device scan failed");
                    }
                }
            }
            seen_adapters.push(adapter);
        }

        let adapter_count = seen_adapters.len();
        let device_count = seen_devices.len();
        self.publish_adapters(seen_adapters);
        self.publish_devices(seen_devices);
        self.refold_adapters();
        debug!(
            adapters = adapter_count,
            devices = device_count,
            "discovery cycle complete"
        );
    }

    /// Switch on discovering control for every adapter governor already
    /// tracked, combined one included. Adapters first seen later are armed
    /// by `observe_adapter` while discover-all is set.
    pub(crate) fn arm_discovery(&self) {
        for governor in self.registry.snapshot() {
            if let Governor::Adapter(adapter) = governor {
                if let Err(e) = adapter.set_discovering_control(true) {
                    debug!(url = %adapter.url(), error = %e, "adapter not armed");
                }
            }
        }
    }

    async fn observe_adapter(&self, info: &AdapterInfo) -> Option<DiscoveredAdapter> {
        let url = BluetoothUrl::adapter(info.address.clone());
        let governor = match self.registry.adapter(&url) {
            Ok((governor, _)) => governor,
            Err(e) => {
                warn!(url = %url, error = %e, "cannot track adapter");
                return None;
            }
        };

        if self.discover_all() && !self.adapters.contains(&url) {
            let _ = governor.set_discovering_control(true);
        }
        governor.apply(info);
        self.project_adapter(&governor);

        let mut discovering = info.discovering;
        if info.powered && !discovering && governor.discovering_control() {
            discovering = self.start_discovery(&governor).await;
        }

        Some(DiscoveredAdapter {
            url,
            name: info.name.clone(),
            alias: info.alias.clone(),
            powered: info.powered,
            discovering,
        })
    }

    async fn start_discovery(&self, governor: &AdapterGovernor) -> bool {
        match self.transport.set_discovering(governor.url(), true).await {
            Ok(()) => {
                governor.set_discovering(true);
                true
            }
            Err(e) => {
                warn!(url = %governor.url(), error = %e, "could not start discovery");
                false
            }
        }
    }

    fn observe_device(&self, adapter: &BluetoothUrl, info: DeviceInfo) -> Option<DiscoveredDevice> {
        let url = adapter.child_device(info.address.clone());
        match self.registry.device(&url) {
            Ok((governor, _)) => {
                governor.apply(&info);
                self.project_device(&governor);
            }
            Err(e) => {
                warn!(url = %url, error = %e, "cannot track device");
                return None;
            }
        }
        Some(DiscoveredDevice {
            url,
            name: info.name,
            alias: info.alias,
            rssi: info.rssi,
            bluetooth_class: info.bluetooth_class,
            combined: false,
        })
    }

    // ── Presence reconciliation ──────────────────────────────────────

    fn publish_adapters(&self, seen: Vec<DiscoveredAdapter>) {
        let reconciled = self
            .adapters
            .reconcile(seen.into_iter().map(|a| (a.url.clone(), a)).collect());

        for lost in &reconciled.vanished {
            if let Some(governor) = self.registry.find_adapter(&lost.url) {
                governor.base().set_ready(false);
            }
            debug!(url = %lost.url, "adapter lost");
        }
        announce(
            self,
            &self.adapter_listeners,
            reconciled,
            |l, a| l.discovered(a),
            |l, a| l.lost(a),
        );
    }

    fn publish_devices(&self, physical: Vec<DiscoveredDevice>) {
        let reconciled = self.physical_devices.reconcile(
            physical
                .iter()
                .map(|d| (d.url.clone(), d.clone()))
                .collect(),
        );
        for lost in &reconciled.vanished {
            if let Some(governor) = self.registry.find_device(&lost.url) {
                governor.base().set_ready(false);
            }
            self.device_changed(&lost.url);
            debug!(url = %lost.url, "device lost");
        }

        let reported = if self.combination.devices_enabled() {
            combine_reports(physical)
        } else {
            physical
        };
        let reconciled = self
            .devices
            .reconcile(reported.into_iter().map(|d| (d.url.clone(), d)).collect());
        announce(
            self,
            &self.device_listeners,
            reconciled,
            |l, d| l.discovered(d),
            |l, d| l.lost(d),
        );
    }
}

/// Queue discovered/lost callbacks for one reconciled cycle.
fn announce<L, T>(
    engine: &Engine,
    listeners: &Arc<ListenerSet<L>>,
    reconciled: Reconciled<T>,
    discovered: fn(&L, &T),
    lost: fn(&L, &T),
) where
    L: ?Sized + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    if reconciled.is_quiet() && !engine.rediscover() {
        return;
    }
    let Reconciled {
        appeared,
        retained,
        vanished,
    } = reconciled;

    let mut found = appeared;
    if engine.rediscover() {
        found.extend(retained);
    }
    trace!(found = found.len(), lost = vanished.len(), "announcing presence changes");

    for item in found {
        engine
            .dispatcher
            .notify(listeners, move |l| discovered(l, &item));
    }
    for item in vanished {
        engine.dispatcher.notify(listeners, move |l| lost(l, &item));
    }
}

/// One report per device address: strongest signal, first known name.
fn combine_reports(physical: Vec<DiscoveredDevice>) -> Vec<DiscoveredDevice> {
    let mut by_url: BTreeMap<BluetoothUrl, DiscoveredDevice> = BTreeMap::new();
    for device in physical {
        let url = device.url.to_combined();
        match by_url.get_mut(&url) {
            Some(merged) => {
                merged.rssi = match (merged.rssi, device.rssi) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
                if merged.name.is_none() {
                    merged.name = device.name;
                }
                if merged.alias.is_none() {
                    merged.alias = device.alias;
                }
                merged.bluetooth_class = merged.bluetooth_class.or(device.bluetooth_class);
            }
            None => {
                by_url.insert(
                    url.clone(),
                    DiscoveredDevice {
                        url,
                        combined: true,
                        ..device
                    },
                );
            }
        }
    }
    by_url.into_values().collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn device(url: &str, rssi: Option<i16>, name: Option<&str>) -> DiscoveredDevice {
        DiscoveredDevice {
            url: url.parse().unwrap(),
            name: name.map(Into::into),
            alias: None,
            rssi,
            bluetooth_class: None,
            combined: false,
        }
    }

    #[test]
    fn combined_reports_merge_by_address() {
        let merged = combine_reports(vec![
            device("/11:11:11:11:11:11/AA:BB:CC:DD:EE:FF", Some(-80), None),
            device("/22:22:22:22:22:22/AA:BB:CC:DD:EE:FF", Some(-50), Some("Tag")),
            device("/22:22:22:22:22:22/01:02:03:04:05:06", None, None),
        ]);

        assert_eq!(merged.len(), 2);
        let tag = merged
            .iter()
            .find(|d| d.url.to_string().ends_with("AA:BB:CC:DD:EE:FF"))
            .unwrap();
        assert!(tag.combined);
        assert!(tag.url.is_combined());
        assert_eq!(tag.rssi, Some(-50));
        assert_eq!(tag.name.as_deref(), Some("Tag"));
    }
}
