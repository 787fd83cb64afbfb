// ── Combined-governor projection ──
//
// Physical governors are never touched by combination; their state is
// folded (OR / strongest RSSI) onto the combined governors each time a
// member changes.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::Engine;
use crate::governor::{AdapterGovernor, DeviceFold, DeviceGovernor, Governor};
use crate::model::{BluetoothUrl, UrlKind};

impl Engine {
    /// Represent a physical governor in the combined view, if enabled.
    pub(crate) fn project(&self, governor: &Governor) {
        match governor {
            Governor::Adapter(adapter) => self.project_adapter(adapter),
            Governor::Device(device) => self.project_device(device),
            Governor::Characteristic(_) => {}
        }
    }

    pub(crate) fn project_adapter(&self, physical: &AdapterGovernor) {
        if self.combination.join_adapter(physical.url()).is_some() {
            self.refold_adapters();
        }
    }

    pub(crate) fn project_device(&self, physical: &DeviceGovernor) {
        if let Some(combined) = self.combination.join_device(physical.url()) {
            self.refold_device(&combined);
        }
    }

    /// Refold the group a physical device belongs to, if any.
    pub(crate) fn device_changed(&self, physical: &BluetoothUrl) {
        if let Some(combined) = self.combination.owner_of(physical) {
            self.refold_device(&combined);
        }
    }

    pub(crate) fn refold_adapters(&self) {
        if !self.combination.adapters_enabled() {
            return;
        }
        let combined = match self.registry.adapter(&BluetoothUrl::combined_adapter()) {
            Ok((governor, created)) => {
                if created && self.discover_all() {
                    let _ = governor.set_discovering_control(true);
                }
                governor
            }
            Err(e) => {
                warn!(error = %e, "combined adapter unavailable");
                return;
            }
        };

        let (mut powered, mut discovering, mut ready) = (false, false, false);
        for url in self.combination.adapter_members() {
            if let Some(member) = self.registry.find_adapter(&url) {
                powered |= member.is_powered();
                discovering |= member.is_discovering();
                ready |= member.is_ready();
            }
        }
        combined.apply_fold(powered, discovering, ready);
    }

    pub(crate) fn refold_device(&self, combined: &BluetoothUrl) {
        let governor = match self.registry.device(combined) {
            Ok((governor, _)) => governor,
            Err(e) => {
                warn!(url = %combined, error = %e, "combined device unavailable");
                return;
            }
        };

        let delegate = self.combination.delegate(combined);
        let mut fold = DeviceFold::default();
        for url in self.combination.device_members(combined) {
            let Some(member) = self.registry.find_device(&url) else {
                continue;
            };
            let state = member.state();
            if delegate.as_ref() == Some(&url) && state.connected {
                fold.services.clone_from(&state.services);
            }
            fold.absorb(member.is_ready(), &state);
        }
        governor.apply_fold(&fold);
    }

    // ── Runtime toggles ──────────────────────────────────────────────

    pub(crate) fn enable_combined_adapters(&self, enabled: bool) {
        if !self.combination.set_adapters(enabled) {
            return;
        }
        if enabled {
            for governor in self.registry.snapshot() {
                if let Governor::Adapter(adapter) = &governor {
                    if !adapter.url().is_combined() {
                        self.combination.join_adapter(adapter.url());
                    }
                }
            }
            self.refold_adapters();
        } else {
            self.registry.dispose(&BluetoothUrl::combined_adapter());
        }
        info!(enabled, "adapter combination toggled");
    }

    pub(crate) fn enable_combined_devices(&self, enabled: bool) {
        if !self.combination.set_devices(enabled) {
            return;
        }
        if enabled {
            let physical: Vec<Arc<DeviceGovernor>> = self
                .registry
                .snapshot()
                .iter()
                .filter_map(|g| g.as_device().cloned())
                .filter(|d| !d.url().is_combined())
                .collect();
            for device in &physical {
                self.project_device(device);
            }
            debug!(count = physical.len(), "physical devices projected");
        } else {
            let mut retracted = 0usize;
            for governor in self.registry.snapshot() {
                let url = governor.url();
                if url.is_combined() && url.kind() == UrlKind::Device {
                    retracted += self.dispose_tree(url).len();
                }
            }
            debug!(retracted, "combined devices retracted");
        }
        info!(enabled, "device combination toggled");
    }
}
