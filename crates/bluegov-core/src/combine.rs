// ── Combination bookkeeping ──
//
// Tracks which physical governors are folded into which combined ones.
// Membership is updated incrementally as physical entities are seen, so a
// fold touches only the members of one group. The projection itself
// (reading member governors and writing the combined one) lives in the
// engine; this type only owns the mapping.
//
// Lock order: combination state is never held while calling into the
// registry.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::model::BluetoothUrl;

#[derive(Debug, Default)]
struct Group {
    members: BTreeSet<BluetoothUrl>,
    /// Physical device currently carrying the combined connection.
    delegate: Option<BluetoothUrl>,
}

#[derive(Debug, Default)]
struct CombineState {
    adapters: bool,
    devices: bool,
    adapter_members: BTreeSet<BluetoothUrl>,
    /// Combined device URL -> group.
    groups: HashMap<BluetoothUrl, Group>,
    /// Physical device URL -> combined device URL.
    owner: HashMap<BluetoothUrl, BluetoothUrl>,
}

#[derive(Debug, Default)]
pub(crate) struct Combination {
    state: Mutex<CombineState>,
}

impl Combination {
    pub(crate) fn new(adapters: bool, devices: bool) -> Self {
        Self {
            state: Mutex::new(CombineState {
                adapters,
                devices,
                ..CombineState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, CombineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn adapters_enabled(&self) -> bool {
        self.state().adapters
    }

    pub(crate) fn devices_enabled(&self) -> bool {
        self.state().devices
    }

    /// Returns `true` if the flag changed.
    pub(crate) fn set_adapters(&self, enabled: bool) -> bool {
        let mut state = self.state();
        let changed = state.adapters != enabled;
        state.adapters = enabled;
        if !enabled {
            state.adapter_members.clear();
        }
        changed
    }

    /// Returns `true` if the flag changed. Disabling drops every group;
    /// the caller retracts the combined governors.
    pub(crate) fn set_devices(&self, enabled: bool) -> bool {
        let mut state = self.state();
        let changed = state.devices != enabled;
        state.devices = enabled;
        if !enabled {
            state.groups.clear();
            state.owner.clear();
        }
        changed
    }

    // ── Membership ───────────────────────────────────────────────────

    /// Record a physical adapter. Returns the combined adapter URL if
    /// adapter combination is on.
    pub(crate) fn join_adapter(&self, physical: &BluetoothUrl) -> Option<BluetoothUrl> {
        if physical.is_combined() {
            return None;
        }
        let mut state = self.state();
        if !state.adapters {
            return None;
        }
        state.adapter_members.insert(physical.clone());
        Some(BluetoothUrl::combined_adapter())
    }

    /// Record a physical device. Returns its combined URL if device
    /// combination is on. Constant time for an already known member.
    pub(crate) fn join_device(&self, physical: &BluetoothUrl) -> Option<BluetoothUrl> {
        if physical.is_combined() {
            return None;
        }
        let mut state = self.state();
        if !state.devices {
            return None;
        }
        if let Some(combined) = state.owner.get(physical) {
            return Some(combined.clone());
        }
        let combined = physical.to_combined();
        state.owner.insert(physical.clone(), combined.clone());
        state
            .groups
            .entry(combined.clone())
            .or_default()
            .members
            .insert(physical.clone());
        Some(combined)
    }

    /// Combined URL a physical device is folded into, if any.
    pub(crate) fn owner_of(&self, physical: &BluetoothUrl) -> Option<BluetoothUrl> {
        self.state().owner.get(physical).cloned()
    }

    pub(crate) fn adapter_members(&self) -> Vec<BluetoothUrl> {
        self.state().adapter_members.iter().cloned().collect()
    }

    pub(crate) fn device_members(&self, combined: &BluetoothUrl) -> Vec<BluetoothUrl> {
        self.state()
            .groups
            .get(combined)
            .map(|g| g.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn delegate(&self, combined: &BluetoothUrl) -> Option<BluetoothUrl> {
        self.state()
            .groups
            .get(combined)
            .and_then(|g| g.delegate.clone())
    }

    /// Swap the delegate of a group, returning the previous one.
    pub(crate) fn set_delegate(
        &self,
        combined: &BluetoothUrl,
        delegate: Option<BluetoothUrl>,
    ) -> Option<BluetoothUrl> {
        let mut state = self.state();
        match state.groups.get_mut(combined) {
            Some(group) => std::mem::replace(&mut group.delegate, delegate),
            None => None,
        }
    }

    /// Drop every trace of `url` after its governor was disposed.
    pub(crate) fn forget(&self, url: &BluetoothUrl) {
        let mut state = self.state();
        state.adapter_members.remove(url);
        if let Some(combined) = state.owner.remove(url) {
            if let Some(group) = state.groups.get_mut(&combined) {
                group.members.remove(url);
                if group.delegate.as_ref() == Some(url) {
                    group.delegate = None;
                }
            }
        }
        if let Some(group) = state.groups.remove(url) {
            for member in &group.members {
                state.owner.remove(member);
            }
        }
    }

    pub(crate) fn clear(&self) {
        let mut state = self.state();
        state.adapter_members.clear();
        state.groups.clear();
        state.owner.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn url(s: &str) -> BluetoothUrl {
        s.parse().unwrap()
    }

    const LEFT: &str = "/11:11:11:11:11:11/AA:BB:CC:DD:EE:FF";
    const RIGHT: &str = "/22:22:22:22:22:22/AA:BB:CC:DD:EE:FF";
    const COMBINED: &str = "/XX:XX:XX:XX:XX:XX/AA:BB:CC:DD:EE:FF";

    #[test]
    fn devices_with_same_address_share_a_group() {
        let combination = Combination::new(false, true);

        assert_eq!(combination.join_device(&url(LEFT)), Some(url(COMBINED)));
        assert_eq!(combination.join_device(&url(RIGHT)), Some(url(COMBINED)));
        assert_eq!(combination.join_device(&url(LEFT)), Some(url(COMBINED)));

        assert_eq!(
            combination.device_members(&url(COMBINED)),
            vec![url(LEFT), url(RIGHT)]
        );
        assert_eq!(combination.owner_of(&url(RIGHT)), Some(url(COMBINED)));
    }

    #[test]
    fn disabled_combination_joins_nothing() {
        let combination = Combination::new(false, false);
        assert!(combination.join_device(&url(LEFT)).is_none());
        assert!(combination.join_adapter(&url("/11:11:11:11:11:11")).is_none());
        assert!(combination.join_device(&url(COMBINED)).is_none());
    }

    #[test]
    fn forget_member_clears_delegate() {
        let combination = Combination::new(false, true);
        combination.join_device(&url(LEFT));
        combination.join_device(&url(RIGHT));
        combination.set_delegate(&url(COMBINED), Some(url(LEFT)));

        combination.forget(&url(LEFT));

        assert!(combination.delegate(&url(COMBINED)).is_none());
        assert_eq!(combination.device_members(&url(COMBINED)), vec![url(RIGHT)]);
    }

    #[test]
    fn forget_group_releases_members() {
        let combination = Combination::new(false, true);
        combination.join_device(&url(LEFT));
        combination.forget(&url(COMBINED));

        assert!(combination.owner_of(&url(LEFT)).is_none());
        // Rejoining rebuilds the group.
        assert_eq!(combination.join_device(&url(LEFT)), Some(url(COMBINED)));
    }

    #[test]
    fn disabling_devices_drops_groups() {
        let combination = Combination::new(true, true);
        combination.join_device(&url(LEFT));
        combination.join_adapter(&url("/11:11:11:11:11:11"));

        assert!(combination.set_devices(false));
        assert!(!combination.set_devices(false));
        assert!(combination.device_members(&url(COMBINED)).is_empty());
        assert_eq!(combination.adapter_members().len(), 1);
    }
}
