// ── Governor registry ──
//
// The single owner of every governor. A sharded `DashMap` gives atomic
// get-or-create per URL and read-mostly lookups without a global lock.
// Nothing in here performs I/O, so shard locks are only ever held for
// map bookkeeping.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::error::CoreError;
use crate::governor::{
    AdapterGovernor, CharacteristicGovernor, DeviceGovernor, Governor, GovernorContext,
};
use crate::model::{BluetoothUrl, UrlKind};

pub(crate) struct GovernorRegistry {
    governors: DashMap<BluetoothUrl, Governor>,
    ctx: GovernorContext,
}

impl GovernorRegistry {
    pub(crate) fn new(ctx: GovernorContext) -> Self {
        Self {
            governors: DashMap::new(),
            ctx,
        }
    }

    /// Return the governor for `url`, creating it if absent.
    ///
    /// The boolean is `true` when this call created the governor. Racing
    /// callers for the same URL all receive the same instance.
    pub(crate) fn get_or_create(&self, url: &BluetoothUrl) -> (Governor, bool) {
        if let Some(existing) = self.governors.get(url) {
            return (existing.value().clone(), false);
        }
        let mut created = false;
        let governor = self
            .governors
            .entry(url.clone())
            .or_insert_with(|| {
                created = true;
                Governor::create(url, &self.ctx)
            })
            .value()
            .clone();
        if created {
            debug!(url = %url, kind = %url.kind(), "governor created");
        }
        (governor, created)
    }

    pub(crate) fn adapter(
        &self,
        url: &BluetoothUrl,
    ) -> Result<(Arc<AdapterGovernor>, bool), CoreError> {
        expect_kind(url, UrlKind::Adapter)?;
        let (governor, created) = self.get_or_create(url);
        match governor {
            Governor::Adapter(g) => Ok((g, created)),
            other => Err(kind_mismatch(&other)),
        }
    }

    pub(crate) fn device(
        &self,
        url: &BluetoothUrl,
    ) -> Result<(Arc<DeviceGovernor>, bool), CoreError> {
        expect_kind(url, UrlKind::Device)?;
        let (governor, created) = self.get_or_create(url);
        match governor {
            Governor::Device(g) => Ok((g, created)),
            other => Err(kind_mismatch(&other)),
        }
    }

    pub(crate) fn characteristic(
        &self,
        url: &BluetoothUrl,
    ) -> Result<(Arc<CharacteristicGovernor>, bool), CoreError> {
        expect_kind(url, UrlKind::Characteristic)?;
        let (governor, created) = self.get_or_create(url);
        match governor {
            Governor::Characteristic(g) => Ok((g, created)),
            other => Err(kind_mismatch(&other)),
        }
    }

    /// Lookup without creation.
    pub(crate) fn find(&self, url: &BluetoothUrl) -> Option<Governor> {
        self.governors.get(url).map(|g| g.value().clone())
    }

    pub(crate) fn find_device(&self, url: &BluetoothUrl) -> Option<Arc<DeviceGovernor>> {
        self.find(url).and_then(|g| g.as_device().cloned())
    }

    pub(crate) fn find_characteristic(
        &self,
        url: &BluetoothUrl,
    ) -> Option<Arc<CharacteristicGovernor>> {
        self.find(url).and_then(|g| g.as_characteristic().cloned())
    }

    pub(crate) fn find_adapter(&self, url: &BluetoothUrl) -> Option<Arc<AdapterGovernor>> {
        self.find(url).and_then(|g| g.as_adapter().cloned())
    }

    /// All governors, ordered by depth then URL.
    pub(crate) fn snapshot(&self) -> Vec<Governor> {
        let mut all: Vec<Governor> = self.governors.iter().map(|g| g.value().clone()).collect();
        all.sort_by(|a, b| {
            a.url()
                .depth()
                .cmp(&b.url().depth())
                .then_with(|| a.url().cmp(b.url()))
        });
        all
    }

    /// Governors strictly below `url`.
    pub(crate) fn descendants(&self, url: &BluetoothUrl) -> Vec<Governor> {
        self.governors
            .iter()
            .filter(|g| g.key().is_descendant(url))
            .map(|g| g.value().clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.governors.len()
    }

    // ── Disposal ─────────────────────────────────────────────────────

    /// Dispose exactly the governor at `url`. Returns `false` if absent.
    ///
    /// The governor is flagged disposed before its slot is vacated, so a
    /// caller that finds the slot empty never sees a live old instance.
    pub(crate) fn dispose(&self, url: &BluetoothUrl) -> bool {
        let removed = match self.governors.entry(url.clone()) {
            Entry::Occupied(slot) => {
                slot.get().mark_disposed();
                Some(slot.remove())
            }
            Entry::Vacant(_) => None,
        };
        match removed {
            Some(governor) => {
                governor.finalize();
                debug!(url = %url, "governor disposed");
                true
            }
            None => false,
        }
    }

    /// Dispose every governor strictly below `url`, leaves first.
    /// Returns the disposed URLs in disposal order.
    pub(crate) fn dispose_descendants(&self, url: &BluetoothUrl) -> Vec<BluetoothUrl> {
        let mut urls: Vec<BluetoothUrl> = self
            .governors
            .iter()
            .filter(|g| g.key().is_descendant(url))
            .map(|g| g.key().clone())
            .collect();
        self.dispose_leaf_first(&mut urls)
    }

    /// Dispose everything, leaves first.
    pub(crate) fn dispose_all(&self) -> Vec<BluetoothUrl> {
        let mut urls: Vec<BluetoothUrl> = self.governors.iter().map(|g| g.key().clone()).collect();
        self.dispose_leaf_first(&mut urls)
    }

    fn dispose_leaf_first(&self, urls: &mut Vec<BluetoothUrl>) -> Vec<BluetoothUrl> {
        urls.sort_by(|a, b| b.depth().cmp(&a.depth()).then_with(|| a.cmp(b)));
        urls.retain(|url| self.dispose(url));
        std::mem::take(urls)
    }
}

fn expect_kind(url: &BluetoothUrl, expected: UrlKind) -> Result<(), CoreError> {
    if url.kind() == expected {
        Ok(())
    } else {
        Err(CoreError::UnexpectedUrlKind {
            url: url.to_string(),
            expected,
        })
    }
}

fn kind_mismatch(governor: &Governor) -> CoreError {
    CoreError::Internal(format!(
        "registry holds a {} governor for {}",
        governor.kind(),
        governor.url()
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::listener::Dispatcher;
    use crate::transport::MemoryTransport;

    fn registry() -> GovernorRegistry {
        GovernorRegistry::new(GovernorContext {
            dispatcher: Dispatcher::spawn().unwrap(),
            transport: Arc::new(MemoryTransport::new()),
        })
    }

    fn url(s: &str) -> BluetoothUrl {
        s.parse().unwrap()
    }

    const ADAPTER: &str = "/11:22:33:44:55:66";
    const DEVICE: &str = "/11:22:33:44:55:66/AA:BB:CC:DD:EE:FF";
    const CHAR_A: &str = "/11:22:33:44:55:66/AA:BB:CC:DD:EE:FF/2a19";
    const CHAR_B: &str = "/11:22:33:44:55:66/AA:BB:CC:DD:EE:FF/2a1c";
    const OTHER_DEVICE: &str = "/11:22:33:44:55:66/01:02:03:04:05:06";

    fn populate(registry: &GovernorRegistry) {
        for u in [ADAPTER, DEVICE, CHAR_A, CHAR_B, OTHER_DEVICE] {
            registry.get_or_create(&url(u));
        }
    }

    #[tokio::test]
    async fn get_returns_same_instance_until_disposed() {
        let registry = registry();
        let (first, created) = registry.get_or_create(&url(DEVICE));
        assert!(created);
        let (second, created) = registry.get_or_create(&url(DEVICE));
        assert!(!created);
        assert!(first.same_instance(&second));

        assert!(registry.dispose(&url(DEVICE)));
        assert!(first.is_disposed());

        let (third, created) = registry.get_or_create(&url(DEVICE));
        assert!(created);
        assert!(!third.same_instance(&first));
        assert!(!third.is_disposed());
    }

    #[tokio::test]
    async fn typed_lookup_rejects_wrong_kind() {
        let registry = registry();
        let err = registry.adapter(&url(DEVICE)).unwrap_err();
        assert!(matches!(err, CoreError::UnexpectedUrlKind { expected: UrlKind::Adapter, .. }));
        assert!(registry.find(&url(DEVICE)).is_none());
    }

    #[tokio::test]
    async fn dispose_descendants_is_leaf_first_and_exact() {
        let registry = registry();
        populate(&registry);

        let disposed = registry.dispose_descendants(&url(DEVICE));
        assert_eq!(disposed, vec![url(CHAR_A), url(CHAR_B)]);
        assert!(registry.find(&url(DEVICE)).is_some());
        assert!(registry.find(&url(OTHER_DEVICE)).is_some());

        let disposed = registry.dispose_descendants(&url(ADAPTER));
        assert_eq!(disposed, vec![url(OTHER_DEVICE), url(DEVICE)]);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn dispose_all_orders_by_depth() {
        let registry = registry();
        populate(&registry);

        let disposed = registry.dispose_all();
        let depths: Vec<usize> = disposed.iter().map(BluetoothUrl::depth).collect();
        assert_eq!(depths, vec![3, 3, 2, 2, 1]);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_access_creates_one_governor() {
        let registry = Arc::new(registry());
        let target = url(CHAR_A);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            let target = target.clone();
            handles.push(tokio::spawn(async move { registry.get_or_create(&target) }));
        }

        let mut created = 0;
        let mut pointers = HashSet::new();
        for handle in handles {
            let (governor, was_created) = handle.await.unwrap();
            created += usize::from(was_created);
            pointers.insert(Arc::as_ptr(governor.as_characteristic().unwrap()) as usize);
        }

        assert_eq!(created, 1);
        assert_eq!(pointers.len(), 1);
    }
}
