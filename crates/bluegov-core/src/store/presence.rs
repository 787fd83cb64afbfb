// ── Reactive presence set ──
//
// Concurrent URL-keyed storage with push-based change notification via
// `watch`. A whole cycle's worth of changes is applied by `reconcile`,
// which rebuilds the snapshot once.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::BluetoothUrl;

/// Outcome of reconciling one cycle against the previous one.
#[derive(Debug)]
pub(crate) struct Reconciled<T> {
    /// Present now, absent last cycle.
    pub(crate) appeared: Vec<Arc<T>>,
    /// Present in both cycles (the new value).
    pub(crate) retained: Vec<Arc<T>>,
    /// Present last cycle, absent now (the old value).
    pub(crate) vanished: Vec<Arc<T>>,
}

impl<T> Reconciled<T> {
    pub(crate) fn is_quiet(&self) -> bool {
        self.appeared.is_empty() && self.vanished.is_empty()
    }
}

pub(crate) struct PresenceSet<T: Send + Sync + 'static> {
    by_url: DashMap<BluetoothUrl, Arc<T>>,
    /// Snapshot ordered by URL, rebuilt on mutation.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Send + Sync + 'static> PresenceSet<T> {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_url: DashMap::new(),
            snapshot,
        }
    }

    /// Replace the whole set with `items`, reporting the difference.
    pub(crate) fn reconcile(&self, items: Vec<(BluetoothUrl, T)>) -> Reconciled<T> {
        let mut appeared = Vec::new();
        let mut retained = Vec::new();
        let mut seen = std::collections::HashSet::with_capacity(items.len());

        for (url, item) in items {
            let item = Arc::new(item);
            seen.insert(url.clone());
            match self.by_url.insert(url, Arc::clone(&item)) {
                Some(_) => retained.push(item),
                None => appeared.push(item),
            }
        }

        let stale: Vec<BluetoothUrl> = self
            .by_url
            .iter()
            .filter(|entry| !seen.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        let vanished = stale
            .iter()
            .filter_map(|url| self.by_url.remove(url).map(|(_, v)| v))
            .collect();

        self.rebuild_snapshot();
        Reconciled {
            appeared,
            retained,
            vanished,
        }
    }

    pub(crate) fn contains(&self, url: &BluetoothUrl) -> bool {
        self.by_url.contains_key(url)
    }

    /// Current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn clear(&self) {
        self.by_url.clear();
        self.rebuild_snapshot();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.by_url.len()
    }

    fn rebuild_snapshot(&self) {
        let mut entries: Vec<(BluetoothUrl, Arc<T>)> = self
            .by_url
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let values = entries.into_iter().map(|(_, v)| v).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
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

    #[test]
    fn reconcile_reports_difference() {
        let set: PresenceSet<&'static str> = PresenceSet::new();

        let first = set.reconcile(vec![(url("/00:00:00:00:00:01"), "a"), (url("/00:00:00:00:00:02"), "b")]);
        assert_eq!(first.appeared.len(), 2);
        assert!(first.vanished.is_empty());

        let second = set.reconcile(vec![(url("/00:00:00:00:00:02"), "b2"), (url("/00:00:00:00:00:03"), "c")]);
        assert_eq!(*second.appeared[0], "c");
        assert_eq!(*second.retained[0], "b2");
        assert_eq!(*second.vanished[0], "a");
        assert!(!second.is_quiet());

        let third = set.reconcile(vec![(url("/00:00:00:00:00:02"), "b3"), (url("/00:00:00:00:00:03"), "c")]);
        assert!(third.is_quiet());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn snapshot_is_ordered_and_observable() {
        let set: PresenceSet<&'static str> = PresenceSet::new();
        let mut rx = set.subscribe();

        set.reconcile(vec![(url("/00:00:00:00:00:09"), "z"), (url("/00:00:00:00:00:01"), "a")]);

        assert!(rx.has_changed().unwrap());
        let snap: Vec<&str> = rx.borrow_and_update().iter().map(|s| **s).collect();
        assert_eq!(snap, vec!["a", "z"]);
        assert!(set.contains(&url("/00:00:00:00:00:09")));

        set.clear();
        assert!(set.snapshot().is_empty());
    }
}
