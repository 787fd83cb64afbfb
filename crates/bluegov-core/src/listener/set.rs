// ── Copy-on-write listener list ──
//
// Registration and removal swap in a fresh Vec; delivery iterates whatever
// snapshot was current when the notification reached the dispatch thread.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tracing::warn;

use super::dispatch::on_dispatch_thread;

struct Registration<L: ?Sized> {
    listener: Arc<L>,
    active: AtomicBool,
    /// Held for the duration of each callback so removal can wait it out.
    gate: Mutex<()>,
}

impl<L: ?Sized> Registration<L> {
    fn new(listener: Arc<L>) -> Self {
        Self {
            listener,
            active: AtomicBool::new(true),
            gate: Mutex::new(()),
        }
    }

    /// Stop delivery; returns once no callback of this listener is running,
    /// unless called from the dispatch thread itself.
    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        if !on_dispatch_thread() {
            drop(self.gate.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }
}

fn same<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Listener registry with snapshot iteration.
///
/// Listeners are identified by `Arc` pointer identity. Once [`remove`]
/// returns, the listener receives nothing further.
///
/// [`remove`]: ListenerSet::remove
pub struct ListenerSet<L: ?Sized> {
    entries: ArcSwap<Vec<Arc<Registration<L>>>>,
}

impl<L: ?Sized + Send + Sync> ListenerSet<L> {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Register a listener. Returns `false` if it was already registered.
    pub fn add(&self, listener: Arc<L>) -> bool {
        let mut added = false;
        self.entries.rcu(|current| {
            added = !current.iter().any(|r| same(&r.listener, &listener));
            let mut next: Vec<_> = current.iter().cloned().collect();
            if added {
                next.push(Arc::new(Registration::new(Arc::clone(&listener))));
            }
            next
        });
        added
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    ///
    /// Off the notification thread this blocks the calling thread until an
    /// in-flight callback of the listener returns. Async callers hold their
    /// runtime worker for that long.
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut removed = None;
        self.entries.rcu(|current| {
            removed = current.iter().find(|r| same(&r.listener, listener)).cloned();
            current
                .iter()
                .filter(|r| !same(&r.listener, listener))
                .cloned()
                .collect::<Vec<_>>()
        });
        match removed {
            Some(registration) => {
                registration.deactivate();
                true
            }
            None => false,
        }
    }

    /// Unregister everything.
    pub fn clear(&self) {
        let previous = self.entries.swap(Arc::new(Vec::new()));
        for registration in previous.iter() {
            registration.deactivate();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// Invoke `f` on every active listener. Runs on the dispatch thread.
    pub(crate) fn deliver(&self, f: &dyn Fn(&L)) {
        let snapshot = self.entries.load_full();
        for registration in snapshot.iter() {
            let _gate = registration
                .gate
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !registration.active.load(Ordering::SeqCst) {
                continue;
            }
            let listener = &*registration.listener;
            if catch_unwind(AssertUnwindSafe(|| f(listener))).is_err() {
                warn!("listener panicked; continuing with remaining listeners");
            }
        }
    }
}

impl<L: ?Sized + Send + Sync> Default for ListenerSet<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized + Send + Sync> fmt::Debug for ListenerSet<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    trait Counter: Send + Sync {
        fn hit(&self);
    }

    #[derive(Default)]
    struct Hits(AtomicUsize);

    impl Counter for Hits {
        fn hit(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Exploding;

    impl Counter for Exploding {
        fn hit(&self) {
            panic!("listener bug");
        }
    }

    struct Slow {
        entered: mpsc::Sender<()>,
        finished: AtomicBool,
    }

    impl Counter for Slow {
        fn hit(&self) {
            let _ = self.entered.send(());
            thread::sleep(Duration::from_millis(50));
            self.finished.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn add_is_idempotent_by_identity() {
        let set: ListenerSet<dyn Counter> = ListenerSet::new();
        let hits: Arc<dyn Counter> = Arc::new(Hits::default());

        assert!(set.add(Arc::clone(&hits)));
        assert!(!set.add(Arc::clone(&hits)));
        assert_eq!(set.len(), 1);

        let other: Arc<dyn Counter> = Arc::new(Hits::default());
        assert!(set.add(other));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn removed_listener_is_not_invoked() {
        let set: ListenerSet<dyn Counter> = ListenerSet::new();
        let hits = Arc::new(Hits::default());
        let as_dyn: Arc<dyn Counter> = hits.clone();
        set.add(Arc::clone(&as_dyn));

        set.deliver(&|l| l.hit());
        assert!(set.remove(&as_dyn));
        assert!(!set.remove(&as_dyn));
        set.deliver(&|l| l.hit());

        assert_eq!(hits.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let set: ListenerSet<dyn Counter> = ListenerSet::new();
        let hits = Arc::new(Hits::default());
        set.add(Arc::new(Exploding));
        set.add(hits.clone());

        set.deliver(&|l| l.hit());
        set.deliver(&|l| l.hit());

        assert_eq!(hits.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clear_drops_everything() {
        let set: ListenerSet<dyn Counter> = ListenerSet::new();
        let hits = Arc::new(Hits::default());
        set.add(hits.clone());
        set.clear();
        set.deliver(&|l| l.hit());

        assert!(set.is_empty());
        assert_eq!(hits.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn remove_waits_for_running_callback() {
        let set: Arc<ListenerSet<dyn Counter>> = Arc::new(ListenerSet::new());
        let (entered, started) = mpsc::channel();
        let slow = Arc::new(Slow {
            entered,
            finished: AtomicBool::new(false),
        });
        let as_dyn: Arc<dyn Counter> = slow.clone();
        set.add(Arc::clone(&as_dyn));

        let delivering = Arc::clone(&set);
        let worker = thread::spawn(move || delivering.deliver(&|l| l.hit()));
        started.recv().unwrap();

        assert!(set.remove(&as_dyn));
        assert!(slow.finished.load(Ordering::SeqCst));
        worker.join().unwrap();
    }
}
