// ── Notification thread ──
//
// All listener callbacks run on one dedicated OS thread fed by an
// unbounded channel. Posting never blocks, so the scan and refresh tasks
// cannot be stalled by a slow listener, and a single consumer keeps the
// per-URL ordering in which mutators posted.

use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use super::ListenerSet;

thread_local! {
    static DISPATCH_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Whether the caller is running inside a listener callback.
pub(crate) fn on_dispatch_thread() -> bool {
    DISPATCH_THREAD.with(Cell::get)
}

type Job = Box<dyn FnOnce() + Send>;

enum Message {
    Deliver(Job),
    Flush(oneshot::Sender<()>),
}

/// Handle for posting notifications. Cheap to clone.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    tx: mpsc::UnboundedSender<Message>,
    closed: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Start the notification thread. It exits once every handle is dropped.
    pub(crate) fn spawn() -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        std::thread::Builder::new()
            .name("bluegov-notify".into())
            .spawn(move || {
                DISPATCH_THREAD.with(|flag| flag.set(true));
                while let Some(message) = rx.blocking_recv() {
                    match message {
                        Message::Deliver(job) => {
                            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                                warn!("notification job panicked");
                            }
                        }
                        Message::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
                debug!("notification thread exiting");
            })?;

        Ok(Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Queue a job for the notification thread.
    pub(crate) fn post(&self, job: impl FnOnce() + Send + 'static) {
        if self.closed.load(Ordering::Acquire) {
            trace!("notification dropped: dispatcher closed");
            return;
        }
        if self.tx.send(Message::Deliver(Box::new(job))).is_err() {
            trace!("notification dropped: dispatcher gone");
        }
    }

    /// Queue delivery of `f` to every listener in `listeners`.
    ///
    /// The listener snapshot is taken when the job runs, not now.
    pub(crate) fn notify<L>(&self, listeners: &Arc<ListenerSet<L>>, f: impl Fn(&L) + Send + 'static)
    where
        L: ?Sized + Send + Sync + 'static,
    {
        if listeners.is_empty() {
            return;
        }
        let listeners = Arc::clone(listeners);
        self.post(move || listeners.deliver(&f));
    }

    /// Resolve once everything posted before this call has been delivered.
    pub(crate) async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Reject further posts. Already queued jobs still run.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[tokio::test]
    async fn jobs_run_in_posting_order() {
        let dispatcher = Dispatcher::spawn().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let seen = Arc::clone(&seen);
            dispatcher.post(move || seen.lock().unwrap_or_else(|e| e.into_inner()).push(i));
        }
        dispatcher.flush().await;

        let seen = seen.lock().unwrap_or_else(|e| e.into_inner()).clone();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn panicking_job_does_not_kill_the_thread() {
        let dispatcher = Dispatcher::spawn().unwrap();
        let ran = Arc::new(AtomicBool::new(false));

        dispatcher.post(|| panic!("boom"));
        let flag = Arc::clone(&ran);
        dispatcher.post(move || flag.store(true, Ordering::SeqCst));
        dispatcher.flush().await;

        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn closed_dispatcher_drops_posts() {
        let dispatcher = Dispatcher::spawn().unwrap();
        let ran = Arc::new(AtomicBool::new(false));

        dispatcher.close();
        let flag = Arc::clone(&ran);
        dispatcher.post(move || flag.store(true, Ordering::SeqCst));
        dispatcher.flush().await;

        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn runs_on_the_dispatch_thread() {
        let dispatcher = Dispatcher::spawn().unwrap();
        let inside = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&inside);
        dispatcher.post(move || flag.store(on_dispatch_thread(), Ordering::SeqCst));
        dispatcher.flush().await;

        assert!(inside.load(Ordering::SeqCst));
        assert!(!on_dispatch_thread());
    }
}
