//! Per-instance shutdown signal.
//!
//! Each [`BlockPoller`](crate::poller::BlockPoller) owns one `Shutdown`; there
//! is no process-wide singleton. The first `shutdown` call wins, records the
//! cause, and wakes every subscriber; later calls are ignored.

use crate::error::PollerError;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

struct Inner {
    terminating: AtomicBool,
    notify_tx: broadcast::Sender<()>,
    cause: Mutex<Option<PollerError>>,
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        let (notify_tx, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(Inner {
                terminating: AtomicBool::new(false),
                notify_tx,
                cause: Mutex::new(None),
            }),
        }
    }

    /// Returns `true` once shutdown has been initiated.
    #[inline]
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.inner.terminating.load(Ordering::Acquire)
    }

    /// Initiates shutdown, recording `cause` if this is the first call.
    ///
    /// Idempotent: only the first call's cause is kept.
    pub fn shutdown(&self, cause: Option<PollerError>) {
        if self
            .inner
            .terminating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("shutdown already initiated, ignoring duplicate call");
            return;
        }

        *self.inner.cause.lock() = cause;
        // No receivers is fine: tasks observe the flag on their next poll.
        let _ = self.inner.notify_tx.send(());
    }

    /// Subscribes to the shutdown notification.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.inner.notify_tx.subscribe()
    }

    /// Takes the recorded shutdown cause, leaving `None` behind.
    #[must_use]
    pub fn take_cause(&self) -> Option<PollerError> {
        self.inner.cause.lock().take()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
