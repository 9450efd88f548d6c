//! One-shot "prefetch complete" gate between the ingestion loop and the
//! HTTP front end.

use tokio::sync::watch;

/// Create a linked signal/waiter pair. The signal fires at most once.
pub fn readiness() -> (ReadySignal, ReadyWaiter) {
    let (tx, rx) = watch::channel(false);
    (ReadySignal { tx }, ReadyWaiter { rx })
}

/// Write side, owned by the scheduler.
#[derive(Debug)]
pub struct ReadySignal {
    tx: watch::Sender<bool>,
}

impl ReadySignal {
    /// Open the gate. Returns `true` only on the call that actually opened it.
    pub fn fire(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Read side. Cheap to clone; any number of waiters may exist.
#[derive(Debug, Clone)]
pub struct ReadyWaiter {
    rx: watch::Receiver<bool>,
}

impl ReadyWaiter {
    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the gate opens. Returns immediately if it already has.
    ///
    /// Returns `false` if the signal was dropped without ever firing
    /// (the ingestion task ended before prefetch completed).
    pub async fn wait(&self) -> bool {
        let mut rx = self.rx.clone();
        let ready = rx.wait_for(|ready| *ready).await.is_ok();
        ready
    }
}
