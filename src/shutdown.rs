//! Cooperative shutdown signaling.
//!
//! The poller owns a [`ShutdownSignal`] and hands clones of the matching
//! [`ShutdownListener`] to anything that sleeps: the inter-cycle delay, the
//! error-cycle delay, and the retry executor's backoff waits. Triggering the
//! signal makes every pending sleep return early, so shutdown never hangs on
//! a delay, while in-flight store/delete calls are left to finish.

use std::time::Duration;

use tokio::sync::watch;

/// Sending half of the shutdown channel. Held by the poller.
#[derive(Debug)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

/// Receiving half of the shutdown channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

/// Creates a connected signal/listener pair.
pub fn channel() -> (ShutdownSignal, ShutdownListener) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSignal { tx }, ShutdownListener { rx })
}

impl ShutdownSignal {
    /// Signals shutdown. Idempotent; listeners see the change promptly.
    pub fn trigger(&self) {
        // Send only fails when every listener is gone, which means there is
        // nothing left to wake.
        let _ = self.tx.send(true);
    }

    /// Returns a new listener tied to this signal.
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownListener {
    /// Returns true once shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleeps for `duration` unless shutdown fires first.
    ///
    /// Returns `true` if the full duration elapsed and `false` if the sleep
    /// was cut short by shutdown. A dropped [`ShutdownSignal`] counts as
    /// shutdown, so an orphaned listener never sleeps forever on a wait that
    /// nothing can cancel.
    pub async fn sleep(&self, duration: Duration) -> bool {
        // A cloned receiver treats the value at clone time as seen, so the
        // triggered check must happen on the clone itself or a trigger
        // racing the clone would go unnoticed until the sleep elapsed.
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return false;
        }

        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return true,
                changed = rx.changed() => match changed {
                    Ok(()) if *rx.borrow() => return false,
                    Ok(()) => {}
                    Err(_) => return false,
                },
            }
        }
    }
}
