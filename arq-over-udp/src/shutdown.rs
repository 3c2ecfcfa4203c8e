//! Cooperative cancellation.
//!
//! A [`ShutdownTrigger`] / [`Shutdown`] pair wraps a `tokio::sync::watch`
//! channel.  Every session activity holds a [`Shutdown`] clone and races
//! [`Shutdown::triggered`] against each blocking call, so tripping the trigger
//! stops all of them at their next suspension point.

use tokio::sync::watch;

/// Create a connected trigger and token.
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Owner side; call [`ShutdownTrigger::trigger`] to stop every activity.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // send_replace stores the value even with no receivers left.
        self.tx.send_replace(true);
    }

    /// A fresh token observing this trigger.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observer side, cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the trigger fires.
    ///
    /// If the trigger is dropped without firing, this never resolves.
    pub async fn triggered(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
