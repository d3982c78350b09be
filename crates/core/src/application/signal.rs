// One-shot signals (watch-channel backed)

use tokio::sync::watch;

/// Receiving side of a one-shot signal
///
/// Cheap to clone; every clone observes the same firing.
#[derive(Clone, Debug)]
pub struct Signal {
    rx: watch::Receiver<bool>,
}

impl Signal {
    /// Check if the signal has fired
    pub fn is_fired(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the signal to fire (returns immediately if it already has)
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // A trigger dropped without firing releases waiters as well
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

/// Firing side of a one-shot signal
#[derive(Debug)]
pub struct SignalTrigger {
    tx: watch::Sender<bool>,
}

impl Default for SignalTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalTrigger {
    /// Create an unfired trigger
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Create a trigger that has already fired
    pub fn fired() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx }
    }

    /// Fire the signal, releasing all current and future waiters
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> Signal {
        Signal {
            rx: self.tx.subscribe(),
        }
    }
}
