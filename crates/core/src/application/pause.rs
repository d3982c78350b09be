// Pause Controller
//
// Gates handler delivery only; producers are never blocked by a pause.

use crate::application::signal::{Signal, SignalTrigger};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Capability of queues whose delivery can be suspended without affecting producers
pub trait Pausable {
    /// Stop delivering batches to the handler (no-op when already paused)
    fn pause(&self);

    /// Restart delivery (no-op when not paused)
    fn resume(&self);

    /// Current `(paused, resumed)` signal pair
    ///
    /// A signal obtained before a transition fires on that transition; after the
    /// transition, the opposite signal is re-armed and waits for the next one.
    fn is_paused_is_resumed(&self) -> (Signal, Signal);
}

struct PauseSignals {
    paused: SignalTrigger,
    resumed: SignalTrigger,
}

struct PauseInner {
    name: String,
    paused: AtomicBool,
    signals: Mutex<PauseSignals>,
}

/// Shared pause state for one queue
#[derive(Clone)]
pub struct PauseController {
    inner: Arc<PauseInner>,
}

impl PauseController {
    /// Create a controller in the resumed state
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(PauseInner {
                name: name.into(),
                paused: AtomicBool::new(false),
                signals: Mutex::new(PauseSignals {
                    paused: SignalTrigger::new(),
                    resumed: SignalTrigger::fired(),
                }),
            }),
        }
    }

    /// Pause delivery; returns true if this call changed the state
    pub fn pause(&self) -> bool {
        let mut signals = self.lock_signals();
        if self.inner.paused.swap(true, Ordering::SeqCst) {
            return false;
        }
        signals.paused.fire();
        signals.resumed = SignalTrigger::new();
        info!(queue = %self.inner.name, "Queue paused");
        true
    }

    /// Resume delivery; returns true if this call changed the state
    pub fn resume(&self) -> bool {
        let mut signals = self.lock_signals();
        if !self.inner.paused.swap(false, Ordering::SeqCst) {
            return false;
        }
        signals.resumed.fire();
        signals.paused = SignalTrigger::new();
        info!(queue = %self.inner.name, "Queue resumed");
        true
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn signals(&self) -> (Signal, Signal) {
        let signals = self.lock_signals();
        (signals.paused.subscribe(), signals.resumed.subscribe())
    }

    /// Block while paused; returns immediately when resumed
    pub async fn wait_until_resumed(&self) {
        loop {
            let resumed = {
                let signals = self.lock_signals();
                if !self.is_paused() {
                    return;
                }
                signals.resumed.subscribe()
            };
            resumed.wait().await;
        }
    }

    fn lock_signals(&self) -> std::sync::MutexGuard<'_, PauseSignals> {
        self.inner
            .signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Pausable for PauseController {
    fn pause(&self) {
        PauseController::pause(self);
    }

    fn resume(&self) {
        PauseController::resume(self);
    }

    fn is_paused_is_resumed(&self) -> (Signal, Signal) {
        self.signals()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_initial_state_is_resumed() {
        let controller = PauseController::new("test");
        let (paused, resumed) = controller.is_paused_is_resumed();
        assert!(!controller.is_paused());
        assert!(!paused.is_fired());
        assert!(resumed.is_fired());
    }

    #[test]
    fn test_pause_and_resume_are_idempotent() {
        let controller = PauseController::new("test");
        assert!(controller.pause());
        assert!(!controller.pause());
        assert!(controller.is_paused());

        assert!(controller.resume());
        assert!(!controller.resume());
        assert!(!controller.is_paused());
    }

    #[test]
    fn test_signals_rearm_on_opposite_transition() {
        let controller = PauseController::new("test");

        let (paused_before, _) = controller.is_paused_is_resumed();
        controller.pause();
        assert!(paused_before.is_fired());

        let (paused, resumed) = controller.is_paused_is_resumed();
        assert!(paused.is_fired());
        assert!(!resumed.is_fired());

        controller.resume();
        assert!(resumed.is_fired());

        // Fresh pair waits for the next pause
        let (paused_next, resumed_next) = controller.is_paused_is_resumed();
        assert!(!paused_next.is_fired());
        assert!(resumed_next.is_fired());
        // The old paused signal stays fired
        assert!(paused.is_fired());
    }

    #[tokio::test]
    async fn test_waiter_released_by_resume() {
        let controller = PauseController::new("test");
        controller.pause();

        let waiter = tokio::spawn({
            let controller = controller.clone();
            async move { controller.wait_until_resumed().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        controller.resume();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("resume should release waiter")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_until_resumed_returns_when_not_paused() {
        let controller = PauseController::new("test");
        tokio::time::timeout(Duration::from_millis(50), controller.wait_until_resumed())
            .await
            .expect("not paused, should not block");
    }
}
