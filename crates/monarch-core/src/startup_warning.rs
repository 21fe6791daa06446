//! Deferred "primary is not responding" notice.
//!
//! A secondary arms the warning before handing its launch to the primary and
//! disarms it once the primary acknowledges. The callback runs at most once.
//! It runs while holding its slot, so `disarm()` either cancels it or waits
//! for it to finish; nothing of it runs after `disarm()` returns.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

type Callback = Box<dyn FnOnce() + Send>;

struct Armed {
    slot: Arc<Mutex<Option<Callback>>>,
    task: JoinHandle<()>,
}

/// One-shot, cancellable timer for the startup warning.
#[derive(Default)]
pub struct StartupWarning {
    armed: Option<Armed>,
}

impl StartupWarning {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `on_fire` to run once after `threshold`.
    ///
    /// Arming again replaces the pending callback; only the latest can fire.
    pub fn arm<F>(&mut self, threshold: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.disarm();

        let slot: Arc<Mutex<Option<Callback>>> = Arc::new(Mutex::new(Some(Box::new(on_fire))));
        let task_slot = slot.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(threshold).await;
            // Whoever takes the callback first wins: this task or disarm().
            let mut slot = task_slot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(callback) = slot.take() {
                debug!("Startup warning threshold of {:?} reached", threshold);
                callback();
            }
        });

        self.armed = Some(Armed { slot, task });
    }

    /// Cancel a pending callback, or wait for one that is already running.
    /// No-op when unarmed or already fired.
    pub fn disarm(&mut self) {
        if let Some(armed) = self.armed.take() {
            let cancelled = armed
                .slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .is_some();
            armed.task.abort();
            if cancelled {
                debug!("Startup warning disarmed");
            }
        }
    }

    /// True while a callback is waiting to fire.
    pub fn is_armed(&self) -> bool {
        self.armed.as_ref().is_some_and(|armed| {
            armed
                .slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
        })
    }
}

impl Drop for StartupWarning {
    fn drop(&mut self) {
        self.disarm();
    }
}
