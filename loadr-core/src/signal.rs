use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// One-shot cooperative stop flag shared by a scenario's workers.
///
/// Workers poll [`StopSignal::is_stopped`] at iteration boundaries and race [`StopSignal::wait`]
/// against think time. Once tripped the signal stays tripped.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the signal. Returns `false` if it was already tripped.
    pub fn stop(&self) -> bool {
        let first = !self.stopped.swap(true, Ordering::AcqRel);
        self.notify.notify_waiters();
        first
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        loop {
            // Register interest before re-checking the flag so a concurrent `stop` is not missed.
            let notified = self.notify.notified();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}
