//! Single-shot, cancellable timers backing the handshake/ack/disconnect/
//! reconnection windows.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// A timer that fires a callback once after `duration` unless cancelled
/// first. Spawns a cancellable `tokio::task` per timeout and aborts the
/// `JoinHandle` on early cancellation, rather than polling a deadline by
/// hand.
pub struct Timer {
    handle: Option<JoinHandle<()>>,
    cancel: Arc<Notify>,
}

impl Timer {
    /// Start a timer that runs `on_fire` after `duration` unless `cancel()`
    /// is called first.
    pub fn start<F>(duration: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let cancel = Arc::new(Notify::new());
        let cancel_wait = cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    on_fire();
                }
                _ = cancel_wait.notified() => {}
            }
        });
        Self {
            handle: Some(handle),
            cancel,
        }
    }

    /// Cancel the timer. A no-op if it already fired or was already
    /// cancelled.
    pub fn cancel(&mut self) {
        self.cancel.notify_one();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn fires_after_duration() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let _timer = Timer::start(Duration::from_millis(50), move || {
            fired_clone.store(true, Ordering::SeqCst);
        });
        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_fire() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let mut timer = Timer::start(Duration::from_millis(50), move || {
            fired_clone.store(true, Ordering::SeqCst);
        });
        timer.cancel();
        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
