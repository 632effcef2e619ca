use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Handle to a one-shot timer started with [`schedule`].
///
/// Cancelling only raises a flag. The callback is expected to check
/// [`TimerHandle::is_cancelled`] under the same lock the canceller holds,
/// so "fire" and "cancel" cannot interleave.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Run `callback` once after `delay` on the tokio runtime.
///
/// The callback receives a clone of the returned handle.
pub fn schedule<F, Fut>(delay: Duration, callback: F) -> TimerHandle
where
    F: FnOnce(TimerHandle) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handle = TimerHandle::default();
    let fired = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        callback(fired).await;
    });
    handle
}
