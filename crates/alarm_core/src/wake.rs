use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    error::PlatformError,
    platform::{DeferredExecutor, PowerService, WakeLock},
};

/// Keeps the device awake for the duration of one delivery.
///
/// Clones share the same lock; whichever caller releases first wins and
/// every later release is a no-op.
#[derive(Clone)]
pub struct WakeGuard {
    lock: Arc<Mutex<Option<Arc<dyn WakeLock>>>>,
}

impl WakeGuard {
    pub fn acquire(
        power: &dyn PowerService,
        tag: &str,
        timeout: Duration,
    ) -> Result<Self, PlatformError> {
        let lock = power.acquire_wake_lock(tag, timeout)?;
        debug!(tag, ?timeout, "wake lock acquired");
        Ok(Self {
            lock: Arc::new(Mutex::new(Some(lock))),
        })
    }

    pub fn is_held(&self) -> bool {
        self.lock.lock().as_ref().is_some_and(|lock| lock.is_held())
    }

    /// Returns true only for the call that actually dropped the lock.
    pub fn release(&self) -> bool {
        let taken = self.lock.lock().take();
        match taken {
            Some(lock) if lock.is_held() => {
                lock.release();
                debug!("wake lock released");
                true
            }
            Some(_) => {
                debug!("wake lock already expired");
                false
            }
            None => false,
        }
    }

    /// Posts a release on `executor` after `delay`.
    pub fn release_after(&self, executor: &dyn DeferredExecutor, delay: Duration) {
        let guard = self.clone();
        executor.post_delayed(
            delay,
            Box::new(move || {
                guard.release();
            }),
        );
    }
}
