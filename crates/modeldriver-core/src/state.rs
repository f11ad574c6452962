use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One-way flag: once set it stays set, and waiters are released.
#[derive(Debug, Clone, Default)]
pub struct Event {
    flag: Arc<AtomicBool>,
    released: CancellationToken,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.try_set();
    }

    /// Set the flag, returning true only for the caller that flipped it.
    pub fn try_set(&self) -> bool {
        let first = !self.flag.swap(true, Ordering::AcqRel);
        self.released.cancel();
        first
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        self.released.cancelled().await
    }

    /// Wait for the flag with an upper bound. Returns whether it was set.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

/// Set-once flags describing where a driver is in its lifecycle.
///
/// Every driver owns its own instance, shared with its background workers.
#[derive(Debug, Default)]
pub struct LifecycleState {
    pub started: Event,
    pub kill_called: Event,
    pub kill_complete: Event,
    pub exit_observed: Event,
}

impl LifecycleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark everything done for a driver that never spawned anything.
    pub fn mark_never_started(&self) {
        self.exit_observed.set();
        self.kill_called.set();
        self.kill_complete.set();
    }
}
