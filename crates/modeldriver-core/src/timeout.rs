//! Keyed deadline scopes.
//!
//! A [`TimeoutContext`] tracks at most one open deadline per key. Waits that
//! must not disturb each other (waiting for the model to exit, waiting for a
//! kill to settle) open their scopes at different keys.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Key used while waiting for the model to exit on its own
pub const EXIT_WAIT_KEY: usize = 1;
/// Key used while waiting for a kill signal to take effect
pub const KILL_WAIT_KEY: usize = 2;

#[derive(Debug, Clone, Copy)]
struct Deadline {
    id: u64,
    expires: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct TimeoutContext {
    scopes: Mutex<HashMap<usize, Deadline>>,
    next_id: AtomicU64,
}

impl TimeoutContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a scope at `key` anchored now. `None` never expires.
    ///
    /// A scope already open at the same key is superseded; closing the older
    /// handle afterwards leaves the newer deadline in place.
    pub fn open(&self, key: usize, timeout: Option<Duration>) -> TimeoutScope<'_> {
        let anchored = Instant::now();
        let deadline = Deadline {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            expires: timeout.map(|t| anchored + t),
        };

        let previous = self.lock().insert(key, deadline);
        if previous.is_some() {
            tracing::debug!(key, "Timeout scope reopened before it was closed");
        }

        TimeoutScope {
            context: self,
            key,
            id: deadline.id,
            anchored,
            expires: deadline.expires,
            closed: false,
        }
    }

    /// Whether the scope currently open at `key` has passed its deadline.
    /// Returns false when nothing is open there.
    pub fn is_expired(&self, key: usize) -> bool {
        self.lock()
            .get(&key)
            .and_then(|d| d.expires)
            .is_some_and(|expires| Instant::now() >= expires)
    }

    pub fn is_open(&self, key: usize) -> bool {
        self.lock().contains_key(&key)
    }

    fn close(&self, key: usize, id: u64) {
        let mut scopes = self.lock();
        if scopes.get(&key).is_some_and(|d| d.id == id) {
            scopes.remove(&key);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<usize, Deadline>> {
        self.scopes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to one open deadline. Close it with [`TimeoutScope::close`];
/// dropping an unclosed scope closes it as well.
#[derive(Debug)]
pub struct TimeoutScope<'a> {
    context: &'a TimeoutContext,
    key: usize,
    id: u64,
    anchored: Instant,
    expires: Option<Instant>,
    closed: bool,
}

impl TimeoutScope<'_> {
    pub fn key(&self) -> usize {
        self.key
    }

    pub fn is_expired(&self) -> bool {
        self.expires.is_some_and(|expires| Instant::now() >= expires)
    }

    pub fn elapsed(&self) -> Duration {
        self.anchored.elapsed()
    }

    /// Time left before the deadline, `None` for an unbounded scope
    pub fn remaining(&self) -> Option<Duration> {
        self.expires
            .map(|expires| expires.saturating_duration_since(Instant::now()))
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.context.close(self.key, self.id);
        }
    }
}

impl Drop for TimeoutScope<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
