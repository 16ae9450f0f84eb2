//! Deterministic adapters for tests and simulations.
//!
//! The clock is shared through an `Arc` so a test can advance time while a
//! [`ServiceContext`](crate::context::ServiceContext) holds its own handle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::ports::notifier::{Notification, Notifier, NotifyFuture};
use crate::ports::{Clock, IdGenerator};

/// A clock that only moves when told to.
#[derive(Clone)]
pub struct FixedClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    /// Creates a clock pinned at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(now)) }
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|guard| *guard).unwrap_or_default()
    }
}

/// Produces `kind-1`, `kind-2`, ... and `token-1`, `token-2`, ...
#[derive(Default)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    /// Creates a generator starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn generate_id(&self, kind: &str) -> String {
        format!("{kind}-{}", self.bump())
    }

    fn generate_token(&self) -> String {
        format!("token-{}", self.bump())
    }
}

/// Records every notification and optionally fails on demand.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    /// Creates a notifier that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent sends fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Notifications accepted so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|guard| guard.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, notification: &Notification) -> NotifyFuture<'_> {
        let notification = notification.clone();
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err("notifier unavailable".into());
            }
            let mut sent = self.sent.lock().map_err(|e| e.to_string())?;
            sent.push(notification);
            Ok(format!("delivery-{}", sent.len()))
        })
    }
}
