use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// Time source for event timestamps.
///
/// The hub never calls `Utc::now()` directly; it goes through this trait so
/// tests can pin time and assert exact event values.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Default clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a settable instant, for deterministic tests.
#[derive(Debug)]
pub struct FixedClock {
    time: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: Mutex::new(time),
        }
    }

    /// Moves the frozen instant.
    pub fn set(&self, time: DateTime<Utc>) {
        let mut guard = self.time.lock().unwrap_or_else(|e| e.into_inner());
        *guard = time;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.lock().unwrap_or_else(|e| e.into_inner())
    }
}
