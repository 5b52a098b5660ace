use chrono::{DateTime, Utc};

/// Time source for every duration comparison in the memory subsystem.
/// Injected so session-expiry and formatting logic is testable against a
/// pinned instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
