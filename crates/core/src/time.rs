//! Millisecond-resolution timestamps used for cache windows, event
//! ordering, and session TTLs.

use serde::{Deserialize, Serialize};
use std::ops::Add;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Construct from a raw millisecond count.
    pub fn from_millis(ms: u64) -> Self {
        Timestamp(ms)
    }

    /// Current wall-clock time. Not used inside pure resolution logic,
    /// which always takes `now` as a parameter so it stays testable.
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as u64;
        Timestamp(ms)
    }

    /// Milliseconds elapsed between `self` and a later timestamp, or 0
    /// if `other` is not later than `self`.
    pub fn elapsed_until(&self, other: Timestamp) -> u64 {
        other.0.saturating_sub(self.0)
    }

    /// Raw millisecond value.
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: u64) -> Timestamp {
        Timestamp(self.0 + rhs)
    }
}
