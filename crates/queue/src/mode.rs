//! Durability mode for the event queue's append log.
//!
//! Controls fsync behavior for the append-only record of enqueued
//! events, on the same three-way axis the shard runtime's WAL uses:
//! `Cache` (no persistence, tests only), `Always` (fsync every
//! append), `Standard` (periodic, bounded by time or batch size).

/// Durability mode for the queue's append log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// In-memory only — all unacknowledged events lost on crash.
    Cache,
    /// fsync after every `send`/`send_batch`.
    Always,
    /// fsync every N appends or every T milliseconds, whichever comes
    /// first.
    Standard {
        interval_ms: u64,
        batch_size: usize,
    },
}

impl DurabilityMode {
    pub fn requires_log(&self) -> bool {
        !matches!(self, DurabilityMode::Cache)
    }

    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, DurabilityMode::Always)
    }

    pub fn standard_default() -> Self {
        DurabilityMode::Standard {
            interval_ms: 100,
            batch_size: 1_000,
        }
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::standard_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_mode_skips_log() {
        assert!(!DurabilityMode::Cache.requires_log());
        assert!(DurabilityMode::Always.requires_log());
    }

    #[test]
    fn only_always_requires_immediate_fsync() {
        assert!(DurabilityMode::Always.requires_immediate_fsync());
        assert!(!DurabilityMode::standard_default().requires_immediate_fsync());
    }
}
