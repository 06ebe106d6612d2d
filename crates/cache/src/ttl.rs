//! TTL index for efficient expiration sweeps.
//!
//! Maps `swr_until -> Set<key>` using a `BTreeMap` for sorted order, so
//! a sweep can find all expired keys in `O(expired count)` instead of
//! scanning every live entry.

use meridian_core::Timestamp;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Default)]
pub struct TtlIndex {
    index: BTreeMap<Timestamp, HashSet<String>>,
}

impl TtlIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key` expires (passes its SWR window) at
    /// `expiry`.
    pub fn insert(&mut self, expiry: Timestamp, key: String) {
        self.index.entry(expiry).or_default().insert(key);
    }

    /// Remove `key` from the index at `expiry`, e.g. because it was
    /// deleted or overwritten with a new expiry.
    pub fn remove(&mut self, expiry: Timestamp, key: &str) {
        if let Some(keys) = self.index.get_mut(&expiry) {
            keys.remove(key);
            if keys.is_empty() {
                self.index.remove(&expiry);
            }
        }
    }

    /// All keys expired at or before `now`.
    pub fn find_expired(&self, now: Timestamp) -> Vec<String> {
        self.index
            .range(..=now)
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect()
    }

    /// Remove and return the count of all index entries expired at or
    /// before `now`.
    pub fn remove_expired(&mut self, now: Timestamp) -> usize {
        let expired_ts: Vec<Timestamp> = self.index.range(..=now).map(|(ts, _)| *ts).collect();
        let mut count = 0;
        for ts in expired_ts {
            if let Some(keys) = self.index.remove(&ts) {
                count += keys.len();
            }
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_expired_only_returns_past_entries() {
        let mut idx = TtlIndex::new();
        idx.insert(Timestamp::from_millis(500), "a".into());
        idx.insert(Timestamp::from_millis(1_500), "b".into());

        let expired = idx.find_expired(Timestamp::from_millis(1_000));
        assert_eq!(expired, vec!["a".to_string()]);
    }

    #[test]
    fn remove_expired_clears_entries() {
        let mut idx = TtlIndex::new();
        idx.insert(Timestamp::from_millis(500), "a".into());
        idx.insert(Timestamp::from_millis(500), "b".into());
        let removed = idx.remove_expired(Timestamp::from_millis(1_000));
        assert_eq!(removed, 2);
        assert!(idx.is_empty());
    }
}
