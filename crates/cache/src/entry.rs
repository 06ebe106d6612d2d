//! Cache entry metadata and the pure fresh/stale-revalidatable/expired
//! classification.

use meridian_core::{ShardId, Timestamp};
use serde::{Deserialize, Serialize};

/// Metadata attached to every cache entry, independent of its decoded
/// payload type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// The shard's monotonic write version at populate time.
    pub version: u64,
    pub fresh_until: Timestamp,
    pub swr_until: Timestamp,
    pub shard_id: ShardId,
}

/// An entry as actually stored: opaque serialized payload plus
/// metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub data: Vec<u8>,
    pub meta: EntryMeta,
}

/// The three lifecycle states of a cache entry relative to `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// `now < fresh_until`: authoritative.
    Fresh,
    /// `fresh_until <= now < swr_until`: usable but should trigger a
    /// background refresh.
    StaleRevalidatable,
    /// `now >= swr_until`: must not be returned; treat as a miss.
    Expired,
}

/// Classify an entry's state relative to `now`. Pure function over the
/// entry so it's trivially testable without a live cache.
pub fn classify(meta: &EntryMeta, now: Timestamp) -> CacheState {
    if now < meta.fresh_until {
        CacheState::Fresh
    } else if now < meta.swr_until {
        CacheState::StaleRevalidatable
    } else {
        CacheState::Expired
    }
}

/// Per-query consistency mode, resolved per the precedence in
/// `meridian-gateway`: explicit hint > table policy default > server
/// default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyMode {
    /// Always read the authoritative shard; never consult the cache.
    Strong,
    /// Return fresh or stale-revalidatable entries; read through on
    /// expiry.
    Bounded,
    /// Return any non-expired entry without blocking; refresh async.
    Cached,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(fresh_until: u64, swr_until: u64) -> EntryMeta {
        EntryMeta {
            version: 1,
            fresh_until: Timestamp::from_millis(fresh_until),
            swr_until: Timestamp::from_millis(swr_until),
            shard_id: ShardId::from("shard_0"),
        }
    }

    #[test]
    fn classify_boundaries() {
        let m = meta(1_000, 2_000);
        assert_eq!(classify(&m, Timestamp::from_millis(999)), CacheState::Fresh);
        assert_eq!(
            classify(&m, Timestamp::from_millis(1_000)),
            CacheState::StaleRevalidatable
        );
        assert_eq!(
            classify(&m, Timestamp::from_millis(1_999)),
            CacheState::StaleRevalidatable
        );
        assert_eq!(classify(&m, Timestamp::from_millis(2_000)), CacheState::Expired);
    }
}
