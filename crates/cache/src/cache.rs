//! The tenant-scoped cache: get/set/delete, fresh/SWR classification,
//! and single-flight-backed fill-on-miss.

use crate::entry::{classify, CacheState, EntryMeta, StoredEntry};
use crate::flight::FlightRegistry;
use crate::keys::ensure_scoped;
use crate::ttl::TtlIndex;
use dashmap::DashMap;
use meridian_core::{Error, Result, ShardId, TenantId, Timestamp};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

/// Tenant-scoped key/value cache with fresh/SWR windows and
/// single-flight fill deduplication (spec component B).
#[derive(Default)]
pub struct Cache {
    entries: DashMap<String, StoredEntry>,
    ttl_index: Mutex<TtlIndex>,
    flights: FlightRegistry,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write an entry. `key` is auto-scoped to `tenant_id` if not
    /// already. The TTL index is updated so the entry is found by the
    /// next expiry sweep.
    pub fn set<T: Serialize>(
        &self,
        tenant_id: &TenantId,
        key: &str,
        value: &T,
        version: u64,
        ttl_ms: u64,
        swr_ms: u64,
        shard_id: ShardId,
        now: Timestamp,
    ) -> Result<()> {
        let key = ensure_scoped(tenant_id, key);
        let data = serde_json::to_vec(value)?;
        // fresh_until <= swr_until must hold even if the caller passes
        // swr_ms < ttl_ms; widen swr accordingly.
        let meta = EntryMeta {
            version,
            fresh_until: now + ttl_ms,
            swr_until: now + ttl_ms.max(swr_ms),
            shard_id,
        };

        if let Some(old) = self.entries.get(&key) {
            self.ttl_index.lock().remove(old.meta.swr_until, &key);
        }
        self.ttl_index.lock().insert(meta.swr_until, key.clone());
        self.entries.insert(key, StoredEntry { data, meta });
        Ok(())
    }

    /// Read an entry. Returns `None` on miss, on an `Expired` entry
    /// (treated identically to a miss), or on decode failure (the
    /// entry is evicted and a warning logged naming only the key, not
    /// the payload).
    pub fn get<T: DeserializeOwned>(
        &self,
        tenant_id: &TenantId,
        key: &str,
        now: Timestamp,
    ) -> Option<(T, EntryMeta)> {
        let key = ensure_scoped(tenant_id, key);
        let stored = self.entries.get(&key)?;
        let state = classify(&stored.meta, now);
        if state == CacheState::Expired {
            drop(stored);
            self.delete_scoped(&key);
            return None;
        }
        match serde_json::from_slice::<T>(&stored.data) {
            Ok(value) => Some((value, stored.meta.clone())),
            Err(e) => {
                warn!(key = %key, error = %e, "cache decode error, evicting");
                drop(stored);
                self.delete_scoped(&key);
                None
            }
        }
    }

    /// State classification for an entry without decoding its payload.
    pub fn state(&self, tenant_id: &TenantId, key: &str, now: Timestamp) -> Option<CacheState> {
        let key = ensure_scoped(tenant_id, key);
        self.entries.get(&key).map(|e| classify(&e.meta, now))
    }

    pub fn delete(&self, tenant_id: &TenantId, key: &str) {
        let key = ensure_scoped(tenant_id, key);
        self.delete_scoped(&key);
    }

    fn delete_scoped(&self, key: &str) {
        if let Some((_, entry)) = self.entries.remove(key) {
            self.ttl_index.lock().remove(entry.meta.swr_until, key);
        }
    }

    /// Delete one key unless the entry currently stored under it was
    /// populated at a version newer than `event_version` — an
    /// out-of-order invalidation must not blow away a fresher populate
    /// (§5 Ordering guarantees, §9 "versioned optimistic populate").
    /// Returns whether the delete happened.
    pub fn delete_if_not_newer(&self, tenant_id: &TenantId, key: &str, event_version: u64) -> bool {
        let key = ensure_scoped(tenant_id, key);
        self.delete_if_not_newer_scoped(&key, event_version)
    }

    /// Delete every key (tenant-scoped) starting with `prefix`.
    pub fn delete_by_pattern(&self, tenant_id: &TenantId, prefix: &str) {
        let scoped_prefix = ensure_scoped(tenant_id, prefix);
        self.delete_by_pattern_scoped(&scoped_prefix);
    }

    /// Pattern-scoped counterpart to [`Self::delete_if_not_newer`]:
    /// each matching entry is evaluated against `event_version`
    /// individually, so a prefix purge never discards an entry fresher
    /// than the event that triggered it.
    pub fn delete_by_pattern_if_not_newer(&self, tenant_id: &TenantId, prefix: &str, event_version: u64) {
        let scoped_prefix = ensure_scoped(tenant_id, prefix);
        self.delete_by_pattern_if_not_newer_scoped(&scoped_prefix, event_version);
    }

    /// Raw counterpart of [`Self::delete_if_not_newer`] for callers that
    /// already hold a fully tenant-scoped key (e.g. a shard's change
    /// events, which embed the mutation's own tenant in the key/prefix
    /// rather than any one fixed tenant). Must NOT be run back through
    /// [`ensure_scoped`] with an unrelated tenant — doing so would
    /// double-prefix the key and silently no-op the delete.
    pub fn delete_if_not_newer_scoped(&self, scoped_key: &str, event_version: u64) -> bool {
        if let Some(entry) = self.entries.get(scoped_key) {
            if entry.meta.version > event_version {
                return false;
            }
        }
        self.delete_scoped(scoped_key);
        true
    }

    /// Raw counterpart of [`Self::delete_by_pattern`] for an
    /// already-scoped prefix.
    pub fn delete_by_pattern_scoped(&self, scoped_prefix: &str) {
        let to_delete: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(scoped_prefix))
            .collect();
        for key in to_delete {
            self.delete_scoped(&key);
        }
    }

    /// Raw counterpart of [`Self::delete_by_pattern_if_not_newer`] for
    /// an already-scoped prefix.
    pub fn delete_by_pattern_if_not_newer_scoped(&self, scoped_prefix: &str, event_version: u64) {
        let to_delete: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(scoped_prefix) && e.value().meta.version <= event_version)
            .map(|e| e.key().clone())
            .collect();
        for key in to_delete {
            self.delete_scoped(&key);
        }
    }

    /// Raw counterpart of [`Self::set`] for an already tenant-scoped key.
    pub fn set_scoped<T: Serialize>(
        &self,
        scoped_key: &str,
        value: &T,
        version: u64,
        ttl_ms: u64,
        swr_ms: u64,
        shard_id: ShardId,
        now: Timestamp,
    ) -> Result<()> {
        let data = serde_json::to_vec(value)?;
        let meta = EntryMeta {
            version,
            fresh_until: now + ttl_ms,
            swr_until: now + ttl_ms.max(swr_ms),
            shard_id,
        };
        if let Some(old) = self.entries.get(scoped_key) {
            self.ttl_index.lock().remove(old.meta.swr_until, scoped_key);
        }
        self.ttl_index.lock().insert(meta.swr_until, scoped_key.to_string());
        self.entries.insert(scoped_key.to_string(), StoredEntry { data, meta });
        Ok(())
    }

    /// Remove every entry whose SWR window has passed as of `now`.
    /// Returns the number of entries removed.
    pub fn sweep_expired(&self, now: Timestamp) -> usize {
        let expired_keys = self.ttl_index.lock().find_expired(now);
        for key in &expired_keys {
            self.entries.remove(key);
        }
        self.ttl_index.lock().remove_expired(now)
    }

    /// Read-through with single-flight deduplication: on a cache hit
    /// (fresh or stale-revalidatable), returns the cached value and
    /// `true`. On a miss, at most one caller per `(tenant, key)` runs
    /// `fill`; all concurrent callers receive its result, and the
    /// result is populated into the cache before returning, reported
    /// as `false` (not from cache).
    pub fn get_or_fill<T: Serialize + DeserializeOwned + Clone>(
        &self,
        tenant_id: &TenantId,
        key: &str,
        version: u64,
        ttl_ms: u64,
        swr_ms: u64,
        shard_id: ShardId,
        now: Timestamp,
        fill: impl FnOnce() -> Result<T>,
    ) -> Result<(T, bool)> {
        if let Some((value, _meta)) = self.get::<T>(tenant_id, key, now) {
            return Ok((value, true));
        }

        let scoped_key = ensure_scoped(tenant_id, key);
        let fill_result = self.flights.run(tenant_id, &scoped_key, || {
            fill()
                .and_then(|v| serde_json::to_vec(&v).map(|bytes| (v, bytes)).map_err(Error::from))
                .map(|(_, bytes)| bytes)
                .map_err(|e| e.to_string())
        });

        match fill_result {
            Ok(bytes) => {
                let value: T = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::cache_decode_error(scoped_key.clone(), e.to_string()))?;
                self.set(tenant_id, key, &value, version, ttl_ms, swr_ms, shard_id, now)?;
                Ok((value, false))
            }
            Err(message) => Err(Error::NotFound(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hot_read_returns_from_cache_within_fresh_window() {
        let cache = Cache::new();
        let tenant = TenantId::from("t1");
        let t0 = Timestamp::from_millis(0);
        cache
            .set(&tenant, "t:users:id:7", &"Ada".to_string(), 3, 30_000, 120_000, ShardId::from("shard_0"), t0)
            .unwrap();

        let (value, meta) = cache
            .get::<String>(&tenant, "t:users:id:7", t0 + 10_000)
            .unwrap();
        assert_eq!(value, "Ada");
        assert_eq!(meta.version, 3);
    }

    #[test]
    fn expired_entry_is_treated_as_miss() {
        let cache = Cache::new();
        let tenant = TenantId::from("t1");
        let t0 = Timestamp::from_millis(0);
        cache
            .set(&tenant, "k", &1i64, 1, 10, 20, ShardId::from("shard_0"), t0)
            .unwrap();
        assert!(cache.get::<i64>(&tenant, "k", t0 + 20).is_none());
    }

    #[test]
    fn delete_by_pattern_removes_matching_keys_only() {
        let cache = Cache::new();
        let tenant = TenantId::from("t1");
        let t0 = Timestamp::from_millis(0);
        cache.set(&tenant, "t:users:id:1", &1i64, 1, 1_000, 1_000, ShardId::from("s"), t0).unwrap();
        cache.set(&tenant, "t:orders:id:1", &1i64, 1, 1_000, 1_000, ShardId::from("s"), t0).unwrap();

        cache.delete_by_pattern(&tenant, "t:users:");
        assert!(cache.get::<i64>(&tenant, "t:users:id:1", t0).is_none());
        assert!(cache.get::<i64>(&tenant, "t:orders:id:1", t0).is_some());
    }

    #[test]
    fn delete_if_not_newer_skips_when_entry_is_fresher() {
        let cache = Cache::new();
        let tenant = TenantId::from("t1");
        let t0 = Timestamp::from_millis(0);
        cache.set(&tenant, "k", &1i64, 5, 1_000, 2_000, ShardId::from("s"), t0).unwrap();

        // a late invalidation carrying an older version must not evict
        let deleted = cache.delete_if_not_newer(&tenant, "k", 3);
        assert!(!deleted);
        assert!(cache.get::<i64>(&tenant, "k", t0).is_some());

        // an invalidation at or after the entry's version does evict
        let deleted = cache.delete_if_not_newer(&tenant, "k", 5);
        assert!(deleted);
        assert!(cache.get::<i64>(&tenant, "k", t0).is_none());
    }

    #[test]
    fn delete_by_pattern_if_not_newer_only_purges_stale_entries() {
        let cache = Cache::new();
        let tenant = TenantId::from("t1");
        let t0 = Timestamp::from_millis(0);
        cache.set(&tenant, "t:users:id:1", &1i64, 2, 1_000, 1_000, ShardId::from("s"), t0).unwrap();
        cache.set(&tenant, "t:users:id:2", &1i64, 9, 1_000, 1_000, ShardId::from("s"), t0).unwrap();

        cache.delete_by_pattern_if_not_newer(&tenant, "t:users:", 5);
        assert!(cache.get::<i64>(&tenant, "t:users:id:1", t0).is_none());
        assert!(cache.get::<i64>(&tenant, "t:users:id:2", t0).is_some());
    }

    #[test]
    fn get_or_fill_calls_filler_once_on_miss() {
        let cache = Cache::new();
        let tenant = TenantId::from("t1");
        let t0 = Timestamp::from_millis(0);
        let (value, from_cache) = cache
            .get_or_fill(&tenant, "k", 1, 1_000, 2_000, ShardId::from("s"), t0, || Ok(42i64))
            .unwrap();
        assert_eq!(value, 42);
        assert!(!from_cache);

        let (value2, from_cache2) = cache
            .get_or_fill(&tenant, "k", 1, 1_000, 2_000, ShardId::from("s"), t0, || {
                panic!("must not be called on a hit")
            })
            .unwrap();
        assert_eq!(value2, 42);
        assert!(from_cache2);
    }
}
