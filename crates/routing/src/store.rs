//! The routing policy store: versioned publish/rollback/diff over the
//! pure [`Policy`] type, backed by a pluggable key/value storage trait
//! so tests and production share one interface.

use crate::policy::{diff as policy_diff, Policy, PolicyDiff};
use meridian_core::{Error, Result, ShardId, Timestamp};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Storage contract the routing store persists through. An in-memory
/// implementation backs tests; a durable implementation (e.g. the
/// shard's own embedded store, or a separate key/value file) backs
/// production, without the routing logic above knowing which.
pub trait PolicyStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn put(&self, key: &str, value: Vec<u8>);
}

/// Simple in-memory [`PolicyStorage`], used by tests and as the
/// default when no durable backing is configured.
#[derive(Default)]
pub struct InMemoryPolicyStorage {
    inner: RwLock<HashMap<String, Vec<u8>>>,
}

impl PolicyStorage for InMemoryPolicyStorage {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.read().get(key).cloned()
    }

    fn put(&self, key: &str, value: Vec<u8>) {
        self.inner.write().insert(key.to_string(), value);
    }
}

fn policy_key(version: u64) -> String {
    format!("routing:policy:v{version}")
}

fn history_key(version: u64) -> String {
    format!("routing:history:v{version}")
}

/// The versioned routing policy store (spec component A).
pub struct RoutingStore {
    storage: Arc<dyn PolicyStorage>,
    current_version: AtomicU64,
    known_shards: RwLock<HashSet<ShardId>>,
}

impl RoutingStore {
    /// Create a store with no published policy yet (`current_version`
    /// starts at 0; the first `publish` produces version 1) and a
    /// known shard universe that `publish` validates against.
    pub fn new(storage: Arc<dyn PolicyStorage>, known_shards: HashSet<ShardId>) -> Self {
        let current_version = storage
            .get("routing:current_version")
            .and_then(|b| serde_json::from_slice::<u64>(&b).ok())
            .unwrap_or(0);
        RoutingStore {
            storage,
            current_version: AtomicU64::new(current_version),
            known_shards: RwLock::new(known_shards),
        }
    }

    /// Register an additional shard as valid for future `publish`
    /// validation (e.g. once a split orchestrator creates a new target
    /// shard).
    pub fn register_shard(&self, shard: ShardId) {
        self.known_shards.write().insert(shard);
    }

    pub fn current_version(&self) -> u64 {
        self.current_version.load(Ordering::SeqCst)
    }

    /// Fetch an immutable, previously published policy by version.
    pub fn get(&self, version: u64) -> Option<Policy> {
        self.storage
            .get(&policy_key(version))
            .and_then(|b| serde_json::from_slice(&b).ok())
    }

    /// Fetch the currently active policy, if any has been published.
    pub fn current(&self) -> Option<Policy> {
        self.get(self.current_version())
    }

    /// Publish a new policy version. Validates every referenced shard
    /// against the known shard universe before assigning
    /// `version = current + 1`, persisting, then flipping the
    /// current-version pointer — the pointer flip is the cutover
    /// point; reads that raced ahead of this call still see the prior
    /// version.
    pub fn publish(
        &self,
        tenants: HashMap<meridian_core::TenantId, ShardId>,
        ranges: Vec<(String, ShardId)>,
        description: impl Into<String>,
        now: Timestamp,
    ) -> Result<u64> {
        let description = description.into();
        let candidate = Policy {
            version: 0, // assigned below
            description: description.clone(),
            created_at: now,
            tenants: tenants.into_iter().collect(),
            ranges,
        };

        let known = self.known_shards.read();
        for shard in candidate.referenced_shards() {
            if !known.contains(&shard) {
                warn!(shard = %shard, "rejected routing policy: unknown shard reference");
                return Err(Error::ConfigInvalid(format!(
                    "policy references unknown shard {shard}"
                )));
            }
        }
        drop(known);

        let new_version = self.current_version() + 1;
        let policy = Policy {
            version: new_version,
            ..candidate
        };
        let encoded = serde_json::to_vec(&policy)?;
        self.storage.put(&policy_key(new_version), encoded.clone());
        self.storage.put(&history_key(new_version), encoded);
        self.storage
            .put("routing:current_version", serde_json::to_vec(&new_version)?);
        self.current_version.store(new_version, Ordering::SeqCst);

        info!(
            from_version = new_version.saturating_sub(1),
            to_version = new_version,
            description = %description,
            "published routing policy"
        );
        Ok(new_version)
    }

    /// Flip the current-version pointer back to a previously published
    /// version. Newer versions are retained, not deleted, so a later
    /// re-publish or re-rollback can still reach them.
    pub fn rollback(&self, to_version: u64) -> Result<()> {
        if self.get(to_version).is_none() {
            return Err(Error::NotFound(format!(
                "routing policy version {to_version} does not exist"
            )));
        }
        let from_version = self.current_version();
        self.storage
            .put("routing:current_version", serde_json::to_vec(&to_version)?);
        self.current_version.store(to_version, Ordering::SeqCst);
        info!(from_version, to_version, "rolled back routing policy");
        Ok(())
    }

    /// Compute the diff between two published versions.
    pub fn diff(&self, from: u64, to: u64) -> Result<PolicyDiff> {
        let from_policy = self
            .get(from)
            .ok_or_else(|| Error::NotFound(format!("routing policy version {from} does not exist")))?;
        let to_policy = self
            .get(to)
            .ok_or_else(|| Error::NotFound(format!("routing policy version {to} does not exist")))?;
        Ok(policy_diff(&from_policy, &to_policy))
    }

    /// Resolve a routing key against the current policy.
    pub fn resolve(&self, key: &str, tenant_id: Option<&meridian_core::TenantId>) -> Result<ShardId> {
        let policy = self
            .current()
            .ok_or_else(|| Error::NotFound("no routing policy has been published".into()))?;
        Ok(policy.resolve(key, tenant_id))
    }
}
