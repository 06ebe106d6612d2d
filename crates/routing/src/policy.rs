//! The routing policy type and its pure diff/resolve operations.

use meridian_core::{ShardId, TenantId, Timestamp};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// One immutable, versioned tenant/range -> shard mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub version: u64,
    pub description: String,
    pub created_at: Timestamp,
    pub tenants: FxHashMap<TenantId, ShardId>,
    /// Ordered `(prefix, shard)` pairs; first match wins. Order is
    /// significant and preserved exactly as supplied to `publish`.
    pub ranges: Vec<(String, ShardId)>,
}

impl Policy {
    /// Resolve a routing key to a shard: exact tenant match first, then
    /// the first matching range prefix in order, else a stable hash
    /// fallback over the full set of shards referenced by this policy
    /// (the "default range").
    pub fn resolve(&self, key: &str, tenant_id: Option<&TenantId>) -> ShardId {
        if let Some(tenant_id) = tenant_id {
            if let Some(shard) = self.tenants.get(tenant_id) {
                return shard.clone();
            }
        }
        for (prefix, shard) in &self.ranges {
            if key.starts_with(prefix.as_str()) {
                return shard.clone();
            }
        }
        self.default_range_shard(key)
    }

    fn default_range_shard(&self, key: &str) -> ShardId {
        let mut universe: Vec<&ShardId> = self
            .tenants
            .values()
            .chain(self.ranges.iter().map(|(_, s)| s))
            .collect();
        universe.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        universe.dedup();
        if universe.is_empty() {
            return ShardId::from("shard_0");
        }
        let mut hasher = rustc_hash::FxHasher::default();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % universe.len();
        universe[idx].clone()
    }

    /// All shard ids this policy references, across tenants and ranges.
    pub fn referenced_shards(&self) -> std::collections::HashSet<ShardId> {
        self.tenants
            .values()
            .cloned()
            .chain(self.ranges.iter().map(|(_, s)| s.clone()))
            .collect()
    }
}

/// Result of comparing two policy versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PolicyDiff {
    pub added_tenants: Vec<TenantId>,
    pub removed_tenants: Vec<TenantId>,
    pub changed_tenants: Vec<TenantId>,
    pub added_ranges: Vec<(String, ShardId)>,
    pub removed_ranges: Vec<(String, ShardId)>,
}

/// Pure diff between two policies; does not touch any store state.
pub fn diff(from: &Policy, to: &Policy) -> PolicyDiff {
    let mut d = PolicyDiff::default();

    for (tenant, shard) in &to.tenants {
        match from.tenants.get(tenant) {
            None => d.added_tenants.push(tenant.clone()),
            Some(old_shard) if old_shard != shard => d.changed_tenants.push(tenant.clone()),
            _ => {}
        }
    }
    for tenant in from.tenants.keys() {
        if !to.tenants.contains_key(tenant) {
            d.removed_tenants.push(tenant.clone());
        }
    }

    let from_ranges: std::collections::HashSet<_> = from.ranges.iter().cloned().collect();
    let to_ranges: std::collections::HashSet<_> = to.ranges.iter().cloned().collect();
    d.added_ranges = to_ranges.difference(&from_ranges).cloned().collect();
    d.removed_ranges = from_ranges.difference(&to_ranges).cloned().collect();

    d.added_tenants.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    d.removed_tenants.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    d.changed_tenants.sort_by(|a, b| a.as_str().cmp(b.as_str()));

    d
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(version: u64, tenants: &[(&str, &str)], ranges: &[(&str, &str)]) -> Policy {
        Policy {
            version,
            description: "test".into(),
            created_at: Timestamp::from_millis(0),
            tenants: tenants
                .iter()
                .map(|(t, s)| (TenantId::from(*t), ShardId::from(*s)))
                .collect(),
            ranges: ranges
                .iter()
                .map(|(p, s)| (p.to_string(), ShardId::from(*s)))
                .collect(),
        }
    }

    #[test]
    fn resolve_prefers_tenant_exact_match() {
        let p = policy(1, &[("alpha", "shard_a")], &[("al", "shard_b")]);
        let tenant = TenantId::from("alpha");
        assert_eq!(p.resolve("alpha", Some(&tenant)), ShardId::from("shard_a"));
    }

    #[test]
    fn resolve_falls_back_to_first_matching_range() {
        let p = policy(1, &[], &[("al", "shard_b"), ("alp", "shard_c")]);
        assert_eq!(p.resolve("alpha", None), ShardId::from("shard_b"));
    }

    #[test]
    fn resolve_is_stable_for_unmapped_key() {
        let p = policy(1, &[("alpha", "shard_a"), ("beta", "shard_b")], &[]);
        let first = p.resolve("gamma", None);
        let second = p.resolve("gamma", None);
        assert_eq!(first, second);
    }

    #[test]
    fn diff_detects_added_removed_and_changed_tenants() {
        let from = policy(1, &[("alpha", "shard_a"), ("beta", "shard_b")], &[]);
        let to = policy(2, &[("alpha", "shard_c"), ("gamma", "shard_d")], &[]);
        let d = diff(&from, &to);
        assert_eq!(d.changed_tenants, vec![TenantId::from("alpha")]);
        assert_eq!(d.removed_tenants, vec![TenantId::from("beta")]);
        assert_eq!(d.added_tenants, vec![TenantId::from("gamma")]);
    }

    #[test]
    fn diff_is_empty_for_identical_policies() {
        let p = policy(1, &[("alpha", "shard_a")], &[("a", "shard_a")]);
        let d = diff(&p, &p);
        assert_eq!(d, PolicyDiff::default());
    }
}
