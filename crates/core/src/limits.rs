//! Shared size limits validated at every ingress point (gateway request
//! parsing, cache set, queue send) so limits live in one table instead
//! of scattered constants.

use serde::{Deserialize, Serialize};

/// Input size limits enforced across the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Maximum SQL text length, in bytes.
    pub max_sql_bytes: usize,
    /// Maximum number of bound parameters per statement.
    pub max_param_count: usize,
    /// Maximum size of a single blob parameter or column value.
    pub max_blob_bytes: usize,
    /// Maximum size of a cache key.
    pub max_cache_key_bytes: usize,
    /// Maximum size of a cache value.
    pub max_cache_value_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_sql_bytes: 1 << 20,       // 1 MiB
            max_param_count: 256,
            max_blob_bytes: 16 << 20,     // 16 MiB
            max_cache_key_bytes: 1 << 10, // 1 KiB
            max_cache_value_bytes: 4 << 20,
        }
    }
}

impl Limits {
    /// Check a SQL statement's text length against `max_sql_bytes`.
    pub fn check_sql_len(&self, sql: &str) -> bool {
        sql.len() <= self.max_sql_bytes
    }

    /// Check a parameter count against `max_param_count`.
    pub fn check_param_count(&self, count: usize) -> bool {
        count <= self.max_param_count
    }

    /// Check a cache key's length against `max_cache_key_bytes`.
    pub fn check_cache_key_len(&self, key: &str) -> bool {
        key.len() <= self.max_cache_key_bytes
    }

    /// Check a cache value's length against `max_cache_value_bytes`.
    pub fn check_cache_value_len(&self, len: usize) -> bool {
        len <= self.max_cache_value_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_accept_small_input() {
        let limits = Limits::default();
        assert!(limits.check_sql_len("SELECT 1"));
        assert!(limits.check_param_count(3));
    }

    #[test]
    fn rejects_oversized_key() {
        let limits = Limits::default();
        let key = "a".repeat(limits.max_cache_key_bytes + 1);
        assert!(!limits.check_cache_key_len(&key));
    }
}
