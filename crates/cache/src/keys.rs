//! The three cache key families: entity, index, and query keys, all
//! tenant-scoped with a `"<tenant_id>:"` prefix.

use meridian_core::{TenantId, Value};
use sha2::{Digest, Sha256};

fn scope(tenant_id: &TenantId, rest: &str) -> String {
    format!("{}:{}", tenant_id.as_str(), rest)
}

/// `t:<table>:<pk_column>:<value>`
pub fn entity_key(tenant_id: &TenantId, table: &str, pk_column: &str, pk_value: &str) -> String {
    scope(tenant_id, &format!("t:{table}:{pk_column}:{pk_value}"))
}

/// `idx:<table>:<column>:<value>`
pub fn index_key(tenant_id: &TenantId, table: &str, column: &str, value: &str) -> String {
    scope(tenant_id, &format!("idx:{table}:{column}:{value}"))
}

/// `q:<table>:<hex_sha256(sql|params)>`
pub fn query_key(tenant_id: &TenantId, table: &str, sql: &str, params: &[Value]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    for p in params {
        hasher.update(b"|");
        hasher.update(p.to_string().as_bytes());
    }
    let digest = hasher.finalize();
    let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    scope(tenant_id, &format!("q:{table}:{hex}"))
}

/// Ensures a key not already tenant-scoped gets the `"<tenant_id>:"`
/// prefix applied, for callers building keys ad hoc rather than via
/// the family constructors above.
pub fn ensure_scoped(tenant_id: &TenantId, key: &str) -> String {
    let prefix = format!("{}:", tenant_id.as_str());
    if key.starts_with(&prefix) {
        key.to_string()
    } else {
        format!("{prefix}{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_key_shape() {
        let t = TenantId::from("t1");
        assert_eq!(entity_key(&t, "users", "id", "7"), "t1:t:users:id:7");
    }

    #[test]
    fn query_key_is_deterministic() {
        let t = TenantId::from("t1");
        let k1 = query_key(&t, "users", "SELECT * FROM users WHERE id = ?", &[Value::Int(7)]);
        let k2 = query_key(&t, "users", "SELECT * FROM users WHERE id = ?", &[Value::Int(7)]);
        assert_eq!(k1, k2);
        let k3 = query_key(&t, "users", "SELECT * FROM users WHERE id = ?", &[Value::Int(8)]);
        assert_ne!(k1, k3);
    }

    #[test]
    fn ensure_scoped_does_not_double_prefix() {
        let t = TenantId::from("t1");
        let once = ensure_scoped(&t, "raw_key");
        let twice = ensure_scoped(&t, &once);
        assert_eq!(once, twice);
    }
}
