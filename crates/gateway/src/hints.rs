//! Consistency hint parsing: the structured `{consistency?, bounded_ms?,
//! shard_key?, cache_ttl_ms?}` object, and the inline
//! `/*+ strong */` / `/*+ bounded=NNN */` / `/*+ weak */` comment
//! grammar the gateway strips before the SQL reaches the shard (the
//! transpiler, out of scope, is not responsible for hint semantics).

use meridian_cache::ConsistencyMode;

/// A request's consistency/caching overrides, from either the
/// structured request field or a parsed inline comment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hints {
    pub consistency: Option<ConsistencyMode>,
    pub bounded_ms: Option<u64>,
    pub shard_key: Option<String>,
    pub cache_ttl_ms: Option<u64>,
}

/// Parse a leading `/*+ ... */` hint comment, if present, returning the
/// parsed hint and the SQL with the comment stripped. SQL without a
/// leading hint comment is returned unchanged with no hint.
pub fn parse_inline(sql: &str) -> (Hints, &str) {
    let trimmed = sql.trim_start();
    if !trimmed.starts_with("/*+") {
        return (Hints::default(), sql);
    }
    let Some(end) = trimmed.find("*/") else {
        return (Hints::default(), sql);
    };
    let body = trimmed[3..end].trim();
    let rest = trimmed[end + 2..].trim_start();

    let hints = if body == "strong" {
        Hints {
            consistency: Some(ConsistencyMode::Strong),
            ..Default::default()
        }
    } else if body == "weak" {
        Hints {
            consistency: Some(ConsistencyMode::Cached),
            ..Default::default()
        }
    } else if let Some(ms) = body.strip_prefix("bounded=").and_then(|s| s.parse().ok()) {
        Hints {
            consistency: Some(ConsistencyMode::Bounded),
            bounded_ms: Some(ms),
            ..Default::default()
        }
    } else {
        Hints::default()
    };
    (hints, rest)
}

/// Resolve the effective consistency mode: explicit request hint beats
/// the table's configured default, which beats the server default.
pub fn resolve_consistency(
    explicit: Option<ConsistencyMode>,
    table_default: Option<ConsistencyMode>,
    server_default: ConsistencyMode,
) -> ConsistencyMode {
    explicit.or(table_default).unwrap_or(server_default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strong_hint_and_strips_comment() {
        let (hints, rest) = parse_inline("/*+ strong */ SELECT * FROM users");
        assert_eq!(hints.consistency, Some(ConsistencyMode::Strong));
        assert_eq!(rest, "SELECT * FROM users");
    }

    #[test]
    fn parses_bounded_with_ms() {
        let (hints, rest) = parse_inline("/*+ bounded=500 */ SELECT 1");
        assert_eq!(hints.consistency, Some(ConsistencyMode::Bounded));
        assert_eq!(hints.bounded_ms, Some(500));
        assert_eq!(rest, "SELECT 1");
    }

    #[test]
    fn weak_maps_to_cached() {
        let (hints, _) = parse_inline("/*+ weak */ SELECT 1");
        assert_eq!(hints.consistency, Some(ConsistencyMode::Cached));
    }

    #[test]
    fn sql_without_hint_is_unchanged() {
        let (hints, rest) = parse_inline("SELECT 1");
        assert_eq!(hints, Hints::default());
        assert_eq!(rest, "SELECT 1");
    }

    #[test]
    fn precedence_explicit_beats_table_beats_server() {
        assert_eq!(
            resolve_consistency(Some(ConsistencyMode::Strong), Some(ConsistencyMode::Cached), ConsistencyMode::Bounded),
            ConsistencyMode::Strong
        );
        assert_eq!(
            resolve_consistency(None, Some(ConsistencyMode::Cached), ConsistencyMode::Bounded),
            ConsistencyMode::Cached
        );
        assert_eq!(resolve_consistency(None, None, ConsistencyMode::Bounded), ConsistencyMode::Bounded);
    }
}
