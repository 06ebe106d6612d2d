//! The event envelope and its type-specific payloads.

use meridian_core::{Error, Result, ShardId, Timestamp, Value};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One operation applied to the analytical replica as part of a
/// `d1_sync` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaOp {
    pub sql: String,
    pub params: Vec<Value>,
}

/// The type-specific payload of a [`DatabaseEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Delete listed keys and/or prefix-purge.
    Invalidate {
        keys: Vec<String>,
        #[serde(default)]
        prefixes: Vec<String>,
    },
    /// Populate listed keys with the attached payload.
    Prewarm { keys: Vec<String>, payload: Vec<u8> },
    /// Batch-apply mutations to the analytical replica.
    D1Sync { operations: Vec<ReplicaOp> },
}

impl EventKind {
    fn is_structurally_valid(&self) -> bool {
        match self {
            EventKind::Invalidate { keys, prefixes } => !keys.is_empty() || !prefixes.is_empty(),
            EventKind::Prewarm { keys, .. } => !keys.is_empty(),
            EventKind::D1Sync { operations } => !operations.is_empty(),
        }
    }
}

/// A single event carried through the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseEvent {
    pub msg_id: String,
    pub shard_id: ShardId,
    pub version: u64,
    pub timestamp_ms: Timestamp,
    pub kind: EventKind,
}

impl DatabaseEvent {
    /// Construct a new event with a freshly generated message id.
    pub fn new(shard_id: ShardId, version: u64, timestamp_ms: Timestamp, kind: EventKind) -> Self {
        DatabaseEvent {
            msg_id: Uuid::new_v4().to_string(),
            shard_id,
            version,
            timestamp_ms,
            kind,
        }
    }

    /// Structural validation applied before acceptance into the
    /// queue: known type (enforced by the enum itself), non-empty
    /// shard_id, and type-specific required fields present.
    pub fn validate(&self) -> Result<()> {
        if self.shard_id.as_str().is_empty() {
            return Err(Error::InvalidSql("event shard_id must not be empty".into()));
        }
        if !self.kind.is_structurally_valid() {
            return Err(Error::InvalidSql(format!(
                "event {} is missing required type-specific fields",
                self.msg_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalidate_with_no_keys_or_prefixes() {
        let event = DatabaseEvent::new(
            ShardId::from("shard_0"),
            1,
            Timestamp::from_millis(0),
            EventKind::Invalidate {
                keys: vec![],
                prefixes: vec![],
            },
        );
        assert!(event.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_invalidate() {
        let event = DatabaseEvent::new(
            ShardId::from("shard_0"),
            1,
            Timestamp::from_millis(0),
            EventKind::Invalidate {
                keys: vec!["t1:t:users:id:7".into()],
                prefixes: vec![],
            },
        );
        assert!(event.validate().is_ok());
    }
}
