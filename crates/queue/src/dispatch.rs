//! Default handlers for the three built-in event kinds, and the
//! `ReplicaSink` seam the `d1_sync` handler calls through.

use crate::event::{DatabaseEvent, EventKind, ReplicaOp};
use meridian_core::{Error, Result};
use meridian_cache::Cache;
use std::sync::Arc;

/// The remote client the `d1_sync` handler applies batches through.
/// The network client itself is out of scope for this workspace; this
/// trait is the seam it plugs into, mirroring how the storage crate's
/// `Store` hides its backing engine behind a narrow contract.
pub trait ReplicaSink: Send + Sync {
    /// Apply a batch of operations; returns one success flag per
    /// operation, in order.
    fn apply_batch(&self, ops: &[ReplicaOp]) -> Result<Vec<bool>>;
}

/// In-memory `ReplicaSink` used by tests: records every batch it was
/// asked to apply so assertions can inspect them.
#[derive(Default)]
pub struct FakeReplica {
    applied: parking_lot::Mutex<Vec<Vec<ReplicaOp>>>,
}

impl FakeReplica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied_batches(&self) -> Vec<Vec<ReplicaOp>> {
        self.applied.lock().clone()
    }
}

impl ReplicaSink for FakeReplica {
    fn apply_batch(&self, ops: &[ReplicaOp]) -> Result<Vec<bool>> {
        self.applied.lock().push(ops.to_vec());
        Ok(vec![true; ops.len()])
    }
}

/// `ReplicaSink` that always reports failure, for exercising the
/// queue's retry/DLQ path in tests.
#[derive(Default)]
pub struct FailingReplica;

impl ReplicaSink for FailingReplica {
    fn apply_batch(&self, ops: &[ReplicaOp]) -> Result<Vec<bool>> {
        Ok(vec![false; ops.len()])
    }
}

/// Default production `ReplicaSink`: reports every batch applied
/// without forwarding it anywhere. Stands in for the real remote
/// client (out of scope for this workspace, see the trait docs above)
/// so a deployment with no replica wired still drains `d1_sync` events
/// instead of piling them up in the DLQ.
#[derive(Default)]
pub struct NoopReplicaSink;

impl ReplicaSink for NoopReplicaSink {
    fn apply_batch(&self, ops: &[ReplicaOp]) -> Result<Vec<bool>> {
        Ok(vec![true; ops.len()])
    }
}

/// Dispatches a validated [`DatabaseEvent`] to its default handler.
/// `invalidate` and `prewarm` act directly on the cache; `d1_sync`
/// forwards to a `ReplicaSink`.
///
/// A shard (and so a single dispatcher) serves many tenants (routing
/// maps many tenants to one shard), so an event's `keys`/`prefixes`
/// each already carry their own mutation's tenant prefix (see
/// `meridian_shard::ShardRuntime::emit_change_events`) — there is no
/// one fixed tenant for the dispatcher to re-scope them under. The
/// cache is always addressed through its raw, already-scoped methods
/// here, never through a tenant-qualified one.
pub struct EventDispatcher {
    cache: Arc<Cache>,
    replica: Arc<dyn ReplicaSink>,
}

impl EventDispatcher {
    pub fn new(cache: Arc<Cache>, replica: Arc<dyn ReplicaSink>) -> Self {
        EventDispatcher { cache, replica }
    }

    pub fn dispatch(&self, event: &DatabaseEvent) -> Result<()> {
        match &event.kind {
            EventKind::Invalidate { keys, prefixes } => {
                // Out-of-order delivery is tolerated (idempotent), but
                // an invalidation older than the entry it would delete
                // must not discard a fresher populate.
                for key in keys {
                    self.cache.delete_if_not_newer_scoped(key, event.version);
                }
                for prefix in prefixes {
                    self.cache
                        .delete_by_pattern_if_not_newer_scoped(prefix, event.version);
                }
                Ok(())
            }
            EventKind::Prewarm { keys, payload } => {
                for key in keys {
                    self.cache
                        .set_scoped(
                            key,
                            &payload.clone(),
                            event.version,
                            30_000,
                            120_000,
                            event.shard_id.clone(),
                            event.timestamp_ms,
                        )
                        .map_err(|e| {
                            Error::queue_handler_error(event.msg_id.clone(), e.to_string())
                        })?;
                }
                Ok(())
            }
            EventKind::D1Sync { operations } => {
                let results = self
                    .replica
                    .apply_batch(operations)
                    .map_err(|e| Error::queue_handler_error(event.msg_id.clone(), e.to_string()))?;
                if results.iter().any(|ok| !ok) {
                    return Err(Error::queue_handler_error(
                        event.msg_id.clone(),
                        "one or more replica operations failed".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}
