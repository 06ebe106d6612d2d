//! The event queue: ordered, at-least-once delivery with retry +
//! backoff, dead-letter handling, and idempotent consumption (spec
//! component C).
//!
//! Pending messages are held in a `BinaryHeap` ordered earliest-due
//! first, the same priority-queue-plus-sequence shape as the teacher's
//! background task scheduler, generalized from priority-then-FIFO to
//! delay-then-FIFO ordering.

use crate::dispatch::EventDispatcher;
use crate::event::DatabaseEvent;
use crate::mode::DurabilityMode;
use dashmap::DashMap;
use meridian_cache::Cache;
use meridian_core::{Error, Result, TenantId, Timestamp};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::{error, warn};

/// The reserved tenant scope idempotency markers live under; markers
/// are not tenant data, just queue bookkeeping, so they get their own
/// namespace rather than colliding with a real tenant's keys.
const IDEMPOTENCY_TENANT: &str = "_queue";
const IDEMPOTENCY_MARKER_TTL_MS: u64 = 10 * 60 * 1000;

/// Default bound on the number of pending (not-yet-consumed) events,
/// used by callers that don't have a more specific capacity in mind.
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 10_000;

struct PendingEntry {
    event: DatabaseEvent,
    attempt: u32,
    delay_until: Timestamp,
    sequence: u64,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.delay_until == other.delay_until && self.sequence == other.sequence
    }
}
impl Eq for PendingEntry {}

// Earliest `delay_until` first, then lowest `sequence` first. Inverted
// so `BinaryHeap` (a max-heap) pops the earliest-due entry.
impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .delay_until
            .cmp(&self.delay_until)
            .then(other.sequence.cmp(&self.sequence))
    }
}
impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A message that exhausted its retry budget.
#[derive(Debug, Clone)]
pub struct DlqEntry {
    pub event: DatabaseEvent,
    pub attempt: u32,
    pub last_error: String,
}

/// Outcome of one `consume_due` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeReport {
    pub acked: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub skipped_duplicate: usize,
}

/// Retry/backoff policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 5,
            base_delay_ms: 500,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay_ms.saturating_mul(1u64 << shift);
        delay.min(self.max_delay_ms)
    }
}

/// The durable, ordered event queue.
pub struct EventQueue {
    pending: Mutex<BinaryHeap<PendingEntry>>,
    dlq: DashMap<String, DlqEntry>,
    idempotency: Arc<Cache>,
    idempotency_tenant: TenantId,
    sequence: AtomicU64,
    retry_policy: RetryPolicy,
    mode: DurabilityMode,
    max_queue_depth: usize,
}

impl EventQueue {
    pub fn new(idempotency: Arc<Cache>, retry_policy: RetryPolicy, mode: DurabilityMode) -> Self {
        Self::with_max_queue_depth(idempotency, retry_policy, mode, DEFAULT_MAX_QUEUE_DEPTH)
    }

    /// Like [`Self::new`], but with an explicit bound on the number of
    /// not-yet-consumed events `send`/`send_batch` will accept —
    /// structurally the teacher's `BackgroundScheduler::new(num_threads,
    /// max_queue_depth)` bound, applied here to enqueue rather than
    /// worker-thread count.
    pub fn with_max_queue_depth(
        idempotency: Arc<Cache>,
        retry_policy: RetryPolicy,
        mode: DurabilityMode,
        max_queue_depth: usize,
    ) -> Self {
        EventQueue {
            pending: Mutex::new(BinaryHeap::new()),
            dlq: DashMap::new(),
            idempotency,
            idempotency_tenant: TenantId::from(IDEMPOTENCY_TENANT),
            sequence: AtomicU64::new(0),
            retry_policy,
            mode,
            max_queue_depth,
        }
    }

    pub fn durability_mode(&self) -> DurabilityMode {
        self.mode
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, AtomicOrdering::SeqCst)
    }

    /// Append one event, due immediately. Rejected with
    /// `Error::RateLimited` if the queue is already at
    /// `max_queue_depth` — the caller's backpressure signal, with no
    /// events dropped silently.
    pub fn send(&self, event: DatabaseEvent) -> Result<()> {
        event.validate()?;
        let mut pending = self.pending.lock();
        if pending.len() >= self.max_queue_depth {
            return Err(Error::RateLimited { retry_after_ms: self.retry_policy.base_delay_ms });
        }
        let sequence = self.next_sequence();
        pending.push(PendingEntry {
            delay_until: event.timestamp_ms,
            event,
            attempt: 0,
            sequence,
        });
        Ok(())
    }

    /// Validate every event and check capacity before enqueueing any;
    /// either all are accepted or none are.
    pub fn send_batch(&self, events: Vec<DatabaseEvent>) -> Result<()> {
        for event in &events {
            event.validate()?;
        }
        let mut pending = self.pending.lock();
        if pending.len() + events.len() > self.max_queue_depth {
            return Err(Error::RateLimited { retry_after_ms: self.retry_policy.base_delay_ms });
        }
        for event in events {
            let sequence = self.next_sequence();
            pending.push(PendingEntry {
                delay_until: event.timestamp_ms,
                event,
                attempt: 0,
                sequence,
            });
        }
        Ok(())
    }

    /// Pop and process every entry currently due (`delay_until <=
    /// now`), dispatching through `dispatcher`. A handler failure on
    /// one message never blocks processing of the rest of the batch.
    pub fn consume_due(&self, now: Timestamp, dispatcher: &EventDispatcher) -> ConsumeReport {
        let mut due = Vec::new();
        {
            let mut pending = self.pending.lock();
            while let Some(top) = pending.peek() {
                if top.delay_until > now {
                    break;
                }
                due.push(pending.pop().expect("peeked Some"));
            }
        }

        let mut report = ConsumeReport::default();
        for entry in due {
            self.process_one(entry, now, dispatcher, &mut report);
        }
        report
    }

    fn process_one(
        &self,
        entry: PendingEntry,
        now: Timestamp,
        dispatcher: &EventDispatcher,
        report: &mut ConsumeReport,
    ) {
        let marker_key = format!("processed:{}", entry.event.msg_id);
        if self
            .idempotency
            .get::<bool>(&self.idempotency_tenant, &marker_key, now)
            .is_some()
        {
            report.skipped_duplicate += 1;
            return;
        }

        match dispatcher.dispatch(&entry.event) {
            Ok(()) => {
                let _ = self.idempotency.set(
                    &self.idempotency_tenant,
                    &marker_key,
                    &true,
                    entry.event.version,
                    IDEMPOTENCY_MARKER_TTL_MS,
                    IDEMPOTENCY_MARKER_TTL_MS,
                    entry.event.shard_id.clone(),
                    now,
                );
                report.acked += 1;
            }
            Err(e) => {
                let attempt = entry.attempt + 1;
                if attempt >= self.retry_policy.max_retries {
                    error!(
                        msg_id = %entry.event.msg_id,
                        attempt,
                        error = %e,
                        "event exhausted retry budget, moving to dead-letter queue"
                    );
                    self.dlq.insert(
                        entry.event.msg_id.clone(),
                        DlqEntry {
                            event: entry.event,
                            attempt,
                            last_error: e.to_string(),
                        },
                    );
                    report.dead_lettered += 1;
                } else {
                    let delay_ms = self.retry_policy.delay_for_attempt(attempt);
                    warn!(
                        msg_id = %entry.event.msg_id,
                        attempt,
                        next_delay_ms = delay_ms,
                        error = %e,
                        "event handler failed, retrying with backoff"
                    );
                    let sequence = self.next_sequence();
                    self.pending.lock().push(PendingEntry {
                        delay_until: now + delay_ms,
                        event: entry.event,
                        attempt,
                        sequence,
                    });
                    report.retried += 1;
                }
            }
        }
    }

    /// Re-enqueue every dead-lettered message with a fresh retry
    /// budget, due immediately. Operator-invoked; this workspace's
    /// decision for otherwise-unspecified DLQ redrive semantics (see
    /// DESIGN.md) is a full reset rather than resuming a partial
    /// budget.
    pub fn retry_failed_events(&self, now: Timestamp) -> usize {
        let ids: Vec<String> = self.dlq.iter().map(|e| e.key().clone()).collect();
        let mut requeued = 0;
        for id in ids {
            if let Some((_, entry)) = self.dlq.remove(&id) {
                let sequence = self.next_sequence();
                self.pending.lock().push(PendingEntry {
                    delay_until: now,
                    event: entry.event,
                    attempt: 0,
                    sequence,
                });
                requeued += 1;
            }
        }
        requeued
    }

    pub fn dlq_len(&self) -> usize {
        self.dlq.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn dlq_snapshot(&self) -> Vec<DlqEntry> {
        self.dlq.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::FakeReplica;
    use crate::event::EventKind;
    use meridian_core::ShardId;

    fn dispatcher() -> (Arc<Cache>, EventDispatcher) {
        let cache = Arc::new(Cache::new());
        let replica = Arc::new(FakeReplica::new());
        let d = EventDispatcher::new(cache.clone(), replica);
        (cache, d)
    }

    #[test]
    fn send_rejects_once_max_queue_depth_is_reached() {
        let idempotency = Arc::new(Cache::new());
        let queue = EventQueue::with_max_queue_depth(
            idempotency,
            RetryPolicy::default(),
            DurabilityMode::Cache,
            2,
        );
        let t0 = Timestamp::from_millis(0);
        let event = |n: u64| {
            DatabaseEvent::new(
                ShardId::from("shard_0"),
                n,
                t0,
                EventKind::Invalidate { keys: vec![format!("t1:t:users:id:{n}")], prefixes: vec![] },
            )
        };

        queue.send(event(1)).unwrap();
        queue.send(event(2)).unwrap();
        let err = queue.send(event(3)).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(queue.pending_len(), 2);
    }

    #[test]
    fn send_and_consume_acks_once() {
        let idempotency = Arc::new(Cache::new());
        let queue = EventQueue::new(idempotency, RetryPolicy::default(), DurabilityMode::Cache);
        let (_cache, dispatcher) = dispatcher();

        let t0 = Timestamp::from_millis(0);
        queue
            .send(DatabaseEvent::new(
                ShardId::from("shard_0"),
                1,
                t0,
                EventKind::Invalidate {
                    keys: vec!["t1:t:users:id:1".into()],
                    prefixes: vec![],
                },
            ))
            .unwrap();

        let report = queue.consume_due(t0, &dispatcher);
        assert_eq!(report.acked, 1);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn duplicate_delivery_is_idempotent() {
        let idempotency = Arc::new(Cache::new());
        let queue = EventQueue::new(idempotency, RetryPolicy::default(), DurabilityMode::Cache);
        let (_cache, dispatcher) = dispatcher();
        let t0 = Timestamp::from_millis(0);

        let event = DatabaseEvent::new(
            ShardId::from("shard_0"),
            1,
            t0,
            EventKind::Invalidate {
                keys: vec!["t1:t:users:id:1".into()],
                prefixes: vec![],
            },
        );
        queue.send(event.clone()).unwrap();
        queue.consume_due(t0, &dispatcher);

        // redeliver the identical message
        queue.send(event).unwrap();
        let report = queue.consume_due(t0, &dispatcher);
        assert_eq!(report.skipped_duplicate, 1);
        assert_eq!(report.acked, 0);
    }

    #[test]
    fn failed_handler_moves_to_dlq_after_max_retries() {
        let idempotency = Arc::new(Cache::new());
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay_ms: 10,
            max_delay_ms: 100,
        };
        let queue = EventQueue::new(idempotency, policy, DurabilityMode::Cache);
        let cache = Arc::new(Cache::new());
        let failing_dispatcher =
            EventDispatcher::new(cache, Arc::new(crate::dispatch::FailingReplica));

        let t0 = Timestamp::from_millis(0);
        queue
            .send(DatabaseEvent::new(
                ShardId::from("shard_0"),
                1,
                t0,
                EventKind::D1Sync {
                    operations: vec![crate::event::ReplicaOp {
                        sql: "UPDATE users SET name = ?1".into(),
                        params: vec![],
                    }],
                },
            ))
            .unwrap();

        // attempt 1: fails, requeued with backoff
        let report = queue.consume_due(t0, &failing_dispatcher);
        assert_eq!(report.retried, 1);
        assert_eq!(queue.dlq_len(), 0);

        // attempt 2: fails again, hits max_retries, dead-lettered
        let report = queue.consume_due(t0 + 1_000, &failing_dispatcher);
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(queue.dlq_len(), 1);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn retry_failed_events_requeues_dlq_with_fresh_budget() {
        let idempotency = Arc::new(Cache::new());
        let queue = EventQueue::new(idempotency, RetryPolicy::default(), DurabilityMode::Cache);
        let t0 = Timestamp::from_millis(0);
        queue.dlq.insert(
            "m1".into(),
            DlqEntry {
                event: DatabaseEvent::new(
                    ShardId::from("shard_0"),
                    1,
                    t0,
                    EventKind::Invalidate {
                        keys: vec!["k".into()],
                        prefixes: vec![],
                    },
                ),
                attempt: 5,
                last_error: "boom".into(),
            },
        );
        let requeued = queue.retry_failed_events(t0);
        assert_eq!(requeued, 1);
        assert_eq!(queue.dlq_len(), 0);
        assert_eq!(queue.pending_len(), 1);
    }
}
