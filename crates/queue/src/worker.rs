//! Fixed pool of OS worker threads draining an [`EventQueue`].
//!
//! Structurally the same shape as the teacher's `BackgroundScheduler`:
//! a shared queue drained by a fixed set of named worker threads, with
//! a shutdown flag that's checked between polls rather than torn down
//! mid-dispatch. Generalized from the teacher's "pop one ready task
//! per wakeup" loop to "drain every currently-due event per wakeup",
//! since `consume_due` already batches internally.

use crate::dispatch::EventDispatcher;
use crate::queue::EventQueue;
use meridian_core::Timestamp;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

/// A running pool of worker threads draining one [`EventQueue`].
///
/// Workers keep running after construction; call [`Self::shutdown`]
/// to signal them to exit and join every thread.
pub struct QueueWorkerPool {
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl QueueWorkerPool {
    /// Spawn `num_threads` workers named `meridian-queue-0`, `-1`, ...,
    /// each looping `consume_due` against `queue` and sleeping
    /// `poll_interval_ms` between polls that found nothing due.
    pub fn spawn(
        queue: Arc<EventQueue>,
        dispatcher: Arc<EventDispatcher>,
        num_threads: usize,
        poll_interval_ms: u64,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            let queue = Arc::clone(&queue);
            let dispatcher = Arc::clone(&dispatcher);
            let shutdown = Arc::clone(&shutdown);
            let handle = std::thread::Builder::new()
                .name(format!("meridian-queue-{i}"))
                .spawn(move || worker_loop(&queue, &dispatcher, &shutdown, poll_interval_ms))
                .expect("failed to spawn queue worker thread");
            handles.push(handle);
        }
        info!(num_threads, poll_interval_ms, "queue worker pool started");
        QueueWorkerPool { shutdown, handles }
    }

    /// Signal every worker to exit after its current poll and join them.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    queue: &Arc<EventQueue>,
    dispatcher: &Arc<EventDispatcher>,
    shutdown: &AtomicBool,
    poll_interval_ms: u64,
) {
    while !shutdown.load(Ordering::Acquire) {
        let report = queue.consume_due(Timestamp::now(), dispatcher);
        let processed = report.acked + report.retried + report.dead_lettered + report.skipped_duplicate;
        if processed == 0 {
            std::thread::sleep(Duration::from_millis(poll_interval_ms));
        }
    }
    debug!("queue worker thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::FakeReplica;
    use crate::event::{DatabaseEvent, EventKind};
    use crate::mode::DurabilityMode;
    use crate::queue::RetryPolicy;
    use meridian_cache::Cache;
    use meridian_core::{ShardId, TenantId};

    #[test]
    fn worker_pool_drains_sent_events_without_manual_consume_due() {
        let cache = Arc::new(Cache::new());
        let queue = Arc::new(EventQueue::new(
            Arc::new(Cache::new()),
            RetryPolicy::default(),
            DurabilityMode::Cache,
        ));
        let tenant = TenantId::from("t1");
        cache
            .set(&tenant, "t:users:id:1", &"Ada".to_string(), 1, 60_000, 60_000, ShardId::from("shard_0"), Timestamp::from_millis(0))
            .unwrap();

        let dispatcher = Arc::new(EventDispatcher::new(cache.clone(), Arc::new(FakeReplica::new())));
        let pool = QueueWorkerPool::spawn(queue.clone(), dispatcher, 2, 10);

        queue
            .send(DatabaseEvent::new(
                ShardId::from("shard_0"),
                2,
                Timestamp::now(),
                EventKind::Invalidate { keys: vec!["t1:t:users:id:1".into()], prefixes: vec![] },
            ))
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while std::time::Instant::now() < deadline && queue.pending_len() > 0 {
            std::thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(queue.pending_len(), 0);
        assert!(cache
            .get::<String>(&tenant, "t:users:id:1", Timestamp::from_millis(0))
            .is_none());

        pool.shutdown();
    }
}
