//! The single-writer shard runtime (spec component D): SQL execution
//! against the embedded store, transaction buffering, capacity
//! enforcement, transient-error retry, and change-event emission.

use crate::config::ShardConfig;
use dashmap::DashMap;
use meridian_core::{Error, Result, ShardId, TenantId, TransactionId, Value};
use meridian_queue::{DatabaseEvent, EventKind, EventQueue, ReplicaOp};
use meridian_storage::{ExecResult, QueryResult, Statement, Store};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// `BEGIN` / `COMMIT` / `ROLLBACK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOp {
    Begin,
    Commit,
    Rollback,
}

struct TransactionContext {
    tenant_id: TenantId,
    statements: Vec<Statement>,
}

/// `health()` response.
#[derive(Debug, Clone, PartialEq)]
pub struct Health {
    pub status: &'static str,
    pub size_bytes: u64,
    pub capacity_pct: f64,
}

/// `metrics()` response.
#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    pub shard_size_bytes: u64,
    pub table_count: u64,
    pub active_transactions: usize,
}

/// A table name touched by a statement, derived heuristically from
/// its leading keyword. Used only to build invalidation event
/// prefixes; it never affects execution.
fn touched_table(sql: &str) -> Option<String> {
    let lower = sql.trim_start().to_ascii_lowercase();
    let after_keyword = |kw: &str| -> Option<String> {
        lower.strip_prefix(kw).map(|rest| {
            rest.trim_start()
                .split(|c: char| c.is_whitespace() || c == '(')
                .next()
                .unwrap_or("")
                .trim_matches(|c: char| c == '`' || c == '"')
                .to_string()
        })
    };
    after_keyword("insert into ")
        .or_else(|| after_keyword("update "))
        .or_else(|| after_keyword("delete from "))
        .or_else(|| after_keyword("create table "))
        .or_else(|| after_keyword("alter table "))
        .or_else(|| after_keyword("drop table "))
        .filter(|s| !s.is_empty())
}

/// The per-shard single-writer runtime.
pub struct ShardRuntime {
    shard_id: ShardId,
    config: ShardConfig,
    store: Store,
    queue: Arc<EventQueue>,
    /// Serializes the validate -> apply critical section for writes on
    /// this shard. Since one `ShardRuntime` already corresponds to
    /// exactly one shard, a single mutex suffices here; the teacher's
    /// `DashMap<BranchId, Mutex<()>>` generalizes this same lock
    /// across many branches living in one manager instance.
    commit_lock: Mutex<()>,
    write_version: AtomicU64,
    transactions: DashMap<TransactionId, TransactionContext>,
    /// Committed mutations in order, with the tenant and timestamp they
    /// were applied under. Used by the split orchestrator's tail
    /// replayer to poll "this shard's event log ... for mutation events
    /// affecting listed tenants" without standing up a separate log
    /// store; bounded by `MUTATION_LOG_CAP` so a long-lived shard
    /// doesn't grow this unbounded once no split is in flight.
    mutation_log: Mutex<Vec<(meridian_core::Timestamp, TenantId, Statement)>>,
}

const MUTATION_LOG_CAP: usize = 100_000;

impl ShardRuntime {
    pub fn new(shard_id: ShardId, config: ShardConfig, store: Store, queue: Arc<EventQueue>) -> Self {
        ShardRuntime {
            shard_id,
            config,
            store,
            queue,
            commit_lock: Mutex::new(()),
            write_version: AtomicU64::new(0),
            transactions: DashMap::new(),
            mutation_log: Mutex::new(Vec::new()),
        }
    }

    /// All logged mutations applied at or after `since`, for the given
    /// tenants. Used by the split orchestrator's tail replayer.
    pub fn mutations_since(
        &self,
        since: meridian_core::Timestamp,
        tenants: &std::collections::HashSet<TenantId>,
    ) -> Vec<(meridian_core::Timestamp, TenantId, Statement)> {
        self.mutation_log
            .lock()
            .iter()
            .filter(|(ts, tenant, _)| *ts >= since && tenants.contains(tenant))
            .cloned()
            .collect()
    }

    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// This shard's change-event queue, for wiring a draining worker
    /// pool in front of it. Events sent here carry keys/prefixes
    /// already scoped under their mutation's own tenant (see
    /// `emit_change_events`/`ddl` below).
    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub fn write_version(&self) -> u64 {
        self.write_version.load(Ordering::SeqCst)
    }

    pub fn health(&self) -> Result<Health> {
        let size_bytes = self.store.size_bytes()?;
        let capacity_pct = self.store.capacity_pct()?;
        let status = if capacity_pct >= 1.0 { "over_capacity" } else { "ok" };
        Ok(Health {
            status,
            size_bytes,
            capacity_pct,
        })
    }

    pub fn metrics(&self) -> Result<Metrics> {
        Ok(Metrics {
            shard_size_bytes: self.store.size_bytes()?,
            table_count: self.store.table_count()?,
            active_transactions: self.transactions.len(),
        })
    }

    /// Run a read. If `transaction_id` names an open transaction, the
    /// read is not currently reflected against buffered-but-uncommitted
    /// writes in that transaction (SQLite only sees committed state);
    /// this matches "the read occurs inside it" at the session-pinning
    /// level without requiring a nested connection.
    pub fn query(
        &self,
        sql: &str,
        params: &[Value],
        tenant_id: &TenantId,
        _transaction_id: Option<&TransactionId>,
    ) -> Result<QueryResult> {
        self.check_tenant_scoped(tenant_id, params)?;
        self.with_retry(|| self.store.query(sql, params))
    }

    /// Run a mutation. Buffered under `transaction_id` if one is open
    /// and not yet committed; otherwise applied immediately (autocommit)
    /// and an `invalidate` + `d1_sync` event pair is published.
    pub fn mutation(
        &self,
        sql: &str,
        params: &[Value],
        tenant_id: &TenantId,
        transaction_id: Option<&TransactionId>,
    ) -> Result<ExecResult> {
        self.check_tenant_scoped(tenant_id, params)?;

        if let Some(tx_id) = transaction_id {
            let mut ctx = self
                .transactions
                .get_mut(tx_id)
                .ok_or_else(|| Error::NotFound(format!("no open transaction {tx_id}")))?;
            ctx.statements.push(Statement {
                sql: sql.to_string(),
                params: params.to_vec(),
            });
            return Ok(ExecResult::default());
        }

        let _guard = self.commit_lock.lock();
        self.store.check_capacity()?;
        let result = self.with_retry(|| self.store.execute(sql, params))?;
        let version = self.write_version.fetch_add(1, Ordering::SeqCst) + 1;
        self.emit_change_events(tenant_id, &[Statement {
            sql: sql.to_string(),
            params: params.to_vec(),
        }], version);
        Ok(result)
    }

    /// Run DDL. Not transaction-buffered; always autocommit.
    pub fn ddl(&self, sql: &str, tenant_id: &TenantId) -> Result<()> {
        let _guard = self.commit_lock.lock();
        self.store.check_capacity()?;
        self.with_retry(|| self.store.execute(sql, &[]))?;
        let version = self.write_version.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(table) = touched_table(sql) {
            self.publish_event(EventKind::Invalidate {
                keys: vec![],
                prefixes: vec![format!("{}:t:{}:", tenant_id.as_str(), table)],
            }, version);
        }
        Ok(())
    }

    /// `BEGIN` / `COMMIT` / `ROLLBACK`.
    ///
    /// `BEGIN` allocates (or accepts a caller-supplied) transaction id
    /// and opens an empty statement buffer. `COMMIT` applies the whole
    /// buffer atomically against the store and emits change events for
    /// every buffered statement; any failure aborts the entire
    /// transaction (nothing is applied). `ROLLBACK` discards the
    /// buffer.
    pub fn transaction(
        &self,
        op: TxOp,
        tenant_id: &TenantId,
        transaction_id: Option<TransactionId>,
    ) -> Result<TransactionId> {
        match op {
            TxOp::Begin => {
                let tx_id = transaction_id.unwrap_or_default();
                self.transactions.insert(
                    tx_id,
                    TransactionContext {
                        tenant_id: tenant_id.clone(),
                        statements: Vec::new(),
                    },
                );
                debug!(shard_id = %self.shard_id, %tx_id, "transaction begun");
                Ok(tx_id)
            }
            TxOp::Commit => {
                let tx_id = transaction_id
                    .ok_or_else(|| Error::InvalidSql("COMMIT requires a transaction_id".into()))?;
                let (_, ctx) = self
                    .transactions
                    .remove(&tx_id)
                    .ok_or_else(|| Error::NotFound(format!("no open transaction {tx_id}")))?;

                let _guard = self.commit_lock.lock();
                self.store.check_capacity()?;
                self.with_retry(|| self.store.execute_transaction(&ctx.statements))?;
                let version = self.write_version.fetch_add(1, Ordering::SeqCst) + 1;
                self.emit_change_events(&ctx.tenant_id, &ctx.statements, version);
                debug!(shard_id = %self.shard_id, %tx_id, "transaction committed");
                Ok(tx_id)
            }
            TxOp::Rollback => {
                let tx_id = transaction_id
                    .ok_or_else(|| Error::InvalidSql("ROLLBACK requires a transaction_id".into()))?;
                self.transactions.remove(&tx_id);
                debug!(shard_id = %self.shard_id, %tx_id, "transaction rolled back");
                Ok(tx_id)
            }
        }
    }

    pub fn pitr_bookmark(&self, snapshot_dir: &std::path::Path) -> Result<meridian_storage::backup::Bookmark> {
        self.store.create_bookmark(self.write_version(), snapshot_dir)
    }

    pub fn pitr_restore(&self, bookmark: &meridian_storage::backup::Bookmark) -> Result<()> {
        let _guard = self.commit_lock.lock();
        self.store.restore_from_bookmark(bookmark)?;
        self.write_version.store(bookmark.version, Ordering::SeqCst);
        Ok(())
    }

    fn emit_change_events(&self, tenant_id: &TenantId, statements: &[Statement], version: u64) {
        let now = meridian_core::Timestamp::now();
        {
            let mut log = self.mutation_log.lock();
            for stmt in statements {
                log.push((now, tenant_id.clone(), stmt.clone()));
            }
            if log.len() > MUTATION_LOG_CAP {
                let excess = log.len() - MUTATION_LOG_CAP;
                log.drain(0..excess);
            }
        }
        let tables: std::collections::HashSet<String> =
            statements.iter().filter_map(|s| touched_table(&s.sql)).collect();
        let prefixes: Vec<String> = tables
            .iter()
            .map(|t| format!("{}:t:{}:", tenant_id.as_str(), t))
            .collect();
        if !prefixes.is_empty() {
            self.publish_event(
                EventKind::Invalidate {
                    keys: vec![],
                    prefixes,
                },
                version,
            );
        }
        self.publish_event(
            EventKind::D1Sync {
                operations: statements
                    .iter()
                    .map(|s| ReplicaOp {
                        sql: s.sql.clone(),
                        params: s.params.clone(),
                    })
                    .collect(),
            },
            version,
        );
    }

    fn publish_event(&self, kind: EventKind, version: u64) {
        let event = DatabaseEvent::new(self.shard_id.clone(), version, meridian_core::Timestamp::now(), kind);
        if let Err(e) = self.queue.send(event) {
            warn!(shard_id = %self.shard_id, error = %e, "failed to publish change event");
        }
    }

    /// The transpiler (external, out of scope) does not enforce tenant
    /// scoping; this runtime's contract with its caller is that every
    /// tenant-scoped statement binds the tenant id as one of its
    /// parameters. This is a heuristic, not a SQL-aware check — a
    /// caller that mismatches it is a caller bug, not a security
    /// boundary this runtime can fully enforce without a real parser.
    ///
    /// A statement with no bound parameters at all cannot possibly
    /// carry the tenant id, so it is rejected the same as one whose
    /// params omit it — an unparameterized `SELECT * FROM users` would
    /// otherwise read every tenant's rows on this shard unchecked.
    fn check_tenant_scoped(&self, tenant_id: &TenantId, params: &[Value]) -> Result<()> {
        let present = params
            .iter()
            .any(|p| matches!(p, Value::Text(s) if s == tenant_id.as_str()));
        if present {
            Ok(())
        } else {
            Err(Error::tenant_mismatch(tenant_id.as_str(), "<unscoped statement>"))
        }
    }

    pub(crate) fn with_retry<T>(&self, f: impl Fn() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match f() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt + 1 < self.config.retry.max_attempts => {
                    let delay = self.config.retry.base_delay_ms * (1u64 << attempt);
                    warn!(
                        shard_id = %self.shard_id,
                        attempt = attempt + 1,
                        delay_ms = delay,
                        error = %e,
                        "transient store error, retrying"
                    );
                    std::thread::sleep(std::time::Duration::from_millis(delay));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
