//! The gateway core (spec component E): the per-request pipeline wiring
//! routing, cache, shard runtime, event queue, and the split
//! orchestrator's resolver overlay behind one entry point.

use crate::hints::{parse_inline, resolve_consistency, Hints};
use crate::session::{SessionId, SessionManager};
use dashmap::DashMap;
use meridian_cache::{Cache, ConsistencyMode};
use meridian_core::{Error, RequestId, Result, ShardId, TenantId, TransactionId, Timestamp, Value};
use meridian_queue::{EventDispatcher, NoopReplicaSink, QueueWorkerPool, ReplicaSink};
use meridian_routing::RoutingStore;
use meridian_shard::ShardRuntime;
use meridian_split::{resolve_read_shard, resolve_write_shards, SplitOrchestrator};
use std::sync::Arc;
use tracing::info_span;

/// Worker pool sizing for the per-shard queue drain, until a caller
/// overrides it with [`Gateway::with_queue_workers`].
const DEFAULT_QUEUE_WORKER_THREADS: usize = 2;
const DEFAULT_QUEUE_POLL_INTERVAL_MS: u64 = 50;

/// Per-table cache policy (§3 Table Policy, cache fields).
#[derive(Debug, Clone)]
pub struct TablePolicy {
    pub primary_key: String,
    pub default_consistency: ConsistencyMode,
    pub ttl_ms: u64,
    pub swr_ms: u64,
    pub always_strong_columns: Vec<String>,
}

impl Default for TablePolicy {
    fn default() -> Self {
        TablePolicy {
            primary_key: "id".to_string(),
            default_consistency: ConsistencyMode::Bounded,
            ttl_ms: 30_000,
            swr_ms: 120_000,
            always_strong_columns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMeta {
    pub from_cache: bool,
    pub shard_id: ShardId,
    pub execution_time_ms: u64,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub rows: Vec<Vec<Value>>,
    pub columns: Vec<String>,
    pub rows_affected: Option<u64>,
    pub insert_id: Option<i64>,
    pub meta: ResponseMeta,
}

/// One incoming request (§6 request/response contract).
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub tenant_id: TenantId,
    pub sql: String,
    pub params: Vec<Value>,
    pub hints: Hints,
    pub transaction_id: Option<TransactionId>,
    pub session_id: Option<SessionId>,
}

fn is_write_statement(sql: &str) -> bool {
    let upper = sql.trim_start().to_ascii_uppercase();
    upper.starts_with("INSERT")
        || upper.starts_with("UPDATE")
        || upper.starts_with("DELETE")
        || upper.starts_with("CREATE")
        || upper.starts_with("ALTER")
        || upper.starts_with("DROP")
}

fn is_ddl_statement(sql: &str) -> bool {
    let upper = sql.trim_start().to_ascii_uppercase();
    upper.starts_with("CREATE") || upper.starts_with("ALTER") || upper.starts_with("DROP")
}

/// Best-effort primary table name, for table-policy lookup and cache
/// key construction. Shares the shard runtime's keyword heuristic in
/// spirit but also covers `SELECT ... FROM`.
fn primary_table(sql: &str) -> Option<String> {
    let lower = sql.trim_start().to_ascii_lowercase();
    let after = |kw: &str| -> Option<String> {
        lower.find(kw).map(|idx| {
            lower[idx + kw.len()..]
                .trim_start()
                .split(|c: char| c.is_whitespace() || c == '(')
                .next()
                .unwrap_or("")
                .trim_matches(|c: char| c == '`' || c == '"')
                .to_string()
        })
    };
    after("from ")
        .or_else(|| after("insert into "))
        .or_else(|| after("update "))
        .or_else(|| after("delete from "))
        .filter(|s| !s.is_empty())
}

/// The gateway core. One instance serves every shard registered with
/// it; shard-specific fan-out (including split dual-write) happens
/// inside `execute`.
pub struct Gateway {
    routing: Arc<RoutingStore>,
    cache: Arc<Cache>,
    shards: DashMap<ShardId, Arc<ShardRuntime>>,
    split: Option<Arc<SplitOrchestrator>>,
    sessions: SessionManager,
    table_policies: DashMap<String, TablePolicy>,
    server_default_consistency: ConsistencyMode,
    replica: Arc<dyn ReplicaSink>,
    queue_workers: usize,
    queue_poll_interval_ms: u64,
    /// One drain pool per registered shard, keyed the same as `shards`.
    /// Never read after insertion; held only so the pool outlives the
    /// shard and can be joined from [`Self::shutdown`].
    worker_pools: DashMap<ShardId, QueueWorkerPool>,
}

impl Gateway {
    pub fn new(routing: Arc<RoutingStore>, cache: Arc<Cache>, max_sessions: usize) -> Self {
        Gateway {
            routing,
            cache,
            shards: DashMap::new(),
            split: None,
            sessions: SessionManager::new(max_sessions),
            table_policies: DashMap::new(),
            server_default_consistency: ConsistencyMode::Bounded,
            replica: Arc::new(NoopReplicaSink),
            queue_workers: DEFAULT_QUEUE_WORKER_THREADS,
            queue_poll_interval_ms: DEFAULT_QUEUE_POLL_INTERVAL_MS,
            worker_pools: DashMap::new(),
        }
    }

    pub fn with_split_orchestrator(mut self, split: Arc<SplitOrchestrator>) -> Self {
        self.split = Some(split);
        self
    }

    /// Override the `ReplicaSink` `d1_sync` events are forwarded
    /// through (default: a no-op placeholder) and/or the per-shard
    /// drain pool's thread count and poll interval.
    pub fn with_queue_workers(mut self, replica: Arc<dyn ReplicaSink>, num_threads: usize, poll_interval_ms: u64) -> Self {
        self.replica = replica;
        self.queue_workers = num_threads;
        self.queue_poll_interval_ms = poll_interval_ms;
        self
    }

    /// Register a shard's runtime and spawn the worker pool that
    /// drains its change-event queue through this gateway's cache and
    /// replica sink — without this, invalidate/prewarm/d1_sync events
    /// published by the shard would sit in the queue forever.
    pub fn register_shard(&self, shard_id: ShardId, runtime: Arc<ShardRuntime>) {
        let dispatcher = Arc::new(EventDispatcher::new(self.cache.clone(), self.replica.clone()));
        let pool = QueueWorkerPool::spawn(
            runtime.queue().clone(),
            dispatcher,
            self.queue_workers,
            self.queue_poll_interval_ms,
        );
        self.worker_pools.insert(shard_id.clone(), pool);
        self.shards.insert(shard_id, runtime);
    }

    /// Stop every shard's queue-drain workers, joining their threads.
    /// Idempotent-ish: a `Gateway` with no registered shards is a noop.
    pub fn shutdown(&self) {
        let shard_ids: Vec<ShardId> = self.worker_pools.iter().map(|e| e.key().clone()).collect();
        for shard_id in shard_ids {
            if let Some((_, pool)) = self.worker_pools.remove(&shard_id) {
                pool.shutdown();
            }
        }
    }

    pub fn set_table_policy(&self, table: impl Into<String>, policy: TablePolicy) {
        self.table_policies.insert(table.into(), policy);
    }

    fn shard(&self, shard_id: &ShardId) -> Result<Arc<ShardRuntime>> {
        self.shards
            .get(shard_id)
            .map(|e| e.clone())
            .ok_or_else(|| Error::NotFound(format!("unknown shard {shard_id}")))
    }

    /// Resolve the base shard for `tenant_id`, then apply the split
    /// resolver overlay if an orchestrator is wired in (§4.F Resolver
    /// overlay contract). Outside an active plan, read and write both
    /// equal the base shard.
    fn resolve_shards(&self, tenant_id: &TenantId) -> Result<(ShardId, Vec<ShardId>)> {
        let base = self.routing.resolve(tenant_id.as_str(), Some(tenant_id))?;
        match &self.split {
            Some(orchestrator) => {
                let plan = orchestrator.active_plan_for_tenant(tenant_id);
                let read = resolve_read_shard(tenant_id, &base, plan.as_ref());
                let write = resolve_write_shards(tenant_id, &base, plan.as_ref());
                Ok((read, write))
            }
            None => Ok((base.clone(), vec![base])),
        }
    }

    /// Run one request through the seven-step pipeline (§4.E).
    pub fn execute(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        let request_id = RequestId::new();
        let span = info_span!("gateway_request", request_id = %request_id, tenant_id = %request.tenant_id);
        let _guard = span.enter();

        // Step 1/2: request is already authenticated/transpiled by the
        // (external) caller; this gateway owns only hint-comment
        // stripping, since the transpiler only removes the comment
        // text, not its semantics.
        if request.tenant_id.as_str().is_empty() {
            return Err(Error::Unauthorized("missing tenant_id".into()));
        }
        let (inline_hints, sql) = parse_inline(&request.sql);
        let hints = if inline_hints == Hints::default() {
            request.hints.clone()
        } else {
            inline_hints
        };

        let table = primary_table(sql);
        let table_policy = table
            .as_ref()
            .and_then(|t| self.table_policies.get(t).map(|e| e.clone()));
        let forces_strong = table_policy
            .as_ref()
            .map(|p| !p.always_strong_columns.is_empty() && request.params.iter().any(|v| !v.is_null()))
            .unwrap_or(false);

        // Step 3: resolve consistency.
        let consistency = if forces_strong {
            ConsistencyMode::Strong
        } else {
            resolve_consistency(
                hints.consistency,
                table_policy.as_ref().map(|p| p.default_consistency),
                self.server_default_consistency,
            )
        };

        // Step 4: compute shard. An open transaction pins the session
        // to its shard; otherwise resolve fresh (with split overlay).
        let (read_shard, write_shards, session_id) = if let Some(tx_id) = &request.transaction_id {
            let session_id = request.session_id.clone().ok_or_else(|| {
                Error::InvalidSql("transaction_id requires an established session_id".into())
            })?;
            let session = self
                .sessions
                .get(&session_id)
                .ok_or_else(|| Error::NotFound(format!("no session {session_id}")))?;
            if session.transaction_id.as_ref() != Some(tx_id) {
                return Err(Error::InvalidSql(
                    "transaction_id does not match the session's open transaction".into(),
                ));
            }
            (session.shard_id.clone(), vec![session.shard_id.clone()], session_id)
        } else {
            let (read, write) = self.resolve_shards(&request.tenant_id)?;
            let session_id = self.sessions.touch(
                request.session_id.clone(),
                &request.tenant_id,
                &read,
                Timestamp::now(),
            );
            (read, write, session_id)
        };

        let is_write = is_write_statement(sql);
        let is_ddl = is_ddl_statement(sql);

        let started = Timestamp::now();
        let response = if is_write || consistency == ConsistencyMode::Strong {
            // Step 6: writes and strong reads bypass the cache and go
            // straight to the shard(s); a write fans out to every
            // shard the split overlay names (dual-write).
            self.dispatch_to_shards(&read_shard, &write_shards, sql, &request.params, &request.tenant_id, request.transaction_id.as_ref(), is_write, is_ddl)?
        } else {
            // Step 5: bounded/cached reads consult the cache first.
            self.dispatch_cached_read(&read_shard, sql, &request.params, &request.tenant_id, table.as_deref(), table_policy.as_ref(), consistency, &hints)?
        };
        let elapsed = started.elapsed_until(Timestamp::now());

        let _ = session_id; // session already touched/validated above

        Ok(GatewayResponse {
            rows: response.rows,
            columns: response.columns,
            rows_affected: response.rows_affected,
            insert_id: response.insert_id,
            meta: ResponseMeta {
                execution_time_ms: elapsed,
                from_cache: response.meta.from_cache,
                shard_id: response.meta.shard_id,
                version: response.meta.version,
            },
        })
    }

    fn dispatch_to_shards(
        &self,
        read_shard: &ShardId,
        write_shards: &[ShardId],
        sql: &str,
        params: &[Value],
        tenant_id: &TenantId,
        transaction_id: Option<&TransactionId>,
        is_write: bool,
        is_ddl: bool,
    ) -> Result<GatewayResponse> {
        let mut primary_rows = Vec::new();
        let mut primary_columns = Vec::new();
        let mut rows_affected = None;
        let mut insert_id = None;
        let mut version = 0;

        for (idx, shard_id) in write_shards.iter().enumerate() {
            let runtime = self.shard(shard_id)?;
            if is_ddl {
                runtime.ddl(sql, tenant_id)?;
            } else if is_write {
                let result = runtime.mutation(sql, params, tenant_id, transaction_id)?;
                if idx == 0 {
                    rows_affected = Some(result.rows_affected);
                    insert_id = result.insert_id;
                }
            } else {
                let result = runtime.query(sql, params, tenant_id, transaction_id)?;
                if idx == 0 {
                    primary_columns = result.columns;
                    primary_rows = result.rows;
                }
            }
            if shard_id == read_shard {
                version = runtime.write_version();
            }
        }

        Ok(GatewayResponse {
            rows: primary_rows,
            columns: primary_columns,
            rows_affected,
            insert_id,
            meta: ResponseMeta {
                from_cache: false,
                shard_id: read_shard.clone(),
                execution_time_ms: 0,
                version,
            },
        })
    }

    fn dispatch_cached_read(
        &self,
        shard_id: &ShardId,
        sql: &str,
        params: &[Value],
        tenant_id: &TenantId,
        table: Option<&str>,
        table_policy: Option<&TablePolicy>,
        consistency: ConsistencyMode,
        hints: &Hints,
    ) -> Result<GatewayResponse> {
        // `shard_key` lets a caller disambiguate the cache key when the
        // table can't be inferred from `sql` (or to collapse several
        // tables onto one invalidation scope); it never affects shard
        // resolution, which the routing layer already owns.
        let key_discriminant = hints.shard_key.as_deref().or(table).unwrap_or("unknown");
        let key = meridian_cache::query_key(tenant_id, key_discriminant, sql, params);
        let ttl_ms = hints.cache_ttl_ms.unwrap_or_else(|| table_policy.map(|p| p.ttl_ms).unwrap_or(30_000));
        let swr_ms = table_policy.map(|p| p.swr_ms).unwrap_or(120_000).max(ttl_ms);
        let now = Timestamp::now();

        let state = self.cache.state(tenant_id, &key, now);
        let should_block_on_shard = match (consistency, state) {
            (_, None) => true,
            (ConsistencyMode::Bounded, Some(meridian_cache::CacheState::Expired)) => true,
            _ => false,
        };

        if !should_block_on_shard {
            if let Some((cached, meta)) = self
                .cache
                .get::<(Vec<String>, Vec<Vec<Value>>)>(tenant_id, &key, now)
            {
                // `bounded_ms` caps how stale a bounded read will accept
                // an entry past its fresh window; beyond that it falls
                // through to a shard read like an expired entry would.
                let within_bounded_staleness = hints
                    .bounded_ms
                    .map(|budget| meta.fresh_until.elapsed_until(now) <= budget)
                    .unwrap_or(true);
                if consistency != ConsistencyMode::Bounded || within_bounded_staleness {
                    return Ok(GatewayResponse {
                        columns: cached.0,
                        rows: cached.1,
                        rows_affected: None,
                        insert_id: None,
                        meta: ResponseMeta {
                            from_cache: true,
                            shard_id: meta.shard_id,
                            execution_time_ms: 0,
                            version: meta.version,
                        },
                    });
                }
            }
        }

        let runtime = self.shard(shard_id)?;
        let result = runtime.query(sql, params, tenant_id, None)?;
        let version = runtime.write_version();
        let payload = (result.columns.clone(), result.rows.clone());
        let _ = self.cache.set(
            tenant_id,
            &key,
            &payload,
            version,
            ttl_ms,
            swr_ms,
            shard_id.clone(),
            now,
        );

        Ok(GatewayResponse {
            rows: result.rows,
            columns: result.columns,
            rows_affected: None,
            insert_id: None,
            meta: ResponseMeta {
                from_cache: false,
                shard_id: shard_id.clone(),
                execution_time_ms: 0,
                version,
            },
        })
    }

    /// `BEGIN`: pin the session to its resolved shard and allocate a
    /// transaction id if one wasn't supplied. `COMMIT`/`ROLLBACK`:
    /// release the pin.
    pub fn begin_transaction(&self, tenant_id: &TenantId, session_id: Option<SessionId>) -> Result<(SessionId, TransactionId)> {
        let (read_shard, _write) = self.resolve_shards(tenant_id)?;
        let now = Timestamp::now();
        let session_id = self.sessions.touch(session_id, tenant_id, &read_shard, now);
        let tx_id = TransactionId::new();
        self.shard(&read_shard)?
            .transaction(meridian_shard::TxOp::Begin, tenant_id, Some(tx_id))?;
        self.sessions.begin_transaction(&session_id, read_shard, tx_id, now);
        Ok((session_id, tx_id))
    }

    pub fn commit_transaction(&self, session_id: &SessionId, tenant_id: &TenantId, tx_id: TransactionId) -> Result<()> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| Error::NotFound(format!("no session {session_id}")))?;
        self.shard(&session.shard_id)?
            .transaction(meridian_shard::TxOp::Commit, tenant_id, Some(tx_id))?;
        self.sessions.end_transaction(session_id, Timestamp::now());
        Ok(())
    }

    pub fn rollback_transaction(&self, session_id: &SessionId, tenant_id: &TenantId, tx_id: TransactionId) -> Result<()> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| Error::NotFound(format!("no session {session_id}")))?;
        self.shard(&session.shard_id)?
            .transaction(meridian_shard::TxOp::Rollback, tenant_id, Some(tx_id))?;
        self.sessions.end_transaction(session_id, Timestamp::now());
        Ok(())
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}
