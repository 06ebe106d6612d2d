//! Session/transaction manager: a bounded map of `session_id -> session`
//! pinning an open transaction to one shard, never evicted while the
//! transaction is open (§4.E, §9 "Session pinning across transactions").

use dashmap::DashMap;
use meridian_core::{RequestId, ShardId, TenantId, TransactionId, Timestamp};

pub use meridian_core::SessionId;

/// Mint a fresh session id from a random request id, since sessions are
/// server-allocated rather than caller-supplied.
pub fn new_session_id() -> SessionId {
    SessionId::from(RequestId::new().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Idle,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub tenant_id: TenantId,
    pub shard_id: ShardId,
    pub transaction_id: Option<TransactionId>,
    pub state: SessionState,
    pub last_seen: Timestamp,
}

/// Bounded session table. Eviction never removes a session with an
/// open transaction, regardless of TTL; connections are otherwise
/// returned to a per-shard idle pool (observable via metrics, not a
/// contractual API) on `COMMIT`/`ROLLBACK`.
pub struct SessionManager {
    sessions: DashMap<SessionId, Session>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        SessionManager {
            sessions: DashMap::new(),
            max_sessions,
        }
    }

    /// Fetch or create a session for `tenant_id`/`shard_id`, refreshing
    /// `last_seen`. An existing session with an open transaction keeps
    /// its pinned shard regardless of the `shard_id` argument.
    pub fn touch(
        &self,
        session_id: Option<SessionId>,
        tenant_id: &TenantId,
        shard_id: &ShardId,
        now: Timestamp,
    ) -> SessionId {
        let id = session_id.unwrap_or_else(new_session_id);
        let mut entry = self.sessions.entry(id.clone()).or_insert_with(|| Session {
            session_id: id.clone(),
            tenant_id: tenant_id.clone(),
            shard_id: shard_id.clone(),
            transaction_id: None,
            state: SessionState::Idle,
            last_seen: now,
        });
        entry.last_seen = now;
        id
    }

    /// Pin a session to `shard_id` for the duration of a transaction.
    pub fn begin_transaction(
        &self,
        session_id: &SessionId,
        shard_id: ShardId,
        transaction_id: TransactionId,
        now: Timestamp,
    ) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.shard_id = shard_id;
            session.transaction_id = Some(transaction_id);
            session.state = SessionState::Active;
            session.last_seen = now;
        }
    }

    /// Release the pin on `COMMIT`/`ROLLBACK`.
    pub fn end_transaction(&self, session_id: &SessionId, now: Timestamp) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.transaction_id = None;
            session.state = SessionState::Idle;
            session.last_seen = now;
        }
    }

    pub fn get(&self, session_id: &SessionId) -> Option<Session> {
        self.sessions.get(session_id).map(|e| e.clone())
    }

    /// Evict idle sessions past `ttl_ms`, skipping any with an open
    /// transaction. Returns the number evicted.
    pub fn sweep_idle(&self, ttl_ms: u64, now: Timestamp) -> usize {
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|e| {
                e.transaction_id.is_none() && e.last_seen.elapsed_until(now) >= ttl_ms
            })
            .map(|e| e.key().clone())
            .collect();
        for id in &expired {
            self.sessions.remove(id);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_sessions
    }
}
