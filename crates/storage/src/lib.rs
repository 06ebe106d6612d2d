//! Embedded per-shard relational store.
//!
//! Each shard owns one SQLite file opened in WAL journal mode, which is
//! what lets reads proceed concurrently with the serialized write path
//! above this crate (`meridian-shard`'s per-shard commit lock). This
//! crate only wraps the store contract — prepared-statement execution,
//! a byte-size capacity probe, and point-in-time backup/restore — and
//! knows nothing about tenants, transactions, or events; those live one
//! layer up.

pub mod backup;
pub mod value_conv;

use meridian_core::{Error, Result, Value};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Result of a `query` call: column names plus row data.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Result of a single `execute` (INSERT/UPDATE/DELETE/DDL) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    pub rows_affected: u64,
    pub insert_id: Option<i64>,
}

/// One statement plus its bound parameters, as buffered inside an open
/// transaction before commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Embedded SQLite-backed store for a single shard.
///
/// Holds one connection behind a mutex: SQLite serializes writers
/// internally regardless, and this crate's contract is single-writer
/// already, so a plain mutex (not a pool) keeps the wrapper simple.
/// Concurrent readers are the caller's responsibility to layer on top
/// via separate read-only connections if needed; the shard runtime
/// above this crate does not currently open one, since WAL mode already
/// lets a writer and the store's internal reads interleave.
pub struct Store {
    shard_id: String,
    path: PathBuf,
    max_bytes: u64,
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if absent) the SQLite file at `path` for
    /// `shard_id`, enabling WAL journal mode and a busy timeout so
    /// transient lock contention surfaces as `TransientStoreBusy`
    /// rather than panicking.
    pub fn open(
        shard_id: impl Into<String>,
        path: impl AsRef<Path>,
        max_bytes: u64,
        busy_timeout_ms: u64,
    ) -> Result<Self> {
        let shard_id = shard_id.into();
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(|e| {
            Error::transient_store_busy(shard_id.clone(), format!("open failed: {e}"))
        })?;
        conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms))
            .map_err(|e| Error::transient_store_busy(shard_id.clone(), e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| Error::transient_store_busy(shard_id.clone(), e.to_string()))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| Error::transient_store_busy(shard_id.clone(), e.to_string()))?;

        debug!(shard_id = %shard_id, path = %path.display(), "opened shard store");

        Ok(Store {
            shard_id,
            path,
            max_bytes,
            conn: Mutex::new(conn),
        })
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Approximate on-disk size via `page_count * page_size`. This is a
    /// lagging approximation of true size (WAL-mode writes aren't
    /// reflected until a checkpoint), which is the documented slack in
    /// the capacity contract rather than a bug.
    pub fn size_bytes(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let page_count: i64 = conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .map_err(|e| Error::transient_store_busy(self.shard_id.clone(), e.to_string()))?;
        let page_size: i64 = conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .map_err(|e| Error::transient_store_busy(self.shard_id.clone(), e.to_string()))?;
        Ok((page_count.max(0) as u64) * (page_size.max(0) as u64))
    }

    /// Fraction of `max_bytes` currently in use, in `[0.0, 1.0+]`.
    pub fn capacity_pct(&self) -> Result<f64> {
        if self.max_bytes == 0 {
            return Ok(0.0);
        }
        Ok(self.size_bytes()? as f64 / self.max_bytes as f64)
    }

    /// Reject with `ShardCapacityExceeded` if the probed size has
    /// already reached `max_bytes`. Must be called before every
    /// mutation/DDL, not just periodically.
    pub fn check_capacity(&self) -> Result<()> {
        let size = self.size_bytes()?;
        if size >= self.max_bytes {
            warn!(
                shard_id = %self.shard_id,
                size_bytes = size,
                max_bytes = self.max_bytes,
                "shard capacity exceeded"
            );
            return Err(Error::shard_capacity_exceeded(
                self.shard_id.clone(),
                size,
                self.max_bytes,
            ));
        }
        Ok(())
    }

    /// Run a read-only query and materialize all rows.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| classify_sqlite_err(&self.shard_id, e))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let bound = value_conv::to_sql_params(params);
        let mut rows_iter = stmt
            .query(rusqlite::params_from_iter(bound.iter()))
            .map_err(|e| classify_sqlite_err(&self.shard_id, e))?;

        let mut rows = Vec::new();
        while let Some(row) = rows_iter
            .next()
            .map_err(|e| classify_sqlite_err(&self.shard_id, e))?
        {
            let mut out_row = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                out_row.push(value_conv::from_sql_value(row, i)?);
            }
            rows.push(out_row);
        }

        Ok(QueryResult { columns, rows })
    }

    /// Execute a single autocommit statement (INSERT/UPDATE/DELETE or
    /// DDL). Callers must have already checked capacity for
    /// mutation/DDL statements.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        let conn = self.conn.lock();
        let bound = value_conv::to_sql_params(params);
        let rows_affected = conn
            .execute(sql, rusqlite::params_from_iter(bound.iter()))
            .map_err(|e| classify_sqlite_err(&self.shard_id, e))?;
        let insert_id = if rows_affected > 0 {
            Some(conn.last_insert_rowid())
        } else {
            None
        };
        Ok(ExecResult {
            rows_affected: rows_affected as u64,
            insert_id,
        })
    }

    /// Execute a buffered list of statements as one atomic transaction.
    /// All statements commit together or none do; any failure rolls
    /// back the whole batch.
    pub fn execute_transaction(&self, statements: &[Statement]) -> Result<Vec<ExecResult>> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| classify_sqlite_err(&self.shard_id, e))?;

        let mut results = Vec::with_capacity(statements.len());
        for stmt in statements {
            let bound = value_conv::to_sql_params(&stmt.params);
            let rows_affected = tx
                .execute(&stmt.sql, rusqlite::params_from_iter(bound.iter()))
                .map_err(|e| classify_sqlite_err(&self.shard_id, e))?;
            let insert_id = if rows_affected > 0 {
                Some(tx.last_insert_rowid())
            } else {
                None
            };
            results.push(ExecResult {
                rows_affected: rows_affected as u64,
                insert_id,
            });
        }

        tx.commit()
            .map_err(|e| classify_sqlite_err(&self.shard_id, e))?;
        Ok(results)
    }

    /// Table count, for `metrics()`.
    pub fn table_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .map_err(|e| classify_sqlite_err(&self.shard_id, e))?;
        Ok(count.max(0) as u64)
    }

    /// Run `f` with direct access to the underlying connection. Used by
    /// `backup` to take an online snapshot without duplicating the
    /// connection-open logic.
    pub(crate) fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }
}

/// Classify a rusqlite error into the Meridian taxonomy: busy/locked
/// conditions become retryable `TransientStoreBusy`, constraint
/// failures become `ConstraintViolation`, everything else is
/// `InvalidSql` (covers parse errors from malformed statements).
fn classify_sqlite_err(shard_id: &str, e: rusqlite::Error) -> Error {
    let msg = e.to_string();
    let lower = msg.to_ascii_lowercase();
    if lower.contains("busy") || lower.contains("locked") || lower.contains("timeout") {
        Error::transient_store_busy(shard_id, msg)
    } else if lower.contains("constraint") || lower.contains("unique") || lower.contains("foreign key")
    {
        Error::ConstraintViolation(msg)
    } else {
        Error::InvalidSql(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_test_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shard_0.db");
        let store = Store::open("shard_0", &path, 16 << 20, 1_000).unwrap();
        store
            .execute(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
                &[],
            )
            .unwrap();
        (dir, store)
    }

    #[test]
    fn insert_and_query_roundtrip() {
        let (_dir, store) = open_test_store();
        let res = store
            .execute(
                "INSERT INTO users (id, name) VALUES (?1, ?2)",
                &[Value::Int(1), Value::Text("Ada".into())],
            )
            .unwrap();
        assert_eq!(res.rows_affected, 1);

        let rows = store.query("SELECT id, name FROM users", &[]).unwrap();
        assert_eq!(rows.columns, vec!["id".to_string(), "name".to_string()]);
        assert_eq!(rows.rows, vec![vec![Value::Int(1), Value::Text("Ada".into())]]);
    }

    #[test]
    fn transaction_rolls_back_on_constraint_violation() {
        let (_dir, store) = open_test_store();
        store
            .execute(
                "INSERT INTO users (id, name) VALUES (?1, ?2)",
                &[Value::Int(1), Value::Text("Ada".into())],
            )
            .unwrap();

        let statements = vec![
            Statement {
                sql: "INSERT INTO users (id, name) VALUES (?1, ?2)".into(),
                params: vec![Value::Int(2), Value::Text("Grace".into())],
            },
            Statement {
                sql: "INSERT INTO users (id, name) VALUES (?1, ?2)".into(),
                params: vec![Value::Int(1), Value::Text("Duplicate".into())],
            },
        ];
        let err = store.execute_transaction(&statements).unwrap_err();
        assert!(err.is_serious());

        let rows = store.query("SELECT id FROM users", &[]).unwrap();
        assert_eq!(rows.rows.len(), 1, "failed transaction must not leave row 2 visible");
    }

    #[test]
    fn capacity_check_passes_under_limit() {
        let (_dir, store) = open_test_store();
        assert!(store.check_capacity().is_ok());
    }
}
