//! Bulk export/import endpoints used by the split orchestrator's
//! backfill pager. Pages are cursored by the table's primary key
//! column (assumed `id`, an integer), the simplest cursor scheme
//! consistent with the spec's `{rows, next_cursor}` contract — the
//! spec leaves the exact cursor representation unspecified.

use crate::runtime::ShardRuntime;
use meridian_core::{Error, Result, TenantId, Value};
use meridian_storage::{QueryResult, Statement};

/// One page of exported rows plus a resumable cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportPage {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub next_cursor: Option<i64>,
}

impl ShardRuntime {
    /// Export up to `page_size` rows of `table` for `tenant_id` with
    /// primary key greater than `cursor`, ordered by primary key.
    pub fn export_page(
        &self,
        table: &str,
        tenant_id: &TenantId,
        cursor: Option<i64>,
        page_size: usize,
    ) -> Result<ExportPage> {
        let sql = format!(
            "SELECT * FROM {table} WHERE tenant_id = ?1 AND id > ?2 ORDER BY id LIMIT ?3"
        );
        let params = vec![
            Value::Text(tenant_id.as_str().to_string()),
            Value::Int(cursor.unwrap_or(0)),
            Value::Int(page_size as i64),
        ];
        let QueryResult { columns, rows } = self.query(&sql, &params, tenant_id, None)?;
        let next_cursor = rows.last().and_then(|row| {
            let id_idx = columns.iter().position(|c| c == "id")?;
            match row.get(id_idx) {
                Some(Value::Int(i)) => Some(*i),
                _ => None,
            }
        });
        Ok(ExportPage {
            columns,
            rows,
            next_cursor,
        })
    }

    /// Apply a page of exported rows onto this (target) shard as a
    /// single atomic upsert batch.
    pub fn import_page(&self, table: &str, page: &ExportPage) -> Result<()> {
        if page.rows.is_empty() {
            return Ok(());
        }
        let placeholders: Vec<String> = (1..=page.columns.len()).map(|i| format!("?{i}")).collect();
        let column_list = page.columns.join(", ");
        let updates: Vec<String> = page
            .columns
            .iter()
            .filter(|c| c.as_str() != "id")
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();
        let sql = format!(
            "INSERT INTO {table} ({column_list}) VALUES ({}) ON CONFLICT(id) DO UPDATE SET {}",
            placeholders.join(", "),
            updates.join(", "),
        );

        let statements: Vec<Statement> = page
            .rows
            .iter()
            .map(|row| Statement {
                sql: sql.clone(),
                params: row.clone(),
            })
            .collect();

        self.store().check_capacity()?;
        self.with_retry(|| self.store().execute_transaction(&statements).map(|_| ()))
            .map_err(|e| Error::SplitDataError(e.to_string()))
    }
}
