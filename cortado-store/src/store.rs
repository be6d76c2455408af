//! The local mirror store.
//!
//! A durable, queryable cache of remote entities, sufficient to render the
//! UI and accept writes while offline. The store is a cache: the remote
//! system is authoritative for everything except not-yet-synced records.

use crate::error::{StoreError, StoreResult};
use crate::query::Query;
use crate::schema::{self, is_mirror_table};
use chrono::{DateTime, Utc};
use cortado_types::RecordId;
use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Last-sync bookkeeping for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSyncMeta {
    pub last_synced_at: DateTime<Utc>,
    pub record_count: usize,
}

/// Versioned SQLite-backed mirror of remote tables.
pub struct MirrorStore {
    conn: Arc<Mutex<Connection>>,
}

impl MirrorStore {
    /// Opens (or creates) a mirror store at the given path and brings the
    /// schema up to the current version.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory mirror store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        schema::migrate(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    fn check_table(table: &str) -> StoreResult<()> {
        if is_mirror_table(table) {
            Ok(())
        } else {
            Err(StoreError::UnknownTable(table.to_string()))
        }
    }

    // ── Record primitives ────────────────────────────────────────

    /// Fetches a record by id.
    pub fn get(&self, table: &str, id: &RecordId) -> StoreResult<Option<Value>> {
        Self::check_table(table)?;
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("SELECT data FROM {table} WHERE id = ?1"))?;
        let mut rows = stmt.query(params![id.to_string()])?;
        match rows.next()? {
            Some(row) => {
                let data: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }

    /// Inserts or replaces a record. The row must be a JSON object with an
    /// `id` field.
    pub fn put(&self, table: &str, row: &Value) -> StoreResult<()> {
        Self::check_table(table)?;
        let (id, data) = encode_row(row)?;
        let conn = self.lock();
        conn.execute(
            &format!(
                "INSERT INTO {table} (id, data) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data"
            ),
            params![id, data],
        )?;
        Ok(())
    }

    /// Inserts or replaces many records in one transaction.
    pub fn bulk_put(&self, table: &str, rows: &[Value]) -> StoreResult<()> {
        Self::check_table(table)?;
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {table} (id, data) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data"
            ))?;
            for row in rows {
                let (id, data) = encode_row(row)?;
                stmt.execute(params![id, data])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Applies an RFC 7396 merge patch to a record in one statement.
    /// Returns false if the record does not exist.
    pub fn patch(&self, table: &str, id: &RecordId, patch: &Value) -> StoreResult<bool> {
        Self::check_table(table)?;
        let conn = self.lock();
        let changed = conn.execute(
            &format!("UPDATE {table} SET data = json_patch(data, ?1) WHERE id = ?2"),
            params![serde_json::to_string(patch)?, id.to_string()],
        )?;
        Ok(changed > 0)
    }

    /// Deletes a record. Missing records are a no-op.
    pub fn delete(&self, table: &str, id: &RecordId) -> StoreResult<()> {
        Self::check_table(table)?;
        let conn = self.lock();
        conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id.to_string()])?;
        Ok(())
    }

    /// Deletes many records in one transaction.
    pub fn delete_many(&self, table: &str, ids: &[RecordId]) -> StoreResult<()> {
        Self::check_table(table)?;
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!("DELETE FROM {table} WHERE id = ?1"))?;
            for id in ids {
                stmt.execute(params![id.to_string()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Runs a filtered query against a table.
    pub fn query(&self, table: &str, query: &Query) -> StoreResult<Vec<Value>> {
        Self::check_table(table)?;
        let (sql, bindings) = build_select(table, query)?;
        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bindings), |row| row.get::<_, String>(0))?;
        let mut result = Vec::new();
        for data in rows {
            result.push(serde_json::from_str(&data?)?);
        }
        Ok(result)
    }

    /// Returns the number of records in a table.
    pub fn count(&self, table: &str) -> StoreResult<usize> {
        Self::check_table(table)?;
        let conn = self.lock();
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ── Sync metadata ────────────────────────────────────────────

    /// Records that a table finished a refresh from the server.
    pub fn record_table_synced(&self, table: &str, record_count: usize) -> StoreResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO sync_meta (table_name, last_synced_at, record_count)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(table_name) DO UPDATE SET
                 last_synced_at = excluded.last_synced_at,
                 record_count = excluded.record_count",
            params![table, Utc::now().to_rfc3339(), record_count as i64],
        )?;
        Ok(())
    }

    /// Returns last-sync bookkeeping for a table, if it ever synced.
    pub fn table_sync_meta(&self, table: &str) -> StoreResult<Option<TableSyncMeta>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT last_synced_at, record_count FROM sync_meta WHERE table_name = ?1",
        )?;
        let mut rows = stmt.query(params![table])?;
        match rows.next()? {
            Some(row) => {
                let ts: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                let last_synced_at = DateTime::parse_from_rfc3339(&ts)
                    .map_err(|e| StoreError::InvalidRow(format!("bad sync_meta timestamp: {e}")))?
                    .with_timezone(&Utc);
                Ok(Some(TableSyncMeta { last_synced_at, record_count: count as usize }))
            }
            None => Ok(None),
        }
    }
}

/// Extracts the primary key and serialized form of a row.
fn encode_row(row: &Value) -> StoreResult<(String, String)> {
    let id = row
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::InvalidRow("row has no string `id` field".to_string()))?;
    Ok((id.to_string(), serde_json::to_string(row)?))
}

/// Field names come from application code, but they are interpolated into
/// SQL, so reject anything that is not a plain identifier.
fn check_field(field: &str) -> StoreResult<()> {
    if !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(StoreError::InvalidRow(format!("invalid field name: {field:?}")))
    }
}

fn build_select(table: &str, query: &Query) -> StoreResult<(String, Vec<rusqlite::types::Value>)> {
    let mut clauses = Vec::new();
    let mut bindings = Vec::new();

    for (field, value) in &query.eq {
        check_field(field)?;
        clauses.push(format!("json_extract(data, '$.{field}') = ?"));
        bindings.push(to_sql_value(value));
    }
    for (field, values) in &query.is_in {
        check_field(field)?;
        let placeholders = vec!["?"; values.len().max(1)].join(", ");
        clauses.push(format!("json_extract(data, '$.{field}') IN ({placeholders})"));
        if values.is_empty() {
            bindings.push(rusqlite::types::Value::Null);
        } else {
            bindings.extend(values.iter().map(to_sql_value));
        }
    }
    for (field, value) in &query.gte {
        check_field(field)?;
        clauses.push(format!("json_extract(data, '$.{field}') >= ?"));
        bindings.push(to_sql_value(value));
    }
    for (field, value) in &query.lte {
        check_field(field)?;
        clauses.push(format!("json_extract(data, '$.{field}') <= ?"));
        bindings.push(to_sql_value(value));
    }

    let mut sql = format!("SELECT data FROM {table}");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    if let Some(order) = &query.order_by {
        check_field(&order.field)?;
        let dir = if order.ascending { "ASC" } else { "DESC" };
        sql.push_str(&format!(" ORDER BY json_extract(data, '$.{}') {dir}", order.field));
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    Ok((sql, bindings))
}

fn to_sql_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(rusqlite::types::Value::Integer)
            .or_else(|| n.as_f64().map(rusqlite::types::Value::Real))
            .unwrap_or(rusqlite::types::Value::Null),
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        other => rusqlite::types::Value::Text(other.to_string()),
    }
}
