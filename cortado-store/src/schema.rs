//! Versioned mirror schema.
//!
//! Rows are stored as JSON blobs with expression indexes on the fields each
//! table declares. Migrations run in increasing order against
//! `PRAGMA user_version`; most are additive, but a step may drop and
//! recreate a table to recover from a corrupted index. That loses the
//! table's local data and is only acceptable for tables the server can
//! repopulate (or, for the queue, where the broken index made the data
//! unreadable anyway).

use crate::error::{StoreError, StoreResult};
use rusqlite::Connection;
use tracing::{info, warn};

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 3;

/// Name of the action queue table (v3 and later).
pub const QUEUE_TABLE: &str = "queue_v2";

/// A mirrored table and the fields it indexes.
pub struct TableSpec {
    pub name: &'static str,
    pub indexed: &'static [&'static str],
}

/// Tables holding mirrored business records.
pub const MIRROR_TABLES: &[TableSpec] = &[
    TableSpec { name: "orders", indexed: &["order_status", "customer_id", "created_at"] },
    TableSpec { name: "order_items", indexed: &["order_id", "item_status"] },
    TableSpec { name: "customers", indexed: &["phone"] },
    TableSpec { name: "menu_items", indexed: &["category"] },
];

/// Returns whether `name` is a mirrored table.
pub fn is_mirror_table(name: &str) -> bool {
    MIRROR_TABLES.iter().any(|t| t.name == name)
}

/// A single migration step.
pub struct Migration {
    /// Version this step migrates *to*.
    pub version: i64,
    pub apply: fn(&Connection) -> rusqlite::Result<()>,
}

/// All migration steps, in order.
pub const MIGRATIONS: &[Migration] = &[
    Migration { version: 1, apply: migrate_v1 },
    Migration { version: 2, apply: migrate_v2 },
    Migration { version: 3, apply: migrate_v3 },
];

/// Applies every migration newer than the connection's current version.
pub fn migrate(conn: &Connection) -> StoreResult<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current > SCHEMA_VERSION {
        return Err(StoreError::Migration(format!(
            "database version {current} is newer than supported version {SCHEMA_VERSION}"
        )));
    }
    for step in MIGRATIONS.iter().filter(|m| m.version > current) {
        info!(version = step.version, "applying mirror schema migration");
        (step.apply)(conn).map_err(|e| {
            StoreError::Migration(format!("migration to v{} failed: {e}", step.version))
        })?;
        conn.pragma_update(None, "user_version", step.version)?;
    }
    Ok(())
}

fn create_record_table(conn: &Connection, spec: &TableSpec) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            data TEXT NOT NULL
        );",
        spec.name
    ))?;
    for field in spec.indexed {
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_{field}
             ON {table} (json_extract(data, '$.{field}'));",
            table = spec.name,
            field = field
        ))?;
    }
    Ok(())
}

fn migrate_v1(conn: &Connection) -> rusqlite::Result<()> {
    for spec in MIRROR_TABLES {
        create_record_table(conn, spec)?;
    }
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sync_meta (
            table_name TEXT PRIMARY KEY,
            last_synced_at TEXT NOT NULL,
            record_count INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS queue (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            data TEXT NOT NULL
        );
        ",
    )
}

fn migrate_v2(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_orders_updated_at
            ON orders (json_extract(data, '$.updated_at'));
        CREATE INDEX IF NOT EXISTS idx_orders_pending_sync
            ON orders (json_extract(data, '$.pending_sync'));
        ",
    )
}

/// v3 recreates the queue under a new name. The v1 queue shipped with a
/// status index that could be left corrupted by an unclean shutdown,
/// making the whole table unreadable. Recreating is a last-resort
/// recovery: any intents still in the old table are dropped.
fn migrate_v3(conn: &Connection) -> rusqlite::Result<()> {
    let orphaned: i64 = conn
        .query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))
        .unwrap_or(0);
    if orphaned > 0 {
        warn!(count = orphaned, "dropping unreadable queue entries during schema recovery");
    }
    conn.execute_batch(&format!(
        "
        DROP TABLE IF EXISTS queue;

        CREATE TABLE IF NOT EXISTS {QUEUE_TABLE} (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            data TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_{QUEUE_TABLE}_status_created
            ON {QUEUE_TABLE} (status, created_at);
        ",
    ))
}
