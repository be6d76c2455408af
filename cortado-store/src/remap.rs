//! Identifier remap transaction.
//!
//! When a create action lands, the server issues the real id and every
//! local trace of the temporary id must be rewritten: the order row itself,
//! its line items, and any still-pending queue action that references it.
//! All of it happens in one SQL transaction so an interruption never
//! leaves a half-remapped order.

use crate::error::{StoreError, StoreResult};
use crate::schema::QUEUE_TABLE;
use crate::store::MirrorStore;
use chrono::Utc;
use cortado_types::{QueueAction, RecordId};
use rusqlite::params;
use serde_json::Value;
use tracing::{debug, info};

/// Child tables rewritten alongside an order, with the foreign-key field.
const ORDER_CHILDREN: &[(&str, &str)] = &[("order_items", "order_id")];

impl MirrorStore {
    /// Rewrites an order from its local id to the server-issued one.
    ///
    /// Moves the order row under `new` (setting `order_number` when the
    /// server assigned one and clearing the sync bookkeeping flags), moves
    /// dependent child rows, rewrites pending queue actions, and deletes
    /// the local-id row. Atomic: either every step applies or none do.
    pub fn remap_order(
        &self,
        old: &RecordId,
        new: &RecordId,
        order_number: Option<i64>,
    ) -> StoreResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        // Order row moves under the new id.
        let data: String = tx
            .query_row("SELECT data FROM orders WHERE id = ?1", params![old.to_string()], |row| {
                row.get(0)
            })
            .map_err(|_| StoreError::NotFound(format!("orders/{old}")))?;
        let mut row: Value = serde_json::from_str(&data)?;
        let obj = row
            .as_object_mut()
            .ok_or_else(|| StoreError::InvalidRow(format!("orders/{old} is not an object")))?;
        obj.insert("id".to_string(), Value::String(new.to_string()));
        if let Some(number) = order_number {
            obj.insert("order_number".to_string(), Value::from(number));
        }
        obj.insert("pending_sync".to_string(), Value::Bool(false));
        obj.insert("processing".to_string(), Value::Bool(false));
        obj.insert("updated_at".to_string(), Value::String(Utc::now().to_rfc3339()));

        // A read refresh may have mirrored the server-id row while the
        // submit was in flight; the moved local row supersedes it.
        tx.execute(
            "INSERT INTO orders (id, data) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![new.to_string(), serde_json::to_string(&row)?],
        )?;
        tx.execute("DELETE FROM orders WHERE id = ?1", params![old.to_string()])?;

        // Child rows follow the parent.
        for (child_table, fk_field) in ORDER_CHILDREN {
            let mut stmt = tx.prepare(&format!(
                "SELECT id, data FROM {child_table}
                 WHERE json_extract(data, '$.{fk_field}') = ?1"
            ))?;
            let children = stmt
                .query_map(params![old.to_string()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            drop(stmt);

            for (child_id, child_data) in &children {
                let mut child: Value = serde_json::from_str(child_data)?;
                if let Some(obj) = child.as_object_mut() {
                    obj.insert(fk_field.to_string(), Value::String(new.to_string()));
                }
                tx.execute(
                    &format!("UPDATE {child_table} SET data = ?1 WHERE id = ?2"),
                    params![serde_json::to_string(&child)?, child_id],
                )?;
            }
            debug!(table = child_table, moved = children.len(), old = %old, new = %new,
                   "moved child rows to remapped id");
        }

        // Still-pending queue actions referencing the old id are rewritten
        // before they are ever processed.
        let mut stmt = tx.prepare(&format!(
            "SELECT id, data FROM {QUEUE_TABLE} WHERE status = 'pending'"
        ))?;
        let queued = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut rewritten = 0;
        for (action_id, action_data) in queued {
            let Ok(mut action) = serde_json::from_str::<QueueAction>(&action_data) else {
                continue;
            };
            if action.kind.rewrite_target(old, new) {
                tx.execute(
                    &format!("UPDATE {QUEUE_TABLE} SET data = ?1 WHERE id = ?2"),
                    params![serde_json::to_string(&action)?, action_id],
                )?;
                rewritten += 1;
            }
        }

        tx.commit()?;
        info!(old = %old, new = %new, rewritten_actions = rewritten, "remapped order id");
        Ok(())
    }
}
