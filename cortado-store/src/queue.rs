//! Queue-row persistence inside the mirror store.
//!
//! The action queue itself (enqueue semantics, fallback persistence,
//! retry policy) lives in the sync crate; this module only gives it
//! durable, FIFO-ordered rows.

use crate::error::StoreResult;
use crate::schema::QUEUE_TABLE;
use crate::store::MirrorStore;
use cortado_types::{ActionId, ActionStatus, QueueAction};
use rusqlite::params;
use tracing::warn;

/// Counts of queue actions by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
}

fn status_str(status: ActionStatus) -> &'static str {
    match status {
        ActionStatus::Pending => "pending",
        ActionStatus::Completed => "completed",
        ActionStatus::Failed => "failed",
    }
}

impl MirrorStore {
    /// Appends an action to the durable queue.
    pub fn append_action(&self, action: &QueueAction) -> StoreResult<()> {
        let data = serde_json::to_string(action)?;
        let conn = self.lock();
        conn.execute(
            &format!("INSERT INTO {QUEUE_TABLE} (id, status, created_at, data) VALUES (?1, ?2, ?3, ?4)"),
            params![
                action.id.to_string(),
                status_str(action.status),
                action.created_at.to_rfc3339(),
                data,
            ],
        )?;
        Ok(())
    }

    /// Returns pending actions in creation order.
    ///
    /// A row that no longer deserializes (written by a different app
    /// version) is logged and skipped rather than wedging the queue.
    pub fn pending_actions(&self) -> StoreResult<Vec<QueueAction>> {
        self.actions_with_status(ActionStatus::Pending)
    }

    /// Returns terminally failed actions for inspection.
    pub fn failed_actions(&self) -> StoreResult<Vec<QueueAction>> {
        self.actions_with_status(ActionStatus::Failed)
    }

    fn actions_with_status(&self, status: ActionStatus) -> StoreResult<Vec<QueueAction>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, data FROM {QUEUE_TABLE} WHERE status = ?1 ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(params![status_str(status)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut actions = Vec::new();
        for row in rows {
            let (id, data) = row?;
            match serde_json::from_str::<QueueAction>(&data) {
                Ok(action) => actions.push(action),
                Err(e) => warn!(action_id = %id, error = %e, "skipping undeserializable queue row"),
            }
        }
        Ok(actions)
    }

    /// Persists an action's current state (status, retries, payload).
    pub fn update_action(&self, action: &QueueAction) -> StoreResult<()> {
        let data = serde_json::to_string(action)?;
        let conn = self.lock();
        conn.execute(
            &format!("UPDATE {QUEUE_TABLE} SET status = ?1, data = ?2 WHERE id = ?3"),
            params![status_str(action.status), data, action.id.to_string()],
        )?;
        Ok(())
    }

    /// Removes completed actions, bounding queue growth.
    /// Returns the number of rows purged.
    pub fn purge_completed_actions(&self) -> StoreResult<usize> {
        let conn = self.lock();
        let purged = conn.execute(
            &format!("DELETE FROM {QUEUE_TABLE} WHERE status = ?1"),
            params![status_str(ActionStatus::Completed)],
        )?;
        Ok(purged)
    }

    /// Counts actions by status.
    pub fn queue_stats(&self) -> StoreResult<QueueStats> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT status, COUNT(*) FROM {QUEUE_TABLE} GROUP BY status"))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut stats = QueueStats::default();
        for row in rows {
            let (status, count) = row?;
            match status.as_str() {
                "pending" => stats.pending = count as usize,
                "completed" => stats.completed = count as usize,
                "failed" => stats.failed = count as usize,
                other => warn!(status = other, "unexpected queue status"),
            }
        }
        Ok(stats)
    }

    /// Fetches one action by id (diagnostics and tests).
    pub fn get_action(&self, id: ActionId) -> StoreResult<Option<QueueAction>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT data FROM {QUEUE_TABLE} WHERE id = ?1"))?;
        let mut rows = stmt.query(params![id.to_string()])?;
        match rows.next()? {
            Some(row) => {
                let data: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }
}
