use chrono::{Duration, Utc};
use cortado_store::schema::QUEUE_TABLE;
use cortado_store::MirrorStore;
use cortado_types::{ActionKind, ActionStatus, QueueAction, RecordId};
use serde_json::json;

fn store() -> MirrorStore {
    MirrorStore::open_in_memory().unwrap()
}

fn delete_action() -> QueueAction {
    QueueAction::new(ActionKind::Delete {
        table: "orders".to_string(),
        record_id: RecordId::new_remote(),
    })
}

#[test]
fn append_then_list_pending() {
    let store = store();
    let action = delete_action();
    store.append_action(&action).unwrap();

    let pending = store.pending_actions().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, action.id);
    assert_eq!(pending[0].kind, action.kind);
}

#[test]
fn pending_actions_come_back_oldest_first() {
    let store = store();
    let mut first = delete_action();
    first.created_at = Utc::now() - Duration::minutes(10);
    let second = delete_action();
    // Inserted newest first; read order follows created_at, not insertion.
    store.append_action(&second).unwrap();
    store.append_action(&first).unwrap();

    let pending = store.pending_actions().unwrap();
    assert_eq!(pending[0].id, first.id);
    assert_eq!(pending[1].id, second.id);
}

#[test]
fn update_action_persists_status_and_retries() {
    let store = store();
    let mut action = delete_action();
    store.append_action(&action).unwrap();

    action.retries = 2;
    action.error = Some("network error: timed out".to_string());
    action.status = ActionStatus::Failed;
    store.update_action(&action).unwrap();

    assert!(store.pending_actions().unwrap().is_empty());
    let failed = store.failed_actions().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retries, 2);
    assert_eq!(failed[0].error.as_deref(), Some("network error: timed out"));
}

#[test]
fn purge_removes_only_completed() {
    let store = store();
    let mut done = delete_action();
    let mut dead = delete_action();
    let live = delete_action();
    store.append_action(&done).unwrap();
    store.append_action(&dead).unwrap();
    store.append_action(&live).unwrap();

    done.status = ActionStatus::Completed;
    store.update_action(&done).unwrap();
    dead.status = ActionStatus::Failed;
    store.update_action(&dead).unwrap();

    assert_eq!(store.purge_completed_actions().unwrap(), 1);
    let stats = store.queue_stats().unwrap();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.failed, 1);
}

#[test]
fn get_action_by_id() {
    let store = store();
    let action = delete_action();
    store.append_action(&action).unwrap();

    let fetched = store.get_action(action.id).unwrap().unwrap();
    assert_eq!(fetched.id, action.id);
    assert!(store.get_action(cortado_types::ActionId::new()).unwrap().is_none());
}

#[test]
fn undeserializable_row_is_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mirror.db");
    let store = MirrorStore::open(&path).unwrap();
    let action = delete_action();
    store.append_action(&action).unwrap();

    // A row written by some future app version with an unknown shape,
    // planted through a second connection.
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute(
        &format!("INSERT INTO {QUEUE_TABLE} (id, status, created_at, data) VALUES (?1, ?2, ?3, ?4)"),
        rusqlite::params![
            "future-row",
            "pending",
            "2026-01-01T00:00:00Z",
            json!({ "type": "teleport_order", "status": "pending" }).to_string()
        ],
    )
    .unwrap();

    let pending = store.pending_actions().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, action.id);
}
