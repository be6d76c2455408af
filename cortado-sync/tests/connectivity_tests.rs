use cortado_store::MirrorStore;
use cortado_sync::transport::mock::MockTransport;
use cortado_sync::{
    ActionQueue, ConnectivityProbe, ConnectivityTrigger, OnlineState, RemoteTransport,
    StoreQueue, SyncEngine, SyncEngineConfig,
};
use cortado_types::{ActionKind, QueueAction, RecordId};
use std::sync::Arc;
use std::time::Duration;

fn engine_with_pending(online: &OnlineState) -> (Arc<SyncEngine>, Arc<ActionQueue>) {
    let store = Arc::new(MirrorStore::open_in_memory().unwrap());
    let queue = Arc::new(ActionQueue::new(Box::new(StoreQueue::new(Arc::clone(&store)))));
    let engine = Arc::new(SyncEngine::new(
        store,
        Arc::clone(&queue),
        Arc::new(MockTransport::new()) as Arc<dyn RemoteTransport>,
        Arc::new(online.probe()),
        SyncEngineConfig::default(),
    ));
    queue
        .enqueue(QueueAction::new(ActionKind::Delete {
            table: "customers".to_string(),
            record_id: RecordId::new_remote(),
        }))
        .unwrap();
    (engine, queue)
}

async fn wait_until_drained(queue: &ActionQueue) -> bool {
    for _ in 0..200 {
        if queue.stats().unwrap().pending == 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ── OnlineState ───────────────────────────────────────────────────

#[tokio::test]
async fn probe_tracks_the_online_flag() {
    let online = OnlineState::new(true);
    let probe = online.probe();
    assert!(probe.is_online().await);

    online.set_online(false);
    assert!(!probe.is_online().await);
}

#[tokio::test]
async fn subscribers_observe_transitions() {
    let online = OnlineState::new(false);
    let mut rx = online.subscribe();
    online.set_online(true);
    rx.changed().await.unwrap();
    assert!(*rx.borrow());
}

#[test]
fn redundant_sets_do_not_change_state() {
    let online = OnlineState::new(true);
    online.set_online(true);
    assert!(online.online());
}

// ── ConnectivityTrigger ───────────────────────────────────────────

#[tokio::test]
async fn reconnect_runs_a_sync_cycle() {
    let online = OnlineState::new(false);
    let (engine, queue) = engine_with_pending(&online);
    let handle =
        ConnectivityTrigger::spawn(engine, online.subscribe(), Duration::from_secs(3600));

    online.set_online(true);
    assert!(wait_until_drained(&queue).await, "reconnect did not drain the queue");
    handle.abort();
}

#[tokio::test]
async fn going_offline_does_not_trigger() {
    let online = OnlineState::new(true);
    let (engine, queue) = engine_with_pending(&online);
    let handle =
        ConnectivityTrigger::spawn(engine, online.subscribe(), Duration::from_secs(3600));

    online.set_online(false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(queue.stats().unwrap().pending, 1);
    handle.abort();
}

#[tokio::test]
async fn periodic_tick_drains_expired_backoffs() {
    let online = OnlineState::new(true);
    let (engine, queue) = engine_with_pending(&online);
    let handle =
        ConnectivityTrigger::spawn(engine, online.subscribe(), Duration::from_millis(50));

    // No transition happens; only the timer can drain the queue.
    assert!(wait_until_drained(&queue).await, "periodic tick did not drain the queue");
    handle.abort();
}

#[tokio::test]
async fn trigger_exits_when_the_source_is_dropped() {
    let online = OnlineState::new(true);
    let (engine, _queue) = engine_with_pending(&online);
    let handle =
        ConnectivityTrigger::spawn(engine, online.subscribe(), Duration::from_secs(3600));

    drop(online);
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("trigger task did not exit")
        .unwrap();
}
