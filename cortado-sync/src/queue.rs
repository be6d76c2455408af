//! The durable action queue.
//!
//! Writes are recorded here before anything touches the network. The
//! primary persistence is the mirror store's queue table; if that write
//! fails (disk full, corrupted database) the action lands in a fallback
//! persistence instead, so the write intent is never silently dropped.

use crate::error::SyncResult;
use cortado_store::{MirrorStore, QueueStats};
use cortado_types::{ActionId, ActionStatus, QueueAction, RecordId};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Where queue actions are durably kept.
///
/// Implementations must preserve actions across process restarts (the
/// in-memory test double excepted) and tolerate `update` calls for ids
/// they do not hold.
pub trait QueuePersistence: Send + Sync {
    fn append(&self, action: &QueueAction) -> SyncResult<()>;
    /// Pending actions in creation order.
    fn pending(&self) -> SyncResult<Vec<QueueAction>>;
    /// Persists an action's current state. Unknown ids are a no-op.
    fn update(&self, action: &QueueAction) -> SyncResult<()>;
    /// Drops completed actions; returns how many were removed.
    fn purge_completed(&self) -> SyncResult<usize>;
    fn stats(&self) -> SyncResult<QueueStats>;
}

/// Primary persistence: the mirror store's queue table.
pub struct StoreQueue {
    store: Arc<MirrorStore>,
}

impl StoreQueue {
    pub fn new(store: Arc<MirrorStore>) -> Self {
        Self { store }
    }
}

impl QueuePersistence for StoreQueue {
    fn append(&self, action: &QueueAction) -> SyncResult<()> {
        Ok(self.store.append_action(action)?)
    }

    fn pending(&self) -> SyncResult<Vec<QueueAction>> {
        Ok(self.store.pending_actions()?)
    }

    fn update(&self, action: &QueueAction) -> SyncResult<()> {
        Ok(self.store.update_action(action)?)
    }

    fn purge_completed(&self) -> SyncResult<usize> {
        Ok(self.store.purge_completed_actions()?)
    }

    fn stats(&self) -> SyncResult<QueueStats> {
        Ok(self.store.queue_stats()?)
    }
}

/// Fallback persistence: a JSON file rewritten on every mutation.
///
/// Slow but dependable, and only ever used when the database itself is
/// refusing writes. The whole file is read and rewritten under a lock.
pub struct JsonFileQueue {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    fn load(&self) -> SyncResult<Vec<QueueAction>> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    // Write-then-rename so a crash mid-write leaves the previous file
    // intact instead of a truncated one.
    fn save(&self, actions: &[QueueAction]) -> SyncResult<()> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string(actions)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl QueuePersistence for JsonFileQueue {
    fn append(&self, action: &QueueAction) -> SyncResult<()> {
        let _guard = self.lock.lock().unwrap();
        let mut actions = self.load()?;
        actions.push(action.clone());
        self.save(&actions)
    }

    fn pending(&self) -> SyncResult<Vec<QueueAction>> {
        let _guard = self.lock.lock().unwrap();
        let mut actions: Vec<QueueAction> = self
            .load()?
            .into_iter()
            .filter(|a| a.status == ActionStatus::Pending)
            .collect();
        actions.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(actions)
    }

    fn update(&self, action: &QueueAction) -> SyncResult<()> {
        let _guard = self.lock.lock().unwrap();
        let mut actions = self.load()?;
        let mut changed = false;
        for slot in &mut actions {
            if slot.id == action.id {
                *slot = action.clone();
                changed = true;
            }
        }
        if changed {
            self.save(&actions)?;
        }
        Ok(())
    }

    fn purge_completed(&self) -> SyncResult<usize> {
        let _guard = self.lock.lock().unwrap();
        let mut actions = self.load()?;
        let before = actions.len();
        actions.retain(|a| a.status != ActionStatus::Completed);
        let purged = before - actions.len();
        if purged > 0 {
            self.save(&actions)?;
        }
        Ok(purged)
    }

    fn stats(&self) -> SyncResult<QueueStats> {
        let _guard = self.lock.lock().unwrap();
        let mut stats = QueueStats::default();
        for action in self.load()? {
            match action.status {
                ActionStatus::Pending => stats.pending += 1,
                ActionStatus::Completed => stats.completed += 1,
                ActionStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

/// In-memory persistence for tests, with fault injection on append.
///
/// Clones share state, so a test can box one handle into the queue and
/// keep another for assertions.
#[derive(Default, Clone)]
pub struct MemoryQueue {
    inner: Arc<Mutex<MemoryQueueInner>>,
}

#[derive(Default)]
struct MemoryQueueInner {
    actions: Vec<QueueAction>,
    fail_appends: bool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every `append` fails as if the backing storage broke.
    pub fn set_fail_appends(&self, fail: bool) {
        self.inner.lock().unwrap().fail_appends = fail;
    }

    /// Snapshot of every held action regardless of status.
    pub fn all(&self) -> Vec<QueueAction> {
        self.inner.lock().unwrap().actions.clone()
    }
}

impl QueuePersistence for MemoryQueue {
    fn append(&self, action: &QueueAction) -> SyncResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_appends {
            return Err(std::io::Error::other("append rejected").into());
        }
        inner.actions.push(action.clone());
        Ok(())
    }

    fn pending(&self) -> SyncResult<Vec<QueueAction>> {
        let mut actions: Vec<QueueAction> = self
            .inner
            .lock()
            .unwrap()
            .actions
            .iter()
            .filter(|a| a.status == ActionStatus::Pending)
            .cloned()
            .collect();
        actions.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(actions)
    }

    fn update(&self, action: &QueueAction) -> SyncResult<()> {
        for slot in self.inner.lock().unwrap().actions.iter_mut() {
            if slot.id == action.id {
                *slot = action.clone();
            }
        }
        Ok(())
    }

    fn purge_completed(&self) -> SyncResult<usize> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.actions.len();
        inner.actions.retain(|a| a.status != ActionStatus::Completed);
        Ok(before - inner.actions.len())
    }

    fn stats(&self) -> SyncResult<QueueStats> {
        let mut stats = QueueStats::default();
        for action in &self.inner.lock().unwrap().actions {
            match action.status {
                ActionStatus::Pending => stats.pending += 1,
                ActionStatus::Completed => stats.completed += 1,
                ActionStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

/// Coarse queue condition for surfacing in a status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncHealth {
    /// Nothing waiting.
    Idle,
    /// Actions waiting to sync.
    Pending(usize),
    /// Some actions hit the retry ceiling and need attention.
    Degraded { failed: usize, pending: usize },
}

/// The action queue: primary persistence plus an optional fallback.
pub struct ActionQueue {
    primary: Box<dyn QueuePersistence>,
    fallback: Option<Box<dyn QueuePersistence>>,
}

impl ActionQueue {
    pub fn new(primary: Box<dyn QueuePersistence>) -> Self {
        Self { primary, fallback: None }
    }

    pub fn with_fallback(
        primary: Box<dyn QueuePersistence>,
        fallback: Box<dyn QueuePersistence>,
    ) -> Self {
        Self { primary, fallback: Some(fallback) }
    }

    /// Records a write intent durably.
    ///
    /// Failing the primary write routes the action to the fallback; only
    /// when both refuse does the caller see an error, and at that point
    /// the write truly cannot be preserved.
    pub fn enqueue(&self, action: QueueAction) -> SyncResult<ActionId> {
        let id = action.id;
        match self.primary.append(&action) {
            Ok(()) => {
                debug!(action_id = %id, kind = action.kind.name(), "queued action");
                Ok(id)
            }
            Err(primary_err) => {
                let Some(fallback) = &self.fallback else {
                    return Err(primary_err);
                };
                warn!(action_id = %id, error = %primary_err,
                      "primary queue write failed, using fallback");
                fallback.append(&action)?;
                Ok(id)
            }
        }
    }

    /// Pending actions from both persistences, oldest first.
    pub fn pending(&self) -> SyncResult<Vec<QueueAction>> {
        let mut actions = self.primary.pending()?;
        if let Some(fallback) = &self.fallback {
            match fallback.pending() {
                Ok(extra) => actions.extend(extra),
                Err(e) => warn!(error = %e, "fallback queue unreadable, draining primary only"),
            }
        }
        actions.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(actions)
    }

    /// Persists an action's state to whichever persistence holds it.
    ///
    /// Updates are applied to both sides; the side without the id treats
    /// it as a no-op.
    pub fn update(&self, action: &QueueAction) -> SyncResult<()> {
        self.primary.update(action)?;
        if let Some(fallback) = &self.fallback {
            fallback.update(action)?;
        }
        Ok(())
    }

    pub fn mark_completed(&self, action: &mut QueueAction) -> SyncResult<()> {
        action.status = ActionStatus::Completed;
        action.error = None;
        self.update(action)
    }

    /// Rewrites pending fallback actions that reference `old`.
    ///
    /// The store-side rewrite happens inside the remap transaction; this
    /// covers actions that were routed to the fallback.
    pub fn rewrite_pending(&self, old: &RecordId, new: &RecordId) -> SyncResult<usize> {
        let Some(fallback) = &self.fallback else {
            return Ok(0);
        };
        let mut rewritten = 0;
        for mut action in fallback.pending()? {
            if action.kind.rewrite_target(old, new) {
                fallback.update(&action)?;
                rewritten += 1;
            }
        }
        Ok(rewritten)
    }

    /// Drops completed actions from both persistences.
    pub fn purge_completed(&self) -> SyncResult<usize> {
        let mut purged = self.primary.purge_completed()?;
        if let Some(fallback) = &self.fallback {
            purged += fallback.purge_completed()?;
        }
        Ok(purged)
    }

    /// Combined counts across both persistences.
    pub fn stats(&self) -> SyncResult<QueueStats> {
        let mut stats = self.primary.stats()?;
        if let Some(fallback) = &self.fallback {
            let extra = fallback.stats()?;
            stats.pending += extra.pending;
            stats.completed += extra.completed;
            stats.failed += extra.failed;
        }
        Ok(stats)
    }

    /// Condition summary for a status indicator.
    pub fn health(&self) -> SyncResult<SyncHealth> {
        let stats = self.stats()?;
        Ok(if stats.failed > 0 {
            SyncHealth::Degraded { failed: stats.failed, pending: stats.pending }
        } else if stats.pending > 0 {
            SyncHealth::Pending(stats.pending)
        } else {
            SyncHealth::Idle
        })
    }
}
