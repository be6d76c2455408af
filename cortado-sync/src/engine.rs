//! The sync engine.
//!
//! Drains the action queue against the remote system. Delivery is
//! at-least-once: every remote operation is idempotent or its replay
//! error (duplicate key, not found) is treated as success, so a crash
//! between "applied remotely" and "marked completed" only costs a
//! harmless replay.
//!
//! One cycle runs at a time. A cycle walks pending actions oldest first,
//! dispatches each, and on failure schedules a retry with exponential
//! backoff until the ceiling, after which the action is parked as failed
//! and the local record is annotated.

use crate::connectivity::ConnectivityProbe;
use crate::error::{SyncError, SyncResult};
use crate::queue::ActionQueue;
use crate::transport::RemoteTransport;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cortado_store::MirrorStore;
use cortado_types::{ActionKind, ActionStatus, CustomerLink, OrderStatus, QueueAction, RecordId};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tunables for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// Attempts before an action is parked as failed.
    pub max_retries: u32,
    /// First retry delay; doubles on each subsequent failure.
    pub backoff_base: Duration,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self { max_retries: 5, backoff_base: Duration::from_secs(1) }
    }
}

/// What one sync cycle accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Actions applied (or benignly skipped) this cycle.
    pub synced: usize,
    /// Actions that failed this cycle (retrying or parked).
    pub failed: usize,
    /// True when the cycle did not run (offline, or one already running).
    pub skipped: bool,
}

impl SyncReport {
    fn skipped() -> Self {
        Self { skipped: true, ..Self::default() }
    }
}

/// Outcome of dispatching a single action.
enum Dispatch {
    /// Applied remotely (or benignly redundant).
    Applied,
    /// Intentionally not applied; complete without remote effect.
    Skipped(&'static str),
}

/// Drains the durable action queue against the remote system.
pub struct SyncEngine {
    store: Arc<MirrorStore>,
    queue: Arc<ActionQueue>,
    transport: Arc<dyn RemoteTransport>,
    probe: Arc<dyn ConnectivityProbe>,
    config: SyncEngineConfig,
    /// Held for the duration of a cycle; `try_lock` makes overlapping
    /// callers bounce instead of queueing up.
    cycle: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<MirrorStore>,
        queue: Arc<ActionQueue>,
        transport: Arc<dyn RemoteTransport>,
        probe: Arc<dyn ConnectivityProbe>,
        config: SyncEngineConfig,
    ) -> Self {
        Self { store, queue, transport, probe, config, cycle: tokio::sync::Mutex::new(()) }
    }

    /// Runs one sync cycle.
    ///
    /// Returns a skipped report when offline or when another cycle holds
    /// the latch. Per-action failures are counted in the report, not
    /// returned as errors; only queue/store breakage aborts the cycle.
    pub async fn sync(&self) -> SyncResult<SyncReport> {
        let Ok(_guard) = self.cycle.try_lock() else {
            debug!("sync cycle already running");
            return Ok(SyncReport::skipped());
        };
        if !self.probe.is_online().await {
            debug!("offline, sync cycle skipped");
            return Ok(SyncReport::skipped());
        }

        let pending = self.queue.pending()?;
        if pending.is_empty() {
            return Ok(SyncReport::default());
        }
        info!(pending = pending.len(), "sync cycle starting");

        let mut report = SyncReport::default();
        let now = Utc::now();
        for mut action in pending {
            if !action.is_due(now) {
                continue;
            }
            match self.dispatch(&action).await {
                Ok(Dispatch::Applied) => {
                    self.queue.mark_completed(&mut action)?;
                    report.synced += 1;
                }
                Ok(Dispatch::Skipped(reason)) => {
                    debug!(action_id = %action.id, kind = action.kind.name(), reason,
                           "action completed without remote effect");
                    self.queue.mark_completed(&mut action)?;
                    report.synced += 1;
                }
                Err(e) => {
                    self.handle_failure(&mut action, &e)?;
                    report.failed += 1;
                }
            }
        }

        let purged = self.queue.purge_completed()?;
        info!(synced = report.synced, failed = report.failed, purged, "sync cycle finished");
        Ok(report)
    }

    /// Applies one action remotely.
    async fn dispatch(&self, action: &QueueAction) -> SyncResult<Dispatch> {
        match &action.kind {
            ActionKind::Create { table, record_id, row } => {
                self.apply_create(table, record_id, row).await
            }
            ActionKind::Update { table, record_id, patch, edited_at } => {
                self.apply_update(table, record_id, patch, *edited_at).await
            }
            ActionKind::Delete { table, record_id } => self.apply_delete(table, record_id).await,
            ActionKind::CreateOrder { local_id, params } => {
                self.apply_create_order(local_id, params).await
            }
            ActionKind::UpdateOrderStatus { order_id, status } => {
                self.apply_order_status(order_id, *status).await
            }
            ActionKind::UpdateOrderCustomer { order_id, customer } => {
                self.apply_order_customer(order_id, customer).await
            }
            ActionKind::ConfirmPayment { order_id, method } => {
                self.apply_confirm_payment(order_id, method).await
            }
        }
    }

    // ── Generic CRUD ─────────────────────────────────────────────

    async fn apply_create(
        &self,
        table: &str,
        record_id: &RecordId,
        row: &Value,
    ) -> SyncResult<Dispatch> {
        match self.transport.insert(table, row).await {
            Ok(()) => {}
            // Already there from an earlier attempt that crashed before
            // the action was marked completed.
            Err(SyncError::DuplicateKey) => {
                warn!(table, id = %record_id, "insert replay hit existing row, treating as applied");
            }
            Err(e) => return Err(e),
        }
        self.clear_pending_flag(table, record_id)?;
        Ok(Dispatch::Applied)
    }

    async fn apply_update(
        &self,
        table: &str,
        record_id: &RecordId,
        patch: &Value,
        edited_at: DateTime<Utc>,
    ) -> SyncResult<Dispatch> {
        let Some(remote_id) = record_id.as_remote() else {
            // A generic update should never still carry a local id when it
            // runs; the remap rewrites pending actions. Stale state from an
            // older client is completed without effect rather than wedging
            // the queue.
            warn!(table, id = %record_id, "update action carries a local id, skipping");
            return Ok(Dispatch::Skipped("local id on generic update"));
        };

        // Last-Write-Wins: a remote row touched after this local edit keeps
        // the remote version.
        if let Some(remote_ts) = self.transport.fetch_updated_at(table, &remote_id).await? {
            if remote_ts >= edited_at {
                debug!(table, id = %remote_id, %remote_ts, %edited_at,
                       "remote row is newer, local update discarded");
                self.clear_pending_flag(table, record_id)?;
                return Ok(Dispatch::Skipped("remote row newer"));
            }
        }

        let mut patch = patch.clone();
        if let Some(obj) = patch.as_object_mut() {
            obj.insert("updated_at".to_string(), Value::String(Utc::now().to_rfc3339()));
        }
        self.transport.update(table, &remote_id, &patch).await?;
        self.clear_pending_flag(table, record_id)?;
        Ok(Dispatch::Applied)
    }

    async fn apply_delete(&self, table: &str, record_id: &RecordId) -> SyncResult<Dispatch> {
        let Some(remote_id) = record_id.as_remote() else {
            // The record never reached the server, so there is nothing to
            // delete remotely. The local row is already gone.
            return Ok(Dispatch::Skipped("local-only record"));
        };
        match self.transport.delete(table, &remote_id).await {
            Ok(()) => Ok(Dispatch::Applied),
            // Gone already, by this client or another terminal.
            Err(SyncError::NotFound) => {
                warn!(table, id = %remote_id, "delete replay found no row, treating as applied");
                Ok(Dispatch::Applied)
            }
            Err(e) => Err(e),
        }
    }

    // ── Order procedures ─────────────────────────────────────────

    /// Submits an offline-created order and remaps its local id to the
    /// server-issued one.
    async fn apply_create_order(
        &self,
        local_id: &RecordId,
        params: &Value,
    ) -> SyncResult<Dispatch> {
        if local_id.is_remote() {
            // Remapped by an earlier partial run of this same action.
            return Ok(Dispatch::Skipped("order already submitted"));
        }
        let Some(order) = self.store.get("orders", local_id)? else {
            // Deleted locally before it ever synced.
            return Ok(Dispatch::Skipped("order gone before sync"));
        };
        if order.get("processing").and_then(Value::as_bool) == Some(true) {
            // Another submission is in flight for this order. With the
            // cycle latch this means a previous cycle crashed mid-submit;
            // completing here avoids double-charging, and the flag is
            // visible for manual recovery.
            warn!(id = %local_id, "order marked processing, skipping resubmission");
            return Ok(Dispatch::Skipped("processing guard set"));
        }

        self.store.patch("orders", local_id, &json!({ "processing": true }))?;

        // Customer fields are re-read from the current mirror row so edits
        // made after the order was queued still reach the server.
        let mut params = params.clone();
        if let Some(obj) = params.as_object_mut() {
            obj.insert(
                "p_customer_id".to_string(),
                order.get("customer_id").cloned().unwrap_or(Value::Null),
            );
            obj.insert(
                "p_customer_name".to_string(),
                order.get("customer_name").cloned().unwrap_or(Value::Null),
            );
            obj.insert(
                "p_customer_phone".to_string(),
                order.get("customer_phone").cloned().unwrap_or(Value::Null),
            );
        }

        let response = match self.transport.call("submit_order", &params).await {
            Ok(response) => response,
            Err(e) => {
                // Release the guard so the retry can submit again.
                if let Err(clear_err) =
                    self.store.patch("orders", local_id, &json!({ "processing": false }))
                {
                    warn!(id = %local_id, error = %clear_err, "failed to clear processing guard");
                }
                return Err(e);
            }
        };

        let server_id = response
            .get("order_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| {
                SyncError::InvalidRecord(format!("submit_order response missing order_id: {response}"))
            })?;
        let order_number = response.get("order_number").and_then(Value::as_i64);
        let new_id = RecordId::from_uuid(server_id);

        // One transaction: order row, child rows, pending store actions.
        self.store.remap_order(local_id, &new_id, order_number)?;
        // Fallback-held actions are outside that transaction.
        self.queue.rewrite_pending(local_id, &new_id)?;

        // The order may have advanced past in_progress while offline; the
        // server procedure always creates it as in_progress.
        let status = order
            .get("order_status")
            .cloned()
            .map(serde_json::from_value::<OrderStatus>)
            .transpose()?
            .unwrap_or_default();
        if status != OrderStatus::InProgress {
            if let Err(e) = self.push_order_status(&new_id, status).await {
                // The order itself landed; recover the status by queueing
                // it as its own action against the server id.
                warn!(id = %new_id, error = %e, "status push after submit failed, re-queueing");
                self.queue.enqueue(QueueAction::new(ActionKind::UpdateOrderStatus {
                    order_id: new_id.clone(),
                    status,
                }))?;
            }
        }

        info!(local = %local_id, remote = %new_id, order_number, "order submitted");
        Ok(Dispatch::Applied)
    }

    async fn apply_order_status(
        &self,
        order_id: &RecordId,
        status: OrderStatus,
    ) -> SyncResult<Dispatch> {
        let Some(remote_id) = order_id.as_remote() else {
            // The create action runs first (FIFO) and carries the order's
            // current status, so a still-local id here is stale state.
            return Ok(Dispatch::Skipped("order not yet submitted"));
        };
        self.push_order_status(&RecordId::from_uuid(remote_id), status).await?;
        self.clear_pending_flag("orders", order_id)?;
        Ok(Dispatch::Applied)
    }

    /// Writes an order status remotely, cascading to its line items.
    async fn push_order_status(&self, order_id: &RecordId, status: OrderStatus) -> SyncResult<()> {
        let remote_id = order_id
            .as_remote()
            .ok_or_else(|| SyncError::InvalidRecord(format!("local id in status push: {order_id}")))?;
        let mut patch = json!({
            "order_status": status,
            "updated_at": Utc::now().to_rfc3339(),
        });
        if status == OrderStatus::Ready {
            patch["ready_at"] = Value::String(Utc::now().to_rfc3339());
        }
        self.transport.update("orders", &remote_id, &patch).await?;
        self.transport
            .update_matching(
                "order_items",
                "order_id",
                &Value::String(remote_id.to_string()),
                &json!({ "item_status": status.item_status() }),
            )
            .await?;
        Ok(())
    }

    async fn apply_order_customer(
        &self,
        order_id: &RecordId,
        customer: &CustomerLink,
    ) -> SyncResult<Dispatch> {
        let Some(remote_id) = order_id.as_remote() else {
            // Customer fields ride along with the create, re-read from the
            // mirror at submit time.
            return Ok(Dispatch::Skipped("order not yet submitted"));
        };
        self.transport
            .call(
                "update_order_customer",
                &json!({
                    "p_order_id": remote_id.to_string(),
                    "p_customer_id": customer.customer_id,
                    "p_customer_name": customer.name,
                    "p_customer_phone": customer.phone,
                }),
            )
            .await?;
        self.clear_pending_flag("orders", order_id)?;
        Ok(Dispatch::Applied)
    }

    async fn apply_confirm_payment(
        &self,
        order_id: &RecordId,
        method: &str,
    ) -> SyncResult<Dispatch> {
        let Some(remote_id) = order_id.as_remote() else {
            return Ok(Dispatch::Skipped("order not yet submitted"));
        };
        self.transport
            .call(
                "confirm_order_payment",
                &json!({
                    "p_order_id": remote_id.to_string(),
                    "p_payment_method": method,
                }),
            )
            .await?;
        self.clear_pending_flag("orders", order_id)?;
        Ok(Dispatch::Applied)
    }

    // ── Failure bookkeeping ──────────────────────────────────────

    /// Schedules a retry, or parks the action once the ceiling is hit.
    fn handle_failure(&self, action: &mut QueueAction, error: &SyncError) -> SyncResult<()> {
        action.retries += 1;
        action.error = Some(error.to_string());

        if action.retries >= self.config.max_retries {
            action.status = ActionStatus::Failed;
            warn!(action_id = %action.id, kind = action.kind.name(), retries = action.retries,
                  error = %error, "action hit retry ceiling, parked as failed");
            self.annotate_failed_record(action, error);
        } else {
            let delay = self.config.backoff_base * 2u32.saturating_pow(action.retries);
            let delay = ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::MAX);
            action.not_before = Utc::now().checked_add_signed(delay);
            debug!(action_id = %action.id, kind = action.kind.name(), retries = action.retries,
                   error = %error, "action failed, retry scheduled");
        }
        self.queue.update(action)
    }

    /// Marks the targeted mirror record so the UI can show the terminal
    /// failure. The record may be gone; that is fine.
    fn annotate_failed_record(&self, action: &QueueAction, error: &SyncError) {
        let Some((table, record_id)) = action.kind.target() else {
            return;
        };
        let patch = json!({
            "sync_error": error.to_string(),
            "pending_sync": false,
            "processing": false,
        });
        match self.store.patch(table, record_id, &patch) {
            Ok(_) => {}
            Err(e) => warn!(table, id = %record_id, error = %e, "failed to annotate record"),
        }
    }

    /// Clears the pending-sync marker on a mirror record, if it still
    /// exists.
    fn clear_pending_flag(&self, table: &str, record_id: &RecordId) -> SyncResult<()> {
        self.store.patch(table, record_id, &json!({ "pending_sync": false, "sync_error": null }))?;
        Ok(())
    }
}
