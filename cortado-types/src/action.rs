//! Durable queue actions.
//!
//! Every write that must survive a connectivity loss is recorded as a
//! `QueueAction` before anything touches the network. Actions come in two
//! families: generic CRUD (reusable for any mirrored table) and order-domain
//! actions that map to named server-side procedures.

use crate::ids::{ActionId, RecordId};
use crate::record::{CustomerLink, OrderStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Processing state of a queue action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Not yet applied to the server.
    Pending,
    /// Applied (or intentionally skipped); eligible for purge.
    Completed,
    /// Exceeded the retry ceiling; kept for inspection, never auto-retried.
    Failed,
}

/// What a queue action does when it reaches the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Insert a row. Duplicate-key on replay is treated as success.
    Create {
        table: String,
        record_id: RecordId,
        row: Value,
    },
    /// Patch a row under Last-Write-Wins.
    Update {
        table: String,
        record_id: RecordId,
        patch: Value,
        /// When the local mutation happened; compared against the remote
        /// row's `updated_at`.
        edited_at: DateTime<Utc>,
    },
    /// Delete a row. Not-found on replay is treated as success.
    Delete { table: String, record_id: RecordId },
    /// Submit an offline-created order through the server procedure.
    CreateOrder {
        local_id: RecordId,
        /// Procedure parameter bag captured at enqueue time. Customer
        /// fields are re-read from the mirror at sync time, so later edits
        /// are not lost.
        params: Value,
    },
    /// Advance an order's status.
    UpdateOrderStatus {
        order_id: RecordId,
        /// Renamed on the wire: `QueueAction` flattens this enum, and the
        /// bare name would collide with `QueueAction::status`.
        #[serde(rename = "order_status")]
        status: OrderStatus,
    },
    /// Attach or change the customer on an order.
    UpdateOrderCustomer {
        order_id: RecordId,
        customer: CustomerLink,
    },
    /// Confirm payment for an order.
    ConfirmPayment { order_id: RecordId, method: String },
}

impl ActionKind {
    /// The (table, id) this action addresses, if any.
    #[must_use]
    pub fn target(&self) -> Option<(&str, &RecordId)> {
        match self {
            Self::Create { table, record_id, .. }
            | Self::Update { table, record_id, .. }
            | Self::Delete { table, record_id } => Some((table, record_id)),
            Self::CreateOrder { local_id, .. } => Some(("orders", local_id)),
            Self::UpdateOrderStatus { order_id, .. }
            | Self::UpdateOrderCustomer { order_id, .. }
            | Self::ConfirmPayment { order_id, .. } => Some(("orders", order_id)),
        }
    }

    /// Rewrites every reference to `old` with `new`.
    ///
    /// Called when a create action lands and the server issues the real id.
    /// Returns true if anything changed. The match is exhaustive on purpose:
    /// adding a variant without deciding its remap behavior will not compile.
    pub fn rewrite_target(&mut self, old: &RecordId, new: &RecordId) -> bool {
        let slot = match self {
            Self::Create { record_id, .. }
            | Self::Update { record_id, .. }
            | Self::Delete { record_id, .. } => record_id,
            Self::CreateOrder { local_id, .. } => local_id,
            Self::UpdateOrderStatus { order_id, .. }
            | Self::UpdateOrderCustomer { order_id, .. }
            | Self::ConfirmPayment { order_id, .. } => order_id,
        };
        if slot == old {
            *slot = new.clone();
            true
        } else {
            false
        }
    }

    /// Short name for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::CreateOrder { .. } => "create_order",
            Self::UpdateOrderStatus { .. } => "update_order_status",
            Self::UpdateOrderCustomer { .. } => "update_order_customer",
            Self::ConfirmPayment { .. } => "confirm_payment",
        }
    }
}

/// A durable write intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueAction {
    pub id: ActionId,
    #[serde(flatten)]
    pub kind: ActionKind,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
    /// Attempts so far.
    pub retries: u32,
    /// Backoff deadline; the engine skips the action until this passes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    /// Last error message, set on failed attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueueAction {
    /// Creates a fresh pending action.
    #[must_use]
    pub fn new(kind: ActionKind) -> Self {
        Self {
            id: ActionId::new(),
            kind,
            status: ActionStatus::Pending,
            created_at: Utc::now(),
            retries: 0,
            not_before: None,
            error: None,
        }
    }

    /// Whether the action is runnable at `now` (pending and past backoff).
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ActionStatus::Pending
            && self.not_before.map_or(true, |deadline| deadline <= now)
    }
}
