//! Order records as mirrored on the device.
//!
//! These are the rows the kitchen display renders and mutates offline.
//! Bookkeeping fields (`pending_sync`, `processing`, `sync_error`) exist
//! only in the local mirror and are never sent to the server.

use crate::ids::RecordId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Being prepared. Every new order starts here.
    #[default]
    InProgress,
    /// Ready for pickup/serving.
    Ready,
    /// Picked up / served.
    Completed,
}

impl OrderStatus {
    /// The item-level status that matches this order status.
    #[must_use]
    pub fn item_status(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Ready => "ready",
            Self::Completed => "completed",
        }
    }
}

/// Link between an order and a customer record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerLink {
    /// Server-side customer id, when known.
    pub customer_id: Option<Uuid>,
    /// Display name as entered at the register.
    pub name: Option<String>,
    /// Phone number for loyalty lookup.
    pub phone: Option<String>,
}

/// An order row in the local mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: RecordId,
    /// Server-assigned sequence number; absent until first sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_number: Option<i64>,
    #[serde(default)]
    pub order_status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub total_amount: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_at: Option<DateTime<Utc>>,
    /// True while a local mutation has not reached the server.
    #[serde(default)]
    pub pending_sync: bool,
    /// Double-submission guard set while a create is in flight.
    #[serde(default)]
    pub processing: bool,
    /// Terminal sync failure annotation, for inspection in the UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_error: Option<String>,
}

impl Order {
    /// Creates an offline order with a fresh local id.
    #[must_use]
    pub fn new_offline() -> Self {
        let now = Utc::now();
        Self {
            id: RecordId::new_local(),
            order_number: None,
            order_status: OrderStatus::default(),
            customer_id: None,
            customer_name: None,
            customer_phone: None,
            total_amount: 0.0,
            created_at: now,
            updated_at: now,
            ready_at: None,
            pending_sync: true,
            processing: false,
            sync_error: None,
        }
    }

    /// Serializes the order to a store row.
    pub fn to_row(&self) -> crate::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserializes an order from a store row.
    pub fn from_row(row: &Value) -> crate::Result<Self> {
        Ok(serde_json::from_value(row.clone())?)
    }
}

/// A line item belonging to an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: RecordId,
    /// Owning order; rewritten when the order id is remapped.
    pub order_id: RecordId,
    pub menu_item_id: Uuid,
    pub quantity: u32,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default = "default_item_status")]
    pub item_status: String,
    pub created_at: DateTime<Utc>,
}

fn default_item_status() -> String {
    OrderStatus::InProgress.item_status().to_string()
}

impl OrderItem {
    /// Creates a line item for an offline order.
    #[must_use]
    pub fn new_offline(order_id: RecordId, menu_item_id: Uuid, quantity: u32, price: f64) -> Self {
        Self {
            id: RecordId::new_local(),
            order_id,
            menu_item_id,
            quantity,
            price,
            notes: None,
            item_status: default_item_status(),
            created_at: Utc::now(),
        }
    }

    /// Serializes the item to a store row.
    pub fn to_row(&self) -> crate::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserializes an item from a store row.
    pub fn from_row(row: &Value) -> crate::Result<Self> {
        Ok(serde_json::from_value(row.clone())?)
    }
}
