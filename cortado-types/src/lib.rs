//! Core type definitions for the cortado sync engine.
//!
//! This crate defines the types shared between the local mirror store and
//! the sync engine:
//! - Record identifiers, tagged as client-generated (`Local`) or
//!   server-issued (`Remote`)
//! - Durable queue actions (generic CRUD plus order-domain actions)
//! - Order and order-item records as the engine sees them
//!
//! UI state, catalog models, loyalty arithmetic and everything else that
//! only *calls* the engine belongs to the application, not here.

mod action;
mod ids;
mod record;

pub use action::{ActionKind, ActionStatus, QueueAction};
pub use ids::{ActionId, IdError, RecordId};
pub use record::{CustomerLink, Order, OrderItem, OrderStatus};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
///
/// Identifier parsing has its own error type, [`IdError`], since callers
/// handle a bad id differently from a bad record body.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
