//! SQLite-backed local mirror for the cortado sync engine.
//!
//! Provides the durable on-device cache the UI renders from and the queue
//! writes through:
//!
//! - Records are stored as JSON blobs with schema-declared indexed fields
//! - The schema is versioned; migrations apply in increasing order on open
//! - Queue rows persist write intents until the sync engine drains them
//! - Identifier remaps (local id → server id) run as one transaction
//!
//! The store is a cache. The remote system is authoritative for everything
//! except records that have not synced yet.

mod error;
mod query;
mod queue;
mod remap;
pub mod schema;
mod store;

pub use error::{StoreError, StoreResult};
pub use query::{OrderBy, Query};
pub use queue::QueueStats;
pub use store::{MirrorStore, TableSyncMeta};
