//! Offline-first sync layer for the cortado point-of-sale core.
//!
//! Writes are recorded in a durable action queue and applied to the
//! remote system when connectivity allows:
//!
//! - [`ActionQueue`] persists write intents, with a fallback persistence
//!   for when the primary store refuses writes
//! - [`SyncEngine`] drains the queue with at-least-once delivery,
//!   Last-Write-Wins conflict handling, and retry backoff
//! - [`CachedReader`] serves reads remote-first with a mirror fallback
//! - [`ConnectivityTrigger`] runs cycles on reconnect and on a timer
//!
//! The transport is pluggable: [`RestTransport`] for production,
//! [`transport::mock::MockTransport`] for tests.

pub mod connectivity;
pub mod engine;
mod error;
pub mod queue;
mod read;
mod rest;
pub mod transport;

pub use connectivity::{ConnectivityProbe, ConnectivityTrigger, OnlineProbe, OnlineState};
pub use engine::{SyncEngine, SyncEngineConfig, SyncReport};
pub use error::{SyncError, SyncResult};
pub use queue::{ActionQueue, JsonFileQueue, MemoryQueue, QueuePersistence, StoreQueue, SyncHealth};
pub use read::{CachedReader, FetchResult};
pub use rest::{RestConfig, RestTransport};
pub use transport::RemoteTransport;
