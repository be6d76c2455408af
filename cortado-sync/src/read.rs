//! The read path: remote when possible, mirror when not.
//!
//! Reads prefer the remote system and refresh the mirror as a side
//! effect. When offline, or when the remote call fails with a network
//! error, the mirror answers instead. Non-network remote errors (auth,
//! bad request) propagate; a cached answer would only mask them.

use crate::connectivity::ConnectivityProbe;
use crate::error::SyncResult;
use crate::transport::RemoteTransport;
use cortado_store::{MirrorStore, Query};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Rows plus where they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub rows: Vec<Value>,
    /// True when the mirror answered (offline or network failure).
    pub from_cache: bool,
}

/// Remote-first reader with a mirror fallback.
pub struct CachedReader {
    store: Arc<MirrorStore>,
    transport: Arc<dyn RemoteTransport>,
    probe: Arc<dyn ConnectivityProbe>,
}

impl CachedReader {
    pub fn new(
        store: Arc<MirrorStore>,
        transport: Arc<dyn RemoteTransport>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> Self {
        Self { store, transport, probe }
    }

    /// Runs a filtered read against the remote, falling back to the mirror.
    ///
    /// A successful remote read refreshes the mirror so the next offline
    /// stretch serves current data. The refresh is best effort; a mirror
    /// write failure is logged, not surfaced, because the caller already
    /// has the rows.
    pub async fn fetch(&self, table: &str, query: &Query) -> SyncResult<FetchResult> {
        if !self.probe.is_online().await {
            debug!(table, "offline, reading from mirror");
            return self.from_mirror(table, query);
        }

        match self.transport.select(table, query).await {
            Ok(rows) => {
                if let Err(e) = self.refresh_mirror(table, &rows) {
                    warn!(table, error = %e, "mirror refresh failed after remote read");
                }
                Ok(FetchResult { rows, from_cache: false })
            }
            Err(e) if e.is_network() => {
                warn!(table, error = %e, "remote read failed, falling back to mirror");
                self.from_mirror(table, query)
            }
            Err(e) => Err(e),
        }
    }

    fn from_mirror(&self, table: &str, query: &Query) -> SyncResult<FetchResult> {
        let rows = self.store.query(table, query)?;
        Ok(FetchResult { rows, from_cache: true })
    }

    fn refresh_mirror(&self, table: &str, rows: &[Value]) -> SyncResult<()> {
        self.store.bulk_put(table, rows)?;
        self.store.record_table_synced(table, rows.len())?;
        Ok(())
    }
}
