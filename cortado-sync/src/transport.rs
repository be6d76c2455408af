//! Remote transport abstraction.
//!
//! The sync engine talks to the server through this trait: row-level CRUD
//! with filter predicates, plus named procedures treated as opaque atomic
//! operations ("submit_order", "update_order_customer",
//! "confirm_order_payment").

use crate::error::SyncResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cortado_store::Query;
use serde_json::Value;
use uuid::Uuid;

/// A transport to the authoritative remote system.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Inserts a row. Returns `SyncError::DuplicateKey` if the id exists.
    async fn insert(&self, table: &str, row: &Value) -> SyncResult<()>;

    /// Fetches a row's `updated_at`, or `None` if the row (or the field)
    /// is missing.
    async fn fetch_updated_at(&self, table: &str, id: &Uuid) -> SyncResult<Option<DateTime<Utc>>>;

    /// Patches a row by id. Patching a missing row is a no-op.
    async fn update(&self, table: &str, id: &Uuid, patch: &Value) -> SyncResult<()>;

    /// Patches every row where `field` equals `value` (e.g. all line items
    /// of one order).
    async fn update_matching(
        &self,
        table: &str,
        field: &str,
        value: &Value,
        patch: &Value,
    ) -> SyncResult<()>;

    /// Deletes a row. Returns `SyncError::NotFound` if it does not exist.
    async fn delete(&self, table: &str, id: &Uuid) -> SyncResult<()>;

    /// Runs a filtered select.
    async fn select(&self, table: &str, query: &Query) -> SyncResult<Vec<Value>>;

    /// Calls a named server-side procedure with a parameter bag.
    async fn call(&self, procedure: &str, params: &Value) -> SyncResult<Value>;
}

/// A scriptable in-memory transport for testing.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockState {
        /// Rows by table, keyed by id string.
        rows: HashMap<String, Vec<Value>>,
        /// Scripted responses per procedure; consumed front to back.
        rpc_scripts: HashMap<String, VecDeque<Result<Value, String>>>,
        /// When set, every operation fails with a network error.
        network_down: bool,
        /// Every procedure call, in order.
        calls: Vec<(String, Value)>,
        next_order_number: i64,
    }

    /// In-memory stand-in for the remote system.
    #[derive(Default)]
    pub struct MockTransport {
        state: Mutex<MockState>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                state: Mutex::new(MockState { next_order_number: 100, ..Default::default() }),
            }
        }

        /// Simulates losing (or regaining) the network.
        pub fn set_network_down(&self, down: bool) {
            self.state.lock().unwrap().network_down = down;
        }

        /// Scripts the next response for a procedure. `Err` strings become
        /// network errors.
        pub fn script_call(&self, procedure: &str, response: Result<Value, &str>) {
            self.state
                .lock()
                .unwrap()
                .rpc_scripts
                .entry(procedure.to_string())
                .or_default()
                .push_back(response.map_err(str::to_string));
        }

        /// Seeds a remote row.
        pub fn seed_row(&self, table: &str, row: Value) {
            self.state.lock().unwrap().rows.entry(table.to_string()).or_default().push(row);
        }

        /// Returns a snapshot of a table's rows.
        pub fn rows(&self, table: &str) -> Vec<Value> {
            self.state.lock().unwrap().rows.get(table).cloned().unwrap_or_default()
        }

        /// Finds one row by id string.
        pub fn find_row(&self, table: &str, id: &str) -> Option<Value> {
            self.rows(table).into_iter().find(|r| r.get("id").and_then(Value::as_str) == Some(id))
        }

        /// Returns every procedure call made so far.
        pub fn calls(&self) -> Vec<(String, Value)> {
            self.state.lock().unwrap().calls.clone()
        }

        fn check_network(state: &MockState) -> SyncResult<()> {
            if state.network_down {
                Err(SyncError::Network("network down".to_string()))
            } else {
                Ok(())
            }
        }

        fn merge(target: &mut Value, patch: &Value) {
            if let (Some(obj), Some(patch_obj)) = (target.as_object_mut(), patch.as_object()) {
                for (k, v) in patch_obj {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }

        fn builtin_call(state: &mut MockState, procedure: &str, params: &Value) -> SyncResult<Value> {
            match procedure {
                "submit_order" => {
                    let order_id = Uuid::new_v4();
                    state.next_order_number += 1;
                    let number = state.next_order_number;
                    let row = json!({
                        "id": order_id.to_string(),
                        "order_number": number,
                        "order_status": "in_progress",
                        "customer_id": params.get("p_customer_id").cloned().unwrap_or(Value::Null),
                        "customer_name": params.get("p_customer_name").cloned().unwrap_or(Value::Null),
                        "customer_phone": params.get("p_customer_phone").cloned().unwrap_or(Value::Null),
                        "updated_at": Utc::now().to_rfc3339(),
                    });
                    state.rows.entry("orders".to_string()).or_default().push(row);
                    Ok(json!({ "order_id": order_id.to_string(), "order_number": number }))
                }
                "update_order_customer" => {
                    let id = params.get("p_order_id").and_then(Value::as_str).unwrap_or_default();
                    let rows = state.rows.entry("orders".to_string()).or_default();
                    let Some(row) = rows
                        .iter_mut()
                        .find(|r| r.get("id").and_then(Value::as_str) == Some(id))
                    else {
                        return Err(SyncError::NotFound);
                    };
                    Self::merge(
                        row,
                        &json!({
                            "customer_id": params.get("p_customer_id").cloned().unwrap_or(Value::Null),
                            "customer_name": params.get("p_customer_name").cloned().unwrap_or(Value::Null),
                            "customer_phone": params.get("p_customer_phone").cloned().unwrap_or(Value::Null),
                        }),
                    );
                    Ok(Value::Null)
                }
                "confirm_order_payment" => {
                    let id = params.get("p_order_id").and_then(Value::as_str).unwrap_or_default();
                    let rows = state.rows.entry("orders".to_string()).or_default();
                    let Some(row) = rows
                        .iter_mut()
                        .find(|r| r.get("id").and_then(Value::as_str) == Some(id))
                    else {
                        return Err(SyncError::NotFound);
                    };
                    Self::merge(
                        row,
                        &json!({
                            "is_paid": true,
                            "payment_method": params.get("p_payment_method").cloned().unwrap_or(Value::Null),
                        }),
                    );
                    Ok(Value::Null)
                }
                other => Err(SyncError::Remote {
                    status: 404,
                    message: format!("unknown procedure: {other}"),
                }),
            }
        }
    }

    #[async_trait]
    impl RemoteTransport for MockTransport {
        async fn insert(&self, table: &str, row: &Value) -> SyncResult<()> {
            let mut state = self.state.lock().unwrap();
            Self::check_network(&state)?;
            let id = row.get("id").and_then(Value::as_str).map(str::to_string);
            let rows = state.rows.entry(table.to_string()).or_default();
            if let Some(id) = &id {
                if rows.iter().any(|r| r.get("id").and_then(Value::as_str) == Some(id)) {
                    return Err(SyncError::DuplicateKey);
                }
            }
            rows.push(row.clone());
            Ok(())
        }

        async fn fetch_updated_at(
            &self,
            table: &str,
            id: &Uuid,
        ) -> SyncResult<Option<DateTime<Utc>>> {
            let state = self.state.lock().unwrap();
            Self::check_network(&state)?;
            let id = id.to_string();
            let ts = state
                .rows
                .get(table)
                .and_then(|rows| {
                    rows.iter().find(|r| r.get("id").and_then(Value::as_str) == Some(&id))
                })
                .and_then(|r| r.get("updated_at"))
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc));
            Ok(ts)
        }

        async fn update(&self, table: &str, id: &Uuid, patch: &Value) -> SyncResult<()> {
            let mut state = self.state.lock().unwrap();
            Self::check_network(&state)?;
            let id = id.to_string();
            if let Some(rows) = state.rows.get_mut(table) {
                for row in rows.iter_mut() {
                    if row.get("id").and_then(Value::as_str) == Some(&id) {
                        Self::merge(row, patch);
                    }
                }
            }
            Ok(())
        }

        async fn update_matching(
            &self,
            table: &str,
            field: &str,
            value: &Value,
            patch: &Value,
        ) -> SyncResult<()> {
            let mut state = self.state.lock().unwrap();
            Self::check_network(&state)?;
            if let Some(rows) = state.rows.get_mut(table) {
                for row in rows.iter_mut() {
                    if row.get(field) == Some(value) {
                        Self::merge(row, patch);
                    }
                }
            }
            Ok(())
        }

        async fn delete(&self, table: &str, id: &Uuid) -> SyncResult<()> {
            let mut state = self.state.lock().unwrap();
            Self::check_network(&state)?;
            let id = id.to_string();
            let Some(rows) = state.rows.get_mut(table) else {
                return Err(SyncError::NotFound);
            };
            let before = rows.len();
            rows.retain(|r| r.get("id").and_then(Value::as_str) != Some(&id));
            if rows.len() == before {
                return Err(SyncError::NotFound);
            }
            Ok(())
        }

        async fn select(&self, table: &str, query: &Query) -> SyncResult<Vec<Value>> {
            let state = self.state.lock().unwrap();
            Self::check_network(&state)?;
            let mut rows: Vec<Value> = state
                .rows
                .get(table)
                .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
                .unwrap_or_default();
            query.sort_and_truncate(&mut rows);
            Ok(rows)
        }

        async fn call(&self, procedure: &str, params: &Value) -> SyncResult<Value> {
            let mut state = self.state.lock().unwrap();
            Self::check_network(&state)?;
            state.calls.push((procedure.to_string(), params.clone()));
            if let Some(scripted) = state
                .rpc_scripts
                .get_mut(procedure)
                .and_then(VecDeque::pop_front)
            {
                return scripted.map_err(SyncError::Network);
            }
            Self::builtin_call(&mut state, procedure, params)
        }
    }
}
