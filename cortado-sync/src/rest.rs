//! HTTP transport speaking the PostgREST dialect.
//!
//! Tables map to `{base}/rest/v1/{table}` with filter query parameters
//! (`id=eq.…`, `in.(…)`, `gte.`/`lte.`, `order`, `limit`); procedures map
//! to `{base}/rest/v1/rpc/{name}` with a JSON parameter bag.

use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteTransport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cortado_store::Query;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Connection settings for the REST transport.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Server root, without a trailing slash.
    pub base_url: String,
    /// API key, sent as both `apikey` and bearer token.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// [`RemoteTransport`] over HTTP.
pub struct RestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl RestTransport {
    pub fn new(config: RestConfig) -> SyncResult<Self> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| SyncError::InvalidRecord(format!("api key not header-safe: {e}")))?;
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|e| SyncError::InvalidRecord(format!("api key not header-safe: {e}")))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert("apikey", key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;
        Ok(Self { client, base_url: config.base_url.trim_end_matches('/').to_string() })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        params: &[(String, String)],
        body: Option<&Value>,
    ) -> SyncResult<Response> {
        let mut request = self.client.request(method.clone(), url).query(params);
        if let Some(body) = body {
            request = request.json(body);
        }
        debug!(%method, url, "remote request");
        let response = request.send().await.map_err(|e| SyncError::Network(e.to_string()))?;
        check_status(response).await
    }
}

/// Maps an error response to the sync error taxonomy.
///
/// PostgREST reports duplicate keys as 409 with Postgres code 23505 and
/// missing single rows as PGRST116; both have dedicated variants because
/// the engine treats them as benign on replay.
async fn check_status(response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let code = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("code").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_default();

    if status == StatusCode::CONFLICT || code == "23505" {
        return Err(SyncError::DuplicateKey);
    }
    if status == StatusCode::NOT_FOUND || code == "PGRST116" {
        return Err(SyncError::NotFound);
    }
    Err(SyncError::Remote { status: status.as_u16(), message: body })
}

/// Translates a query to PostgREST filter parameters.
fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = Vec::new();
    for (field, value) in &query.eq {
        params.push((field.clone(), format!("eq.{}", plain(value))));
    }
    for (field, values) in &query.is_in {
        let list: Vec<String> = values.iter().map(plain).collect();
        params.push((field.clone(), format!("in.({})", list.join(","))));
    }
    for (field, value) in &query.gte {
        params.push((field.clone(), format!("gte.{}", plain(value))));
    }
    for (field, value) in &query.lte {
        params.push((field.clone(), format!("lte.{}", plain(value))));
    }
    if let Some(order) = &query.order_by {
        let dir = if order.ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{dir}", order.field)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

/// Filter values are rendered bare, not as JSON (no quotes on strings).
fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl RemoteTransport for RestTransport {
    async fn insert(&self, table: &str, row: &Value) -> SyncResult<()> {
        self.send(Method::POST, &self.table_url(table), &[], Some(row)).await?;
        Ok(())
    }

    async fn fetch_updated_at(&self, table: &str, id: &Uuid) -> SyncResult<Option<DateTime<Utc>>> {
        let params = vec![
            ("id".to_string(), format!("eq.{id}")),
            ("select".to_string(), "updated_at".to_string()),
        ];
        let response = self.send(Method::GET, &self.table_url(table), &params, None).await?;
        let rows: Vec<Value> =
            response.json().await.map_err(|e| SyncError::Network(e.to_string()))?;
        Ok(rows
            .first()
            .and_then(|row| row.get("updated_at"))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc)))
    }

    async fn update(&self, table: &str, id: &Uuid, patch: &Value) -> SyncResult<()> {
        let params = vec![("id".to_string(), format!("eq.{id}"))];
        self.send(Method::PATCH, &self.table_url(table), &params, Some(patch)).await?;
        Ok(())
    }

    async fn update_matching(
        &self,
        table: &str,
        field: &str,
        value: &Value,
        patch: &Value,
    ) -> SyncResult<()> {
        let params = vec![(field.to_string(), format!("eq.{}", plain(value)))];
        self.send(Method::PATCH, &self.table_url(table), &params, Some(patch)).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, id: &Uuid) -> SyncResult<()> {
        // `return=representation` makes the response carry the removed
        // rows; zero rows back means the id did not exist.
        let response = self
            .client
            .delete(self.table_url(table))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        let response = check_status(response).await?;
        let rows: Vec<Value> =
            response.json().await.map_err(|e| SyncError::Network(e.to_string()))?;
        if rows.is_empty() {
            return Err(SyncError::NotFound);
        }
        Ok(())
    }

    async fn select(&self, table: &str, query: &Query) -> SyncResult<Vec<Value>> {
        let params = query_params(query);
        let response = self.send(Method::GET, &self.table_url(table), &params, None).await?;
        response.json().await.map_err(|e| SyncError::Network(e.to_string()))
    }

    async fn call(&self, procedure: &str, params: &Value) -> SyncResult<Value> {
        let url = format!("{}/rest/v1/rpc/{procedure}", self.base_url);
        let response = self.send(Method::POST, &url, &[], Some(params)).await?;
        let body = response.text().await.map_err(|e| SyncError::Network(e.to_string()))?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}
