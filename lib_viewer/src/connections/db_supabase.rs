//! # Hosted Table Gateway
//!
//! Reads a whole table through the PostgREST endpoint of a hosted database
//! (`GET {url}/rest/v1/{table}?select=*`), authenticated with a URL + API key
//! pair. Nothing is filtered or paginated server side and nothing is written.
//!
//! Failures are split in two: `ConnectionError` when the endpoint cannot be
//! reached or rejects the credentials, `QueryError` when the table is missing
//! or the response does not look like rows of the expected shape.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Method;
use serde_json::Value;
use thiserror::Error;

use super::model::{Record, Snapshot};
use super::Gateway;
use crate::retrieve::{ApiClient, ClientOptions, RetrieveError};

/// Columns every row must carry. `id` must also be non-null.
const REQUIRED_COLUMNS: [&str; 3] = ["id", "plate_number", "call_sign"];

/// PostgREST / Postgres codes for a relation that does not exist.
const MISSING_RELATION_CODES: [&str; 2] = ["42P01", "PGRST205"];

/// Custom error types for gateway operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("Failed to connect to database: {0}")]
    ConnectionError(String),
    #[error("Query execution failed: {0}")]
    QueryError(String),
}

/// Endpoint and credentials for one session.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    pub api_key: String,
    pub timeout: Duration,
    /// Transport-level retries inside a single fetch. Defaults to none, so a
    /// failed tick costs exactly one round trip.
    pub transport_retries: u32,
}

impl GatewayConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(10),
            transport_retries: 0,
        }
    }
}

/// Gateway over the hosted REST endpoint.
pub struct SupabaseGateway {
    client: ApiClient,
}

impl SupabaseGateway {
    /// Builds the HTTP client. Fails with `ConnectionError` on a malformed URL
    /// or an empty / non-header-safe API key.
    pub fn new(config: GatewayConfig) -> Result<Self, DbError> {
        let key = config.api_key.trim();
        if key.is_empty() {
            return Err(DbError::ConnectionError("API key is empty".to_string()));
        }
        let key_header = HeaderValue::from_str(key)
            .map_err(|_| DbError::ConnectionError("API key contains invalid characters".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert("apikey", key_header);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let options = ClientOptions {
            timeout: config.timeout,
            max_retries: config.transport_retries,
            ..ClientOptions::default()
        };
        let client = ApiClient::with_options(&config.url, Some(key.to_string()), options)
            .map_err(|e| DbError::ConnectionError(e.to_string()))?
            .with_default_headers(headers);

        Ok(Self { client })
    }
}

impl Gateway for SupabaseGateway {
    async fn fetch_all(&self, table: &str) -> Result<Snapshot, DbError> {
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DbError::QueryError(format!("invalid table name '{}'", table)));
        }
        let path = format!("rest/v1/{}?select=*", table);

        let response = self
            .client
            .request::<Value, ()>(Method::GET, &path, None, None)
            .await
            .map_err(|e| match e {
                RetrieveError::Decode { .. } => DbError::QueryError(e.to_string()),
                other => DbError::ConnectionError(other.to_string()),
            })?;

        if !response.success {
            return Err(classify_status(response.status, response.error_body.as_deref()));
        }

        let rows = response.data.unwrap_or(Value::Null);
        let snapshot = rows_to_snapshot(&rows)?;
        log::debug!("Fetched {} rows from '{}'", snapshot.len(), table);
        Ok(snapshot)
    }
}

/// Maps a non-2xx response onto the error taxonomy.
fn classify_status(status: u16, body: Option<&str>) -> DbError {
    let parsed: Option<Value> = body.and_then(|b| serde_json::from_str(b).ok());
    let code = parsed
        .as_ref()
        .and_then(|v| v.get("code"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| body.map(str::to_string))
        .unwrap_or_default();
    let detail = format!("HTTP {}: {}", status, message);

    if MISSING_RELATION_CODES.contains(&code) {
        return DbError::QueryError(detail);
    }
    match status {
        401 | 403 => DbError::ConnectionError(detail),
        400..=499 => DbError::QueryError(detail),
        _ => DbError::ConnectionError(detail),
    }
}

fn rows_to_snapshot(rows: &Value) -> Result<Snapshot, DbError> {
    let rows = rows
        .as_array()
        .ok_or_else(|| DbError::QueryError("expected a JSON array of rows".to_string()))?;
    let records = rows
        .iter()
        .enumerate()
        .map(|(index, row)| parse_record(index, row))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Snapshot::new(records))
}

fn parse_record(index: usize, row: &Value) -> Result<Record, DbError> {
    let fields = row
        .as_object()
        .ok_or_else(|| DbError::QueryError(format!("row {} is not an object", index)))?;

    if let Some(missing) = REQUIRED_COLUMNS.iter().find(|c| !fields.contains_key(**c)) {
        return Err(DbError::QueryError(format!("row {} is missing column '{}'", index, missing)));
    }

    let id = match &fields["id"] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(DbError::QueryError(format!("row {} has an unusable id: {}", index, other)));
        }
    };

    Ok(Record {
        id,
        plate_number: text_field(&fields["plate_number"]),
        call_sign: text_field(&fields["call_sign"]),
    })
}

fn text_field(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
