// Query boundary types shared by every data source backend
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;

use super::dashboard::TimeRange;
use super::duration_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceType {
    Postgres,
    Influxdb,
}

impl DataSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSourceType::Postgres => "postgres",
            DataSourceType::Influxdb => "influxdb",
        }
    }
}

impl std::fmt::Display for DataSourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryFormat {
    #[default]
    Table,
    TimeSeries,
}

/// A single query handed to a [`crate::application::data_source::DataSource`].
/// `raw` is already interpolated; `variables` travel along for backends that
/// bind parameters themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub id: String,
    pub raw: String,
    pub variables: BTreeMap<String, Value>,
    pub time_range: Option<TimeRange>,
    pub max_data_points: Option<usize>,
    pub format: QueryFormat,
}

impl Query {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            raw: raw.into(),
            variables: BTreeMap::new(),
            time_range: None,
            max_data_points: None,
            format: QueryFormat::Table,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    String,
    Number,
    Boolean,
    Timestamp,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub query_id: String,
    pub executed_at: DateTime<Utc>,
    pub row_count: usize,
    pub data_source: String,
    #[serde(with = "duration_ms")]
    pub execution_time: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub data: Vec<DataPoint>,
    pub columns: Vec<ColumnInfo>,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Timeout,
    Connection,
    Syntax,
    Permission,
    Cancelled,
    Execution,
    Internal,
}

impl ErrorCode {
    /// Whether a caller may reasonably retry the same query later.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorCode::Timeout | ErrorCode::Connection)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Connection => "CONNECTION",
            ErrorCode::Syntax => "SYNTAX",
            ErrorCode::Permission => "PERMISSION",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Execution => "EXECUTION",
            ErrorCode::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct QueryError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl QueryError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            query: None,
        }
    }

    pub fn timeout(timeout: Duration) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("query exceeded timeout of {}ms", timeout.as_millis()),
        )
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Query,
    Metrics,
    TimeSeries,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceMetadata {
    #[serde(rename = "type")]
    pub kind: DataSourceType,
    pub name: String,
    pub version: String,
    pub description: String,
    pub capabilities: Vec<Capability>,
}

/// Declarative description of a backend, turned into a live data source by the
/// factory registered for its `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DataSourceConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DataSourceType,
    pub url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub options: HashMap<String, Value>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl DataSourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn option_u64(&self, key: &str) -> Option<u64> {
        self.options.get(key).and_then(Value::as_u64)
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_display_and_retry_hint() {
        let err = QueryError::timeout(Duration::from_millis(250)).with_query("SELECT 1");
        assert_eq!(err.to_string(), "TIMEOUT: query exceeded timeout of 250ms");
        assert!(err.code.is_transient());
        assert!(!ErrorCode::Syntax.is_transient());
    }

    #[test]
    fn test_data_source_config_defaults() {
        let cfg: DataSourceConfig = serde_json::from_str(
            r#"{"id":"pg","type":"postgres","url":"postgres://localhost/db","options":{"max_connections":4}}"#,
        )
        .unwrap();
        assert_eq!(cfg.timeout(), Duration::from_secs(30));
        assert_eq!(cfg.option_u64("max_connections"), Some(4));
        assert_eq!(cfg.option_str("missing"), None);
    }
}
