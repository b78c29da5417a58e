// Execution requests and results produced by the executor layer
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::dashboard::TimeRange;
use super::duration_ms;
use super::query::{ColumnInfo, DataPoint, ErrorCode, QueryFormat, QueryResult};

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionQuery {
    pub data_source_id: String,
    /// Fully interpolated query text.
    pub query: String,
    pub variables: BTreeMap<String, Value>,
    pub time_range: Option<TimeRange>,
    pub max_rows: Option<usize>,
    /// Upper bound for this execution; the data source's own timeout still
    /// applies when it is tighter.
    pub timeout: Option<Duration>,
    pub format: QueryFormat,
}

impl ExecutionQuery {
    pub fn new(data_source_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            data_source_id: data_source_id.into(),
            query: query.into(),
            variables: BTreeMap::new(),
            time_range: None,
            max_rows: None,
            timeout: None,
            format: QueryFormat::Table,
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_time_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = Some(time_range);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    pub query_id: String,
    pub data_source_id: String,
    pub executed_at: DateTime<Utc>,
    pub row_count: usize,
    #[serde(with = "duration_ms")]
    pub processing_time: Duration,
}

/// Backend-agnostic outcome of running one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub data: Vec<DataPoint>,
    pub columns: Vec<ColumnInfo>,
    pub metadata: ExecutionMetadata,
    #[serde(with = "duration_ms")]
    pub exec_time: Duration,
    pub cache_hit: bool,
}

impl ExecutionResult {
    pub fn from_query_result(
        result: QueryResult,
        data_source_id: &str,
        executed_at: DateTime<Utc>,
        exec_time: Duration,
    ) -> Self {
        Self {
            metadata: ExecutionMetadata {
                query_id: result.metadata.query_id,
                data_source_id: data_source_id.to_string(),
                executed_at,
                row_count: result.data.len(),
                processing_time: result.metadata.execution_time,
            },
            data: result.data,
            columns: result.columns,
            exec_time,
            cache_hit: false,
        }
    }
}

/// Failure recorded for a single panel during dashboard execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelExecutionError {
    pub panel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResult {
    pub panel_results: HashMap<String, ExecutionResult>,
    pub errors: Vec<PanelExecutionError>,
    pub executed_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl DashboardResult {
    pub fn error_for(&self, panel_id: &str) -> Option<&PanelExecutionError> {
        self.errors.iter().find(|e| e.panel_id == panel_id)
    }

    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}
