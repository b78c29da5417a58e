// In-memory data source used by the engine's tests
use crate::application::data_source::DataSource;
use crate::domain::query::{
    Capability, ColumnInfo, DataPoint, DataSourceMetadata, DataSourceType, DataType, ErrorCode,
    Query, QueryError, QueryResult, ResultMetadata,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, json};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub struct StubDataSource {
    name: String,
    delay: Duration,
    timeout: Duration,
    failure: Option<QueryError>,
    fail_close: bool,
    calls: AtomicUsize,
    closed: AtomicBool,
    seen: Mutex<Vec<String>>,
}

impl StubDataSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::ZERO,
            timeout: Duration::from_secs(30),
            failure: None,
            fail_close: false,
            calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn failing(mut self, code: ErrorCode, message: &str) -> Self {
        self.failure = Some(QueryError::new(code, message));
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn seen_queries(&self) -> Vec<String> {
        self.seen.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DataSource for StubDataSource {
    async fn query(&self, query: &Query) -> Result<QueryResult, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(query.raw.clone());
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(err) = &self.failure {
            return Err(err.clone().with_query(query.raw.clone()));
        }

        let mut fields = Map::new();
        fields.insert("source".to_string(), json!(self.name));
        Ok(QueryResult {
            data: vec![DataPoint {
                timestamp: Utc::now(),
                value: json!(42),
                labels: Default::default(),
                fields,
            }],
            columns: vec![ColumnInfo {
                name: "value".to_string(),
                data_type: DataType::Number,
            }],
            metadata: ResultMetadata {
                query_id: query.id.clone(),
                executed_at: Utc::now(),
                row_count: 1,
                data_source: self.name.clone(),
                execution_time: self.delay,
            },
        })
    }

    async fn test_connection(&self) -> Result<(), QueryError> {
        Ok(())
    }

    fn metadata(&self) -> DataSourceMetadata {
        DataSourceMetadata {
            kind: DataSourceType::Postgres,
            name: self.name.clone(),
            version: "test".to_string(),
            description: "stub".to_string(),
            capabilities: vec![Capability::Query],
        }
    }

    fn validate_query(&self, query: &Query) -> Result<(), QueryError> {
        if query.raw.to_ascii_lowercase().contains("drop ") {
            return Err(QueryError::new(ErrorCode::Syntax, "mutating statement"));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), QueryError> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(QueryError::new(ErrorCode::Connection, "close failed"));
        }
        Ok(())
    }

    fn query_timeout(&self) -> Duration {
        self.timeout
    }
}
