// Shared fixtures for the end-to-end tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use lens_engine::application::data_source::DataSource;
use lens_engine::domain::query::{
    Capability, DataPoint, DataSourceMetadata, DataSourceType, ErrorCode, Query, QueryError, QueryResult,
    ResultMetadata,
};
use serde_json::{Map, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Returns one row per query, optionally after a delay, and counts calls.
pub struct CountingSource {
    name: String,
    delay: Duration,
    fail_with: Option<ErrorCode>,
    calls: AtomicUsize,
}

impl CountingSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::ZERO,
            fail_with: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, code: ErrorCode) -> Self {
        self.fail_with = Some(code);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for CountingSource {
    async fn query(&self, query: &Query) -> Result<QueryResult, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(code) = self.fail_with {
            return Err(QueryError::new(code, format!("{} is unavailable", self.name)));
        }

        let mut fields = Map::new();
        fields.insert("query".into(), json!(query.raw));
        Ok(QueryResult {
            data: vec![DataPoint {
                timestamp: Utc::now(),
                value: json!(1),
                labels: Default::default(),
                fields,
            }],
            columns: Vec::new(),
            metadata: ResultMetadata {
                query_id: query.id.clone(),
                executed_at: Utc::now(),
                row_count: 1,
                data_source: self.name.clone(),
                execution_time: Duration::ZERO,
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
            version: "test".into(),
            description: "counting test source".into(),
            capabilities: vec![Capability::Query],
        }
    }

    fn validate_query(&self, _query: &Query) -> Result<(), QueryError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), QueryError> {
        Ok(())
    }

    fn query_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

pub const SALES_DASHBOARD: &str = r#"{
  "id": "sales",
  "name": "Sales overview",
  "description": "Orders and revenue by region",
  "version": "1.2.0",
  "grid": { "columns": 12, "rowHeight": 40, "breakpoints": { "xs": 1, "md": 6 } },
  "panels": [
    {
      "id": "orders",
      "title": "Orders",
      "type": "table",
      "position": { "x": 0, "y": 0 },
      "dimensions": { "width": 6, "height": 4 },
      "dataSource": "warehouse",
      "query": "SELECT * FROM orders WHERE region = '${region}'",
      "options": { "maxRows": 50 }
    },
    {
      "id": "revenue",
      "title": "Revenue",
      "type": "line",
      "position": { "x": 6, "y": 0 },
      "dimensions": { "width": 6, "height": 4 },
      "dataSource": { "type": "postgres", "ref": "warehouse" },
      "query": "SELECT day, total FROM revenue WHERE day >= '${timeRange.start}'"
    },
    {
      "id": "share",
      "title": "Share by region",
      "type": "pie",
      "position": { "x": 0, "y": 4 },
      "dimensions": { "width": 12, "height": 4 },
      "dataSource": "warehouse",
      "query": "SELECT region, count(*) FROM orders GROUP BY region",
      "options": { "donut": true }
    }
  ],
  "variables": [
    { "name": "region", "type": "custom", "default": "US" }
  ]
}"#;
