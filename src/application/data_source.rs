// Data source trait implemented by every query backend
use crate::domain::query::{DataSourceConfig, DataSourceMetadata, DataSourceType, Query, QueryError, QueryResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait DataSource: Send + Sync {
    /// Run a query, honoring the backend's own timeout.
    async fn query(&self, query: &Query) -> Result<QueryResult, QueryError>;

    /// Check the backend is reachable
    async fn test_connection(&self) -> Result<(), QueryError>;

    fn metadata(&self) -> DataSourceMetadata;

    /// Reject queries the backend must never run, without executing them
    fn validate_query(&self, query: &Query) -> Result<(), QueryError>;

    /// Release pooled connections
    async fn close(&self) -> Result<(), QueryError>;

    /// Deadline applied to every query by the backend itself.
    fn query_timeout(&self) -> Duration;
}

/// Builds live data sources from declarative configuration.
#[async_trait]
pub trait DataSourceFactory: Send + Sync {
    fn supported_type(&self) -> DataSourceType;

    fn validate_config(&self, config: &DataSourceConfig) -> Result<(), QueryError>;

    async fn create(&self, config: &DataSourceConfig) -> Result<Arc<dyn DataSource>, QueryError>;
}
