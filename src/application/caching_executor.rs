// Executor decorator that memoizes results in a Cache
use crate::application::cache::Cache;
use crate::application::data_source::DataSource;
use crate::application::executor::{ExecutionError, Executor, build_panel_query, execute_panels};
use crate::domain::dashboard::{DashboardConfig, PanelConfig, TimeRange};
use crate::domain::evaluation::EvaluationContext;
use crate::domain::execution::{DashboardResult, ExecutionQuery, ExecutionResult};
use crate::domain::query::QueryFormat;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    /// Used instead of `ttl` for time ranges shorter than `short_range`,
    /// whose data goes stale quickly.
    pub short_range_ttl: Duration,
    pub short_range: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            short_range_ttl: Duration::from_secs(60),
            short_range: Duration::from_secs(3600),
        }
    }
}

impl CachePolicy {
    pub fn ttl_for(&self, time_range: Option<&TimeRange>) -> Duration {
        let short = time_range
            .and_then(|range| range.duration().to_std().ok())
            .is_some_and(|span| span < self.short_range);
        if short { self.short_range_ttl } else { self.ttl }
    }
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
    data_source: &'a str,
    query: String,
    variables: &'a BTreeMap<String, Value>,
    time_range: Option<(i64, i64)>,
    max_rows: Option<usize>,
    format: QueryFormat,
}

/// Deterministic key for a query: the same data source, whitespace-normalized
/// text, variables and time range always hash the same. Quoted literals are
/// kept byte for byte.
pub fn cache_key(query: &ExecutionQuery) -> String {
    let material = KeyMaterial {
        data_source: &query.data_source_id,
        query: normalize_query(&query.query),
        variables: &query.variables,
        time_range: query
            .time_range
            .map(|r| (r.start.timestamp_millis(), r.end.timestamp_millis())),
        max_rows: query.max_rows,
        format: query.format,
    };

    let mut hasher = Sha256::new();
    match serde_json::to_vec(&material) {
        Ok(bytes) => hasher.update(&bytes),
        Err(_) => hasher.update(format!("{}|{}", material.data_source, material.query).as_bytes()),
    }
    format!("lens:{}", hex::encode(hasher.finalize()))
}

/// Collapses whitespace runs outside `'...'` and `"..."` to one space.
fn normalize_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut quote: Option<char> = None;
    let mut pending_space = false;

    for c in query.trim().chars() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c.is_whitespace() => pending_space = true,
            None => {
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                if c == '\'' || c == '"' {
                    quote = Some(c);
                }
                out.push(c);
            }
        }
    }
    out
}

/// Serves repeated queries from `cache`. Dashboards are cached panel by
/// panel, so one stale panel does not refetch the rest.
#[derive(Clone)]
pub struct CachingExecutor<E> {
    inner: E,
    cache: Arc<dyn Cache>,
    policy: CachePolicy,
}

impl<E: Executor> CachingExecutor<E> {
    pub fn new(inner: E, cache: Arc<dyn Cache>) -> Self {
        Self {
            inner,
            cache,
            policy: CachePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E> Executor for CachingExecutor<E>
where
    E: Executor + Clone + 'static,
{
    async fn execute(
        &self,
        cancel: &CancellationToken,
        query: &ExecutionQuery,
    ) -> Result<ExecutionResult, ExecutionError> {
        let key = cache_key(query);
        if let Some(mut hit) = self.cache.get(&key).await {
            tracing::debug!(data_source = %query.data_source_id, key = %key, "Cache hit");
            hit.cache_hit = true;
            return Ok(hit);
        }
        tracing::debug!(data_source = %query.data_source_id, key = %key, "Cache miss");

        let result = self.inner.execute(cancel, query).await?;
        let ttl = self.policy.ttl_for(query.time_range.as_ref());
        if let Err(err) = self.cache.set(&key, &result, ttl).await {
            tracing::warn!(key = %key, error = %err, "Failed to cache query result");
        }
        Ok(result)
    }

    async fn execute_panel(
        &self,
        cancel: &CancellationToken,
        panel: &PanelConfig,
        variables: &BTreeMap<String, Value>,
        time_range: Option<&TimeRange>,
    ) -> Result<ExecutionResult, ExecutionError> {
        let query = build_panel_query(panel, variables, time_range)?;
        self.execute(cancel, &query).await
    }

    async fn execute_dashboard(
        &self,
        cancel: &CancellationToken,
        dashboard: &DashboardConfig,
        ctx: &EvaluationContext,
    ) -> Result<DashboardResult, ExecutionError> {
        Ok(execute_panels(self, cancel, dashboard, ctx).await)
    }

    fn register_data_source(&self, id: &str, source: Arc<dyn DataSource>) -> Result<(), ExecutionError> {
        self.inner.register_data_source(id, source)
    }

    async fn close(&self) -> Result<(), ExecutionError> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::cache::MemoryCache;
    use crate::application::executor::QueryExecutor;
    use crate::application::registry::Registry;
    use crate::application::testing::StubDataSource;
    use crate::domain::builder::{DashboardBuilder, PanelBuilder};
    use crate::domain::query::ErrorCode;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn range(hours: i64) -> TimeRange {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        TimeRange::new(start, start + chrono::Duration::hours(hours))
    }

    fn caching(stub: Arc<StubDataSource>) -> (CachingExecutor<QueryExecutor>, Arc<MemoryCache>) {
        let registry = Arc::new(Registry::new());
        registry.register("main", stub).unwrap();
        let cache = Arc::new(MemoryCache::new(100));
        let executor = CachingExecutor::new(QueryExecutor::new(registry), cache.clone());
        (executor, cache)
    }

    #[tokio::test]
    async fn test_second_panel_execution_is_a_hit() {
        let stub = Arc::new(StubDataSource::new("main"));
        let (executor, _cache) = caching(stub.clone());
        let panel = PanelBuilder::table("orders")
            .data_source("main")
            .query("SELECT * FROM orders WHERE region = '${region}'")
            .build();
        let vars = BTreeMap::from([("region".to_string(), json!("EU"))]);
        let time_range = range(24);
        let cancel = CancellationToken::new();

        let first = executor
            .execute_panel(&cancel, &panel, &vars, Some(&time_range))
            .await
            .unwrap();
        let second = executor
            .execute_panel(&cancel, &panel, &vars, Some(&time_range))
            .await
            .unwrap();

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(stub.calls(), 1);
        assert_eq!(second.metadata.row_count, first.metadata.row_count);
    }

    #[test]
    fn test_cache_key_ignores_variable_insertion_order_and_whitespace() {
        let a = ExecutionQuery::new("main", "SELECT  *\n FROM t")
            .with_variable("b", 2)
            .with_variable("a", "x")
            .with_time_range(range(1));
        let b = ExecutionQuery::new("main", "SELECT * FROM t")
            .with_variable("a", "x")
            .with_variable("b", 2)
            .with_time_range(range(1));
        assert_eq!(cache_key(&a), cache_key(&b));

        let other_range = b.clone().with_time_range(range(2));
        assert_ne!(cache_key(&b), cache_key(&other_range));
        let other_source = ExecutionQuery { data_source_id: "replica".into(), ..b.clone() };
        assert_ne!(cache_key(&b), cache_key(&other_source));
    }

    #[test]
    fn test_cache_key_keeps_whitespace_inside_literals() {
        let double = ExecutionQuery::new("main", "SELECT * FROM people WHERE name = 'Ann  Lee'");
        let single = ExecutionQuery::new("main", "SELECT * FROM people WHERE name = 'Ann Lee'");
        assert_ne!(cache_key(&double), cache_key(&single));

        let reflowed = ExecutionQuery::new("main", "SELECT *\n  FROM people WHERE name =   'Ann  Lee' ");
        assert_eq!(cache_key(&double), cache_key(&reflowed));

        let quoted = ExecutionQuery::new("main", "SELECT \"first  name\" FROM people");
        let unquoted = ExecutionQuery::new("main", "SELECT \"first name\" FROM people");
        assert_ne!(cache_key(&quoted), cache_key(&unquoted));
    }

    #[test]
    fn test_short_ranges_use_short_ttl() {
        let policy = CachePolicy::default();
        let half_hour = TimeRange::new(range(1).start, range(1).start + chrono::Duration::minutes(30));
        assert_eq!(policy.ttl_for(Some(&half_hour)), policy.short_range_ttl);
        assert_eq!(policy.ttl_for(Some(&range(1))), policy.ttl);
        assert_eq!(policy.ttl_for(None), policy.ttl);
    }

    #[tokio::test]
    async fn test_cache_failure_still_returns_result() {
        let stub = Arc::new(StubDataSource::new("main"));
        let (executor, cache) = caching(stub.clone());
        cache.close().await.unwrap();

        let query = ExecutionQuery::new("main", "SELECT 1");
        let cancel = CancellationToken::new();
        assert!(executor.execute(&cancel, &query).await.is_ok());
        assert!(executor.execute(&cancel, &query).await.is_ok());
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let stub = Arc::new(StubDataSource::new("main").failing(ErrorCode::Execution, "boom"));
        let (executor, cache) = caching(stub.clone());
        let query = ExecutionQuery::new("main", "SELECT 1");
        let cancel = CancellationToken::new();

        assert!(executor.execute(&cancel, &query).await.is_err());
        assert!(executor.execute(&cancel, &query).await.is_err());
        assert_eq!(stub.calls(), 2);
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_dashboard_is_cached_per_panel() {
        let stub = Arc::new(StubDataSource::new("main"));
        let (executor, cache) = caching(stub.clone());
        let dashboard = DashboardBuilder::new("d")
            .panel(PanelBuilder::line("a").data_source("main").query("SELECT 1").build())
            .panel(PanelBuilder::line("b").data_source("main").query("SELECT 2").build())
            .build();
        let ctx = EvaluationContext::new(range(6));
        let cancel = CancellationToken::new();

        executor.execute_dashboard(&cancel, &dashboard, &ctx).await.unwrap();
        assert_eq!(cache.stats().await.entries, 2);

        let panel_b = dashboard.panel("b").unwrap();
        let key_b = cache_key(&build_panel_query(panel_b, &BTreeMap::new(), Some(&ctx.time_range)).unwrap());
        cache.delete(&key_b).await.unwrap();

        let again = executor.execute_dashboard(&cancel, &dashboard, &ctx).await.unwrap();
        assert!(again.panel_results["a"].cache_hit);
        assert!(!again.panel_results["b"].cache_hit);
        assert_eq!(stub.calls(), 3);
    }
}
