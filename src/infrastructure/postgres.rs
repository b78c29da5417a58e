// PostgreSQL data source backed by a lazily connected sqlx pool
use crate::application::data_source::{DataSource, DataSourceFactory};
use crate::domain::query::{
    Capability, ColumnInfo, DataPoint, DataSourceConfig, DataSourceMetadata, DataSourceType, DataType, ErrorCode,
    Query, QueryError, QueryFormat, QueryResult, ResultMetadata,
};
use crate::infrastructure::query_guard::ensure_read_only;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use sqlx::postgres::{PgColumn, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Executor as _, Row, Statement as _, TypeInfo};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_MIN_CONNECTIONS: u32 = 2;
const MAX_LIFETIME: Duration = Duration::from_secs(3600);
const IDLE_TIMEOUT: Duration = Duration::from_secs(1800);
const TIME_COLUMNS: [&str; 3] = ["time", "timestamp", "ts"];

pub struct PostgresDataSource {
    id: String,
    pool: PgPool,
    timeout: Duration,
    masked_url: String,
}

impl PostgresDataSource {
    /// Build the pool without connecting; the first query opens connections.
    /// Every connection carries a server-side `statement_timeout`, so a
    /// query abandoned by its caller is also stopped in the database.
    pub fn from_config(config: &DataSourceConfig) -> Result<Self, QueryError> {
        let timeout = config.timeout();
        let timeout_ms = timeout.as_millis();
        let max_connections = config
            .option_u64("max_connections")
            .map_or(Ok(DEFAULT_MAX_CONNECTIONS), |n| pool_size("max_connections", n))?;
        let min_connections = config
            .option_u64("min_connections")
            .map_or(Ok(DEFAULT_MIN_CONNECTIONS), |n| pool_size("min_connections", n))?
            .min(max_connections);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(timeout)
            .max_lifetime(MAX_LIFETIME)
            .idle_timeout(IDLE_TIMEOUT)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    conn.execute(format!("SET statement_timeout = {timeout_ms}").as_str())
                        .await?;
                    Ok(())
                })
            })
            .connect_lazy(&config.url)
            .map_err(|e| map_sqlx_error(&e))?;

        Ok(Self {
            id: config.id.clone(),
            pool,
            timeout,
            masked_url: mask_database_url(&config.url),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Rows plus the statement's columns. An empty result still reports its
    /// columns, taken from the prepared statement.
    async fn fetch(&self, sql: &str) -> Result<(Vec<ColumnInfo>, Vec<PgRow>), sqlx::Error> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        let columns = match rows.first() {
            Some(row) => describe_columns(row.columns()),
            None => describe_columns((&self.pool).prepare(sql).await?.columns()),
        };
        Ok((columns, rows))
    }
}

fn pool_size(option: &str, value: u64) -> Result<u32, QueryError> {
    u32::try_from(value)
        .map_err(|_| QueryError::new(ErrorCode::Internal, format!("{option} is too large: {value}")))
}

#[async_trait]
impl DataSource for PostgresDataSource {
    async fn query(&self, query: &Query) -> Result<QueryResult, QueryError> {
        let started = Instant::now();
        let sql = limited_sql(&query.raw, query.max_data_points);
        tracing::debug!(data_source = %self.id, sql = %sql, "Executing SQL query");

        let (columns, rows) = tokio::time::timeout(self.timeout, self.fetch(&sql))
            .await
            .map_err(|_| QueryError::timeout(self.timeout).with_query(query.raw.clone()))?
            .map_err(|e| map_sqlx_error(&e).with_query(query.raw.clone()))?;

        let executed_at = Utc::now();
        let values = rows
            .iter()
            .map(|row| decode_row(row, &columns))
            .collect::<Vec<_>>();
        let data = rows_to_points(&columns, values, query.format, executed_at);

        Ok(QueryResult {
            metadata: ResultMetadata {
                query_id: query.id.clone(),
                executed_at,
                row_count: data.len(),
                data_source: self.id.clone(),
                execution_time: started.elapsed(),
            },
            data,
            columns,
        })
    }

    async fn test_connection(&self) -> Result<(), QueryError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| {
                tracing::warn!(data_source = %self.id, url = %self.masked_url, error = %e, "Connection test failed");
                map_sqlx_error(&e)
            })
    }

    fn metadata(&self) -> DataSourceMetadata {
        DataSourceMetadata {
            kind: DataSourceType::Postgres,
            name: self.id.clone(),
            version: "1.0".to_string(),
            description: format!("PostgreSQL at {}", self.masked_url),
            capabilities: vec![Capability::Query, Capability::TimeSeries],
        }
    }

    fn validate_query(&self, query: &Query) -> Result<(), QueryError> {
        ensure_read_only(&query.raw, &["SELECT", "WITH"])
    }

    async fn close(&self) -> Result<(), QueryError> {
        self.pool.close().await;
        tracing::info!(data_source = %self.id, "PostgreSQL pool closed");
        Ok(())
    }

    fn query_timeout(&self) -> Duration {
        self.timeout
    }
}

/// Cap the row count by wrapping the statement as a subselect, so the
/// user's own `LIMIT` or `ORDER BY` stays intact.
fn limited_sql(raw: &str, max_rows: Option<usize>) -> String {
    let statement = raw.trim().trim_end_matches(';').trim_end();
    match max_rows {
        Some(limit) => format!("SELECT * FROM ({statement}) AS lens_limited LIMIT {limit}"),
        None => statement.to_string(),
    }
}

fn data_type_for(type_name: &str) -> DataType {
    match type_name {
        "INT2" | "INT4" | "INT8" | "FLOAT4" | "FLOAT8" | "NUMERIC" | "OID" => DataType::Number,
        "BOOL" => DataType::Boolean,
        "TIMESTAMP" | "TIMESTAMPTZ" | "DATE" => DataType::Timestamp,
        "JSON" | "JSONB" => DataType::Json,
        _ => DataType::String,
    }
}

fn describe_columns(columns: &[PgColumn]) -> Vec<ColumnInfo> {
    columns
        .iter()
        .map(|col| ColumnInfo {
            name: col.name().to_string(),
            data_type: data_type_for(col.type_info().name()),
        })
        .collect()
}

fn decode_row(row: &PgRow, columns: &[ColumnInfo]) -> Vec<Value> {
    row.columns()
        .iter()
        .zip(columns)
        .map(|(col, info)| decode_value(row, col.ordinal(), col.type_info().name(), info))
        .collect()
}

fn decode_value(row: &PgRow, idx: usize, type_name: &str, info: &ColumnInfo) -> Value {
    let decoded = match type_name {
        "INT2" => row.try_get::<Option<i16>, _>(idx).map(|v| v.map(Value::from)),
        "INT4" => row.try_get::<Option<i32>, _>(idx).map(|v| v.map(Value::from)),
        "INT8" => row.try_get::<Option<i64>, _>(idx).map(|v| v.map(Value::from)),
        "FLOAT4" => row.try_get::<Option<f32>, _>(idx).map(|v| v.map(|f| Value::from(f as f64))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx).map(|v| v.map(Value::from)),
        "NUMERIC" => row
            .try_get::<Option<Decimal>, _>(idx)
            .map(|v| v.and_then(|d| d.to_f64()).map(Value::from)),
        "BOOL" => row.try_get::<Option<bool>, _>(idx).map(|v| v.map(Value::from)),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)
            .map(|v| v.map(|t| Value::from(t.to_rfc3339()))),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)
            .map(|v| v.map(|t| Value::from(t.and_utc().to_rfc3339()))),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(idx)
            .map(|v| v.map(|d| Value::from(d.to_string()))),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(idx),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(idx)
            .map(|v| v.map(|u| Value::from(u.to_string()))),
        _ => row.try_get::<Option<String>, _>(idx).map(|v| v.map(Value::from)),
    };

    match decoded {
        Ok(value) => value.unwrap_or(Value::Null),
        Err(err) => {
            tracing::debug!(column = %info.name, type_name, error = %err, "Column not decodable, returning null");
            Value::Null
        }
    }
}

/// Turn decoded rows into points. The time column (by name, else the first
/// timestamp column) supplies `timestamp`; rows without one use `executed_at`.
/// For time series the first numeric column is `value` and string columns
/// become labels; every column is kept in `fields`.
fn rows_to_points(
    columns: &[ColumnInfo],
    rows: Vec<Vec<Value>>,
    format: QueryFormat,
    executed_at: DateTime<Utc>,
) -> Vec<DataPoint> {
    let time_idx = columns
        .iter()
        .position(|c| c.data_type == DataType::Timestamp && TIME_COLUMNS.contains(&c.name.as_str()))
        .or_else(|| columns.iter().position(|c| c.data_type == DataType::Timestamp));
    let value_idx = columns
        .iter()
        .position(|c| c.name == "value" && c.data_type == DataType::Number)
        .or_else(|| columns.iter().position(|c| c.data_type == DataType::Number));

    rows.into_iter()
        .map(|row| {
            let timestamp = time_idx
                .and_then(|i| row.get(i))
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map_or(executed_at, |t| t.with_timezone(&Utc));
            let value = value_idx
                .and_then(|i| row.get(i))
                .cloned()
                .unwrap_or(Value::Null);

            let labels: HashMap<String, String> = match format {
                QueryFormat::TimeSeries => columns
                    .iter()
                    .zip(&row)
                    .filter(|(c, v)| c.data_type == DataType::String && v.is_string())
                    .map(|(c, v)| (c.name.clone(), v.as_str().unwrap_or_default().to_string()))
                    .collect(),
                QueryFormat::Table => HashMap::new(),
            };

            let fields: Map<String, Value> = columns
                .iter()
                .zip(row)
                .map(|(c, v)| (c.name.clone(), v))
                .collect();

            DataPoint {
                timestamp,
                value,
                labels,
                fields,
            }
        })
        .collect()
}

/// Map a sqlx failure onto the fixed error codes using the SQLSTATE class
/// where the database reported one.
fn map_sqlx_error(err: &sqlx::Error) -> QueryError {
    let code = match err {
        sqlx::Error::Database(db) => db.code().map_or(ErrorCode::Execution, |state| sqlstate_code(&state)),
        sqlx::Error::PoolTimedOut => ErrorCode::Timeout,
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            ErrorCode::Connection
        }
        sqlx::Error::Configuration(_) => ErrorCode::Internal,
        _ => ErrorCode::Execution,
    };
    QueryError::new(code, err.to_string())
}

fn sqlstate_code(state: &str) -> ErrorCode {
    match state {
        "57014" => ErrorCode::Timeout,
        "42501" => ErrorCode::Permission,
        s if s.starts_with("42") => ErrorCode::Syntax,
        s if s.starts_with("28") => ErrorCode::Permission,
        s if s.starts_with("08") || s.starts_with("53") || s.starts_with("57P") => ErrorCode::Connection,
        _ => ErrorCode::Execution,
    }
}

/// Hide the password in a connection string before it is logged.
pub fn mask_database_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            if parsed.set_password(Some("****")).is_ok() {
                parsed.to_string()
            } else {
                "****".to_string()
            }
        }
        Ok(_) => url.to_string(),
        Err(_) => "****".to_string(),
    }
}

pub struct PostgresFactory;

#[async_trait]
impl DataSourceFactory for PostgresFactory {
    fn supported_type(&self) -> DataSourceType {
        DataSourceType::Postgres
    }

    fn validate_config(&self, config: &DataSourceConfig) -> Result<(), QueryError> {
        if config.kind != DataSourceType::Postgres {
            return Err(QueryError::new(
                ErrorCode::Internal,
                format!("expected a postgres config, got {}", config.kind),
            ));
        }
        let scheme_ok = config.url.starts_with("postgres://") || config.url.starts_with("postgresql://");
        if !scheme_ok {
            return Err(QueryError::new(
                ErrorCode::Connection,
                format!("invalid PostgreSQL url: {}", mask_database_url(&config.url)),
            ));
        }
        if config.timeout_ms == 0 {
            return Err(QueryError::new(ErrorCode::Internal, "timeout_ms must be positive"));
        }
        if config.option_u64("max_connections") == Some(0) {
            return Err(QueryError::new(ErrorCode::Internal, "max_connections must be positive"));
        }
        for option in ["max_connections", "min_connections"] {
            if let Some(value) = config.option_u64(option) {
                pool_size(option, value)?;
            }
        }
        Ok(())
    }

    async fn create(&self, config: &DataSourceConfig) -> Result<Arc<dyn DataSource>, QueryError> {
        tracing::info!(
            data_source = %config.id,
            url = %mask_database_url(&config.url),
            "Creating PostgreSQL data source"
        );
        Ok(Arc::new(PostgresDataSource::from_config(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(url: &str) -> DataSourceConfig {
        serde_json::from_value(json!({ "id": "pg", "type": "postgres", "url": url })).unwrap()
    }

    fn column(name: &str, data_type: DataType) -> ColumnInfo {
        ColumnInfo {
            name: name.into(),
            data_type,
        }
    }

    #[test]
    fn test_limit_wraps_query_as_subselect() {
        assert_eq!(
            limited_sql("SELECT * FROM orders ORDER BY id LIMIT 50;", Some(10)),
            "SELECT * FROM (SELECT * FROM orders ORDER BY id LIMIT 50) AS lens_limited LIMIT 10"
        );
        assert_eq!(limited_sql(" SELECT 1 ", None), "SELECT 1");
    }

    #[test]
    fn test_sqlstate_classes() {
        assert_eq!(sqlstate_code("57014"), ErrorCode::Timeout);
        assert_eq!(sqlstate_code("42601"), ErrorCode::Syntax);
        assert_eq!(sqlstate_code("42501"), ErrorCode::Permission);
        assert_eq!(sqlstate_code("28P01"), ErrorCode::Permission);
        assert_eq!(sqlstate_code("08006"), ErrorCode::Connection);
        assert_eq!(sqlstate_code("22012"), ErrorCode::Execution);
        assert_eq!(map_sqlx_error(&sqlx::Error::PoolTimedOut).code, ErrorCode::Timeout);
    }

    #[test]
    fn test_rows_to_time_series_points() {
        let columns = vec![
            column("time", DataType::Timestamp),
            column("region", DataType::String),
            column("total", DataType::Number),
        ];
        let rows = vec![vec![json!("2024-05-01T00:00:00+00:00"), json!("EU"), json!(12.5)]];
        let points = rows_to_points(&columns, rows, QueryFormat::TimeSeries, Utc::now());

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].timestamp.to_rfc3339(), "2024-05-01T00:00:00+00:00");
        assert_eq!(points[0].value, json!(12.5));
        assert_eq!(points[0].labels["region"], "EU");
        assert_eq!(points[0].fields.len(), 3);
    }

    #[test]
    fn test_table_rows_without_time_use_execution_time() {
        let executed_at = Utc::now();
        let columns = vec![column("name", DataType::String)];
        let points = rows_to_points(&columns, vec![vec![json!("a")]], QueryFormat::Table, executed_at);

        assert_eq!(points[0].timestamp, executed_at);
        assert_eq!(points[0].value, Value::Null);
        assert!(points[0].labels.is_empty());
        assert_eq!(points[0].fields["name"], json!("a"));
    }

    #[test]
    fn test_mask_database_url() {
        assert_eq!(
            mask_database_url("postgres://lens:hunter2@db:5432/app"),
            "postgres://lens:****@db:5432/app"
        );
        assert_eq!(mask_database_url("postgres://db/app"), "postgres://db/app");
    }

    #[test]
    fn test_factory_rejects_other_schemes() {
        assert!(PostgresFactory.validate_config(&config("postgres://db/app")).is_ok());
        assert!(PostgresFactory.validate_config(&config("mysql://db/app")).is_err());
    }

    #[test]
    fn test_oversized_pool_is_rejected() {
        let mut cfg = config("postgres://db/app");
        cfg.options.insert("max_connections".into(), json!(5_000_000_000u64));
        let err = PostgresFactory.validate_config(&cfg).unwrap_err();
        assert!(err.message.contains("max_connections"));
        assert!(PostgresDataSource::from_config(&cfg).is_err());

        let mut cfg = config("postgres://db/app");
        cfg.options.insert("min_connections".into(), json!(u64::from(u32::MAX) + 1));
        assert!(PostgresFactory.validate_config(&cfg).is_err());
    }

    #[tokio::test]
    async fn test_lazy_pool_does_not_connect_on_create() {
        let source = PostgresFactory.create(&config("postgres://lens@127.0.0.1:1/app")).await.unwrap();
        assert_eq!(source.metadata().kind, DataSourceType::Postgres);
        assert!(source.validate_query(&Query::new("UPDATE t SET a = 1")).is_err());
        source.close().await.unwrap();
    }

    /// Needs a reachable database:
    /// `DATABASE_URL=postgres://... cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn test_empty_result_keeps_columns() {
        let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/postgres".into());
        let source = PostgresDataSource::from_config(&config(&url)).unwrap();

        let result = source
            .query(&Query::new("SELECT 1::int4 AS n, 'a'::text AS label WHERE false"))
            .await
            .unwrap();
        assert!(result.data.is_empty());
        assert_eq!(
            result.columns,
            vec![column("n", DataType::Number), column("label", DataType::String)]
        );
        source.close().await.unwrap();
    }
}
