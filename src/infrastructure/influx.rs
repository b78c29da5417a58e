// InfluxDB (InfluxQL over HTTP) data source
use crate::application::data_source::{DataSource, DataSourceFactory};
use crate::domain::query::{
    Capability, ColumnInfo, DataPoint, DataSourceConfig, DataSourceMetadata, DataSourceType, DataType, ErrorCode,
    Query, QueryError, QueryResult, ResultMetadata,
};
use crate::infrastructure::query_guard::ensure_read_only;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_RETENTION_POLICY: &str = "autogen";
const VALUE_COLUMNS: [&str; 4] = ["value", "mean", "last", "sum"];

#[derive(Debug, Deserialize)]
struct InfluxQLResponse {
    #[serde(default)]
    results: Vec<InfluxQLResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResult {
    #[serde(default)]
    series: Option<Vec<InfluxQLSeries>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLSeries {
    #[serde(default)]
    name: String,
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<Value>>,
    #[serde(default)]
    tags: Option<HashMap<String, String>>,
}

pub struct InfluxDataSource {
    id: String,
    host: String,
    token: Option<String>,
    database: String,
    retention_policy: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl InfluxDataSource {
    pub fn from_config(config: &DataSourceConfig) -> Result<Self, QueryError> {
        let database = config
            .option_str("database")
            .filter(|db| !db.is_empty())
            .ok_or_else(|| QueryError::new(ErrorCode::Internal, "influxdb data source requires a database option"))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| QueryError::new(ErrorCode::Internal, format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            id: config.id.clone(),
            host: config.url.trim_end_matches('/').to_string(),
            token: config.option_str("token").map(str::to_string),
            database: database.to_string(),
            retention_policy: config
                .option_str("retention_policy")
                .unwrap_or(DEFAULT_RETENTION_POLICY)
                .to_string(),
            timeout: config.timeout(),
            client,
        })
    }

    fn build_query_url(&self, query: &str) -> String {
        format!(
            "{}/query?db={}&rp={}&q={}",
            self.host,
            urlencoding::encode(&self.database),
            urlencoding::encode(&self.retention_policy),
            urlencoding::encode(query)
        )
    }

    async fn execute_query(&self, query: &str) -> Result<InfluxQLResponse, QueryError> {
        let mut request = self
            .client
            .get(self.build_query_url(query))
            .header("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Token {token}"));
        }

        let response = request.send().await.map_err(|e| classify_transport(&e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::new(
                classify_status(status),
                format!("InfluxDB query failed with status {status}"),
            )
            .with_details(body));
        }

        let data = response.json::<InfluxQLResponse>().await.map_err(|e| {
            QueryError::new(ErrorCode::Execution, "failed to parse InfluxDB response").with_details(e.to_string())
        })?;

        let error = data
            .error
            .clone()
            .or_else(|| data.results.iter().find_map(|r| r.error.clone()));
        if let Some(error) = error {
            return Err(QueryError::new(classify_message(&error), format!("InfluxDB query error: {error}")));
        }

        Ok(data)
    }
}

#[async_trait]
impl DataSource for InfluxDataSource {
    async fn query(&self, query: &Query) -> Result<QueryResult, QueryError> {
        let started = Instant::now();
        tracing::debug!(data_source = %self.id, query = %query.raw, "Executing InfluxQL query");

        let response = tokio::time::timeout(self.timeout, self.execute_query(&query.raw))
            .await
            .map_err(|_| QueryError::timeout(self.timeout))?
            .map_err(|err| err.with_query(query.raw.clone()))?;

        let (columns, mut data) = series_to_points(response);
        if let Some(max_points) = query.max_data_points {
            data = downsample_by_series(data, max_points);
        }

        Ok(QueryResult {
            metadata: ResultMetadata {
                query_id: query.id.clone(),
                executed_at: Utc::now(),
                row_count: data.len(),
                data_source: self.id.clone(),
                execution_time: started.elapsed(),
            },
            data,
            columns,
        })
    }

    async fn test_connection(&self) -> Result<(), QueryError> {
        self.execute_query("SHOW DATABASES").await.map(|_| ())
    }

    fn metadata(&self) -> DataSourceMetadata {
        DataSourceMetadata {
            kind: DataSourceType::Influxdb,
            name: self.id.clone(),
            version: "1.x".to_string(),
            description: format!("InfluxQL database {} ({})", self.database, self.retention_policy),
            capabilities: vec![Capability::Query, Capability::TimeSeries, Capability::Metrics],
        }
    }

    fn validate_query(&self, query: &Query) -> Result<(), QueryError> {
        ensure_read_only(&query.raw, &["SELECT", "SHOW"])
    }

    async fn close(&self) -> Result<(), QueryError> {
        Ok(())
    }

    fn query_timeout(&self) -> Duration {
        self.timeout
    }
}

fn classify_transport(err: &reqwest::Error, timeout: Duration) -> QueryError {
    if err.is_timeout() {
        QueryError::timeout(timeout)
    } else if err.is_connect() {
        QueryError::new(ErrorCode::Connection, "failed to connect to InfluxDB").with_details(err.to_string())
    } else {
        QueryError::new(ErrorCode::Connection, "failed to send request to InfluxDB").with_details(err.to_string())
    }
}

fn classify_status(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorCode::Permission,
        StatusCode::BAD_REQUEST => ErrorCode::Syntax,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ErrorCode::Timeout,
        s if s.is_server_error() => ErrorCode::Connection,
        _ => ErrorCode::Execution,
    }
}

fn classify_message(message: &str) -> ErrorCode {
    let lower = message.to_ascii_lowercase();
    if lower.contains("error parsing query") || lower.contains("syntax") {
        ErrorCode::Syntax
    } else if lower.contains("authorization") || lower.contains("not authorized") {
        ErrorCode::Permission
    } else if lower.contains("timeout") {
        ErrorCode::Timeout
    } else {
        ErrorCode::Execution
    }
}

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn infer_type(column: &str, sample: Option<&Value>) -> DataType {
    if column == "time" {
        return DataType::Timestamp;
    }
    match sample {
        Some(Value::Number(_)) => DataType::Number,
        Some(Value::Bool(_)) => DataType::Boolean,
        Some(Value::Object(_)) | Some(Value::Array(_)) => DataType::Json,
        _ => DataType::String,
    }
}

/// Flatten every series into points. Tags become labels; every non-time
/// column lands in `fields` and the first known value column is `value`.
fn series_to_points(response: InfluxQLResponse) -> (Vec<ColumnInfo>, Vec<DataPoint>) {
    let mut columns: Vec<ColumnInfo> = Vec::new();
    let mut points = Vec::new();

    let series = response.results.into_iter().flat_map(|r| r.series.unwrap_or_default());
    for s in series {
        for (idx, name) in s.columns.iter().enumerate() {
            if columns.iter().all(|c| &c.name != name) {
                let sample = s.values.iter().find_map(|row| row.get(idx).filter(|v| !v.is_null()));
                columns.push(ColumnInfo {
                    name: name.clone(),
                    data_type: infer_type(name, sample),
                });
            }
        }

        let time_idx = s.columns.iter().position(|c| c == "time");
        let value_idx = VALUE_COLUMNS
            .iter()
            .find_map(|wanted| s.columns.iter().position(|c| c == wanted))
            .or_else(|| s.columns.iter().position(|c| c != "time"));

        let mut labels = s.tags.unwrap_or_default();
        if !s.name.is_empty() {
            labels.entry("measurement".to_string()).or_insert(s.name);
        }

        for row in s.values {
            let Some(timestamp) = time_idx.and_then(|i| row.get(i)).and_then(parse_time) else {
                continue;
            };
            let value = value_idx.and_then(|i| row.get(i)).cloned().unwrap_or(Value::Null);
            let fields: Map<String, Value> = s
                .columns
                .iter()
                .zip(row)
                .filter(|(name, _)| name.as_str() != "time")
                .map(|(name, v)| (name.clone(), v))
                .collect();

            points.push(DataPoint {
                timestamp,
                value,
                labels: labels.clone(),
                fields,
            });
        }
    }

    (columns, points)
}

/// Downsample each label set separately so distinct series never average
/// into each other.
fn downsample_by_series(points: Vec<DataPoint>, max_points: usize) -> Vec<DataPoint> {
    let mut groups: Vec<(HashMap<String, String>, Vec<DataPoint>)> = Vec::new();
    for point in points {
        match groups.iter_mut().find(|(labels, _)| *labels == point.labels) {
            Some((_, group)) => group.push(point),
            None => groups.push((point.labels.clone(), vec![point])),
        }
    }

    groups
        .into_iter()
        .flat_map(|(_, group)| downsample_points(group, max_points))
        .collect()
}

/// Bucket averaging: each bucket keeps its middle point's timestamp and the
/// mean of its numeric values.
pub fn downsample_points(points: Vec<DataPoint>, max_points: usize) -> Vec<DataPoint> {
    if max_points == 0 || points.len() <= max_points {
        return points;
    }

    let bucket_size = points.len().div_ceil(max_points);
    let mut downsampled = Vec::with_capacity(max_points);

    for chunk in points.chunks(bucket_size) {
        let mid = &chunk[chunk.len() / 2];
        let numbers: Vec<f64> = chunk.iter().filter_map(|p| p.value.as_f64()).collect();
        let value = if numbers.is_empty() {
            mid.value.clone()
        } else {
            serde_json::Number::from_f64(numbers.iter().sum::<f64>() / numbers.len() as f64)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        };

        downsampled.push(DataPoint {
            timestamp: mid.timestamp,
            value,
            labels: mid.labels.clone(),
            fields: mid.fields.clone(),
        });
    }

    downsampled
}

pub struct InfluxFactory;

#[async_trait]
impl DataSourceFactory for InfluxFactory {
    fn supported_type(&self) -> DataSourceType {
        DataSourceType::Influxdb
    }

    fn validate_config(&self, config: &DataSourceConfig) -> Result<(), QueryError> {
        if config.kind != DataSourceType::Influxdb {
            return Err(QueryError::new(
                ErrorCode::Internal,
                format!("expected an influxdb config, got {}", config.kind),
            ));
        }
        reqwest::Url::parse(&config.url)
            .map_err(|e| QueryError::new(ErrorCode::Connection, format!("invalid InfluxDB url: {e}")))?;
        if config.option_str("database").is_none_or(str::is_empty) {
            return Err(QueryError::new(ErrorCode::Internal, "influxdb data source requires a database option"));
        }
        if config.timeout_ms == 0 {
            return Err(QueryError::new(ErrorCode::Internal, "timeout_ms must be positive"));
        }
        Ok(())
    }

    async fn create(&self, config: &DataSourceConfig) -> Result<Arc<dyn DataSource>, QueryError> {
        tracing::info!(data_source = %config.id, url = %config.url, "Creating InfluxDB data source");
        Ok(Arc::new(InfluxDataSource::from_config(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> DataSourceConfig {
        serde_json::from_value(json!({
            "id": "metrics",
            "type": "influxdb",
            "url": "http://localhost:8086/",
            "timeout_ms": 5000,
            "options": { "database": "telegraf", "token": "secret" }
        }))
        .unwrap()
    }

    fn point(ms: i64, value: f64) -> DataPoint {
        DataPoint {
            timestamp: DateTime::from_timestamp_millis(ms).unwrap(),
            value: json!(value),
            labels: HashMap::new(),
            fields: Map::new(),
        }
    }

    #[test]
    fn test_build_query_url() {
        let source = InfluxDataSource::from_config(&config()).unwrap();
        let url = source.build_query_url("SELECT mean(value) FROM cpu");
        assert_eq!(
            url,
            "http://localhost:8086/query?db=telegraf&rp=autogen&q=SELECT%20mean%28value%29%20FROM%20cpu"
        );
        assert_eq!(source.query_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_series_become_points_with_tags_as_labels() {
        let response: InfluxQLResponse = serde_json::from_value(json!({
            "results": [{
                "series": [{
                    "name": "cpu",
                    "tags": { "host": "a" },
                    "columns": ["time", "mean", "max"],
                    "values": [
                        ["2024-05-01T00:00:00Z", 1.5, 3.0],
                        ["2024-05-01T00:01:00Z", 2.5, 4.0]
                    ]
                }]
            }]
        }))
        .unwrap();

        let (columns, points) = series_to_points(response);
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].data_type, DataType::Timestamp);
        assert_eq!(columns[1].data_type, DataType::Number);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, json!(1.5));
        assert_eq!(points[0].labels["host"], "a");
        assert_eq!(points[0].labels["measurement"], "cpu");
        assert_eq!(points[1].fields["max"], json!(4.0));
    }

    #[test]
    fn test_downsample_points_averages_buckets() {
        let points: Vec<DataPoint> = (0..10).map(|i| point(i * 1000, i as f64)).collect();
        let result = downsample_points(points, 5);

        assert_eq!(result.len(), 5);
        assert_eq!(result[0].value, json!(0.5));
        assert_eq!(result[0].timestamp.timestamp_millis(), 1000);
        assert_eq!(result[4].value, json!(8.5));
    }

    #[test]
    fn test_downsample_keeps_series_apart() {
        let mut points = Vec::new();
        for i in 0..4 {
            let mut a = point(i * 1000, 1.0);
            a.labels.insert("host".into(), "a".into());
            let mut b = point(i * 1000, 100.0);
            b.labels.insert("host".into(), "b".into());
            points.push(a);
            points.push(b);
        }

        let result = downsample_by_series(points, 2);
        assert_eq!(result.len(), 4);
        assert!(result.iter().filter(|p| p.labels["host"] == "a").all(|p| p.value == json!(1.0)));
        assert!(result.iter().filter(|p| p.labels["host"] == "b").all(|p| p.value == json!(100.0)));
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), ErrorCode::Permission);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), ErrorCode::Syntax);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), ErrorCode::Connection);
        assert_eq!(classify_message("error parsing query: found EOF"), ErrorCode::Syntax);
        assert_eq!(classify_message("database not found: x"), ErrorCode::Execution);
    }

    #[test]
    fn test_validate_query_allows_select_and_show() {
        let source = InfluxDataSource::from_config(&config()).unwrap();
        assert!(source.validate_query(&Query::new("SHOW MEASUREMENTS")).is_ok());
        assert!(source.validate_query(&Query::new("SELECT * INTO copy FROM cpu")).is_err());
        assert!(source.validate_query(&Query::new("DROP MEASUREMENT cpu")).is_err());
    }

    #[test]
    fn test_factory_requires_database() {
        let mut cfg = config();
        assert!(InfluxFactory.validate_config(&cfg).is_ok());
        cfg.options.remove("database");
        assert!(InfluxFactory.validate_config(&cfg).is_err());
    }
}
