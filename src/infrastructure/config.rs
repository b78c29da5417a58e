use crate::application::caching_executor::CachePolicy;
use crate::domain::query::DataSourceConfig;
use config::{ConfigBuilder, Environment, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/lens";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LensConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub dashboards: DashboardSettings,
    #[serde(default)]
    pub data_sources: Vec<DataSourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutorSettings {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_max_rows")]
    pub default_max_rows: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            default_max_rows: default_max_rows(),
        }
    }
}

impl ExecutorSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_rows() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_short_range_ttl_secs")]
    pub short_range_ttl_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_max_entries(),
            ttl_secs: default_ttl_secs(),
            short_range_ttl_secs: default_short_range_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl CacheSettings {
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            ttl: Duration::from_secs(self.ttl_secs),
            short_range_ttl: Duration::from_secs(self.short_range_ttl_secs),
            ..CachePolicy::default()
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_entries() -> usize {
    1000
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_short_range_ttl_secs() -> u64 {
    60
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardSettings {
    #[serde(default = "default_dashboard_dir")]
    pub directory: PathBuf,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            directory: default_dashboard_dir(),
        }
    }
}

fn default_dashboard_dir() -> PathBuf {
    PathBuf::from("dashboards")
}

impl LensConfig {
    fn validate(self) -> Result<Self, ConfigError> {
        if self.executor.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid("executor.default_timeout_ms must be positive".into()));
        }
        if self.cache.enabled && (self.cache.max_entries == 0 || self.cache.cleanup_interval_secs == 0) {
            return Err(ConfigError::Invalid(
                "cache.max_entries and cache.cleanup_interval_secs must be positive".into(),
            ));
        }

        let mut seen = HashSet::new();
        for source in &self.data_sources {
            if source.id.is_empty() {
                return Err(ConfigError::Invalid("data source id must not be empty".into()));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate data source id: {}", source.id)));
            }
        }
        Ok(self)
    }
}

fn with_environment(builder: ConfigBuilder<DefaultState>) -> Result<LensConfig, ConfigError> {
    let settings = builder
        .add_source(
            Environment::with_prefix("LENS")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<LensConfig>()?.validate()
}

/// Load `path` (any format the config crate understands, extension optional)
/// layered under `LENS__SECTION__KEY` environment variables. A missing file
/// yields the defaults.
pub fn load_config(path: &str) -> Result<LensConfig, ConfigError> {
    with_environment(config::Config::builder().add_source(File::with_name(path).required(false)))
}

/// Parse configuration from an in-memory TOML document.
pub fn parse_toml(contents: &str) -> Result<LensConfig, ConfigError> {
    with_environment(config::Config::builder().add_source(File::from_str(contents, FileFormat::Toml)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::query::DataSourceType;

    #[test]
    fn test_empty_document_yields_defaults() {
        let cfg = parse_toml("").unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert_eq!(cfg.executor.default_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.executor.default_max_rows, 1000);
        assert!(cfg.cache.enabled);
        assert_eq!(cfg.cache.policy(), CachePolicy::default());
        assert_eq!(cfg.dashboards.directory, PathBuf::from("dashboards"));
        assert!(cfg.data_sources.is_empty());
    }

    #[test]
    fn test_data_sources_and_overrides() {
        let cfg = parse_toml(
            r#"
            [cache]
            ttl_secs = 120

            [[data_sources]]
            id = "warehouse"
            type = "postgres"
            url = "postgres://lens@db/warehouse"
            timeout_ms = 10000
            options = { max_connections = 4 }

            [[data_sources]]
            id = "metrics"
            type = "influxdb"
            url = "http://influx:8086"
            options = { database = "telegraf" }
            "#,
        )
        .unwrap();

        assert_eq!(cfg.cache.policy().ttl, Duration::from_secs(120));
        assert_eq!(cfg.data_sources.len(), 2);
        assert_eq!(cfg.data_sources[0].kind, DataSourceType::Postgres);
        assert_eq!(cfg.data_sources[0].option_u64("max_connections"), Some(4));
        assert_eq!(cfg.data_sources[1].timeout(), Duration::from_secs(30));
        assert_eq!(cfg.data_sources[1].option_str("database"), Some("telegraf"));
    }

    #[test]
    fn test_duplicate_data_source_ids_are_rejected() {
        let err = parse_toml(
            r#"
            [[data_sources]]
            id = "db"
            type = "postgres"
            url = "postgres://a/b"

            [[data_sources]]
            id = "db"
            type = "postgres"
            url = "postgres://c/d"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = load_config("config/does-not-exist").unwrap();
        assert_eq!(cfg.cache.max_entries, 1000);
    }
}
