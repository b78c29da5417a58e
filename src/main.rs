// Main entry point - Dependency injection and server setup
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use lens_engine::application::cache::{Cache, MemoryCache};
use lens_engine::application::caching_executor::CachingExecutor;
use lens_engine::application::evaluator::Evaluator;
use lens_engine::application::executor::{Executor, QueryExecutor};
use lens_engine::application::layout_engine::LayoutEngine;
use lens_engine::application::registry::{self, Registry};
use lens_engine::application::streaming_service::StreamingDashboardService;
use lens_engine::infrastructure::config::{DEFAULT_CONFIG_PATH, load_config};
use lens_engine::infrastructure::dashboard_store::DashboardStore;
use lens_engine::infrastructure::influx::InfluxFactory;
use lens_engine::infrastructure::postgres::PostgresFactory;
use lens_engine::presentation::app_state::AppState;
use lens_engine::presentation::router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config_path = std::env::var("LENS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&config_path).with_context(|| format!("loading configuration from {config_path}"))?;

    // Data sources (infrastructure layer)
    let registry = Arc::new(Registry::new());
    registry.register_factory(Arc::new(PostgresFactory));
    registry.register_factory(Arc::new(InfluxFactory));
    for source in &config.data_sources {
        registry
            .register_from_config(source)
            .await
            .with_context(|| format!("registering data source {}", source.id))?;
    }
    if registry::install_default(registry.clone()).is_err() {
        tracing::warn!("Default registry already installed");
    }

    let store = DashboardStore::load_dir(&config.dashboards.directory).context("loading dashboards")?;

    // Services (application layer)
    let query_executor = QueryExecutor::new(registry.clone())
        .with_defaults(config.executor.default_timeout(), config.executor.default_max_rows);
    let (executor, cache): (Arc<dyn Executor>, Option<Arc<dyn Cache>>) = if config.cache.enabled {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::with_cleanup(
            config.cache.max_entries,
            config.cache.cleanup_interval(),
        ));
        let caching = CachingExecutor::new(query_executor, cache.clone()).with_policy(config.cache.policy());
        (Arc::new(caching), Some(cache))
    } else {
        (Arc::new(query_executor), None)
    };

    let state = Arc::new(AppState {
        store: Arc::new(store),
        evaluator: Arc::new(Evaluator::new(registry.clone())),
        executor: executor.clone(),
        cache: cache.clone(),
        layout: LayoutEngine::new(),
        streaming_service: StreamingDashboardService::new(executor.clone()),
    });

    // Start server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;
    tracing::info!(%addr, dashboards = state.store.len(), data_sources = ?registry.ids(), "Starting lens-engine");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Teardown
    if let Some(cache) = cache {
        cache.close().await.context("closing cache")?;
    }
    if let Err(err) = executor.close().await {
        tracing::warn!(error = %err, "Failed to close data sources");
    }
    registry::take_default();
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
