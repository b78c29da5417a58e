// Presentation layer - HTTP routes over the engine
pub mod app_state;
pub mod handlers;

use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    cache_stats, dashboard_data, evaluate_panel, get_dashboard, health_check, list_dashboards, panel_data,
    stream_dashboard,
};
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Compression is applied per response by the handlers, so no
/// compression layer is installed here.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/dashboards", get(list_dashboards))
        .route("/dashboards/:id", get(get_dashboard))
        .route("/dashboards/:id/data", get(dashboard_data))
        .route("/dashboards/:id/stream", get(stream_dashboard))
        .route("/dashboards/:id/panels/:panel_id/data", get(panel_data))
        .route("/dashboards/:id/panels/:panel_id/evaluate", post(evaluate_panel))
        .route("/cache/stats", get(cache_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
