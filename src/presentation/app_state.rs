// Application state for HTTP handlers
use crate::application::cache::Cache;
use crate::application::evaluator::Evaluator;
use crate::application::executor::Executor;
use crate::application::layout_engine::LayoutEngine;
use crate::application::streaming_service::StreamingDashboardService;
use crate::infrastructure::dashboard_store::DashboardStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DashboardStore>,
    pub evaluator: Arc<Evaluator>,
    /// Cache-backed when caching is enabled.
    pub executor: Arc<dyn Executor>,
    pub cache: Option<Arc<dyn Cache>>,
    pub layout: LayoutEngine,
    pub streaming_service: StreamingDashboardService,
}
