// Query execution against registered data sources
use crate::application::data_source::DataSource;
use crate::application::interpolation::{InterpolationError, prepare_query, referenced_variables};
use crate::application::registry::{Registry, RegistryError};
use crate::domain::dashboard::{DashboardConfig, PanelConfig, TimeRange};
use crate::domain::evaluation::EvaluationContext;
use crate::domain::execution::{DashboardResult, ExecutionQuery, ExecutionResult, PanelExecutionError};
use crate::domain::panel_kind::QueryOptions;
use crate::domain::query::{ErrorCode, Query, QueryError, QueryFormat};
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ROWS: usize = 1000;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("execution cancelled")]
    Cancelled,

    #[error("panel {panel_id} aborted: {reason}")]
    Aborted { panel_id: String, reason: String },
}

impl ExecutionError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ExecutionError::Query(err) => Some(err.code),
            ExecutionError::Cancelled => Some(ErrorCode::Cancelled),
            ExecutionError::Aborted { .. } => Some(ErrorCode::Internal),
            ExecutionError::Registry(_) | ExecutionError::Interpolation(_) => None,
        }
    }
}

/// Runs queries. Every call observes `cancel`: once it fires, in-flight
/// backend calls are dropped and [`ExecutionError::Cancelled`] is returned.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        query: &ExecutionQuery,
    ) -> Result<ExecutionResult, ExecutionError>;

    /// Interpolates `variables` into the panel's query and executes it.
    async fn execute_panel(
        &self,
        cancel: &CancellationToken,
        panel: &PanelConfig,
        variables: &BTreeMap<String, Value>,
        time_range: Option<&TimeRange>,
    ) -> Result<ExecutionResult, ExecutionError>;

    /// Executes every panel concurrently. Panel failures are collected in
    /// [`DashboardResult::errors`]; they never fail the call.
    async fn execute_dashboard(
        &self,
        cancel: &CancellationToken,
        dashboard: &DashboardConfig,
        ctx: &EvaluationContext,
    ) -> Result<DashboardResult, ExecutionError>;

    fn register_data_source(&self, id: &str, source: Arc<dyn DataSource>) -> Result<(), ExecutionError>;

    /// Closes every registered data source, reporting all failures together.
    async fn close(&self) -> Result<(), ExecutionError>;
}

#[derive(Clone)]
pub struct QueryExecutor {
    registry: Arc<Registry>,
    default_timeout: Duration,
    default_max_rows: usize,
}

impl QueryExecutor {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            default_timeout: DEFAULT_TIMEOUT,
            default_max_rows: DEFAULT_MAX_ROWS,
        }
    }

    pub fn with_defaults(mut self, timeout: Duration, max_rows: usize) -> Self {
        self.default_timeout = timeout;
        self.default_max_rows = max_rows;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn to_query(&self, query: &ExecutionQuery) -> Query {
        let mut backend = Query::new(query.query.clone());
        backend.variables = query.variables.clone();
        backend.time_range = query.time_range;
        backend.max_data_points = Some(query.max_rows.unwrap_or(self.default_max_rows));
        backend.format = query.format;
        backend
    }
}

#[async_trait]
impl Executor for QueryExecutor {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        query: &ExecutionQuery,
    ) -> Result<ExecutionResult, ExecutionError> {
        let source = self.registry.get(&query.data_source_id)?;
        let timeout = query
            .timeout
            .unwrap_or(self.default_timeout)
            .min(source.query_timeout());

        let backend_query = self.to_query(query);
        source.validate_query(&backend_query)?;

        let executed_at = Utc::now();
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
            outcome = tokio::time::timeout(timeout, source.query(&backend_query)) => outcome,
        };

        let result = match outcome {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    data_source = %query.data_source_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Query timed out"
                );
                return Err(QueryError::timeout(timeout)
                    .with_query(backend_query.raw)
                    .into());
            }
        };

        let elapsed = started.elapsed();
        tracing::debug!(
            data_source = %query.data_source_id,
            rows = result.data.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Query executed"
        );
        Ok(ExecutionResult::from_query_result(
            result,
            &query.data_source_id,
            executed_at,
            elapsed,
        ))
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
        Ok(self.registry.register(id, source)?)
    }

    async fn close(&self) -> Result<(), ExecutionError> {
        Ok(self.registry.close_all().await?)
    }
}

/// Turn a panel into an executable query: interpolated text, the variables
/// it references, and any `timeoutMs`/`maxRows` hints from its options.
pub fn build_panel_query(
    panel: &PanelConfig,
    variables: &BTreeMap<String, Value>,
    time_range: Option<&TimeRange>,
) -> Result<ExecutionQuery, InterpolationError> {
    let resolved = prepare_query(&panel.query, variables, time_range)?;
    let options = QueryOptions::from_panel(panel);

    let mut query = ExecutionQuery::new(panel.data_source.id.clone(), resolved);
    query.variables = referenced_variables(&panel.query, variables);
    query.time_range = time_range.copied();
    query.max_rows = options.max_rows;
    query.timeout = options.timeout_ms.map(Duration::from_millis);
    query.format = if panel.chart_type.is_time_series() {
        QueryFormat::TimeSeries
    } else {
        QueryFormat::Table
    };
    Ok(query)
}

pub(crate) type PanelOutcome = (String, Result<ExecutionResult, ExecutionError>);

/// Panel executions running on a `JoinSet`, keyed by task id so a task
/// that dies without returning is still reported against its panel.
#[derive(Default)]
pub(crate) struct PanelTasks {
    set: JoinSet<PanelOutcome>,
    panels: HashMap<task::Id, String>,
}

impl PanelTasks {
    /// Spawn one panel execution. A panic inside the executor is caught and
    /// reported as [`ExecutionError::Aborted`] for that panel.
    pub(crate) fn spawn(
        &mut self,
        executor: Arc<dyn Executor>,
        cancel: CancellationToken,
        panel: PanelConfig,
        variables: Arc<BTreeMap<String, Value>>,
        time_range: TimeRange,
    ) {
        let panel_id = panel.id.clone();
        let handle = self.set.spawn(async move {
            let run = executor.execute_panel(&cancel, &panel, &variables, Some(&time_range));
            let outcome = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => Err(ExecutionError::Aborted {
                    panel_id: panel.id.clone(),
                    reason: panic_message(payload.as_ref()),
                }),
            };
            (panel.id, outcome)
        });
        self.panels.insert(handle.id(), panel_id);
    }

    /// The next finished panel, `None` once every task has been joined.
    pub(crate) async fn join_next(&mut self) -> Option<PanelOutcome> {
        let joined = self.set.join_next_with_id().await?;
        Some(match joined {
            Ok((id, outcome)) => {
                self.panels.remove(&id);
                outcome
            }
            Err(join_err) => {
                let panel_id = self.panels.remove(&join_err.id()).unwrap_or_default();
                let reason = if join_err.is_cancelled() {
                    "task cancelled".to_string()
                } else {
                    join_err.to_string()
                };
                (panel_id.clone(), Err(ExecutionError::Aborted { panel_id, reason }))
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn abort_all(&mut self) {
        self.set.abort_all();
    }
}

/// One task per panel, joined before returning.
pub(crate) async fn execute_panels<E>(
    executor: &E,
    cancel: &CancellationToken,
    dashboard: &DashboardConfig,
    ctx: &EvaluationContext,
) -> DashboardResult
where
    E: Executor + Clone + 'static,
{
    let executed_at = Utc::now();
    let started = Instant::now();
    let shared: Arc<dyn Executor> = Arc::new(executor.clone());
    let variables = Arc::new(ctx.resolve_variables(dashboard));

    let mut tasks = PanelTasks::default();
    for panel in dashboard.panels.iter().cloned() {
        tasks.spawn(
            shared.clone(),
            cancel.clone(),
            panel,
            variables.clone(),
            ctx.time_range,
        );
    }

    let mut panel_results = HashMap::new();
    let mut errors = Vec::new();
    while let Some((panel_id, outcome)) = tasks.join_next().await {
        match outcome {
            Ok(result) => {
                panel_results.insert(panel_id, result);
            }
            Err(err) => {
                tracing::warn!(dashboard = %dashboard.id, panel = %panel_id, error = %err, "Panel execution failed");
                errors.push(PanelExecutionError {
                    panel_id,
                    code: err.code(),
                    message: err.to_string(),
                });
            }
        }
    }
    errors.sort_by(|a, b| a.panel_id.cmp(&b.panel_id));

    DashboardResult {
        panel_results,
        errors,
        executed_at,
        duration: started.elapsed(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
