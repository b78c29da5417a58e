// Streaming dashboard service - progressive panel results over a channel
use crate::application::executor::{Executor, PanelTasks};
use crate::application::layout_engine::LayoutEngine;
use crate::application::responsive::grid_area;
use crate::domain::dashboard::{ChartType, DashboardConfig};
use crate::domain::evaluation::EvaluationContext;
use crate::domain::execution::{ExecutionResult, PanelExecutionError};
use crate::domain::layout::Layout;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelSkeleton {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub grid_area: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSkeleton {
    pub dashboard_id: String,
    pub name: String,
    pub layout: Option<Layout>,
    pub panels: Vec<PanelSkeleton>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub total_panels: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

/// One frame of a progressive dashboard load. The skeleton always comes
/// first and the completion event last; panel frames arrive in completion
/// order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamMessage {
    Skeleton(DashboardSkeleton),
    PanelResult {
        #[serde(rename = "panelId")]
        panel_id: String,
        result: ExecutionResult,
    },
    PanelError(PanelExecutionError),
    Complete(CompletionEvent),
}

#[derive(Clone)]
pub struct StreamingDashboardService {
    executor: Arc<dyn Executor>,
    layout: LayoutEngine,
}

impl StreamingDashboardService {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            layout: LayoutEngine::new(),
        }
    }

    /// Start executing `dashboard` and return the receiving end of its
    /// frames. Dropping the receiver cancels every outstanding panel query.
    pub fn stream_dashboard(&self, dashboard: DashboardConfig, ctx: EvaluationContext) -> mpsc::Receiver<StreamMessage> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let skeleton = self.build_skeleton(&dashboard);
        let executor = self.executor.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            if tx.send(StreamMessage::Skeleton(skeleton)).await.is_err() {
                return;
            }

            let cancel = CancellationToken::new();
            let variables = Arc::new(ctx.resolve_variables(&dashboard));
            let mut tasks = PanelTasks::default();
            for panel in dashboard.panels.iter().cloned() {
                tasks.spawn(
                    executor.clone(),
                    cancel.clone(),
                    panel,
                    variables.clone(),
                    ctx.time_range,
                );
            }

            let mut succeeded = 0;
            let mut failed = 0;
            loop {
                let joined = tokio::select! {
                    _ = tx.closed() => {
                        tracing::debug!(dashboard = %dashboard.id, "Stream receiver dropped, cancelling panels");
                        cancel.cancel();
                        return;
                    }
                    joined = tasks.join_next() => joined,
                };

                let message = match joined {
                    None => break,
                    Some((panel_id, Ok(result))) => {
                        succeeded += 1;
                        StreamMessage::PanelResult { panel_id, result }
                    }
                    Some((panel_id, Err(err))) => {
                        failed += 1;
                        tracing::warn!(dashboard = %dashboard.id, panel = %panel_id, error = %err, "Streamed panel failed");
                        StreamMessage::PanelError(PanelExecutionError {
                            panel_id,
                            code: err.code(),
                            message: err.to_string(),
                        })
                    }
                };

                if tx.send(message).await.is_err() {
                    cancel.cancel();
                    return;
                }
            }

            let complete = CompletionEvent {
                total_panels: dashboard.panels.len(),
                succeeded,
                failed,
                duration_ms: started.elapsed().as_millis() as u64,
            };
            tracing::info!(
                dashboard = %dashboard.id,
                succeeded,
                failed,
                duration_ms = complete.duration_ms,
                "Dashboard stream complete"
            );
            let _ = tx.send(StreamMessage::Complete(complete)).await;
        });

        rx
    }

    fn build_skeleton(&self, dashboard: &DashboardConfig) -> DashboardSkeleton {
        let layout = self
            .layout
            .calculate_layout(&dashboard.panels, &dashboard.grid)
            .ok();

        let panels = dashboard
            .panels
            .iter()
            .map(|panel| PanelSkeleton {
                id: panel.id.clone(),
                title: panel.title.clone(),
                chart_type: panel.chart_type,
                grid_area: grid_area(panel.position, panel.dimensions),
            })
            .collect();

        DashboardSkeleton {
            dashboard_id: dashboard.id.clone(),
            name: dashboard.name.clone(),
            layout,
            panels,
        }
    }
}
