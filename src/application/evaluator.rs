// Evaluation pipeline: validate, lay out, then resolve every panel
use crate::application::interpolation::{prepare_query, referenced_variables};
use crate::application::layout_engine::{LayoutEngine, LayoutError};
use crate::application::registry::Registry;
use crate::application::responsive::grid_area;
use crate::application::validator::Validator;
use crate::domain::dashboard::{DashboardConfig, PanelConfig};
use crate::domain::evaluation::{
    EvaluatedDashboard, EvaluatedPanel, EvaluationContext, EvaluationError, EvaluationPhase, RenderConfig,
};
use crate::domain::layout::Layout;
use crate::domain::panel_kind::PanelKind;
use crate::domain::query::{Query, QueryFormat};
use crate::domain::validation::ValidationError;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Failures that stop a whole evaluation. Per-panel problems never end up
/// here; they are collected on the [`EvaluatedDashboard`].
#[derive(Debug, Error)]
pub enum EvaluateError {
    #[error("dashboard {dashboard_id} is invalid: {}", summarize(.errors))]
    Invalid {
        dashboard_id: String,
        errors: Vec<ValidationError>,
    },

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("panel {panel_id} not found in dashboard {dashboard_id}")]
    PanelNotFound { dashboard_id: String, panel_id: String },

    #[error(transparent)]
    Panel(#[from] EvaluationError),
}

fn summarize(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

pub struct Evaluator {
    registry: Arc<Registry>,
    validator: Validator,
    layout: LayoutEngine,
}

impl Evaluator {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            validator: Validator::new(),
            layout: LayoutEngine::new(),
        }
    }

    pub fn evaluate(&self, config: &DashboardConfig, ctx: &EvaluationContext) -> Result<EvaluatedDashboard, EvaluateError> {
        let validation = self.validator.validate(config);
        let structural = validation.structural_errors();
        if !structural.is_empty() {
            tracing::warn!(
                dashboard = %config.id,
                errors = structural.len(),
                "Dashboard failed structural validation"
            );
            return Err(EvaluateError::Invalid {
                dashboard_id: config.id.clone(),
                errors: structural,
            });
        }

        let layout = if ctx.options.calculate_layout {
            Some(self.layout.calculate_layout(&config.panels, &config.grid)?)
        } else {
            None
        };
        let overlaps = self.layout.detect_overlaps(&config.panels);
        if !overlaps.is_empty() {
            tracing::debug!(dashboard = %config.id, overlaps = overlaps.len(), "Dashboard has overlapping panels");
        }

        let mut rejected: HashMap<&str, Vec<&ValidationError>> = HashMap::new();
        for error in &validation.errors {
            if let Some(panel_id) = error.panel_id.as_deref() {
                rejected.entry(panel_id).or_default().push(error);
            }
        }

        let variables = ctx.resolve_variables(config);
        let mut panels = Vec::with_capacity(config.panels.len());
        let mut errors = Vec::new();

        for panel in &config.panels {
            if let Some(problems) = rejected.get(panel.id.as_str()) {
                errors.extend(problems.iter().map(|problem| {
                    EvaluationError::new(&panel.id, EvaluationPhase::Validation, &problem.message)
                        .with_cause(problem.code)
                }));
                continue;
            }

            let area = layout_area(layout.as_ref(), panel);
            let endpoint = format!("/dashboards/{}/panels/{}/data", config.id, panel.id);
            match self.evaluate_one(panel, &variables, ctx, area, endpoint) {
                Ok(evaluated) => panels.push(evaluated),
                Err(err) => {
                    tracing::warn!(dashboard = %config.id, panel = %panel.id, error = %err, "Panel evaluation failed");
                    errors.push(err);
                }
            }
        }

        Ok(EvaluatedDashboard {
            config: config.clone(),
            layout,
            panels,
            errors,
            overlaps,
            evaluated_at: Utc::now(),
        })
    }

    /// Evaluates one panel on its own with only the context's variables,
    /// without laying out the rest of its dashboard.
    pub fn evaluate_panel(&self, panel: &PanelConfig, ctx: &EvaluationContext) -> Result<EvaluatedPanel, EvaluationError> {
        let variables: BTreeMap<String, Value> = ctx
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let endpoint = format!("panels/{}/data", panel.id);
        self.evaluate_one(panel, &variables, ctx, grid_area(panel.position, panel.dimensions), endpoint)
    }

    /// Re-evaluates a single panel of `config` with the dashboard's declared
    /// variables overlaid by the context's.
    pub fn evaluate_dashboard_panel(
        &self,
        config: &DashboardConfig,
        panel_id: &str,
        ctx: &EvaluationContext,
    ) -> Result<EvaluatedPanel, EvaluateError> {
        let panel = config.panel(panel_id).ok_or_else(|| EvaluateError::PanelNotFound {
            dashboard_id: config.id.clone(),
            panel_id: panel_id.to_string(),
        })?;

        let check = self.validator.validate_panel(panel, &config.grid);
        if let Some(problem) = check.errors.first() {
            return Err(EvaluationError::new(&panel.id, EvaluationPhase::Validation, &problem.message)
                .with_cause(problem.code)
                .into());
        }

        let variables = ctx.resolve_variables(config);
        let endpoint = format!("/dashboards/{}/panels/{}/data", config.id, panel.id);
        Ok(self.evaluate_one(
            panel,
            &variables,
            ctx,
            grid_area(panel.position, panel.dimensions),
            endpoint,
        )?)
    }

    fn evaluate_one(
        &self,
        panel: &PanelConfig,
        variables: &BTreeMap<String, Value>,
        ctx: &EvaluationContext,
        grid_area: String,
        data_endpoint: String,
    ) -> Result<EvaluatedPanel, EvaluationError> {
        let fail = |phase, message: &str| EvaluationError::new(&panel.id, phase, message);

        let resolved_query = if ctx.options.interpolate_variables {
            prepare_query(&panel.query, variables, Some(&ctx.time_range))
                .map_err(|err| fail(EvaluationPhase::Interpolation, &err.to_string()))?
        } else {
            panel.query.clone()
        };

        let source = self
            .registry
            .get(&panel.data_source.id)
            .map_err(|err| fail(EvaluationPhase::DataSource, &err.to_string()))?;

        if ctx.options.validate_queries {
            let mut query = Query::new(resolved_query.clone());
            query.time_range = Some(ctx.time_range);
            query.format = if panel.chart_type.is_time_series() {
                QueryFormat::TimeSeries
            } else {
                QueryFormat::Table
            };
            source.validate_query(&query).map_err(|err| {
                fail(EvaluationPhase::QueryValidation, "query rejected by data source").with_cause(err)
            })?;
        }

        let kind = PanelKind::from_panel(panel)
            .map_err(|err| fail(EvaluationPhase::RenderConfig, "invalid panel options").with_cause(err))?;

        Ok(EvaluatedPanel {
            config: panel.clone(),
            resolved_query,
            data_source_ref: panel.data_source.clone(),
            render_config: RenderConfig {
                chart_options: kind.default_chart_options(),
                kind,
                grid_area,
                data_endpoint,
            },
            variables: referenced_variables(&panel.query, variables),
        })
    }
}

fn layout_area(layout: Option<&Layout>, panel: &PanelConfig) -> String {
    layout
        .and_then(|l| l.panel(&panel.id))
        .map(|p| p.css.grid_area.clone())
        .unwrap_or_else(|| grid_area(panel.position, panel.dimensions))
}
