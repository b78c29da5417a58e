// Evaluation context and the render-ready artifacts produced from it
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use super::dashboard::{DashboardConfig, DataSourceRef, PanelConfig, TimeRange};
use super::layout::{Layout, OverlapError};
use super::panel_kind::PanelKind;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub id: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationOptions {
    pub interpolate_variables: bool,
    pub calculate_layout: bool,
    pub validate_queries: bool,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            interpolate_variables: true,
            calculate_layout: true,
            validate_queries: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    pub time_range: TimeRange,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserContext>,
    #[serde(default)]
    pub options: EvaluationOptions,
}

impl EvaluationContext {
    pub fn new(time_range: TimeRange) -> Self {
        Self {
            time_range,
            variables: HashMap::new(),
            user: None,
            options: EvaluationOptions::default(),
        }
    }

    /// Context covering the last hour with no variables.
    pub fn last_hour() -> Self {
        Self::new(TimeRange::last(Duration::hours(1)))
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_user(mut self, user: UserContext) -> Self {
        self.user = Some(user);
        self
    }

    /// Variables visible to the dashboard's queries: declared values first,
    /// then this context's variables on top.
    pub fn resolve_variables(&self, config: &DashboardConfig) -> BTreeMap<String, Value> {
        let mut resolved: BTreeMap<String, Value> = config.variable_values().into_iter().collect();
        resolved.extend(self.variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        resolved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EvaluationPhase {
    Validation,
    Layout,
    Interpolation,
    DataSource,
    QueryValidation,
    RenderConfig,
}

impl std::fmt::Display for EvaluationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EvaluationPhase::Validation => "validation",
            EvaluationPhase::Layout => "layout",
            EvaluationPhase::Interpolation => "interpolation",
            EvaluationPhase::DataSource => "data_source",
            EvaluationPhase::QueryValidation => "query_validation",
            EvaluationPhase::RenderConfig => "render_config",
        };
        f.write_str(s)
    }
}

/// Non-fatal failure scoped to one panel (or the dashboard when `panel_id` is empty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationError {
    pub panel_id: String,
    pub phase: EvaluationPhase,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl EvaluationError {
    pub fn new(panel_id: impl Into<String>, phase: EvaluationPhase, message: impl Into<String>) -> Self {
        Self {
            panel_id: panel_id.into(),
            phase,
            message: message.into(),
            cause: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_cause(mut self, cause: impl std::fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }
}

impl std::fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "panel {} ({}): {}", self.panel_id, self.phase, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for EvaluationError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderConfig {
    pub kind: PanelKind,
    pub chart_options: Map<String, Value>,
    pub grid_area: String,
    pub data_endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatedPanel {
    pub config: PanelConfig,
    pub resolved_query: String,
    pub data_source_ref: DataSourceRef,
    pub render_config: RenderConfig,
    /// Variables the resolved query was built from.
    pub variables: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatedDashboard {
    pub config: DashboardConfig,
    pub layout: Option<Layout>,
    pub panels: Vec<EvaluatedPanel>,
    pub errors: Vec<EvaluationError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overlaps: Vec<OverlapError>,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluatedDashboard {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn all_errors(&self) -> &[EvaluationError] {
        &self.errors
    }

    pub fn panel(&self, id: &str) -> Option<&EvaluatedPanel> {
        self.panels.iter().find(|p| p.config.id == id)
    }

    pub fn errors_for(&self, panel_id: &str) -> impl Iterator<Item = &EvaluationError> {
        self.errors.iter().filter(move |e| e.panel_id == panel_id)
    }
}
