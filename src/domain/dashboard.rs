// Dashboard domain model
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use super::query::DataSourceType;

/// Root aggregate describing a dashboard: a grid, the panels placed on it and
/// the variables its queries may reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    pub grid: GridConfig,
    #[serde(default)]
    pub panels: Vec<PanelConfig>,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

impl DashboardConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn panel(&self, id: &str) -> Option<&PanelConfig> {
        self.panels.iter().find(|p| p.id == id)
    }

    /// Resolved value of every declared variable (`value`, falling back to `default`).
    pub fn variable_values(&self) -> HashMap<String, Value> {
        self.variables
            .iter()
            .map(|v| (v.name.clone(), v.resolved_value().clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridConfig {
    pub columns: i32,
    pub row_height: i32,
    /// Breakpoint name to the column count available at that breakpoint.
    #[serde(default)]
    pub breakpoints: BTreeMap<String, i32>,
}

impl GridConfig {
    pub fn new(columns: i32, row_height: i32) -> Self {
        Self {
            columns,
            row_height,
            breakpoints: BTreeMap::new(),
        }
    }

    pub fn with_breakpoint(mut self, name: impl Into<String>, columns: i32) -> Self {
        self.breakpoints.insert(name.into(), columns);
        self
    }

    /// The usual xs/sm/md/lg/xl tiers for a 12 column grid.
    pub fn with_default_breakpoints(self) -> Self {
        self.with_breakpoint("xs", 1)
            .with_breakpoint("sm", 2)
            .with_breakpoint("md", 4)
            .with_breakpoint("lg", 6)
            .with_breakpoint("xl", 12)
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self::new(12, 60)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GridPosition {
    pub x: i32,
    pub y: i32,
}

impl GridPosition {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridDimensions {
    pub width: i32,
    pub height: i32,
}

impl GridDimensions {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> i64 {
        i64::from(self.width) * i64::from(self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChartType {
    Line,
    Bar,
    StackedBar,
    Column,
    Pie,
    Area,
    Gauge,
    Table,
    Metric,
}

impl ChartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Line => "line",
            ChartType::Bar => "bar",
            ChartType::StackedBar => "stackedBar",
            ChartType::Column => "column",
            ChartType::Pie => "pie",
            ChartType::Area => "area",
            ChartType::Gauge => "gauge",
            ChartType::Table => "table",
            ChartType::Metric => "metric",
        }
    }

    /// Chart kinds plotted against a time axis.
    pub fn is_time_series(&self) -> bool {
        matches!(
            self,
            ChartType::Line
                | ChartType::Area
                | ChartType::Bar
                | ChartType::StackedBar
                | ChartType::Column
        )
    }
}

impl std::fmt::Display for ChartType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference from a panel to a registered data source. Accepts either a bare
/// id string or `{ "type": ..., "ref": ... }` in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "DataSourceRefRepr")]
pub struct DataSourceRef {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<DataSourceType>,
    #[serde(rename = "ref")]
    pub id: String,
}

impl DataSourceRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            kind: None,
            id: id.into(),
        }
    }

    pub fn typed(kind: DataSourceType, id: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            id: id.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.trim().is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DataSourceRefRepr {
    Id(String),
    Full {
        #[serde(rename = "type", default)]
        kind: Option<DataSourceType>,
        #[serde(rename = "ref", default)]
        id: String,
    },
}

impl From<DataSourceRefRepr> for DataSourceRef {
    fn from(repr: DataSourceRefRepr) -> Self {
        match repr {
            DataSourceRefRepr::Id(id) => DataSourceRef { kind: None, id },
            DataSourceRefRepr::Full { kind, id } => DataSourceRef { kind, id },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelConfig {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub position: GridPosition,
    pub dimensions: GridDimensions,
    #[serde(default)]
    pub data_source: DataSourceRef,
    #[serde(default)]
    pub query: String,
    /// Per-kind rendering options, decoded lazily by [`super::panel_kind::PanelKind`].
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
    /// Interaction handlers (`click`, `dataPoint`, `legend`, ...), carried
    /// through evaluation untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Value>,
}

impl PanelConfig {
    /// Column just past the panel's right edge. Widened so extreme
    /// coordinates cannot wrap.
    pub fn right(&self) -> i64 {
        i64::from(self.position.x) + i64::from(self.dimensions.width)
    }

    pub fn bottom(&self) -> i64 {
        i64::from(self.position.y) + i64::from(self.dimensions.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VariableType {
    #[default]
    Constant,
    Custom,
    Query,
    Interval,
    Textbox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: VariableType,
    #[serde(default)]
    pub default: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Variable {
    pub fn new(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            kind: VariableType::Constant,
            default: default.into(),
            value: None,
        }
    }

    pub fn resolved_value(&self) -> &Value {
        self.value.as_ref().unwrap_or(&self.default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Range ending now and spanning `duration` into the past.
    pub fn last(duration: Duration) -> Self {
        let end = Utc::now();
        Self {
            start: end - duration,
            end,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}
