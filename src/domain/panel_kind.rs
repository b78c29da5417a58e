// Typed panel kinds for the render boundary
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::dashboard::{ChartType, PanelConfig};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SeriesOptions {
    pub curve: Option<String>,
    pub unit: Option<String>,
    pub y_min: Option<f64>,
    pub y_max: Option<f64>,
    pub colors: Vec<String>,
    pub fraction_digits: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BarOptions {
    pub horizontal: bool,
    pub column_width: Option<String>,
    pub unit: Option<String>,
    pub colors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PieOptions {
    pub donut: bool,
    pub legend_position: Option<String>,
    pub colors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GaugeOptions {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TableOptions {
    pub page_size: Option<usize>,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetricOptions {
    pub unit: Option<String>,
    pub precision: Option<u32>,
    pub prefix: Option<String>,
}

/// A panel's chart type together with its decoded options. The engine only
/// threads this through; renderers match on it exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "options", rename_all = "camelCase")]
pub enum PanelKind {
    Line(SeriesOptions),
    Area(SeriesOptions),
    Bar(BarOptions),
    StackedBar(BarOptions),
    Column(BarOptions),
    Pie(PieOptions),
    Gauge(GaugeOptions),
    Table(TableOptions),
    Metric(MetricOptions),
}

impl PanelKind {
    pub fn decode(chart_type: ChartType, options: &Map<String, Value>) -> serde_json::Result<Self> {
        let value = Value::Object(options.clone());
        Ok(match chart_type {
            ChartType::Line => PanelKind::Line(serde_json::from_value(value)?),
            ChartType::Area => PanelKind::Area(serde_json::from_value(value)?),
            ChartType::Bar => PanelKind::Bar(serde_json::from_value(value)?),
            ChartType::StackedBar => PanelKind::StackedBar(serde_json::from_value(value)?),
            ChartType::Column => PanelKind::Column(serde_json::from_value(value)?),
            ChartType::Pie => PanelKind::Pie(serde_json::from_value(value)?),
            ChartType::Gauge => PanelKind::Gauge(serde_json::from_value(value)?),
            ChartType::Table => PanelKind::Table(serde_json::from_value(value)?),
            ChartType::Metric => PanelKind::Metric(serde_json::from_value(value)?),
        })
    }

    pub fn from_panel(panel: &PanelConfig) -> serde_json::Result<Self> {
        Self::decode(panel.chart_type, &panel.options)
    }

    pub fn chart_type(&self) -> ChartType {
        match self {
            PanelKind::Line(_) => ChartType::Line,
            PanelKind::Area(_) => ChartType::Area,
            PanelKind::Bar(_) => ChartType::Bar,
            PanelKind::StackedBar(_) => ChartType::StackedBar,
            PanelKind::Column(_) => ChartType::Column,
            PanelKind::Pie(_) => ChartType::Pie,
            PanelKind::Gauge(_) => ChartType::Gauge,
            PanelKind::Table(_) => ChartType::Table,
            PanelKind::Metric(_) => ChartType::Metric,
        }
    }

    /// Chart library defaults for this kind, before user options are layered on.
    pub fn default_chart_options(&self) -> Map<String, Value> {
        let defaults = match self {
            PanelKind::Line(opts) => json!({
                "stroke": { "curve": opts.curve.as_deref().unwrap_or("smooth") }
            }),
            PanelKind::Area(opts) => json!({
                "stroke": { "curve": opts.curve.as_deref().unwrap_or("smooth") },
                "fill": { "type": "gradient" }
            }),
            PanelKind::Bar(opts) => json!({
                "plotOptions": { "bar": { "horizontal": opts.horizontal } }
            }),
            PanelKind::StackedBar(opts) => json!({
                "chart": { "stacked": true },
                "plotOptions": { "bar": { "horizontal": opts.horizontal } }
            }),
            PanelKind::Column(opts) => json!({
                "plotOptions": { "bar": {
                    "horizontal": false,
                    "columnWidth": opts.column_width.as_deref().unwrap_or("55%")
                } }
            }),
            PanelKind::Pie(opts) => json!({
                "chart": { "type": pie_chart_type(opts) },
                "legend": { "position": opts.legend_position.as_deref().unwrap_or("bottom") }
            }),
            PanelKind::Gauge(_) => json!({ "chart": { "type": "radialBar" } }),
            PanelKind::Table(_) | PanelKind::Metric(_) => json!({}),
        };

        match defaults {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

fn pie_chart_type(opts: &PieOptions) -> &'static str {
    if opts.donut { "donut" } else { "pie" }
}

/// Execution hints a panel may carry in its options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryOptions {
    pub timeout_ms: Option<u64>,
    pub max_rows: Option<usize>,
}

impl QueryOptions {
    /// Reads the hints, ignoring malformed values rather than failing the panel.
    pub fn from_panel(panel: &PanelConfig) -> Self {
        let timeout_ms = panel.options.get("timeoutMs").and_then(Value::as_u64);
        let max_rows = panel
            .options
            .get("maxRows")
            .and_then(Value::as_u64)
            .map(|n| n as usize);
        Self { timeout_ms, max_rows }
    }
}
