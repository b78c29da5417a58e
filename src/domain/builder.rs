// Fluent builders for dashboards and panels
use serde_json::{Map, Value};

use super::dashboard::{
    ChartType, DashboardConfig, DataSourceRef, GridConfig, GridDimensions, GridPosition,
    PanelConfig, Variable,
};

#[derive(Debug, Clone)]
pub struct DashboardBuilder {
    config: DashboardConfig,
}

impl DashboardBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            config: DashboardConfig {
                id: id.into(),
                name: String::new(),
                description: String::new(),
                version: "1.0.0".to_string(),
                grid: GridConfig::default(),
                panels: Vec::new(),
                variables: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config.description = description.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = version.into();
        self
    }

    pub fn grid(mut self, columns: i32, row_height: i32) -> Self {
        self.config.grid.columns = columns;
        self.config.grid.row_height = row_height;
        self
    }

    pub fn breakpoint(mut self, name: impl Into<String>, columns: i32) -> Self {
        self.config.grid.breakpoints.insert(name.into(), columns);
        self
    }

    pub fn variable(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.config.variables.push(Variable::new(name, default));
        self
    }

    pub fn panel(mut self, panel: PanelConfig) -> Self {
        self.config.panels.push(panel);
        self
    }

    pub fn build(self) -> DashboardConfig {
        self.config
    }
}

#[derive(Debug, Clone)]
pub struct PanelBuilder {
    panel: PanelConfig,
}

impl PanelBuilder {
    pub fn new(id: impl Into<String>, chart_type: ChartType) -> Self {
        Self {
            panel: PanelConfig {
                id: id.into(),
                title: String::new(),
                chart_type,
                position: GridPosition::new(0, 0),
                dimensions: GridDimensions::new(6, 4),
                data_source: DataSourceRef::default(),
                query: String::new(),
                options: Map::new(),
                events: None,
            },
        }
    }

    pub fn line(id: impl Into<String>) -> Self {
        Self::new(id, ChartType::Line)
    }

    pub fn bar(id: impl Into<String>) -> Self {
        Self::new(id, ChartType::Bar)
    }

    pub fn pie(id: impl Into<String>) -> Self {
        Self::new(id, ChartType::Pie)
    }

    pub fn table(id: impl Into<String>) -> Self {
        Self::new(id, ChartType::Table)
    }

    pub fn metric(id: impl Into<String>) -> Self {
        Self::new(id, ChartType::Metric)
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.panel.title = title.into();
        self
    }

    pub fn position(mut self, x: i32, y: i32) -> Self {
        self.panel.position = GridPosition::new(x, y);
        self
    }

    pub fn size(mut self, width: i32, height: i32) -> Self {
        self.panel.dimensions = GridDimensions::new(width, height);
        self
    }

    /// Spans all `columns` of the grid at row `y`.
    pub fn full_width(self, columns: i32, y: i32, height: i32) -> Self {
        self.position(0, y).size(columns, height)
    }

    /// Left or right half of the grid depending on `right`.
    pub fn half_width(self, columns: i32, right: bool, y: i32, height: i32) -> Self {
        let width = (columns / 2).max(1);
        let x = if right { columns - width } else { 0 };
        self.position(x, y).size(width, height)
    }

    /// One of four equal columns, `slot` counted from the left.
    pub fn quarter_width(self, columns: i32, slot: i32, y: i32, height: i32) -> Self {
        let width = (columns / 4).max(1);
        self.position(width * slot.clamp(0, 3), y).size(width, height)
    }

    pub fn data_source(mut self, id: impl Into<String>) -> Self {
        self.panel.data_source = DataSourceRef::new(id);
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.panel.query = query.into();
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.panel.options.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> PanelConfig {
        self.panel
    }
}
