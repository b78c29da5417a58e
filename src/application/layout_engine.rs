// Grid layout calculation for dashboard panels
use crate::application::overlap;
use crate::application::responsive::{self, grid_area, template_columns};
use crate::application::validator::{geometry_errors, grid_errors};
use crate::domain::dashboard::{GridConfig, PanelConfig};
use crate::domain::layout::{
    BASE_BREAKPOINT, GridTemplate, Layout, LayoutBounds, LayoutCss, OverlapError, PanelBounds,
    PanelCss, PanelLayout,
};
use crate::domain::validation::{ValidationCode, ValidationError};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("invalid grid: {columns} columns with row height {row_height}")]
    InvalidGrid { columns: i32, row_height: i32 },

    #[error("panel {panel_id} has invalid dimensions {width}x{height}")]
    InvalidDimensions {
        panel_id: String,
        width: i32,
        height: i32,
    },
}

/// Stateless: every method is a pure function of its arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct LayoutEngine;

impl LayoutEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn calculate_layout(&self, panels: &[PanelConfig], grid: &GridConfig) -> Result<Layout, LayoutError> {
        if grid.columns <= 0 || grid.row_height <= 0 {
            return Err(LayoutError::InvalidGrid {
                columns: grid.columns,
                row_height: grid.row_height,
            });
        }

        let mut layouts = Vec::with_capacity(panels.len());
        let mut bounds = LayoutBounds::default();

        for (index, panel) in panels.iter().enumerate() {
            let dims = panel.dimensions;
            if dims.width <= 0 || dims.height <= 0 {
                return Err(LayoutError::InvalidDimensions {
                    panel_id: panel.id.clone(),
                    width: dims.width,
                    height: dims.height,
                });
            }

            let mut css = panel_css(panel);
            css.responsive = responsive::responsive_variants(&css, panel.position, dims, grid);

            bounds.max_x = bounds.max_x.max(panel.right());
            bounds.max_y = bounds.max_y.max(panel.bottom());
            bounds.min_width = if index == 0 { dims.width } else { bounds.min_width.min(dims.width) };
            bounds.min_height = if index == 0 { dims.height } else { bounds.min_height.min(dims.height) };

            layouts.push(PanelLayout {
                panel_id: panel.id.clone(),
                position: panel.position,
                dimensions: dims,
                css,
                z_index: index + 1,
                bounds: PanelBounds::new(panel.position, dims),
            });
        }

        Ok(Layout {
            grid: grid.clone(),
            panels: layouts,
            breakpoint: BASE_BREAKPOINT.to_string(),
            css: container_css(grid),
            bounds,
        })
    }

    pub fn detect_overlaps(&self, panels: &[PanelConfig]) -> Vec<OverlapError> {
        overlap::detect_overlaps(panels)
    }

    /// `layout` with the CSS for `breakpoint` swapped in. Falls back to the
    /// base CSS for panels that have no variant for it.
    pub fn responsive_layout(&self, layout: &Layout, breakpoint: &str) -> Layout {
        responsive::apply_breakpoint(layout, breakpoint)
    }

    /// Grid, geometry and overlap checks, without the data source and query
    /// checks the full validator also runs.
    pub fn validate_layout(&self, panels: &[PanelConfig], grid: &GridConfig) -> Vec<ValidationError> {
        let mut errors = grid_errors(grid);
        for (index, panel) in panels.iter().enumerate() {
            errors.extend(geometry_errors(panel, grid, &format!("panels[{index}]")));
        }
        for overlap in overlap::detect_overlaps(panels) {
            let mut error = ValidationError::new(
                ValidationCode::PanelOverlap,
                "panels",
                format!("panel '{}' overlaps panel '{}'", overlap.panel1, overlap.panel2),
            )
            .for_panel(&overlap.panel1);
            error.severity = Some(overlap.severity);
            errors.push(error);
        }
        errors
    }
}

fn panel_css(panel: &PanelConfig) -> PanelCss {
    let area = grid_area(panel.position, panel.dimensions);
    let styles = BTreeMap::from([
        ("grid-area".to_string(), area.clone()),
        ("display".to_string(), "flex".to_string()),
        ("flex-direction".to_string(), "column".to_string()),
        ("min-height".to_string(), "0".to_string()),
        ("overflow".to_string(), "hidden".to_string()),
    ]);

    PanelCss {
        classes: vec!["dashboard-panel".to_string(), format!("panel-{}", panel.chart_type)],
        styles,
        grid_area: area,
        responsive: BTreeMap::new(),
    }
}

fn container_css(grid: &GridConfig) -> LayoutCss {
    let columns = template_columns(grid.columns);
    let rows = format!("{}px", grid.row_height);
    let styles = BTreeMap::from([
        ("display".to_string(), "grid".to_string()),
        ("grid-template-columns".to_string(), columns.clone()),
        ("grid-auto-rows".to_string(), rows.clone()),
        ("gap".to_string(), "1rem".to_string()),
        ("padding".to_string(), "1rem".to_string()),
    ]);

    LayoutCss {
        container_classes: vec!["dashboard-grid".to_string(), "grid-container".to_string()],
        container_styles: styles,
        grid_template: GridTemplate { columns, rows },
    }
}
