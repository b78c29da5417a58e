// Structural validation of dashboards before evaluation
use crate::application::overlap::detect_overlaps;
use crate::domain::dashboard::{DashboardConfig, GridConfig, PanelConfig};
use crate::domain::validation::{ValidationCode, ValidationError, ValidationResult};
use std::collections::HashSet;

/// Collects every problem it finds instead of stopping at the first one.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, config: &DashboardConfig) -> ValidationResult {
        let mut errors = grid_errors(&config.grid);

        let mut seen_panels = HashSet::new();
        for (index, panel) in config.panels.iter().enumerate() {
            let prefix = format!("panels[{index}]");
            if !panel.id.is_empty() && !seen_panels.insert(panel.id.as_str()) {
                errors.push(
                    ValidationError::new(
                        ValidationCode::DuplicatePanelId,
                        format!("{prefix}.id"),
                        format!("duplicate panel id '{}'", panel.id),
                    )
                    .for_panel(&panel.id),
                );
            }
            errors.extend(panel_errors(panel, &config.grid, &prefix));
        }

        let mut seen_vars = HashSet::new();
        for (index, variable) in config.variables.iter().enumerate() {
            let field = format!("variables[{index}].name");
            if variable.name.trim().is_empty() {
                errors.push(ValidationError::new(
                    ValidationCode::MissingVariableName,
                    field,
                    "variable name is required",
                ));
            } else if !seen_vars.insert(variable.name.as_str()) {
                errors.push(ValidationError::new(
                    ValidationCode::DuplicateVariable,
                    field,
                    format!("duplicate variable name '{}'", variable.name),
                ));
            }
        }

        ValidationResult::from_errors(errors)
    }

    /// Checks for a single panel against a grid, e.g. when an editor adds one.
    pub fn validate_panel(&self, panel: &PanelConfig, grid: &GridConfig) -> ValidationResult {
        ValidationResult::from_errors(panel_errors(panel, grid, "panel"))
    }

    /// Pairwise overlap check; one error per overlapping pair.
    pub fn validate_grid(&self, panels: &[PanelConfig], grid: &GridConfig) -> ValidationResult {
        let mut errors = grid_errors(grid);
        for overlap in detect_overlaps(panels) {
            let mut error = ValidationError::new(
                ValidationCode::PanelOverlap,
                "panels",
                format!(
                    "panel '{}' overlaps panel '{}' ({})",
                    overlap.panel1, overlap.panel2, overlap.message
                ),
            )
            .for_panel(&overlap.panel1);
            error.severity = Some(overlap.severity);
            errors.push(error);
        }
        ValidationResult::from_errors(errors)
    }
}

pub(crate) fn grid_errors(grid: &GridConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if grid.columns <= 0 {
        errors.push(ValidationError::new(
            ValidationCode::InvalidGrid,
            "grid.columns",
            format!("grid columns must be positive, got {}", grid.columns),
        ));
    }
    if grid.row_height <= 0 {
        errors.push(ValidationError::new(
            ValidationCode::InvalidGrid,
            "grid.rowHeight",
            format!("grid row height must be positive, got {}", grid.row_height),
        ));
    }
    for (name, columns) in &grid.breakpoints {
        if *columns <= 0 || (grid.columns > 0 && *columns > grid.columns) {
            errors.push(ValidationError::new(
                ValidationCode::InvalidBreakpoint,
                format!("grid.breakpoints.{name}"),
                format!(
                    "breakpoint '{name}' must have between 1 and {} columns, got {columns}",
                    grid.columns
                ),
            ));
        }
    }
    errors
}

/// Geometry checks only, shared with the layout engine.
pub(crate) fn geometry_errors(panel: &PanelConfig, grid: &GridConfig, prefix: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let at = |field: &str| format!("{prefix}.{field}");

    if panel.position.x < 0 || panel.position.y < 0 {
        errors.push(
            ValidationError::new(
                ValidationCode::InvalidPosition,
                at("position"),
                format!(
                    "panel position cannot be negative ({}, {})",
                    panel.position.x, panel.position.y
                ),
            )
            .for_panel(&panel.id),
        );
    }

    if panel.dimensions.width <= 0 || panel.dimensions.height <= 0 {
        errors.push(
            ValidationError::new(
                ValidationCode::InvalidDimensions,
                at("dimensions"),
                format!(
                    "panel dimensions must be positive ({}x{})",
                    panel.dimensions.width, panel.dimensions.height
                ),
            )
            .for_panel(&panel.id),
        );
    } else if grid.columns > 0 && panel.right() > i64::from(grid.columns) {
        errors.push(
            ValidationError::new(
                ValidationCode::PanelOutOfBounds,
                at("position.x"),
                format!(
                    "panel extends beyond grid columns ({} > {})",
                    panel.right(),
                    grid.columns
                ),
            )
            .for_panel(&panel.id),
        );
    }

    errors
}

fn panel_errors(panel: &PanelConfig, grid: &GridConfig, prefix: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if panel.id.trim().is_empty() {
        errors.push(ValidationError::new(
            ValidationCode::MissingPanelId,
            format!("{prefix}.id"),
            "panel id is required",
        ));
    }

    errors.extend(geometry_errors(panel, grid, prefix));

    if panel.data_source.is_empty() {
        errors.push(
            ValidationError::new(
                ValidationCode::MissingDatasource,
                format!("{prefix}.dataSource"),
                "panel has no data source reference",
            )
            .for_panel(&panel.id),
        );
    }

    if panel.query.trim().is_empty() {
        errors.push(
            ValidationError::new(
                ValidationCode::EmptyQuery,
                format!("{prefix}.query"),
                "panel query is empty",
            )
            .for_panel(&panel.id),
        );
    }

    errors
}
