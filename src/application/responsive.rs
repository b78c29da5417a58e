// Per-breakpoint CSS variants for a calculated layout
use crate::domain::dashboard::{GridConfig, GridDimensions, GridPosition};
use crate::domain::layout::{Layout, PanelCss, ResponsiveCss};
use std::collections::BTreeMap;

pub(crate) fn grid_area(position: GridPosition, dimensions: GridDimensions) -> String {
    let (x, y) = (i64::from(position.x), i64::from(position.y));
    format!(
        "{} / {} / {} / {}",
        y + 1,
        x + 1,
        y + i64::from(dimensions.height) + 1,
        x + i64::from(dimensions.width) + 1
    )
}

pub(crate) fn template_columns(columns: i32) -> String {
    format!("repeat({columns}, 1fr)")
}

/// One variant per breakpoint declared on the grid. Single-column
/// breakpoints stack panels full width; narrower ones scale the column span
/// proportionally; breakpoints as wide as the grid keep the base placement.
pub fn responsive_variants(
    base: &PanelCss,
    position: GridPosition,
    dimensions: GridDimensions,
    grid: &GridConfig,
) -> BTreeMap<String, ResponsiveCss> {
    grid.breakpoints
        .iter()
        .filter(|(_, columns)| **columns > 0)
        .map(|(name, columns)| {
            let area = breakpoint_area(position, dimensions, grid.columns, *columns);
            let mut variant = base.base();
            variant.classes.push(format!("panel-{name}"));
            variant.styles.insert("grid-area".to_string(), area.clone());
            variant.grid_area = area;
            (name.clone(), variant)
        })
        .collect()
}

fn breakpoint_area(
    position: GridPosition,
    dimensions: GridDimensions,
    grid_columns: i32,
    columns: i32,
) -> String {
    if columns == 1 {
        return format!("auto / 1 / span {} / -1", dimensions.height.max(1));
    }
    if grid_columns <= 0 || columns >= grid_columns {
        return grid_area(position, dimensions);
    }

    // Scaled values never exceed the input since columns < grid_columns.
    let scale = |value: i32| {
        let scaled = (i64::from(value) * i64::from(columns) + i64::from(grid_columns / 2)) / i64::from(grid_columns);
        i32::try_from(scaled).unwrap_or(i32::MAX)
    };
    let width = scale(dimensions.width).clamp(1, columns);
    let x = scale(position.x).min(columns - width).max(0);
    grid_area(
        GridPosition::new(x, position.y),
        GridDimensions::new(width, dimensions.height),
    )
}

/// The widest declared breakpoint that fits in `available_columns`.
pub fn select_breakpoint(grid: &GridConfig, available_columns: i32) -> Option<String> {
    grid.breakpoints
        .iter()
        .filter(|(_, columns)| **columns > 0 && **columns <= available_columns)
        .max_by_key(|(_, columns)| **columns)
        .map(|(name, _)| name.clone())
}

/// Copy of `layout` with each panel's active CSS switched to the named
/// breakpoint. Unknown breakpoints, or panels without that variant, keep the
/// base CSS.
pub fn apply_breakpoint(layout: &Layout, breakpoint: &str) -> Layout {
    let mut adjusted = layout.clone();
    adjusted.breakpoint = breakpoint.to_string();

    if let Some(columns) = layout.grid.breakpoints.get(breakpoint) {
        adjusted.css.grid_template.columns = template_columns(*columns);
        adjusted
            .css
            .container_styles
            .insert("grid-template-columns".to_string(), template_columns(*columns));
    }

    for panel in &mut adjusted.panels {
        if let Some(variant) = panel.css.responsive.get(breakpoint).cloned() {
            panel.css.classes = variant.classes;
            panel.css.styles = variant.styles;
            panel.css.grid_area = variant.grid_area;
        }
    }
    adjusted
}
