// Layout value types derived from a dashboard grid
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::dashboard::{GridConfig, GridDimensions, GridPosition};

/// Breakpoint selected when nothing else is requested.
pub const BASE_BREAKPOINT: &str = "base";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    pub grid: GridConfig,
    pub panels: Vec<PanelLayout>,
    pub breakpoint: String,
    pub css: LayoutCss,
    pub bounds: LayoutBounds,
}

impl Layout {
    pub fn panel(&self, panel_id: &str) -> Option<&PanelLayout> {
        self.panels.iter().find(|p| p.panel_id == panel_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelLayout {
    pub panel_id: String,
    pub position: GridPosition,
    pub dimensions: GridDimensions,
    pub css: PanelCss,
    pub z_index: usize,
    pub bounds: PanelBounds,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutCss {
    pub container_classes: Vec<String>,
    pub container_styles: BTreeMap<String, String>,
    pub grid_template: GridTemplate,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridTemplate {
    pub columns: String,
    pub rows: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelCss {
    pub classes: Vec<String>,
    pub styles: BTreeMap<String, String>,
    pub grid_area: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub responsive: BTreeMap<String, ResponsiveCss>,
}

impl PanelCss {
    /// The CSS without its per-breakpoint variants.
    pub fn base(&self) -> ResponsiveCss {
        ResponsiveCss {
            classes: self.classes.clone(),
            styles: self.styles.clone(),
            grid_area: self.grid_area.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsiveCss {
    pub classes: Vec<String>,
    pub styles: BTreeMap<String, String>,
    pub grid_area: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutBounds {
    pub max_x: i64,
    pub max_y: i64,
    pub min_width: i32,
    pub min_height: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PanelBounds {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl PanelBounds {
    pub fn new(position: GridPosition, dimensions: GridDimensions) -> Self {
        Self {
            left: i64::from(position.x),
            top: i64::from(position.y),
            right: i64::from(position.x) + i64::from(dimensions.width),
            bottom: i64::from(position.y) + i64::from(dimensions.height),
        }
    }

    /// Intersection of two rectangles, `None` when they only touch or are apart.
    pub fn intersection(&self, other: &PanelBounds) -> Option<OverlapRegion> {
        if self.right <= other.left
            || other.right <= self.left
            || self.bottom <= other.top
            || other.bottom <= self.top
        {
            return None;
        }

        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        Some(OverlapRegion {
            x: left,
            y: top,
            width: self.right.min(other.right) - left,
            height: self.bottom.min(other.bottom) - top,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlapRegion {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl OverlapRegion {
    pub fn area(&self) -> i64 {
        self.width * self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapSeverity {
    Minor,
    Moderate,
    Critical,
}

impl OverlapSeverity {
    /// Classifies an overlap by its share of the smaller panel's area.
    /// Lower bounds are inclusive: exactly 50% is critical, exactly 10% moderate.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 0.5 {
            OverlapSeverity::Critical
        } else if ratio >= 0.1 {
            OverlapSeverity::Moderate
        } else {
            OverlapSeverity::Minor
        }
    }
}

impl std::fmt::Display for OverlapSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OverlapSeverity::Minor => "minor",
            OverlapSeverity::Moderate => "moderate",
            OverlapSeverity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlapError {
    pub panel1: String,
    pub panel2: String,
    pub overlap: OverlapRegion,
    pub severity: OverlapSeverity,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub total_overlaps: usize,
    pub critical_overlaps: usize,
    pub moderate_overlaps: usize,
    pub minor_overlaps: usize,
    pub affected_panels: Vec<String>,
    pub overlaps: Vec<OverlapError>,
    pub grid_utilization: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionKind {
    Move,
    Resize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionSuggestion {
    pub kind: ResolutionKind,
    pub panel_id: String,
    pub position: GridPosition,
    pub dimensions: GridDimensions,
    pub reason: String,
    pub priority: u8,
}
