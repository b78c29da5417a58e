// Pairwise overlap detection, conflict reports and resolution hints
use crate::domain::dashboard::{GridConfig, GridDimensions, GridPosition, PanelConfig};
use crate::domain::layout::{
    ConflictReport, OverlapError, OverlapSeverity, PanelBounds, ResolutionKind, ResolutionSuggestion,
};
use std::collections::BTreeSet;

/// Every overlapping pair of panels, reported once with `panel1` declared
/// before `panel2`. Panels without a positive area are ignored here; the
/// validator reports them separately.
pub fn detect_overlaps(panels: &[PanelConfig]) -> Vec<OverlapError> {
    let sized: Vec<&PanelConfig> = panels
        .iter()
        .filter(|p| p.dimensions.width > 0 && p.dimensions.height > 0)
        .collect();

    let mut overlaps = Vec::new();
    for (i, first) in sized.iter().enumerate() {
        let first_bounds = PanelBounds::new(first.position, first.dimensions);
        for second in &sized[i + 1..] {
            let second_bounds = PanelBounds::new(second.position, second.dimensions);
            let Some(region) = first_bounds.intersection(&second_bounds) else {
                continue;
            };

            let smaller = first.dimensions.area().min(second.dimensions.area());
            let ratio = region.area() as f64 / smaller as f64;
            let severity = OverlapSeverity::from_ratio(ratio);
            overlaps.push(OverlapError {
                panel1: first.id.clone(),
                panel2: second.id.clone(),
                overlap: region,
                severity,
                message: format!(
                    "{severity} overlap of {} cells ({:.0}% of the smaller panel)",
                    region.area(),
                    ratio * 100.0
                ),
            });
        }
    }
    overlaps
}

pub fn has_overlaps(panels: &[PanelConfig]) -> bool {
    !detect_overlaps(panels).is_empty()
}

pub fn conflict_report(panels: &[PanelConfig], grid: &GridConfig) -> ConflictReport {
    let overlaps = detect_overlaps(panels);
    let count = |severity: OverlapSeverity| overlaps.iter().filter(|o| o.severity == severity).count();

    let affected: BTreeSet<&str> = overlaps
        .iter()
        .flat_map(|o| [o.panel1.as_str(), o.panel2.as_str()])
        .collect();

    ConflictReport {
        total_overlaps: overlaps.len(),
        critical_overlaps: count(OverlapSeverity::Critical),
        moderate_overlaps: count(OverlapSeverity::Moderate),
        minor_overlaps: count(OverlapSeverity::Minor),
        affected_panels: affected.into_iter().map(str::to_string).collect(),
        grid_utilization: grid_utilization(panels, grid),
        overlaps,
    }
}

/// Share of the occupied rows' cells covered by panels, in `[0, 1]` unless
/// panels overlap or spill past the grid.
pub fn grid_utilization(panels: &[PanelConfig], grid: &GridConfig) -> f64 {
    let rows = panels.iter().map(PanelConfig::bottom).max().unwrap_or(0);
    if rows <= 0 || grid.columns <= 0 {
        return 0.0;
    }
    let used: f64 = panels
        .iter()
        .filter(|p| p.dimensions.width > 0 && p.dimensions.height > 0)
        .map(|p| p.dimensions.area() as f64)
        .sum();
    used / (rows as f64 * f64::from(grid.columns))
}

/// Suggestions for the later-declared panel of each overlapping pair:
/// critical overlaps move it below the other panel, moderate ones shrink
/// it by the overlapping width. Minor overlaps are left alone.
pub fn suggest_resolutions(panels: &[PanelConfig]) -> Vec<ResolutionSuggestion> {
    let find = |id: &str| panels.iter().find(|p| p.id == id);

    let mut suggestions = Vec::new();
    for overlap in detect_overlaps(panels) {
        let (Some(anchor), Some(moved)) = (find(&overlap.panel1), find(&overlap.panel2)) else {
            continue;
        };

        match overlap.severity {
            OverlapSeverity::Critical => suggestions.push(ResolutionSuggestion {
                kind: ResolutionKind::Move,
                panel_id: moved.id.clone(),
                position: GridPosition::new(moved.position.x, saturate(anchor.bottom())),
                dimensions: moved.dimensions,
                reason: format!("critical overlap with panel '{}'", anchor.id),
                priority: 1,
            }),
            OverlapSeverity::Moderate => suggestions.push(ResolutionSuggestion {
                kind: ResolutionKind::Resize,
                panel_id: moved.id.clone(),
                position: moved.position,
                dimensions: GridDimensions::new(
                    saturate((i64::from(moved.dimensions.width) - overlap.overlap.width).max(1)),
                    moved.dimensions.height,
                ),
                reason: format!("moderate overlap with panel '{}'", anchor.id),
                priority: 2,
            }),
            OverlapSeverity::Minor => {}
        }
    }
    suggestions.sort_by_key(|s| s.priority);
    suggestions
}

fn saturate(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::builder::PanelBuilder;
    use crate::domain::layout::OverlapRegion;

    fn panel(id: &str, x: i32, y: i32, w: i32, h: i32) -> PanelConfig {
        PanelBuilder::line(id).position(x, y).size(w, h).build()
    }

    #[test]
    fn test_half_overlap_is_critical() {
        let panels = vec![panel("A", 0, 0, 4, 2), panel("B", 2, 0, 4, 2)];
        let overlaps = detect_overlaps(&panels);
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].panel1, "A");
        assert_eq!(overlaps[0].panel2, "B");
        assert_eq!(overlaps[0].overlap, OverlapRegion { x: 2, y: 0, width: 2, height: 2 });
        assert_eq!(overlaps[0].severity, OverlapSeverity::Critical);
    }

    #[test]
    fn test_severity_does_not_depend_on_order() {
        let a = panel("A", 0, 0, 10, 10);
        let b = panel("B", 9, 9, 3, 3);
        let forward = detect_overlaps(&[a.clone(), b.clone()]);
        let backward = detect_overlaps(&[b, a]);
        assert_eq!(forward.len(), 1);
        assert_eq!(backward.len(), 1);
        assert_eq!(forward[0].severity, backward[0].severity);
        assert_eq!(forward[0].overlap, backward[0].overlap);
        assert_eq!(forward[0].severity, OverlapSeverity::Moderate);
    }

    #[test]
    fn test_touching_panels_do_not_overlap() {
        let panels = vec![panel("a", 0, 0, 6, 2), panel("b", 6, 0, 6, 2), panel("c", 0, 2, 12, 1)];
        assert!(!has_overlaps(&panels));
    }

    #[test]
    fn test_zero_sized_panels_are_ignored() {
        let panels = vec![panel("a", 0, 0, 6, 2), panel("b", 2, 0, 0, 2)];
        assert!(detect_overlaps(&panels).is_empty());
    }

    #[test]
    fn test_conflict_report_counts() {
        let panels = vec![
            panel("a", 0, 0, 4, 2),
            panel("b", 2, 0, 4, 2),
            panel("c", 0, 1, 10, 10),
            panel("d", 11, 0, 1, 1),
        ];
        let report = conflict_report(&panels, &GridConfig::new(12, 60));
        assert_eq!(report.total_overlaps, 3);
        assert_eq!(
            report.critical_overlaps + report.moderate_overlaps + report.minor_overlaps,
            3
        );
        assert_eq!(report.affected_panels, vec!["a", "b", "c"]);
        assert!(report.grid_utilization > 0.0);
    }

    #[test]
    fn test_suggestions_move_later_panel_on_critical_overlap() {
        let panels = vec![panel("a", 0, 0, 4, 2), panel("b", 2, 0, 4, 2)];
        let suggestions = suggest_resolutions(&panels);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].kind, ResolutionKind::Move);
        assert_eq!(suggestions[0].panel_id, "b");
        assert_eq!(suggestions[0].position, GridPosition::new(2, 2));

        let moved = vec![panel("a", 0, 0, 4, 2), panel("b", 2, 2, 4, 2)];
        assert!(!has_overlaps(&moved));
    }

    #[test]
    fn test_suggestions_resize_on_moderate_overlap() {
        let panels = vec![panel("a", 0, 0, 10, 10), panel("b", 9, 0, 3, 3)];
        let suggestions = suggest_resolutions(&panels);
        assert_eq!(suggestions[0].kind, ResolutionKind::Resize);
        assert_eq!(suggestions[0].dimensions, GridDimensions::new(2, 3));
    }

    #[test]
    fn test_grid_utilization() {
        let panels = vec![panel("a", 0, 0, 6, 2), panel("b", 6, 0, 6, 2)];
        assert_eq!(grid_utilization(&panels, &GridConfig::new(12, 60)), 1.0);
        assert_eq!(grid_utilization(&[], &GridConfig::new(12, 60)), 0.0);
    }
}
