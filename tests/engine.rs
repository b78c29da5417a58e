mod common;

use common::{CountingSource, SALES_DASHBOARD};
use lens_engine::application::cache::{Cache, MemoryCache};
use lens_engine::application::caching_executor::CachingExecutor;
use lens_engine::application::data_source::DataSource;
use lens_engine::application::evaluator::{EvaluateError, Evaluator};
use lens_engine::application::executor::{Executor, QueryExecutor};
use lens_engine::application::layout_engine::LayoutEngine;
use lens_engine::application::overlap::detect_overlaps;
use lens_engine::application::registry::{Registry, RegistryError};
use lens_engine::application::validator::Validator;
use lens_engine::domain::builder::{DashboardBuilder, PanelBuilder};
use lens_engine::domain::dashboard::{DashboardConfig, TimeRange};
use lens_engine::domain::evaluation::{EvaluationContext, EvaluationPhase};
use lens_engine::domain::layout::OverlapSeverity;
use lens_engine::domain::query::ErrorCode;
use lens_engine::domain::validation::ValidationCode;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn registry_with(sources: &[(&str, Arc<CountingSource>)]) -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    for (id, source) in sources {
        registry.register(*id, source.clone()).unwrap();
    }
    registry
}

#[test]
fn test_dashboard_json_round_trip() {
    let dashboard = DashboardConfig::from_json(SALES_DASHBOARD).unwrap();
    assert_eq!(dashboard.panels.len(), 3);
    assert_eq!(dashboard.panels[1].data_source.id, "warehouse");
    assert_eq!(dashboard.grid.breakpoints["md"], 6);

    let reparsed = DashboardConfig::from_json(&dashboard.to_json().unwrap()).unwrap();
    assert_eq!(reparsed, dashboard);
}

#[test]
fn test_out_of_bounds_panel_is_invalid() {
    let dashboard = DashboardBuilder::new("wide")
        .grid(12, 30)
        .panel(
            PanelBuilder::bar("too-wide")
                .position(10, 0)
                .size(4, 2)
                .data_source("warehouse")
                .query("SELECT 1")
                .build(),
        )
        .build();

    let result = Validator::new().validate(&dashboard);
    assert!(!result.valid);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].code, ValidationCode::PanelOutOfBounds);
    assert_eq!(Validator::new().validate(&dashboard), result);
}

#[test]
fn test_half_overlap_is_critical_in_either_order() {
    let a = PanelBuilder::line("a").position(0, 0).size(4, 2).build();
    let b = PanelBuilder::line("b").position(2, 0).size(4, 2).build();

    let forward = detect_overlaps(&[a.clone(), b.clone()]);
    let backward = detect_overlaps(&[b, a]);
    assert_eq!(forward.len(), 1);
    assert_eq!(forward[0].severity, OverlapSeverity::Critical);
    assert_eq!(backward.len(), 1);
    assert_eq!(backward[0].severity, forward[0].severity);
}

#[test]
fn test_layout_is_pure_and_breakpoints_fall_back() {
    let dashboard = DashboardConfig::from_json(SALES_DASHBOARD).unwrap();
    let engine = LayoutEngine::new();
    let first = engine.calculate_layout(&dashboard.panels, &dashboard.grid).unwrap();
    let second = engine.calculate_layout(&dashboard.panels, &dashboard.grid).unwrap();
    assert_eq!(first, second);

    let unknown = engine.responsive_layout(&first, "ultrawide");
    for (base, other) in first.panels.iter().zip(&unknown.panels) {
        assert_eq!(base.css, other.css);
    }
}

#[test]
fn test_evaluate_interpolates_context_variables() {
    let registry = registry_with(&[("warehouse", Arc::new(CountingSource::new("warehouse")))]);
    let dashboard = DashboardConfig::from_json(SALES_DASHBOARD).unwrap();
    let ctx = EvaluationContext::last_hour().with_variable("region", "EU");

    let evaluated = Evaluator::new(registry).evaluate(&dashboard, &ctx).unwrap();
    assert!(evaluated.is_valid());
    assert_eq!(
        evaluated.panel("orders").unwrap().resolved_query,
        "SELECT * FROM orders WHERE region = 'EU'"
    );
    assert_eq!(
        evaluated.panel("orders").unwrap().render_config.data_endpoint,
        "/dashboards/sales/panels/orders/data"
    );
}

#[test]
fn test_missing_variable_is_a_panel_error() {
    let registry = registry_with(&[("warehouse", Arc::new(CountingSource::new("warehouse")))]);
    let dashboard = DashboardBuilder::new("orders")
        .panel(
            PanelBuilder::table("orders")
                .data_source("warehouse")
                .query("SELECT * FROM orders WHERE region = '${region}'")
                .build(),
        )
        .build();

    let evaluated = Evaluator::new(registry)
        .evaluate(&dashboard, &EvaluationContext::last_hour())
        .unwrap();
    assert!(evaluated.panels.is_empty());
    assert_eq!(evaluated.errors.len(), 1);
    assert_eq!(evaluated.errors[0].panel_id, "orders");
    assert_eq!(evaluated.errors[0].phase, EvaluationPhase::Interpolation);
    assert!(evaluated.errors[0].message.contains("region"));
}

#[test]
fn test_one_broken_panel_leaves_the_rest() {
    let registry = registry_with(&[("warehouse", Arc::new(CountingSource::new("warehouse")))]);
    let mut dashboard = DashboardConfig::from_json(SALES_DASHBOARD).unwrap();
    dashboard.panels[2].data_source.id = "archive".into();

    let evaluated = Evaluator::new(registry)
        .evaluate(&dashboard, &EvaluationContext::last_hour())
        .unwrap();
    assert_eq!(evaluated.panels.len(), 2);
    assert_eq!(evaluated.errors.len(), 1);
    assert_eq!(evaluated.errors[0].panel_id, "share");
    assert_eq!(evaluated.errors[0].phase, EvaluationPhase::DataSource);
}

#[test]
fn test_structural_problems_stop_evaluation() {
    let registry = registry_with(&[]);
    let dashboard = DashboardBuilder::new("dupes")
        .panel(PanelBuilder::line("a").data_source("x").query("SELECT 1").build())
        .panel(PanelBuilder::line("a").position(6, 0).data_source("x").query("SELECT 1").build())
        .build();

    let err = Evaluator::new(registry)
        .evaluate(&dashboard, &EvaluationContext::last_hour())
        .unwrap_err();
    assert!(matches!(err, EvaluateError::Invalid { ref errors, .. }
        if errors.iter().any(|e| e.code == ValidationCode::DuplicatePanelId)));
}

#[tokio::test]
async fn test_execute_dashboard_isolates_failures() {
    let warehouse = Arc::new(CountingSource::new("warehouse"));
    let archive = Arc::new(CountingSource::new("archive").failing(ErrorCode::Connection));
    let registry = registry_with(&[("warehouse", warehouse.clone()), ("archive", archive)]);
    let mut dashboard = DashboardConfig::from_json(SALES_DASHBOARD).unwrap();
    dashboard.panels[2].data_source.id = "archive".into();

    let executor = QueryExecutor::new(registry);
    let result = executor
        .execute_dashboard(&CancellationToken::new(), &dashboard, &EvaluationContext::last_hour())
        .await
        .unwrap();

    assert_eq!(result.panel_results.len(), 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].panel_id, "share");
    assert_eq!(result.errors[0].code, Some(ErrorCode::Connection));
    assert_eq!(warehouse.calls(), 2);
}

#[tokio::test]
async fn test_cancellation_returns_promptly() {
    let slow = Arc::new(CountingSource::new("warehouse").slow(Duration::from_secs(60)));
    let registry = registry_with(&[("warehouse", slow)]);
    let dashboard = DashboardConfig::from_json(SALES_DASHBOARD).unwrap();
    let executor = QueryExecutor::new(registry);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        executor.execute_dashboard(&cancel, &dashboard, &EvaluationContext::last_hour()),
    )
    .await
    .expect("dashboard execution should stop after cancellation")
    .unwrap();

    assert!(result.panel_results.is_empty());
    assert_eq!(result.errors.len(), 3);
    assert!(result.errors.iter().all(|e| e.code == Some(ErrorCode::Cancelled)));
}

#[tokio::test]
async fn test_repeated_panel_execution_hits_the_cache() {
    let warehouse = Arc::new(CountingSource::new("warehouse"));
    let registry = registry_with(&[("warehouse", warehouse.clone())]);
    let cache = Arc::new(MemoryCache::new(100));
    let executor = CachingExecutor::new(QueryExecutor::new(registry), cache.clone());

    let dashboard = DashboardConfig::from_json(SALES_DASHBOARD).unwrap();
    let panel = dashboard.panel("orders").unwrap();
    let mut vars = BTreeMap::new();
    vars.insert("region".to_string(), json!("EU"));
    vars.insert("unused".to_string(), json!(3));
    let time_range = TimeRange::last(chrono::Duration::hours(6));
    let cancel = CancellationToken::new();

    let first = executor
        .execute_panel(&cancel, panel, &vars, Some(&time_range))
        .await
        .unwrap();
    let second = executor
        .execute_panel(&cancel, panel, &vars, Some(&time_range))
        .await
        .unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(warehouse.calls(), 1);
    assert_eq!(cache.stats().await.hits, 1);
    cache.close().await.unwrap();
}

#[test]
fn test_duplicate_registration_keeps_the_original() {
    let original = Arc::new(CountingSource::new("original"));
    let registry = registry_with(&[("pg1", original)]);

    let err = registry
        .register("pg1", Arc::new(CountingSource::new("replacement")))
        .unwrap_err();
    assert!(matches!(err, RegistryError::AlreadyRegistered(id) if id == "pg1"));
    assert_eq!(registry.get("pg1").unwrap().metadata().name, "original");
}
