// HTTP request handlers
use crate::application::evaluator::EvaluateError;
use crate::application::executor::ExecutionError;
use crate::application::registry::RegistryError;
use crate::domain::dashboard::{DashboardConfig, TimeRange};
use crate::domain::evaluation::EvaluationContext;
use crate::domain::query::ErrorCode;
use crate::infrastructure::chunked_json::stream_from_receiver;
use crate::infrastructure::http_response::{accepts_brotli, json_response};
use crate::presentation::app_state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const VARIABLE_PREFIX: &str = "var-";

/// Body of `POST /dashboards/:id/panels/:panel_id/evaluate`, sent by the
/// render layer when a chart interaction changes variables.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatePanelRequest {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub data_point: Option<Value>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

fn error_response(status: StatusCode, message: &str, code: Option<ErrorCode>, details: Option<Value>) -> Response {
    let body = ErrorBody {
        error: message,
        code,
        details,
    };
    (status, Json(body)).into_response()
}

async fn respond<T: Serialize>(headers: &HeaderMap, data: &T) -> Response {
    match json_response(StatusCode::OK, data, accepts_brotli(headers)).await {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ms) = value.parse::<i64>() {
        return DateTime::from_timestamp_millis(ms).ok_or_else(|| format!("timestamp out of range: {value}"));
    }
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid time {value}: {e}"))
}

/// Build an evaluation context from `from`, `to` (RFC 3339 or epoch millis,
/// default the last hour) and `var-<name>` parameters. Variable values that
/// parse as JSON keep their type; anything else is a string.
pub fn context_from_params(params: &HashMap<String, String>) -> Result<EvaluationContext, String> {
    let end = params.get("to").map(|v| parse_time(v)).transpose()?.unwrap_or_else(Utc::now);
    let start = match params.get("from") {
        Some(value) => parse_time(value)?,
        None => end
            .checked_sub_signed(Duration::hours(1))
            .ok_or_else(|| format!("no default range before {}", end.to_rfc3339()))?,
    };
    if start > end {
        return Err("from must not be after to".to_string());
    }

    let mut ctx = EvaluationContext::new(TimeRange::new(start, end));
    for (key, raw) in params {
        if let Some(name) = key.strip_prefix(VARIABLE_PREFIX).filter(|n| !n.is_empty()) {
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()));
            ctx.variables.insert(name.to_string(), value);
        }
    }
    Ok(ctx)
}

fn find_dashboard<'a>(state: &'a AppState, id: &str) -> Result<&'a DashboardConfig, Response> {
    state.store.get(id).ok_or_else(|| {
        error_response(StatusCode::NOT_FOUND, &format!("dashboard not found: {id}"), None, None)
    })
}

fn execution_error_response(err: &ExecutionError) -> Response {
    let status = match err {
        ExecutionError::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
        ExecutionError::Interpolation(_) => StatusCode::BAD_REQUEST,
        ExecutionError::Query(q) if q.code == ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ExecutionError::Query(q) if q.code == ErrorCode::Syntax || q.code == ErrorCode::Permission => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::BAD_GATEWAY,
    };
    error_response(status, &err.to_string(), err.code(), None)
}

fn evaluate_error_response(err: &EvaluateError) -> Response {
    match err {
        EvaluateError::Invalid { errors, .. } => error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            &err.to_string(),
            None,
            serde_json::to_value(errors).ok(),
        ),
        EvaluateError::Layout(_) => error_response(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string(), None, None),
        EvaluateError::PanelNotFound { .. } => error_response(StatusCode::NOT_FOUND, &err.to_string(), None, None),
        EvaluateError::Panel(panel_err) => error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            &err.to_string(),
            None,
            serde_json::to_value(panel_err).ok(),
        ),
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn list_dashboards(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    respond(&headers, &state.store.list()).await
}

/// Evaluate a dashboard; `breakpoint` selects a responsive layout variant
pub async fn get_dashboard(
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let dashboard = match find_dashboard(&state, &id) {
        Ok(dashboard) => dashboard,
        Err(response) => return response,
    };
    let ctx = match context_from_params(&params) {
        Ok(ctx) => ctx,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg, None, None),
    };

    match state.evaluator.evaluate(dashboard, &ctx) {
        Ok(mut evaluated) => {
            if let Some(breakpoint) = params.get("breakpoint") {
                evaluated.layout = evaluated
                    .layout
                    .map(|layout| state.layout.responsive_layout(&layout, breakpoint));
            }
            if evaluated.has_errors() {
                tracing::warn!(dashboard = %id, errors = evaluated.errors.len(), "Dashboard evaluated with panel errors");
            }
            respond(&headers, &evaluated).await
        }
        Err(err) => {
            tracing::warn!(dashboard = %id, error = %err, "Dashboard evaluation failed");
            evaluate_error_response(&err)
        }
    }
}

/// Execute every panel of a dashboard and return the combined result
pub async fn dashboard_data(
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let dashboard = match find_dashboard(&state, &id) {
        Ok(dashboard) => dashboard,
        Err(response) => return response,
    };
    let ctx = match context_from_params(&params) {
        Ok(ctx) => ctx,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg, None, None),
    };

    // Cancelled when the client goes away and this future is dropped.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    match state.executor.execute_dashboard(&cancel, dashboard, &ctx).await {
        Ok(result) => respond(&headers, &result).await,
        Err(err) => execution_error_response(&err),
    }
}

/// Stream a dashboard progressively as newline-delimited JSON
pub async fn stream_dashboard(
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let dashboard = match find_dashboard(&state, &id) {
        Ok(dashboard) => dashboard.clone(),
        Err(response) => return response,
    };
    let ctx = match context_from_params(&params) {
        Ok(ctx) => ctx,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg, None, None),
    };

    let rx = state.streaming_service.stream_dashboard(dashboard, ctx);
    stream_from_receiver(rx).into_response()
}

/// Execute a single panel; target of each panel's data endpoint
pub async fn panel_data(
    Path((id, panel_id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let dashboard = match find_dashboard(&state, &id) {
        Ok(dashboard) => dashboard,
        Err(response) => return response,
    };
    let Some(panel) = dashboard.panel(&panel_id) else {
        return error_response(StatusCode::NOT_FOUND, &format!("panel not found: {panel_id}"), None, None);
    };
    let ctx = match context_from_params(&params) {
        Ok(ctx) => ctx,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg, None, None),
    };

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let variables = ctx.resolve_variables(dashboard);

    match state
        .executor
        .execute_panel(&cancel, panel, &variables, Some(&ctx.time_range))
        .await
    {
        Ok(result) => respond(&headers, &result).await,
        Err(err) => {
            tracing::warn!(dashboard = %id, panel = %panel_id, error = %err, "Panel execution failed");
            execution_error_response(&err)
        }
    }
}

/// Re-evaluate one panel after a chart interaction
pub async fn evaluate_panel(
    Path((id, panel_id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(request): Json<EvaluatePanelRequest>,
) -> Response {
    let dashboard = match find_dashboard(&state, &id) {
        Ok(dashboard) => dashboard,
        Err(response) => return response,
    };
    let mut ctx = match context_from_params(&params) {
        Ok(ctx) => ctx,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg, None, None),
    };
    if let Some(time_range) = request.time_range {
        ctx.time_range = time_range;
    }
    ctx.variables.extend(request.variables);

    tracing::debug!(
        dashboard = %id,
        panel = %panel_id,
        event = request.event_type.as_deref().unwrap_or("none"),
        "Re-evaluating panel"
    );

    match state.evaluator.evaluate_dashboard_panel(dashboard, &panel_id, &ctx) {
        Ok(panel) => respond(&headers, &panel).await,
        Err(err) => evaluate_error_response(&err),
    }
}

pub async fn cache_stats(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    match &state.cache {
        Some(cache) => respond(&headers, &cache.stats().await).await,
        None => respond(&headers, &json!({ "enabled": false })).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_context_from_params() {
        let ctx = context_from_params(&params(&[
            ("from", "2024-05-01T00:00:00Z"),
            ("to", "2024-05-01T06:00:00Z"),
            ("var-region", "EU"),
            ("var-limit", "25"),
            ("breakpoint", "md"),
        ]))
        .unwrap();

        assert_eq!(ctx.time_range.duration(), Duration::hours(6));
        assert_eq!(ctx.variables["region"], json!("EU"));
        assert_eq!(ctx.variables["limit"], json!(25));
        assert_eq!(ctx.variables.len(), 2);
    }

    #[test]
    fn test_context_defaults_to_last_hour() {
        let ctx = context_from_params(&HashMap::new()).unwrap();
        assert_eq!(ctx.time_range.duration(), Duration::hours(1));
    }

    #[test]
    fn test_default_range_before_earliest_time_is_rejected() {
        let earliest = DateTime::<Utc>::MIN_UTC.timestamp_millis().to_string();
        let err = context_from_params(&params(&[("to", earliest.as_str())])).unwrap_err();
        assert!(err.contains("no default range"));

        let ctx = context_from_params(&params(&[("from", earliest.as_str()), ("to", earliest.as_str())])).unwrap();
        assert_eq!(ctx.time_range.duration(), Duration::zero());
    }

    #[test]
    fn test_context_rejects_inverted_range() {
        let err = context_from_params(&params(&[("from", "1714600000000"), ("to", "1714500000000")])).unwrap_err();
        assert!(err.contains("after"));
        assert!(context_from_params(&params(&[("from", "yesterday")])).is_err());
    }
}
