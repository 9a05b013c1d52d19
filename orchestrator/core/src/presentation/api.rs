// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! REST command surface
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | GET | `/health` | liveness |
//! | POST | `/api/directives` | submit an operator directive |
//! | POST | `/api/signals` | inject a raw signal |
//! | GET | `/api/strategies` | most recently updated strategies |
//! | GET | `/api/strategies/{id}` | status of one strategy |
//! | GET | `/api/ledger?format=csv\|json` | cost ledger export |

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::application::directive::DirectiveService;
use crate::domain::errors::OrchestratorError;
use crate::domain::strategy::StrategyId;
use crate::domain::{Severity, Signal};

const DEFAULT_RECENT_LIMIT: usize = 20;

pub struct AppState {
    pub directives: DirectiveService,
}

pub fn app(directives: DirectiveService) -> Router {
    let state = Arc::new(AppState { directives });

    Router::new()
        .route("/health", get(health))
        .route("/api/directives", post(submit_directive))
        .route("/api/signals", post(submit_signal))
        .route("/api/strategies", get(list_strategies))
        .route("/api/strategies/{id}", get(get_strategy))
        .route("/api/ledger", get(export_ledger))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct DirectiveRequest {
    pub directive: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
}

fn default_severity() -> Severity {
    Severity::Medium
}

#[derive(Deserialize)]
pub struct SignalRequest {
    pub source: String,
    pub category: String,
    pub severity: Severity,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct LedgerQuery {
    pub format: Option<String>,
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn submit_directive(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DirectiveRequest>,
) -> Response {
    match state.directives.submit_directive(&payload.directive, payload.severity).await {
        Ok(id) => accepted(id),
        Err(e) => error_response(e),
    }
}

async fn submit_signal(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SignalRequest>,
) -> Response {
    let signal = Signal::new(payload.source, payload.category, payload.severity, payload.payload);
    match state.directives.submit_signal(signal).await {
        Ok(id) => accepted(id),
        Err(e) => error_response(e),
    }
}

async fn list_strategies(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    match state.directives.recent(limit).await {
        Ok(views) => Json(json!({ "strategies": views })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_strategy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let strategy_id = match uuid::Uuid::parse_str(&id) {
        Ok(uid) => StrategyId(uid),
        Err(_) => return (StatusCode::BAD_REQUEST, Json(json!({"error": "Invalid strategy ID"}))).into_response(),
    };

    match state.directives.query_status(strategy_id).await {
        Ok(Some(view)) => Json(view).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Strategy not found", "strategy_id": strategy_id.to_string()})),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn export_ledger(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LedgerQuery>,
) -> Response {
    match query.format.as_deref().unwrap_or("json") {
        "json" => Json(state.directives.router().export_json()).into_response(),
        "csv" => (
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            state.directives.router().export_csv(),
        )
            .into_response(),
        other => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("Unsupported ledger format '{}'", other)})),
        )
            .into_response(),
    }
}

fn accepted(id: StrategyId) -> Response {
    (StatusCode::ACCEPTED, Json(json!({ "strategy_id": id.to_string() }))).into_response()
}

fn error_response(err: OrchestratorError) -> Response {
    let status = match &err {
        OrchestratorError::Validation(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        OrchestratorError::BudgetExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
        OrchestratorError::VerificationFailure { .. } => StatusCode::CONFLICT,
        OrchestratorError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(kind = err.kind(), error = %err, "Request failed");
    (status, Json(json!({ "error": err.to_string(), "kind": err.kind() }))).into_response()
}
