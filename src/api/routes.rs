//! Result transport: decode requests into store calls.

use askama::Template;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{error, info};

use super::state::AppState;
use super::view::ResultsIndex;
use crate::results::{ResultError, RunSubmission, RunSummary};

pub fn api_routes(max_log_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/results", get(list_results))
        .route("/results/{run_id}", post(save_result))
        .route(
            "/results/{run_id}/logs",
            post(save_logs)
                .get(get_logs)
                .layer(DefaultBodyLimit::max(max_log_bytes)),
        )
}

pub async fn index(State(state): State<AppState>) -> Response {
    let runs = state.store.list().await;
    match ResultsIndex::new(&runs, &state.thresholds).render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!(error = %e, "failed to render results page");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render results").into_response()
        }
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339()
        }
    }))
}

async fn list_results(State(state): State<AppState>) -> Json<Value> {
    let summaries: Vec<RunSummary> = state
        .store
        .list()
        .await
        .iter()
        .map(|run| RunSummary::new(run, &state.thresholds))
        .collect();
    let total = summaries.len();
    Json(json!({ "data": summaries, "meta": { "total": total } }))
}

async fn save_result(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ResultError> {
    let submission = RunSubmission::from_json(&body)
        .map_err(|e| ResultError::InvalidPayload(e.to_string()))?;
    state.store.submit(&run_id, submission).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn save_logs(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ResultError> {
    let len = body.len();
    state.store.attach_logs(&run_id, body).await?;
    info!(%run_id, bytes = len, "logs attached");
    Ok(StatusCode::ACCEPTED)
}

async fn get_logs(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Response, ResultError> {
    let logs = state
        .store
        .get(&run_id)
        .await
        .and_then(|run| run.logs)
        .ok_or(ResultError::NotFound(run_id))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], logs).into_response())
}
