//! HTTP facade over [`EvalService`] using axum.
//!
//! The API is a thin adapter: evaluation failures travel inside a 200
//! response as `is_error` data, while structural faults map to HTTP
//! statuses with a stable machine-readable `code`.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use evald_core::EvaldError;
use evald_core::history::HistoryEntry;
use evald_core::service::{EvalContext, EvalService};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<EvalService>,
}

/// Request to evaluate code.
#[derive(Debug, Deserialize)]
struct EvalRequest {
    code: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    is_admin: bool,
}

/// Response from evaluation.
#[derive(Debug, Serialize)]
struct EvalResponseDto {
    output: Vec<String>,
    is_error: bool,
    more_available: bool,
    commit: Option<HistoryEntry>,
}

/// Response from a pagination drain.
#[derive(Debug, Serialize)]
struct MoreResponseDto {
    output: Vec<String>,
    more_available: bool,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct HistoryResponseDto {
    history: Vec<HistoryEntry>,
}

/// Rollback request.
#[derive(Debug, Deserialize)]
struct RollbackRequest {
    commit_hash: String,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Serialize)]
struct RollbackResponseDto {
    commit: HistoryEntry,
    message: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Error envelope: human-readable message plus a code clients branch on.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

struct ApiError(EvaldError);

impl From<EvaldError> for ApiError {
    fn from(err: EvaldError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EvaldError::NoActivePage => StatusCode::NOT_FOUND,
            EvaldError::UnknownCommit { .. } => StatusCode::NOT_FOUND,
            EvaldError::Config(_) => StatusCode::BAD_REQUEST,
            EvaldError::Storage(_) | EvaldError::Session(_) | EvaldError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
            code: self.0.code(),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the axum router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/api/eval", post(handle_eval))
        .route("/api/more", get(handle_more))
        .route("/api/history", get(handle_history))
        .route("/api/rollback", post(handle_rollback))
        .route("/api/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

async fn handle_eval(
    State(state): State<AppState>,
    Json(req): Json<EvalRequest>,
) -> Result<Json<EvalResponseDto>, ApiError> {
    let user = req.user.unwrap_or_else(|| "web".to_string());
    let ctx = EvalContext::new(user).with_admin(req.is_admin);

    let reply = state.service.eval(&req.code, &ctx).await?;
    Ok(Json(EvalResponseDto {
        output: reply.output,
        is_error: reply.is_error,
        more_available: reply.more_available,
        commit: reply.commit,
    }))
}

async fn handle_more(State(state): State<AppState>) -> Result<Json<MoreResponseDto>, ApiError> {
    let page = state.service.more().await?;
    Ok(Json(MoreResponseDto {
        output: page.lines,
        more_available: page.more_available,
    }))
}

async fn handle_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponseDto>, ApiError> {
    let limit = query.limit.unwrap_or(20);
    let history = state.service.history(limit)?;
    Ok(Json(HistoryResponseDto { history }))
}

async fn handle_rollback(
    State(state): State<AppState>,
    Json(req): Json<RollbackRequest>,
) -> Result<Json<RollbackResponseDto>, ApiError> {
    let user = req.user.unwrap_or_else(|| "web".to_string());
    let ctx = EvalContext::new(user);

    let commit = state.service.rollback(&req.commit_hash, &ctx).await?;
    let message = commit.message.clone();
    Ok(Json(RollbackResponseDto { commit, message }))
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
