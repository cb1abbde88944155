//! API request handlers.
//!
//! Handlers return `Result<impl IntoResponse, HeraldError>`; the error's
//! `IntoResponse` picks the status code and envelope.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ApiResponse, AppState};
use crate::breaker::{BreakerSnapshot, CircuitState};
use crate::error::{ErrorCode, HeraldError};
use crate::jobs::{Job, JobId, RetryDeadOutcome};
use crate::posts::{DecisionResult, Post, PostId};

// ═══════════════════════════════════════════════════════════════════════════════
// Health and metrics
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub store: ComponentHealth,
    pub queue: ComponentHealth,
    pub breakers: Vec<BreakerSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn from_ping(result: crate::error::Result<()>) -> Self {
        match result {
            Ok(()) => Self {
                healthy: true,
                error: None,
            },
            Err(e) => Self {
                healthy: false,
                error: Some(e.user_message().to_string()),
            },
        }
    }
}

/// Store reachability plus breaker states.
///
/// 503 when a store is unreachable; an open breaker only degrades.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = ComponentHealth::from_ping(state.posts.ping().await);
    let queue = ComponentHealth::from_ping(state.queue.backend().ping().await);
    let breakers = state.breakers.snapshots();

    let (code, status) = if !store.healthy || !queue.healthy {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    } else if breakers.iter().any(|b| b.state != CircuitState::Closed) {
        (StatusCode::OK, "degraded")
    } else {
        (StatusCode::OK, "healthy")
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            timestamp: chrono::Utc::now().to_rfc3339(),
            store,
            queue,
            breakers,
        }),
    )
}

pub async fn prometheus_metrics() -> impl IntoResponse {
    let body = crate::telemetry::MetricsRegistry::global().render();

    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Posts
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub platform: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub actor: String,
}

pub async fn create_post(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<impl IntoResponse, HeraldError> {
    let post = state
        .content
        .generate(&req.prompt, req.platform.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(post))))
}

pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Post>>, HeraldError> {
    let post = state
        .posts
        .get(PostId(id))
        .await?
        .ok_or_else(|| HeraldError::not_found("Post", id.to_string()))?;

    Ok(Json(ApiResponse::success(post)))
}

pub async fn approve_post(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<ApiResponse<DecisionResult>>, HeraldError> {
    let id = PostId(id);
    let result = state.approvals.approve(id, &req.actor).await?.into_result(id)?;
    Ok(Json(ApiResponse::success(result)))
}

pub async fn reject_post(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<ApiResponse<DecisionResult>>, HeraldError> {
    let id = PostId(id);
    let result = state.approvals.reject(id, &req.actor).await?.into_result(id)?;
    Ok(Json(ApiResponse::success(result)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Admin: jobs
// ═══════════════════════════════════════════════════════════════════════════════

pub const DEFAULT_DEAD_LIMIT: u32 = 50;
pub const MAX_DEAD_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct DeadQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct JobStatsResponse {
    pub counts: crate::jobs::QueueStats,
    pub total: u64,
}

pub async fn job_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<JobStatsResponse>>, HeraldError> {
    let counts = state.queue.stats_by_status().await?;
    let total = counts.total();
    Ok(Json(ApiResponse::success(JobStatsResponse { counts, total })))
}

pub async fn dead_jobs(
    State(state): State<AppState>,
    Query(query): Query<DeadQuery>,
) -> Result<Json<ApiResponse<Vec<Job>>>, HeraldError> {
    let limit = query.limit.unwrap_or(DEFAULT_DEAD_LIMIT);
    if limit == 0 || limit > MAX_DEAD_LIMIT {
        return Err(HeraldError::validation(format!(
            "limit must be between 1 and {}",
            MAX_DEAD_LIMIT
        )));
    }

    let jobs = state.queue.get_dead(limit).await?;
    Ok(Json(ApiResponse::success(jobs)))
}

pub async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Job>>, HeraldError> {
    match state.queue.retry_dead(JobId(id)).await? {
        RetryDeadOutcome::Requeued(job) => Ok(Json(ApiResponse::success(job))),
        RetryDeadOutcome::NotFound => Err(HeraldError::not_found("Job", id.to_string())),
        RetryDeadOutcome::NotDead(status) => Err(HeraldError::new(
            ErrorCode::JobNotDead,
            format!("Job is {}, only dead jobs can be retried", status),
        )
        .with_context("job_id", id.to_string())),
    }
}

pub async fn discard_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, HeraldError> {
    if !state.queue.discard_job(JobId(id)).await? {
        return Err(HeraldError::not_found("Job", id.to_string()));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "id": id,
        "discarded": true,
    }))))
}
