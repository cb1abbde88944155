//! HTTP API for Herald.
//!
//! # Endpoints
//!
//! ## Posts
//! - `POST /api/v1/posts` - Generate a post and request approval
//! - `GET /api/v1/posts/:id` - Get a post
//! - `POST /api/v1/posts/:id/approve` - Approve a pending post
//! - `POST /api/v1/posts/:id/reject` - Reject a pending post
//!
//! ## Admin
//! - `GET /api/v1/admin/jobs/stats` - Job counts by status
//! - `GET /api/v1/admin/jobs/dead?limit=` - Dead-lettered jobs
//! - `POST /api/v1/admin/jobs/:id/retry` - Requeue a dead job
//! - `DELETE /api/v1/admin/jobs/:id` - Discard a job
//!
//! ## System
//! - `GET /health`, `GET /metrics`

mod handlers;
pub mod middleware;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::breaker::BreakerRegistry;
use crate::jobs::JobQueue;
use crate::posts::{ApprovalStateMachine, ContentService, PostStore};

pub use handlers::{DEFAULT_DEAD_LIMIT, MAX_DEAD_LIMIT};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub content: ContentService,
    pub approvals: ApprovalStateMachine,
    pub queue: JobQueue,
    pub posts: Arc<dyn PostStore>,
    pub breakers: Arc<BreakerRegistry>,
}

/// Route paths, shared with clients.
pub mod paths {
    pub const POSTS: &str = "/api/v1/posts";
    pub const POST: &str = "/api/v1/posts/:id";
    pub const POST_APPROVE: &str = "/api/v1/posts/:id/approve";
    pub const POST_REJECT: &str = "/api/v1/posts/:id/reject";

    pub const JOB_STATS: &str = "/api/v1/admin/jobs/stats";
    pub const JOBS_DEAD: &str = "/api/v1/admin/jobs/dead";
    pub const JOB: &str = "/api/v1/admin/jobs/:id";
    pub const JOB_RETRY: &str = "/api/v1/admin/jobs/:id/retry";

    pub const HEALTH: &str = "/health";
    pub const METRICS: &str = "/metrics";
}

fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/posts", post(handlers::create_post))
        .route("/posts/:id", get(handlers::get_post))
        .route("/posts/:id/approve", post(handlers::approve_post))
        .route("/posts/:id/reject", post(handlers::reject_post))
        .route("/admin/jobs/stats", get(handlers::job_stats))
        .route("/admin/jobs/dead", get(handlers::dead_jobs))
        .route("/admin/jobs/:id/retry", post(handlers::retry_job))
        .route("/admin/jobs/:id", delete(handlers::discard_job))
}

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(paths::HEALTH, get(handlers::health_check))
        .route(paths::METRICS, get(handlers::prometheus_metrics))
        .nest("/api/v1", v1_router())
        .route_layer(axum_middleware::from_fn(middleware::request_context))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// API response wrapper.
#[derive(Debug, serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
        }
    }

    pub fn from_error(err: &crate::error::HeraldError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.user_message().to_string()),
            error_code: serde_json::to_value(err.code())
                .ok()
                .and_then(|v| v.as_str().map(str::to_string)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, HeraldError};

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("test data");
        assert!(response.success);
        assert_eq!(response.data, Some("test data"));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_api_response_from_error_uses_wire_code() {
        let err = HeraldError::new(ErrorCode::AlreadyActioned, "This post was already approved");
        let response: ApiResponse<()> = ApiResponse::from_error(&err);
        assert!(!response.success);
        assert_eq!(response.error_code.as_deref(), Some("ALREADY_ACTIONED"));
        assert_eq!(response.error.as_deref(), Some("This post was already approved"));
    }

    #[test]
    fn test_paths_are_versioned() {
        assert!(paths::POSTS.starts_with("/api/v1"));
        assert!(paths::JOB_STATS.starts_with("/api/v1/admin"));
    }
}
