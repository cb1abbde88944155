#![allow(clippy::result_large_err)]
//! # Herald Core
//!
//! Generated social posts, human approval, and reliable publishing.
//!
//! ## Architecture
//!
//! - **Jobs**: durable queue with exponential backoff, dead-lettering and a polling dispatcher
//! - **Breakers**: per-dependency circuit breakers around every outbound call
//! - **Posts**: approval state machine that lets exactly one decision win
//! - **Providers**: LLM generation, Slack approval requests, Twitter publishing
//! - **Storage**: in-memory or PostgreSQL backends behind async traits
//! - **Telemetry**: structured logging with redaction and Prometheus metrics

pub mod api;
pub mod breaker;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod posts;
pub mod providers;
pub mod services;
pub mod telemetry;

pub use error::{ErrorCode, ErrorDetails, ErrorSeverity, HeraldError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::breaker::{BreakerConfig, BreakerError, BreakerRegistry, CircuitBreaker, CircuitState};
    pub use crate::clock::{Clock, ManualClock, SharedClock, SystemClock};
    pub use crate::error::{ErrorCode, HeraldError, Result};
    pub use crate::jobs::{
        Dispatcher, DispatcherConfig, EnqueueOptions, FailureOutcome, Job, JobId, JobPayload,
        JobQueue, JobStatus, RetryPolicy,
    };
    pub use crate::posts::{
        ApprovalOutcome, ApprovalStateMachine, ContentService, Post, PostId, PostStatus, PostStore,
    };
    pub use crate::services::{Backends, Providers, ServiceSettings, Services};
}
