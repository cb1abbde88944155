//! Job definitions.
//!
//! - **Job**: a persisted unit of work with its retry bookkeeping
//! - **JobPayload**: the closed set of job types the dispatcher knows how to run
//! - **RetryPolicy**: exponential backoff between attempts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{ErrorCode, HeraldError, Result};
use crate::posts::PostId;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for JobId {
    type Err = HeraldError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| HeraldError::validation(format!("Invalid job id: {}", s)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Persisted status of a job.
///
/// A failed attempt never rests in a `failed` state: it goes straight back
/// to `Pending` with a later `next_run_at`, or to `Dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `next_run_at`
    Pending,
    /// Claimed by exactly one dispatcher
    Processing,
    /// Finished successfully
    Completed,
    /// Retries exhausted; held for manual replay
    Dead,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Dead => "dead",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Dead)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = HeraldError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "dead" => Ok(Self::Dead),
            other => Err(HeraldError::internal(format!(
                "Unknown job status in storage: {}",
                other
            ))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Payloads
// ═══════════════════════════════════════════════════════════════════════════════

pub const SEND_APPROVAL_REQUEST: &str = "send-approval-request";
pub const PUBLISH_CONTENT: &str = "publish-content";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequestPayload {
    pub post_id: PostId,
    pub message: String,
    pub platform: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishPayload {
    pub post_id: PostId,
    pub message: String,
}

/// Every job type the dispatcher can run.
///
/// Adding a variant forces a new arm in the dispatcher's `match`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    SendApprovalRequest(ApprovalRequestPayload),
    PublishContent(PublishPayload),
}

impl JobPayload {
    pub fn send_approval_request(
        post_id: PostId,
        message: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self::SendApprovalRequest(ApprovalRequestPayload {
            post_id,
            message: message.into(),
            platform: platform.into(),
        })
    }

    pub fn publish_content(post_id: PostId, message: impl Into<String>) -> Self {
        Self::PublishContent(PublishPayload {
            post_id,
            message: message.into(),
        })
    }

    /// The stored type tag.
    pub fn job_type(&self) -> &'static str {
        match self {
            Self::SendApprovalRequest(_) => SEND_APPROVAL_REQUEST,
            Self::PublishContent(_) => PUBLISH_CONTENT,
        }
    }

    pub fn post_id(&self) -> PostId {
        match self {
            Self::SendApprovalRequest(p) => p.post_id,
            Self::PublishContent(p) => p.post_id,
        }
    }

    /// The stored payload blob, without the type tag.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let value = match self {
            Self::SendApprovalRequest(p) => serde_json::to_value(p)?,
            Self::PublishContent(p) => serde_json::to_value(p)?,
        };
        Ok(value)
    }

    /// Rebuild a payload from its stored type tag and blob.
    pub fn decode(job_type: &str, payload: &serde_json::Value) -> Result<Self> {
        let decoded = match job_type {
            SEND_APPROVAL_REQUEST => {
                serde_json::from_value(payload.clone()).map(Self::SendApprovalRequest)
            }
            PUBLISH_CONTENT => serde_json::from_value(payload.clone()).map(Self::PublishContent),
            other => {
                return Err(HeraldError::new(
                    ErrorCode::UnknownJobType,
                    format!("No handler for job type '{}'", other),
                ))
            }
        };

        decoded.map_err(|e| {
            HeraldError::with_internal(
                ErrorCode::InvalidJobPayload,
                format!("Malformed payload for job type '{}'", job_type),
                e.to_string(),
            )
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job
// ═══════════════════════════════════════════════════════════════════════════════

/// A persisted job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    /// Failed attempts so far
    pub attempts: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    /// Earliest time the job may be claimed
    pub next_run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a new pending job.
    pub fn new(
        job_type: impl Into<String>,
        payload: serde_json::Value,
        max_retries: u32,
        now: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            job_type: job_type.into(),
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_retries,
            last_error: None,
            next_run_at,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn decode_payload(&self) -> Result<JobPayload> {
        JobPayload::decode(&self.job_type, &self.payload)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Enqueue options and outcomes
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-job overrides for [`JobQueue::enqueue`](super::JobQueue::enqueue).
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Attempts before dead-lettering; the queue default when unset
    pub max_retries: Option<u32>,
    /// Delay before the first claim
    pub delay: Option<Duration>,
}

impl EnqueueOptions {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// What `mark_failed` did to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to pending, eligible again at `next_run_at`
    Rescheduled {
        attempts: u32,
        next_run_at: DateTime<Utc>,
    },
    /// Retries exhausted
    DeadLettered { attempts: u32 },
    /// The job is gone or no longer processing; nothing changed
    Skipped,
}

/// What `retry_dead` did to a job.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDeadOutcome {
    Requeued(Job),
    NotDead(JobStatus),
    NotFound,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Exponential backoff: the n-th retry waits `base_backoff * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_backoff: Duration,
    pub default_max_retries: u32,
}

/// Doubling stops here so the delay cannot overflow.
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Upper bound on a single retry delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30 * 24 * 60 * 60);

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_secs(30),
            default_max_retries: 3,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &crate::config::QueueConfig) -> Self {
        Self {
            base_backoff: config.base_backoff,
            default_max_retries: config.default_max_retries,
        }
    }

    /// Delay after the `attempts`-th failure (1-based), capped at [`MAX_BACKOFF`].
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(MAX_BACKOFF)
    }

    /// Apply one failure to a processing job.
    pub fn apply_failure(&self, job: &mut Job, error: &str, now: DateTime<Utc>) -> FailureOutcome {
        job.attempts += 1;
        job.last_error = Some(error.to_string());
        job.updated_at = now;

        if job.attempts >= job.max_retries {
            job.status = JobStatus::Dead;
            FailureOutcome::DeadLettered {
                attempts: job.attempts,
            }
        } else {
            // Bounded by MAX_BACKOFF, so the millisecond count fits in an i64.
            let delay =
                chrono::Duration::milliseconds(self.backoff_for(job.attempts).as_millis() as i64);
            job.status = JobStatus::Pending;
            job.next_run_at = now
                .checked_add_signed(delay)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            FailureOutcome::Rescheduled {
                attempts: job.attempts,
                next_run_at: job.next_run_at,
            }
        }
    }
}
