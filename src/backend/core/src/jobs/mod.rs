//! Durable background jobs for Herald.
//!
//! - **Job**: persisted rows with typed payloads, attempt counts and a retry policy
//! - **Queue**: atomic claim, completion, failure with exponential backoff, dead-lettering
//! - **Handlers**: the work behind each job type, guarded by circuit breakers
//! - **Dispatcher**: the poll loop that ties them together
//!
//! ```text
//!  enqueue ──▶ pending ──claim──▶ processing ──ok──▶ completed
//!                ▲                    │
//!                └──── backoff ◀──────┤ error, attempts < max_retries
//!                                     └──▶ dead (retry_dead puts it back)
//! ```

pub mod handlers;
pub mod job;
pub mod queue;
pub mod worker;

pub use handlers::{Guarded, JobHandlers};
pub use job::{
    ApprovalRequestPayload, EnqueueOptions, FailureOutcome, Job, JobId, JobPayload, JobStatus,
    PublishPayload, RetryDeadOutcome, RetryPolicy, MAX_BACKOFF, PUBLISH_CONTENT,
    SEND_APPROVAL_REQUEST,
};
pub use queue::{
    InMemoryQueueBackend, JobQueue, QueueBackend, QueueStats, DEFAULT_STUCK_THRESHOLD,
};
pub use worker::{Dispatcher, DispatcherConfig, DispatcherHandle, DispatcherStats, TickOutcome};
