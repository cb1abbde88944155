//! Durable job queue with atomic claims, exponential backoff and dead-lettering.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::job::{
    EnqueueOptions, FailureOutcome, Job, JobId, JobPayload, JobStatus, RetryDeadOutcome,
    RetryPolicy,
};
use crate::clock::{SharedClock, SystemClock};
use crate::error::{HeraldError, Result};
use crate::telemetry::JobMetrics;

/// Job counts by status. Every status is present, zero if empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueStats(pub BTreeMap<JobStatus, u64>);

impl QueueStats {
    pub fn from_counts(counts: impl IntoIterator<Item = (JobStatus, u64)>) -> Self {
        let mut map: BTreeMap<JobStatus, u64> =
            JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for (status, count) in counts {
            *map.entry(status).or_insert(0) += count;
        }
        Self(map)
    }

    pub fn get(&self, status: JobStatus) -> u64 {
        self.0.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }
}

/// Storage behind a [`JobQueue`].
///
/// Every method is one atomic operation against the store. In particular
/// `claim_next` must never hand the same job to two callers, and `fail`
/// must read and update the attempt count in one step.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Claim the pending job with the earliest `next_run_at <= now`.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>>;

    /// Mark a non-terminal job completed. Returns false if nothing changed.
    async fn complete(&self, id: JobId, now: DateTime<Utc>) -> Result<bool>;

    /// Record a failed attempt on a processing job.
    async fn fail(
        &self,
        id: JobId,
        error: &str,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> Result<FailureOutcome>;

    /// Reset processing jobs last touched before `stale_before` to pending.
    async fn reset_stuck(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64>;

    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Dead jobs, most recently failed first.
    async fn list_dead(&self, limit: u32) -> Result<Vec<Job>>;

    /// Requeue a dead job with a fresh attempt budget.
    async fn retry_dead(&self, id: JobId, now: DateTime<Utc>) -> Result<RetryDeadOutcome>;

    /// Delete a job. Returns false if it did not exist.
    async fn delete(&self, id: JobId) -> Result<bool>;

    async fn count_by_status(&self) -> Result<QueueStats>;

    /// Check the store is reachable.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory backend
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct MemoryTable {
    jobs: HashMap<JobId, (u64, Job)>,
    next_seq: u64,
}

/// In-memory queue backend for tests and ephemeral runs.
///
/// One lock guards the whole table, which makes every operation atomic.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueueBackend {
    table: Arc<RwLock<MemoryTable>>,
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn insert(&self, job: &Job) -> Result<()> {
        let mut table = self.table.write().await;
        table.next_seq += 1;
        let seq = table.next_seq;
        table.jobs.insert(job.id, (seq, job.clone()));
        Ok(())
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        let mut table = self.table.write().await;

        let next = table
            .jobs
            .values()
            .filter(|(_, job)| job.status == JobStatus::Pending && job.next_run_at <= now)
            .min_by_key(|(seq, job)| (job.next_run_at, job.created_at, *seq))
            .map(|(_, job)| job.id);

        Ok(next.and_then(|id| {
            table.jobs.get_mut(&id).map(|(_, job)| {
                job.status = JobStatus::Processing;
                job.updated_at = now;
                job.clone()
            })
        }))
    }

    async fn complete(&self, id: JobId, now: DateTime<Utc>) -> Result<bool> {
        let mut table = self.table.write().await;
        match table.jobs.get_mut(&id) {
            Some((_, job)) if !job.status.is_terminal() => {
                job.status = JobStatus::Completed;
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail(
        &self,
        id: JobId,
        error: &str,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> Result<FailureOutcome> {
        let mut table = self.table.write().await;
        match table.jobs.get_mut(&id) {
            Some((_, job)) if job.status == JobStatus::Processing => {
                Ok(policy.apply_failure(job, error, now))
            }
            _ => Ok(FailureOutcome::Skipped),
        }
    }

    async fn reset_stuck(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64> {
        let mut table = self.table.write().await;
        let mut count = 0;
        for (_, job) in table.jobs.values_mut() {
            if job.status == JobStatus::Processing && job.updated_at < stale_before {
                job.status = JobStatus::Pending;
                job.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.table.read().await.jobs.get(&id).map(|(_, job)| job.clone()))
    }

    async fn list_dead(&self, limit: u32) -> Result<Vec<Job>> {
        let table = self.table.read().await;
        let mut dead: Vec<&Job> = table
            .jobs
            .values()
            .map(|(_, job)| job)
            .filter(|job| job.status == JobStatus::Dead)
            .collect();
        dead.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(dead.into_iter().take(limit as usize).cloned().collect())
    }

    async fn retry_dead(&self, id: JobId, now: DateTime<Utc>) -> Result<RetryDeadOutcome> {
        let mut table = self.table.write().await;
        match table.jobs.get_mut(&id) {
            None => Ok(RetryDeadOutcome::NotFound),
            Some((_, job)) if job.status != JobStatus::Dead => {
                Ok(RetryDeadOutcome::NotDead(job.status))
            }
            Some((_, job)) => {
                job.status = JobStatus::Pending;
                job.attempts = 0;
                job.next_run_at = now;
                job.updated_at = now;
                Ok(RetryDeadOutcome::Requeued(job.clone()))
            }
        }
    }

    async fn delete(&self, id: JobId) -> Result<bool> {
        Ok(self.table.write().await.jobs.remove(&id).is_some())
    }

    async fn count_by_status(&self) -> Result<QueueStats> {
        let table = self.table.read().await;
        Ok(QueueStats::from_counts(
            table.jobs.values().map(|(_, job)| (job.status, 1)),
        ))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job queue
// ═══════════════════════════════════════════════════════════════════════════════

/// Default age after which a processing job is considered orphaned.
pub const DEFAULT_STUCK_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// The job queue.
#[derive(Clone)]
pub struct JobQueue {
    backend: Arc<dyn QueueBackend>,
    clock: SharedClock,
    policy: RetryPolicy,
    stuck_threshold: Duration,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("policy", &self.policy)
            .field("stuck_threshold", &self.stuck_threshold)
            .finish()
    }
}

impl JobQueue {
    pub fn new(backend: Arc<dyn QueueBackend>, clock: SharedClock, policy: RetryPolicy) -> Self {
        Self {
            backend,
            clock,
            policy,
            stuck_threshold: DEFAULT_STUCK_THRESHOLD,
        }
    }

    /// In-memory queue on the system clock.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryQueueBackend::new()),
            Arc::new(SystemClock),
            RetryPolicy::default(),
        )
    }

    pub fn with_stuck_threshold(mut self, threshold: Duration) -> Self {
        self.stuck_threshold = threshold;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    /// Enqueue a typed job.
    pub async fn enqueue(&self, payload: &JobPayload, options: EnqueueOptions) -> Result<JobId> {
        self.enqueue_raw(payload.job_type(), payload.to_json()?, options)
            .await
    }

    /// Enqueue by type tag and raw payload.
    ///
    /// No check is made that `job_type` has a handler; an unknown type fails
    /// when claimed.
    pub async fn enqueue_raw(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<JobId> {
        let now = self.clock.now();
        let run_at = match options.delay {
            None => now,
            Some(delay) => chrono::Duration::from_std(delay)
                .ok()
                .and_then(|delay| now.checked_add_signed(delay))
                .ok_or_else(|| {
                    HeraldError::validation(format!("delay {:?} is out of range", delay))
                })?,
        };
        let max_retries = options
            .max_retries
            .unwrap_or(self.policy.default_max_retries);

        let job = Job::new(job_type, payload, max_retries, now, run_at);
        self.backend.insert(&job).await?;

        JobMetrics::record_enqueued(job_type);
        tracing::debug!(
            job_id = %job.id,
            job_type = %job_type,
            max_retries = max_retries,
            next_run_at = %job.next_run_at,
            "Job enqueued"
        );
        Ok(job.id)
    }

    /// Atomically claim the next eligible job.
    pub async fn dequeue_next(&self) -> Result<Option<Job>> {
        self.backend.claim_next(self.clock.now()).await
    }

    /// Mark a job completed. A missing job is a no-op.
    pub async fn mark_completed(&self, id: JobId) -> Result<()> {
        if !self.backend.complete(id, self.clock.now()).await? {
            tracing::debug!(job_id = %id, "mark_completed found no active job");
        }
        Ok(())
    }

    /// Record a failed attempt, rescheduling or dead-lettering the job.
    pub async fn mark_failed(&self, id: JobId, error: &str) -> Result<FailureOutcome> {
        let outcome = self
            .backend
            .fail(id, error, self.clock.now(), &self.policy)
            .await?;

        match outcome {
            FailureOutcome::Rescheduled {
                attempts,
                next_run_at,
            } => tracing::info!(
                job_id = %id,
                attempt = attempts,
                next_run_at = %next_run_at,
                error = %error,
                "Job rescheduled"
            ),
            FailureOutcome::DeadLettered { attempts } => tracing::warn!(
                job_id = %id,
                attempt = attempts,
                error = %error,
                "Job dead-lettered"
            ),
            FailureOutcome::Skipped => {
                tracing::debug!(job_id = %id, "mark_failed found no processing job")
            }
        }
        Ok(outcome)
    }

    /// Reset orphaned processing jobs to pending, keeping their attempts.
    pub async fn reset_stuck(&self) -> Result<u64> {
        let now = self.clock.now();
        let threshold = chrono::Duration::from_std(self.stuck_threshold)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));

        let count = self.backend.reset_stuck(now - threshold, now).await?;
        if count > 0 {
            JobMetrics::record_recovered(count);
            tracing::warn!(count = count, "Reset stuck processing jobs");
        }
        Ok(count)
    }

    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        self.backend.get(id).await
    }

    pub async fn get_dead(&self, limit: u32) -> Result<Vec<Job>> {
        self.backend.list_dead(limit).await
    }

    /// Requeue a dead job with attempts reset to zero.
    pub async fn retry_dead(&self, id: JobId) -> Result<RetryDeadOutcome> {
        let outcome = self.backend.retry_dead(id, self.clock.now()).await?;
        if let RetryDeadOutcome::Requeued(job) = &outcome {
            tracing::info!(job_id = %id, job_type = %job.job_type, "Dead job requeued");
        }
        Ok(outcome)
    }

    /// Permanently remove a job.
    pub async fn discard_job(&self, id: JobId) -> Result<bool> {
        let removed = self.backend.delete(id).await?;
        if removed {
            tracing::info!(job_id = %id, "Job discarded");
        }
        Ok(removed)
    }

    pub async fn stats_by_status(&self) -> Result<QueueStats> {
        self.backend.count_by_status().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::jobs::PUBLISH_CONTENT;

    fn queue_with_clock() -> (JobQueue, ManualClock) {
        let clock = ManualClock::default();
        let queue = JobQueue::new(
            Arc::new(InMemoryQueueBackend::new()),
            Arc::new(clock.clone()),
            RetryPolicy::default(),
        );
        (queue, clock)
    }

    #[tokio::test]
    async fn test_enqueue_then_claim() {
        let (queue, _) = queue_with_clock();
        let id = queue
            .enqueue_raw(PUBLISH_CONTENT, serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();

        let job = queue.dequeue_next().await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.max_retries, 3);
        assert!(queue.dequeue_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delayed_job_not_claimable_early() {
        let (queue, clock) = queue_with_clock();
        queue
            .enqueue_raw(
                PUBLISH_CONTENT,
                serde_json::json!({}),
                EnqueueOptions::default().with_delay(Duration::from_secs(10)),
            )
            .await
            .unwrap();

        assert!(queue.dequeue_next().await.unwrap().is_none());
        clock.advance(chrono::Duration::seconds(10));
        assert!(queue.dequeue_next().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unrepresentable_delay_is_rejected() {
        let (queue, _) = queue_with_clock();
        let err = queue
            .enqueue_raw(
                PUBLISH_CONTENT,
                serde_json::json!({}),
                EnqueueOptions::default().with_delay(Duration::MAX),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), crate::error::ErrorCode::ValidationError);
        assert!(queue.dequeue_next().await.unwrap().is_none());
        assert_eq!(queue.stats_by_status().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_delay_past_end_of_calendar_is_rejected() {
        let (queue, _) = queue_with_clock();
        let four_hundred_thousand_years = Duration::from_secs(400_000 * 365 * 24 * 60 * 60);
        let err = queue
            .enqueue_raw(
                PUBLISH_CONTENT,
                serde_json::json!({}),
                EnqueueOptions::default().with_delay(four_hundred_thousand_years),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), crate::error::ErrorCode::ValidationError);
        assert_eq!(queue.stats_by_status().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_claims_in_next_run_at_order() {
        let (queue, clock) = queue_with_clock();
        let later = queue
            .enqueue_raw(
                "b",
                serde_json::json!({}),
                EnqueueOptions::default().with_delay(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        let sooner = queue
            .enqueue_raw("a", serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();

        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(queue.dequeue_next().await.unwrap().unwrap().id, sooner);
        assert_eq!(queue.dequeue_next().await.unwrap().unwrap().id, later);
    }

    #[tokio::test]
    async fn test_stats_include_every_status() {
        let (queue, _) = queue_with_clock();
        queue
            .enqueue_raw("a", serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();

        let stats = queue.stats_by_status().await.unwrap();
        assert_eq!(stats.get(JobStatus::Pending), 1);
        assert_eq!(stats.get(JobStatus::Dead), 0);
        assert_eq!(stats.0.len(), 4);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["pending"], 1);
        assert_eq!(json["processing"], 0);
    }

    #[tokio::test]
    async fn test_mark_completed_missing_is_noop() {
        let (queue, _) = queue_with_clock();
        queue.mark_completed(JobId::new()).await.unwrap();
        assert_eq!(
            queue.mark_failed(JobId::new(), "x").await.unwrap(),
            FailureOutcome::Skipped
        );
    }
}
