//! Dispatcher: the poll loop that claims jobs and runs their handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::handlers::JobHandlers;
use super::job::{FailureOutcome, Job, JobId};
use super::queue::JobQueue;
use crate::error::Result;
use crate::telemetry::{redact, JobMetrics, OperationTimer};

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Name used in logs
    pub name: String,
    /// Delay between ticks
    pub poll_interval: Duration,
    /// How long shutdown waits for the current tick
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "herald-worker".to_string(),
            poll_interval: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&crate::config::WorkerConfig> for DispatcherConfig {
    fn from(config: &crate::config::WorkerConfig) -> Self {
        Self {
            name: config.name.clone(),
            poll_interval: config.poll_interval,
            shutdown_timeout: config.shutdown_timeout,
        }
    }
}

/// Counters for one dispatcher.
#[derive(Debug, Clone, Default)]
pub struct DispatcherStats {
    pub processed: Arc<AtomicU64>,
    pub completed: Arc<AtomicU64>,
    pub rescheduled: Arc<AtomicU64>,
    pub dead: Arc<AtomicU64>,
}

impl DispatcherStats {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn rescheduled(&self) -> u64 {
        self.rescheduled.load(Ordering::Relaxed)
    }

    pub fn dead(&self) -> u64 {
        self.dead.load(Ordering::Relaxed)
    }
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was due
    Idle,
    Completed(JobId),
    Rescheduled(JobId),
    DeadLettered(JobId),
    /// The job changed under us and the failure was not recorded
    Skipped(JobId),
}

/// Polls the queue and runs one job per tick.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    queue: JobQueue,
    handlers: Arc<JobHandlers>,
    config: DispatcherConfig,
    stats: DispatcherStats,
}

impl Dispatcher {
    pub fn new(queue: JobQueue, handlers: Arc<JobHandlers>, config: DispatcherConfig) -> Self {
        Self {
            queue,
            handlers,
            config,
            stats: DispatcherStats::default(),
        }
    }

    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }

    /// Claim and run at most one job.
    pub async fn run_once(&self) -> Result<TickOutcome> {
        let Some(job) = self.queue.dequeue_next().await? else {
            return Ok(TickOutcome::Idle);
        };
        self.stats.processed.fetch_add(1, Ordering::Relaxed);

        let span = tracing::info_span!(
            "job",
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts + 1,
        );
        self.process(job).instrument(span).await
    }

    async fn process(&self, job: Job) -> Result<TickOutcome> {
        let timer = OperationTimer::start();
        let result = match job.decode_payload() {
            Ok(payload) => self.handlers.run(&payload).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.queue.mark_completed(job.id).await?;
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                JobMetrics::record_completed(&job.job_type, timer.elapsed());
                tracing::info!(elapsed_ms = timer.elapsed().as_millis() as u64, "Job completed");
                Ok(TickOutcome::Completed(job.id))
            }
            Err(e) => {
                JobMetrics::record_failed(&job.job_type, timer.elapsed());
                let message = redact(&e.to_string());

                match self.queue.mark_failed(job.id, &message).await? {
                    FailureOutcome::Rescheduled { .. } => {
                        self.stats.rescheduled.fetch_add(1, Ordering::Relaxed);
                        Ok(TickOutcome::Rescheduled(job.id))
                    }
                    FailureOutcome::DeadLettered { .. } => {
                        self.stats.dead.fetch_add(1, Ordering::Relaxed);
                        JobMetrics::record_dead(&job.job_type);
                        self.run_exhaustion_hook(&job).await;
                        Ok(TickOutcome::DeadLettered(job.id))
                    }
                    FailureOutcome::Skipped => Ok(TickOutcome::Skipped(job.id)),
                }
            }
        }
    }

    async fn run_exhaustion_hook(&self, job: &Job) {
        // Unknown or malformed payloads have no post to update.
        let Ok(payload) = job.decode_payload() else {
            return;
        };
        if let Err(e) = self.handlers.on_exhausted(&payload).await {
            tracing::error!(error = %e, "Dead-letter hook failed");
        }
    }

    /// Spawn the poll loop.
    ///
    /// Orphaned processing jobs are reset before the first tick.
    pub fn start(self) -> DispatcherHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let shutdown_timeout = self.config.shutdown_timeout;
        let name = self.config.name.clone();

        let join = tokio::spawn(async move {
            tracing::info!(
                worker = %self.config.name,
                poll_interval_ms = self.config.poll_interval.as_millis() as u64,
                "Dispatcher started"
            );

            match self.queue.reset_stuck().await {
                Ok(count) => tracing::info!(worker = %self.config.name, recovered = count, "Stuck job sweep finished"),
                Err(e) => tracing::error!(worker = %self.config.name, error = %e, "Stuck job sweep failed"),
            }

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                if let Err(e) = self.run_once().await {
                    tracing::error!(worker = %self.config.name, error = %e, "Dispatcher tick failed");
                }

                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }

            tracing::info!(
                worker = %self.config.name,
                processed = self.stats.processed(),
                "Dispatcher stopped"
            );
        });

        DispatcherHandle {
            name,
            shutdown: shutdown_tx,
            join,
            stats,
            shutdown_timeout,
        }
    }
}

/// Handle for a running dispatcher.
#[derive(Debug)]
pub struct DispatcherHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: DispatcherStats,
    shutdown_timeout: Duration,
}

impl DispatcherHandle {
    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }

    /// Stop polling and wait for the current tick.
    ///
    /// Returns `true` if the loop exited on its own, `false` if it was
    /// aborted after the shutdown timeout.
    pub async fn shutdown(mut self) -> bool {
        let _ = self.shutdown.send(true);

        match tokio::time::timeout(self.shutdown_timeout, &mut self.join).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(
                    worker = %self.name,
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "Dispatcher did not stop in time, aborting"
                );
                self.join.abort();
                false
            }
        }
    }
}
