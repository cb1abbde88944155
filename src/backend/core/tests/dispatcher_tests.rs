//! End-to-end tests for the dispatcher.
//!
//! Tests cover:
//! - Generate -> approval request -> approve -> publish
//! - Backoff timing between attempts
//! - Dead-lettering and its effect on the post
//! - Manual replay of dead jobs
//! - Breaker-open failures burning retries
//! - Unknown job types
//! - Graceful shutdown of the poll loop

mod common;

use common::Harness;
use herald_core::error::ErrorCode;
use herald_core::jobs::{EnqueueOptions, JobStatus, RetryDeadOutcome, TickOutcome};
use herald_core::posts::{ApprovalOutcome, PostStatus};
use std::time::Duration;

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_generate_approve_publish() {
    let h = Harness::new();
    let dispatcher = h.dispatcher();

    let post = h.services.content.generate("launch week", None).await.unwrap();
    assert_eq!(post.status, PostStatus::Pending);

    let tick = dispatcher.run_once().await.unwrap();
    assert!(matches!(tick, TickOutcome::Completed(_)));
    assert_eq!(h.notifier.sent.lock().as_slice(), &[post.id]);

    let delivered = h.services.posts.get(post.id).await.unwrap().unwrap();
    assert_eq!(delivered.status, PostStatus::Pending);
    assert_eq!(delivered.delivery_metadata.unwrap()["channel"], "#approvals");

    let decision = h.services.approvals.approve(post.id, "alice").await.unwrap();
    assert!(decision.publish_job_id.is_some());

    let tick = dispatcher.run_once().await.unwrap();
    assert!(matches!(tick, TickOutcome::Completed(_)));

    let published = h.services.posts.get(post.id).await.unwrap().unwrap();
    assert_eq!(published.status, PostStatus::Posted);
    assert_eq!(published.external_ref.as_deref(), Some("tweet-1"));
    assert_eq!(h.publisher.published.lock().as_slice(), &[post.message.clone()]);

    assert_eq!(dispatcher.run_once().await.unwrap(), TickOutcome::Idle);
    assert_eq!(dispatcher.stats().completed(), 2);
}

#[tokio::test]
async fn test_idle_when_queue_empty() {
    let h = Harness::new();
    assert_eq!(h.dispatcher().run_once().await.unwrap(), TickOutcome::Idle);
}

// ============================================================================
// Retry and dead-lettering
// ============================================================================

#[tokio::test]
async fn test_backoff_then_dead_letter_marks_post() {
    let h = Harness::new();
    let dispatcher = h.dispatcher();
    h.notifier.script.fail_next(3, ErrorCode::ApprovalDeliveryFailed);

    let post = h.services.content.generate("quarterly numbers", None).await.unwrap();

    // Attempt 1 fails, retry due in 30s.
    let TickOutcome::Rescheduled(job_id) = dispatcher.run_once().await.unwrap() else {
        panic!("expected reschedule");
    };
    let job = h.services.queue.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.attempts, 1);
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.last_error.is_some());

    h.advance_secs(29);
    assert_eq!(dispatcher.run_once().await.unwrap(), TickOutcome::Idle);

    // Attempt 2 fails, retry due in 60s.
    h.advance_secs(1);
    assert_eq!(
        dispatcher.run_once().await.unwrap(),
        TickOutcome::Rescheduled(job_id)
    );
    h.advance_secs(59);
    assert_eq!(dispatcher.run_once().await.unwrap(), TickOutcome::Idle);

    // Attempt 3 exhausts max_retries.
    h.advance_secs(1);
    assert_eq!(
        dispatcher.run_once().await.unwrap(),
        TickOutcome::DeadLettered(job_id)
    );

    let job = h.services.queue.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Dead);
    assert_eq!(job.attempts, 3);

    let post = h.services.posts.get(post.id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::FailedApprovalSend);
    assert_eq!(h.notifier.script.calls(), 3);
    assert_eq!(dispatcher.stats().dead(), 1);
}

#[tokio::test]
async fn test_replay_dead_delivery_restores_pending() {
    let h = Harness::new();
    let dispatcher = h.dispatcher();
    h.notifier.script.fail_next(3, ErrorCode::ApprovalDeliveryFailed);

    let post = h.services.content.generate("hiring", None).await.unwrap();
    let TickOutcome::Rescheduled(job_id) = dispatcher.run_once().await.unwrap() else {
        panic!("expected reschedule");
    };
    h.advance_secs(30);
    dispatcher.run_once().await.unwrap();
    h.advance_secs(60);
    assert_eq!(
        dispatcher.run_once().await.unwrap(),
        TickOutcome::DeadLettered(job_id)
    );

    // Decisions are refused while delivery is marked failed.
    let decision = h.services.approvals.approve(post.id, "alice").await.unwrap();
    assert_eq!(decision.outcome, ApprovalOutcome::AlreadyActioned);

    let RetryDeadOutcome::Requeued(job) = h.services.queue.retry_dead(job_id).await.unwrap() else {
        panic!("expected requeue");
    };
    assert_eq!(job.attempts, 0);
    assert_eq!(job.status, JobStatus::Pending);

    assert_eq!(
        dispatcher.run_once().await.unwrap(),
        TickOutcome::Completed(job_id)
    );
    let post = h.services.posts.get(post.id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Pending);
    assert!(post.delivery_metadata.is_some());

    let decision = h.services.approvals.approve(post.id, "alice").await.unwrap();
    assert_eq!(decision.outcome, ApprovalOutcome::Approved);
}

#[tokio::test]
async fn test_replay_dead_publish_posts() {
    let h = Harness::new();
    let dispatcher = h.dispatcher();

    let post = h.services.content.generate("release notes", None).await.unwrap();
    dispatcher.run_once().await.unwrap();
    h.services.approvals.approve(post.id, "alice").await.unwrap();

    h.publisher.script.fail_next(3, ErrorCode::PublishFailed);
    let TickOutcome::Rescheduled(job_id) = dispatcher.run_once().await.unwrap() else {
        panic!("expected reschedule");
    };
    h.advance_secs(30);
    dispatcher.run_once().await.unwrap();
    h.advance_secs(60);
    assert_eq!(
        dispatcher.run_once().await.unwrap(),
        TickOutcome::DeadLettered(job_id)
    );
    assert_eq!(
        h.services.posts.get(post.id).await.unwrap().unwrap().status,
        PostStatus::FailedPost
    );

    let dead = h.services.queue.get_dead(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, job_id);

    h.services.queue.retry_dead(job_id).await.unwrap();
    assert_eq!(
        dispatcher.run_once().await.unwrap(),
        TickOutcome::Completed(job_id)
    );

    let post = h.services.posts.get(post.id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Posted);
    assert_eq!(post.external_ref.as_deref(), Some("tweet-4"));
}

#[tokio::test]
async fn test_open_breaker_burns_retries_without_calling_out() {
    let h = Harness::with_breaker_threshold(1);
    let dispatcher = h.dispatcher();
    h.notifier.script.fail_next(1, ErrorCode::ApprovalDeliveryFailed);

    h.services.content.generate("status update", None).await.unwrap();

    let TickOutcome::Rescheduled(job_id) = dispatcher.run_once().await.unwrap() else {
        panic!("expected reschedule");
    };
    assert_eq!(h.notifier.script.calls(), 1);

    // The breaker's 60s reset is measured in tokio time, not the manual
    // clock, so it is still open here.
    h.advance_secs(30);
    assert_eq!(
        dispatcher.run_once().await.unwrap(),
        TickOutcome::Rescheduled(job_id)
    );
    assert_eq!(h.notifier.script.calls(), 1);

    let job = h.services.queue.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.attempts, 2);
    assert!(job.last_error.unwrap().contains("CircuitOpen"));
}

#[tokio::test]
async fn test_unknown_job_type_dead_letters() {
    let h = Harness::new();
    let dispatcher = h.dispatcher();

    let id = h
        .services
        .queue
        .enqueue_raw(
            "send-fax",
            serde_json::json!({"to": "+1"}),
            EnqueueOptions::default().with_max_retries(1),
        )
        .await
        .unwrap();

    assert_eq!(dispatcher.run_once().await.unwrap(), TickOutcome::DeadLettered(id));
    let job = h.services.queue.get_job(id).await.unwrap().unwrap();
    assert!(job.last_error.unwrap().to_lowercase().contains("send-fax"));
}

#[tokio::test]
async fn test_publish_skips_already_posted() {
    let h = Harness::new();
    let dispatcher = h.dispatcher();

    let post = h.services.content.generate("launch", None).await.unwrap();
    dispatcher.run_once().await.unwrap();
    h.services.approvals.approve(post.id, "alice").await.unwrap();
    dispatcher.run_once().await.unwrap();
    assert_eq!(h.publisher.script.calls(), 1);

    // A duplicate publish job, as left behind by a reclaimed row.
    h.services
        .queue
        .enqueue(
            &herald_core::jobs::JobPayload::publish_content(post.id, post.message.clone()),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();
    assert!(matches!(
        dispatcher.run_once().await.unwrap(),
        TickOutcome::Completed(_)
    ));
    assert_eq!(h.publisher.script.calls(), 1);
}

// ============================================================================
// Poll loop
// ============================================================================

#[tokio::test]
async fn test_start_and_shutdown() {
    let h = Harness::new();
    h.services.content.generate("loop", None).await.unwrap();

    let dispatcher = h.services.dispatcher(herald_core::jobs::DispatcherConfig {
        name: "test-worker".into(),
        poll_interval: Duration::from_millis(10),
        shutdown_timeout: Duration::from_secs(5),
    });
    let handle = dispatcher.start();

    for _ in 0..100 {
        if handle.stats().completed() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(handle.stats().completed(), 1);
    assert!(handle.shutdown().await);
}

#[tokio::test]
async fn test_start_recovers_stuck_jobs() {
    let h = Harness::new();
    h.services.content.generate("stuck", None).await.unwrap();

    // Claim it and walk away, as a crashed process would.
    let orphan = h.services.queue.dequeue_next().await.unwrap().unwrap();
    h.advance_secs(6 * 60);

    let handle = h
        .services
        .dispatcher(herald_core::jobs::DispatcherConfig {
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        })
        .start();

    for _ in 0..100 {
        if handle.stats().completed() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(handle.shutdown().await);

    let job = h.services.queue.get_job(orphan.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}
