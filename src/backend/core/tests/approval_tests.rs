//! Integration tests for the approval state machine.
//!
//! Tests cover:
//! - Exactly one decision wins under concurrent approve/reject
//! - Repeat decisions report the earlier one and change nothing
//! - Exactly one publish job per approved post
//! - Job-driven transitions and their guards
//! - The same guarantees against PostgreSQL (when `HERALD_TEST_DATABASE_URL` is set)

mod common;

use std::sync::Arc;

use common::Harness;
use herald_core::clock::SystemClock;
use herald_core::db::Database;
use herald_core::error::ErrorCode;
use herald_core::jobs::{InMemoryQueueBackend, JobQueue, JobStatus, RetryPolicy, PUBLISH_CONTENT};
use herald_core::posts::{
    ApprovalOutcome, ApprovalStateMachine, Post, PostStatus, PostStore, Provenance,
    TransitionOutcome,
};

fn new_post() -> Post {
    Post::new(
        "We shipped the thing",
        "twitter",
        Provenance {
            provider: "test".into(),
            model: "test-1".into(),
            prompt: "announce".into(),
            raw_output: serde_json::json!({}),
        },
        chrono::Utc::now(),
    )
}

async fn publish_jobs(queue: &JobQueue) -> usize {
    let mut count = 0;
    while let Some(job) = queue.dequeue_next().await.unwrap() {
        if job.job_type == PUBLISH_CONTENT {
            count += 1;
        }
    }
    count
}

// ============================================================================
// Races
// ============================================================================

async fn race(approvals: ApprovalStateMachine, post: &Post) -> (usize, usize, usize) {
    let mut tasks = Vec::new();
    for i in 0..20 {
        let approvals = approvals.clone();
        let id = post.id;
        tasks.push(tokio::spawn(async move {
            let actor = format!("user-{}", i);
            if i % 2 == 0 {
                approvals.approve(id, &actor).await
            } else {
                approvals.reject(id, &actor).await
            }
        }));
    }

    let (mut approved, mut rejected, mut refused) = (0, 0, 0);
    for task in tasks {
        match task.await.unwrap().unwrap().outcome {
            ApprovalOutcome::Approved => approved += 1,
            ApprovalOutcome::Rejected => rejected += 1,
            ApprovalOutcome::AlreadyActioned => refused += 1,
            ApprovalOutcome::NotFound => panic!("post vanished"),
        }
    }
    (approved, rejected, refused)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_decisions_single_winner() {
    let h = Harness::new();
    let post = new_post();
    h.services.posts.insert(&post).await.unwrap();

    let (approved, rejected, refused) = race(h.services.approvals.clone(), &post).await;
    assert_eq!(approved + rejected, 1);
    assert_eq!(refused, 19);

    let stored = h.services.posts.get(post.id).await.unwrap().unwrap();
    let expected_jobs = if approved == 1 {
        assert_eq!(stored.status, PostStatus::Approved);
        assert!(stored.approved_by.is_some() && stored.rejected_by.is_none());
        1
    } else {
        assert_eq!(stored.status, PostStatus::Rejected);
        assert!(stored.rejected_by.is_some() && stored.approved_by.is_none());
        0
    };
    assert_eq!(publish_jobs(&h.services.queue).await, expected_jobs);
}

#[tokio::test]
async fn test_second_decision_reports_first() {
    let h = Harness::new();
    let post = new_post();
    h.services.posts.insert(&post).await.unwrap();

    let first = h.services.approvals.reject(post.id, "bob").await.unwrap();
    assert_eq!(first.outcome, ApprovalOutcome::Rejected);

    let second = h.services.approvals.approve(post.id, "alice").await.unwrap();
    assert_eq!(second.outcome, ApprovalOutcome::AlreadyActioned);
    assert_eq!(second.status, Some(PostStatus::Rejected));
    assert_eq!(second.message, "This post was already rejected");

    let err = second.into_result(post.id).unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyActioned);
    assert_eq!(err.http_status(), axum::http::StatusCode::CONFLICT);

    let stored = h.services.posts.get(post.id).await.unwrap().unwrap();
    assert!(stored.approved_by.is_none());
    assert_eq!(publish_jobs(&h.services.queue).await, 0);
}

#[tokio::test]
async fn test_unknown_post() {
    let h = Harness::new();
    let id = herald_core::posts::PostId::new();

    let result = h.services.approvals.approve(id, "alice").await.unwrap();
    assert_eq!(result.outcome, ApprovalOutcome::NotFound);
    assert_eq!(
        result.into_result(id).unwrap_err().code(),
        ErrorCode::PostNotFound
    );
}

// ============================================================================
// Job-driven transitions
// ============================================================================

#[tokio::test]
async fn test_publish_failure_only_from_approved() {
    let h = Harness::new();
    let post = new_post();
    h.services.posts.insert(&post).await.unwrap();

    let outcome = h.services.approvals.mark_publish_failed(post.id).await.unwrap();
    assert_eq!(outcome, TransitionOutcome::Conflict(PostStatus::Pending));

    h.services.approvals.approve(post.id, "alice").await.unwrap();
    assert!(matches!(
        h.services.approvals.mark_publish_failed(post.id).await.unwrap(),
        TransitionOutcome::Applied(_)
    ));

    let TransitionOutcome::Applied(posted) =
        h.services.approvals.mark_posted(post.id, "tweet-9").await.unwrap()
    else {
        panic!("expected posted");
    };
    assert_eq!(posted.status, PostStatus::Posted);
    assert_eq!(posted.external_ref.as_deref(), Some("tweet-9"));

    // Posted is terminal.
    assert_eq!(
        h.services.approvals.mark_posted(post.id, "tweet-10").await.unwrap(),
        TransitionOutcome::Conflict(PostStatus::Posted)
    );
}

#[tokio::test]
async fn test_delivery_failure_then_recovery() {
    let h = Harness::new();
    let post = new_post();
    h.services.posts.insert(&post).await.unwrap();

    h.services.approvals.mark_approval_send_failed(post.id).await.unwrap();
    let result = h.services.approvals.approve(post.id, "alice").await.unwrap();
    assert_eq!(result.outcome, ApprovalOutcome::AlreadyActioned);
    assert_eq!(
        result.message,
        "The approval request for this post could not be delivered"
    );

    h.services
        .approvals
        .record_delivery(post.id, serde_json::json!({"ts": "1"}))
        .await
        .unwrap();
    let result = h.services.approvals.approve(post.id, "alice").await.unwrap();
    assert_eq!(result.outcome, ApprovalOutcome::Approved);
}

// ============================================================================
// PostgreSQL
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_postgres_single_winner() {
    let Ok(url) = std::env::var("HERALD_TEST_DATABASE_URL") else {
        return;
    };
    let pool = sqlx::PgPool::connect(&url).await.unwrap();
    let db = Database::from_pool(pool);
    db.migrate().await.unwrap();

    let store: Arc<dyn PostStore> = Arc::new(db.post_store());
    let queue = JobQueue::new(
        Arc::new(InMemoryQueueBackend::new()),
        Arc::new(SystemClock),
        RetryPolicy::default(),
    );
    let approvals = ApprovalStateMachine::new(Arc::clone(&store), queue.clone(), Arc::new(SystemClock));

    let post = new_post();
    store.insert(&post).await.unwrap();

    let (approved, rejected, refused) = race(approvals, &post).await;
    assert_eq!(approved + rejected, 1);
    assert_eq!(refused, 19);

    let stored = store.get(post.id).await.unwrap().unwrap();
    assert_eq!(stored.provenance.prompt, "announce");
    assert_ne!(stored.status, PostStatus::Pending);

    let stats = queue.stats_by_status().await.unwrap();
    assert_eq!(stats.get(JobStatus::Pending), approved as u64);
}
