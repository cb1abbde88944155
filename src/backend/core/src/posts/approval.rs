//! Approval state machine.
//!
//! A post is decided exactly once. The guard lives in the store's atomic
//! `decide`, so two racing approvers (or a duplicate webhook) produce one
//! decision and one `AlreadyActioned`.

use serde::Serialize;
use std::sync::Arc;

use super::store::{
    Decision, DecisionOutcome, Post, PostId, PostStatus, PostStore, PostTransition,
    TransitionOutcome,
};
use crate::clock::SharedClock;
use crate::error::{HeraldError, Result};
use crate::jobs::{EnqueueOptions, JobId, JobPayload, JobQueue};

/// Outcome of an approve or reject call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    NotFound,
    AlreadyActioned,
    Approved,
    Rejected,
}

/// Result of an approve or reject call.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionResult {
    pub outcome: ApprovalOutcome,
    /// The post's status after the call, if it exists
    pub status: Option<PostStatus>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_job_id: Option<JobId>,
    #[serde(skip)]
    pub post: Option<Post>,
}

impl DecisionResult {
    fn not_found(id: PostId) -> Self {
        Self {
            outcome: ApprovalOutcome::NotFound,
            status: None,
            message: format!("Post {} not found", id),
            publish_job_id: None,
            post: None,
        }
    }

    fn already_actioned(status: PostStatus) -> Self {
        Self {
            outcome: ApprovalOutcome::AlreadyActioned,
            status: Some(status),
            message: already_actioned_message(status).to_string(),
            publish_job_id: None,
            post: None,
        }
    }

    /// Convert a non-applied outcome into an API error.
    pub fn into_result(self, id: PostId) -> Result<Self> {
        match self.outcome {
            ApprovalOutcome::NotFound => Err(HeraldError::not_found("Post", id.to_string())),
            ApprovalOutcome::AlreadyActioned => {
                Err(HeraldError::already_actioned(id.to_string(), self.message))
            }
            ApprovalOutcome::Approved | ApprovalOutcome::Rejected => Ok(self),
        }
    }
}

fn already_actioned_message(status: PostStatus) -> &'static str {
    match status {
        s if s.is_approval_class() => "This post was already approved",
        PostStatus::Rejected => "This post was already rejected",
        PostStatus::FailedApprovalSend => {
            "The approval request for this post could not be delivered"
        }
        _ => "This post has already been actioned",
    }
}

/// Applies decisions and job outcomes to posts.
#[derive(Clone)]
pub struct ApprovalStateMachine {
    store: Arc<dyn PostStore>,
    queue: JobQueue,
    clock: SharedClock,
}

impl std::fmt::Debug for ApprovalStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalStateMachine").finish_non_exhaustive()
    }
}

impl ApprovalStateMachine {
    pub fn new(store: Arc<dyn PostStore>, queue: JobQueue, clock: SharedClock) -> Self {
        Self {
            store,
            queue,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn PostStore> {
        &self.store
    }

    /// Approve a pending post and enqueue its publish job.
    ///
    /// The publish job is enqueued after the decision commits. If that
    /// enqueue fails the approval stands and the error is returned.
    pub async fn approve(&self, id: PostId, actor: &str) -> Result<DecisionResult> {
        let actor = validate_actor(actor)?;

        match self
            .store
            .decide(id, Decision::Approve, actor, self.clock.now())
            .await?
        {
            DecisionOutcome::NotFound => Ok(DecisionResult::not_found(id)),
            DecisionOutcome::AlreadyActioned(status) => {
                tracing::info!(post_id = %id, actor = %actor, status = %status, "Approval ignored, already actioned");
                Ok(DecisionResult::already_actioned(status))
            }
            DecisionOutcome::Applied(post) => {
                tracing::info!(post_id = %id, actor = %actor, "Post approved");

                let payload = JobPayload::publish_content(post.id, post.message.clone());
                let job_id = self
                    .queue
                    .enqueue(&payload, EnqueueOptions::default())
                    .await
                    .map_err(|e| {
                        tracing::error!(post_id = %id, error = %e, "Approved post could not be queued for publishing");
                        e
                    })?;

                Ok(DecisionResult {
                    outcome: ApprovalOutcome::Approved,
                    status: Some(post.status),
                    message: format!("Approved by {}", actor),
                    publish_job_id: Some(job_id),
                    post: Some(post),
                })
            }
        }
    }

    /// Reject a pending post.
    pub async fn reject(&self, id: PostId, actor: &str) -> Result<DecisionResult> {
        let actor = validate_actor(actor)?;

        match self
            .store
            .decide(id, Decision::Reject, actor, self.clock.now())
            .await?
        {
            DecisionOutcome::NotFound => Ok(DecisionResult::not_found(id)),
            DecisionOutcome::AlreadyActioned(status) => {
                tracing::info!(post_id = %id, actor = %actor, status = %status, "Rejection ignored, already actioned");
                Ok(DecisionResult::already_actioned(status))
            }
            DecisionOutcome::Applied(post) => {
                tracing::info!(post_id = %id, actor = %actor, "Post rejected");
                Ok(DecisionResult {
                    outcome: ApprovalOutcome::Rejected,
                    status: Some(post.status),
                    message: format!("Rejected by {}", actor),
                    publish_job_id: None,
                    post: Some(post),
                })
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Job outcomes
    // ─────────────────────────────────────────────────────────────────────────

    /// Record that the approval request reached its channel.
    ///
    /// A successful replay of a dead delivery job also moves
    /// `failed_approval_send` back to `pending`.
    pub async fn record_delivery(
        &self,
        id: PostId,
        metadata: serde_json::Value,
    ) -> Result<TransitionOutcome> {
        self.apply(
            id,
            &[PostStatus::Pending, PostStatus::FailedApprovalSend],
            PostTransition::to(PostStatus::Pending).with_delivery_metadata(metadata),
        )
        .await
    }

    /// The approval request could not be delivered after every retry.
    pub async fn mark_approval_send_failed(&self, id: PostId) -> Result<TransitionOutcome> {
        self.apply(
            id,
            &[PostStatus::Pending],
            PostTransition::to(PostStatus::FailedApprovalSend),
        )
        .await
    }

    /// The platform accepted the post.
    pub async fn mark_posted(&self, id: PostId, external_ref: &str) -> Result<TransitionOutcome> {
        self.apply(
            id,
            &[PostStatus::Approved, PostStatus::FailedPost],
            PostTransition::to(PostStatus::Posted).with_external_ref(external_ref),
        )
        .await
    }

    /// Publishing failed after every retry.
    pub async fn mark_publish_failed(&self, id: PostId) -> Result<TransitionOutcome> {
        self.apply(
            id,
            &[PostStatus::Approved],
            PostTransition::to(PostStatus::FailedPost),
        )
        .await
    }

    async fn apply(
        &self,
        id: PostId,
        allowed_from: &[PostStatus],
        change: PostTransition,
    ) -> Result<TransitionOutcome> {
        let to = change.to;
        let outcome = self
            .store
            .transition(id, allowed_from, change, self.clock.now())
            .await?;

        match &outcome {
            TransitionOutcome::Applied(_) => {
                tracing::info!(post_id = %id, to = %to, "Post status updated")
            }
            TransitionOutcome::Conflict(current) => tracing::warn!(
                post_id = %id,
                current = %current,
                to = %to,
                "Post status update skipped"
            ),
            TransitionOutcome::NotFound => {
                tracing::warn!(post_id = %id, to = %to, "Post status update for missing post")
            }
        }
        Ok(outcome)
    }
}

fn validate_actor(actor: &str) -> Result<&str> {
    let actor = actor.trim();
    if actor.is_empty() {
        return Err(HeraldError::validation("actor must not be empty"));
    }
    if actor.len() > 200 {
        return Err(HeraldError::validation("actor must be at most 200 characters"));
    }
    Ok(actor)
}
