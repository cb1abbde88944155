//! Job handlers.
//!
//! Each handler wraps one external call in that dependency's breaker and
//! feeds the result into the approval state machine. Errors from the call
//! are returned unchanged so the dispatcher can reschedule or dead-letter.

use std::sync::Arc;

use super::job::{ApprovalRequestPayload, JobPayload, PublishPayload};
use crate::breaker::CircuitBreaker;
use crate::error::{HeraldError, Result};
use crate::posts::{ApprovalStateMachine, PostStatus, TransitionOutcome};
use crate::providers::{ApprovalNotifier, Publisher};

/// A dependency and the breaker that guards it.
pub struct Guarded<T: ?Sized> {
    pub client: Arc<T>,
    pub breaker: Arc<CircuitBreaker>,
}

impl<T: ?Sized> Clone for Guarded<T> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            breaker: Arc::clone(&self.breaker),
        }
    }
}

impl<T: ?Sized> Guarded<T> {
    pub fn new(client: Arc<T>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { client, breaker }
    }
}

/// Runs every job type.
#[derive(Clone)]
pub struct JobHandlers {
    approvals: ApprovalStateMachine,
    notifier: Guarded<dyn ApprovalNotifier>,
    publisher: Guarded<dyn Publisher>,
}

impl std::fmt::Debug for JobHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandlers")
            .field("notifier_breaker", &self.notifier.breaker.name())
            .field("publisher_breaker", &self.publisher.breaker.name())
            .finish()
    }
}

impl JobHandlers {
    pub fn new(
        approvals: ApprovalStateMachine,
        notifier: Guarded<dyn ApprovalNotifier>,
        publisher: Guarded<dyn Publisher>,
    ) -> Self {
        Self {
            approvals,
            notifier,
            publisher,
        }
    }

    /// Run the handler for `payload`.
    pub async fn run(&self, payload: &JobPayload) -> Result<()> {
        match payload {
            JobPayload::SendApprovalRequest(p) => self.send_approval_request(p).await,
            JobPayload::PublishContent(p) => self.publish_content(p).await,
        }
    }

    /// Called once a job has been dead-lettered.
    pub async fn on_exhausted(&self, payload: &JobPayload) -> Result<()> {
        let outcome = match payload {
            JobPayload::SendApprovalRequest(p) => {
                self.approvals.mark_approval_send_failed(p.post_id).await?
            }
            JobPayload::PublishContent(p) => self.approvals.mark_publish_failed(p.post_id).await?,
        };
        if let TransitionOutcome::Applied(post) = outcome {
            tracing::warn!(post_id = %post.id, status = %post.status, "Post marked failed after retries ran out");
        }
        Ok(())
    }

    async fn send_approval_request(&self, payload: &ApprovalRequestPayload) -> Result<()> {
        let Some(post) = self.approvals.store().get(payload.post_id).await? else {
            tracing::warn!(post_id = %payload.post_id, "Approval request for missing post, dropping");
            return Ok(());
        };
        if !matches!(
            post.status,
            PostStatus::Pending | PostStatus::FailedApprovalSend
        ) {
            tracing::info!(post_id = %post.id, status = %post.status, "Post already decided, approval request not sent");
            return Ok(());
        }

        let client = Arc::clone(&self.notifier.client);
        let delivery = self
            .notifier
            .breaker
            .execute(|| async move {
                client
                    .send(payload.post_id, &payload.message, &payload.platform)
                    .await
            })
            .await
            .map_err(HeraldError::from)?;

        self.approvals
            .record_delivery(payload.post_id, delivery.metadata)
            .await?;
        Ok(())
    }

    async fn publish_content(&self, payload: &PublishPayload) -> Result<()> {
        let Some(post) = self.approvals.store().get(payload.post_id).await? else {
            tracing::warn!(post_id = %payload.post_id, "Publish job for missing post, dropping");
            return Ok(());
        };

        match post.status {
            PostStatus::Approved | PostStatus::FailedPost => {}
            PostStatus::Posted => {
                tracing::info!(
                    post_id = %post.id,
                    external_ref = ?post.external_ref,
                    "Post already published, skipping"
                );
                return Ok(());
            }
            other => {
                tracing::warn!(post_id = %post.id, status = %other, "Post not approved, refusing to publish");
                return Ok(());
            }
        }

        let client = Arc::clone(&self.publisher.client);
        let publication = self
            .publisher
            .breaker
            .execute(|| async move { client.publish(&payload.message).await })
            .await
            .map_err(HeraldError::from)?;

        match self
            .approvals
            .mark_posted(payload.post_id, &publication.external_ref)
            .await?
        {
            TransitionOutcome::Applied(_) => tracing::info!(
                post_id = %payload.post_id,
                external_ref = %publication.external_ref,
                "Post published"
            ),
            other => tracing::warn!(
                post_id = %payload.post_id,
                external_ref = %publication.external_ref,
                outcome = ?other,
                "Published, but post status could not be updated"
            ),
        }
        Ok(())
    }
}
