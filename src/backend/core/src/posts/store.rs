//! Content records and their storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{HeraldError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Identity and status
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(pub Uuid);

impl PostId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PostId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for PostId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for PostId {
    type Err = HeraldError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| HeraldError::validation(format!("Invalid post id: {}", s)))
    }
}

/// Approval lifecycle of a post.
///
/// ```text
/// pending ──approve──▶ approved ──publish ok──▶ posted
///    │                    └──publish dead──▶ failed_post
///    ├──reject──▶ rejected
///    └──delivery dead──▶ failed_approval_send
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Pending,
    Approved,
    Rejected,
    Posted,
    FailedPost,
    FailedApprovalSend,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Posted => "posted",
            Self::FailedPost => "failed_post",
            Self::FailedApprovalSend => "failed_approval_send",
        }
    }

    /// Statuses only reachable through an approval.
    pub fn is_approval_class(&self) -> bool {
        matches!(self, Self::Approved | Self::Posted | Self::FailedPost)
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = HeraldError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "posted" => Ok(Self::Posted),
            "failed_post" => Ok(Self::FailedPost),
            "failed_approval_send" => Ok(Self::FailedApprovalSend),
            other => Err(HeraldError::internal(format!(
                "Unknown post status in storage: {}",
                other
            ))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Post
// ═══════════════════════════════════════════════════════════════════════════════

/// Where the post's text came from. Written once at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub raw_output: serde_json::Value,
}

/// A generated post awaiting, or past, human approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub message: String,
    pub platform: String,
    pub status: PostStatus,
    /// Platform identifier once published
    pub external_ref: Option<String>,
    pub approved_by: Option<String>,
    pub rejected_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    /// What the approval notifier returned
    pub delivery_metadata: Option<serde_json::Value>,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub fn new(
        message: impl Into<String>,
        platform: impl Into<String>,
        provenance: Provenance,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PostId::new(),
            message: message.into(),
            platform: platform.into(),
            status: PostStatus::Pending,
            external_ref: None,
            approved_by: None,
            rejected_by: None,
            approved_at: None,
            delivery_metadata: None,
            provenance,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a decision to a pending post.
    pub(crate) fn apply_decision(&mut self, decision: Decision, actor: &str, at: DateTime<Utc>) {
        match decision {
            Decision::Approve => {
                self.status = PostStatus::Approved;
                self.approved_by = Some(actor.to_string());
                self.approved_at = Some(at);
            }
            Decision::Reject => {
                self.status = PostStatus::Rejected;
                self.rejected_by = Some(actor.to_string());
            }
        }
        self.updated_at = at;
    }

    pub(crate) fn apply_transition(&mut self, change: &PostTransition, at: DateTime<Utc>) {
        self.status = change.to;
        if let Some(external_ref) = &change.external_ref {
            self.external_ref = Some(external_ref.clone());
        }
        if let Some(metadata) = &change.delivery_metadata {
            self.delivery_metadata = Some(metadata.clone());
        }
        self.updated_at = at;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store operations
// ═══════════════════════════════════════════════════════════════════════════════

/// A human decision on a pending post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// Result of [`PostStore::decide`].
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionOutcome {
    NotFound,
    /// The post had left `pending`; nothing was written
    AlreadyActioned(PostStatus),
    Applied(Post),
}

/// A status change driven by a job outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct PostTransition {
    pub to: PostStatus,
    pub external_ref: Option<String>,
    pub delivery_metadata: Option<serde_json::Value>,
}

impl PostTransition {
    pub fn to(status: PostStatus) -> Self {
        Self {
            to: status,
            external_ref: None,
            delivery_metadata: None,
        }
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }

    pub fn with_delivery_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.delivery_metadata = Some(metadata);
        self
    }
}

/// Result of [`PostStore::transition`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    NotFound,
    /// The post was not in any of the allowed source statuses
    Conflict(PostStatus),
    Applied(Post),
}

/// Storage for posts.
///
/// `decide` and `transition` are each one atomic read-check-write: the status
/// guard and the update can never interleave with another writer.
#[async_trait]
pub trait PostStore: Send + Sync {
    async fn insert(&self, post: &Post) -> Result<()>;

    async fn get(&self, id: PostId) -> Result<Option<Post>>;

    /// Approve or reject, only if the post is exactly `pending`.
    async fn decide(
        &self,
        id: PostId,
        decision: Decision,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<DecisionOutcome>;

    /// Move a post whose status is in `allowed_from`.
    async fn transition(
        &self,
        id: PostId,
        allowed_from: &[PostStatus],
        change: PostTransition,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome>;

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory store
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory post store for tests and ephemeral runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPostStore {
    posts: Arc<RwLock<HashMap<PostId, Post>>>,
}

impl InMemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PostStore for InMemoryPostStore {
    async fn insert(&self, post: &Post) -> Result<()> {
        let mut posts = self.posts.write().await;
        if posts.contains_key(&post.id) {
            return Err(HeraldError::new(
                crate::error::ErrorCode::DuplicateRecord,
                format!("Post already exists: {}", post.id),
            ));
        }
        posts.insert(post.id, post.clone());
        Ok(())
    }

    async fn get(&self, id: PostId) -> Result<Option<Post>> {
        Ok(self.posts.read().await.get(&id).cloned())
    }

    async fn decide(
        &self,
        id: PostId,
        decision: Decision,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<DecisionOutcome> {
        let mut posts = self.posts.write().await;
        let Some(post) = posts.get_mut(&id) else {
            return Ok(DecisionOutcome::NotFound);
        };
        if post.status != PostStatus::Pending {
            return Ok(DecisionOutcome::AlreadyActioned(post.status));
        }
        post.apply_decision(decision, actor, at);
        Ok(DecisionOutcome::Applied(post.clone()))
    }

    async fn transition(
        &self,
        id: PostId,
        allowed_from: &[PostStatus],
        change: PostTransition,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let mut posts = self.posts.write().await;
        let Some(post) = posts.get_mut(&id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        if !allowed_from.contains(&post.status) {
            return Ok(TransitionOutcome::Conflict(post.status));
        }
        post.apply_transition(&change, at);
        Ok(TransitionOutcome::Applied(post.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_post() -> Post {
        Post::new(
            "Launch day!",
            "twitter",
            Provenance {
                provider: "test".into(),
                model: "m".into(),
                prompt: "write".into(),
                raw_output: serde_json::json!({}),
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_decide_only_from_pending() {
        let store = InMemoryPostStore::new();
        let post = sample_post();
        store.insert(&post).await.unwrap();

        let outcome = store
            .decide(post.id, Decision::Approve, "alice", Utc::now())
            .await
            .unwrap();
        let DecisionOutcome::Applied(updated) = outcome else {
            panic!("expected applied");
        };
        assert_eq!(updated.status, PostStatus::Approved);
        assert_eq!(updated.approved_by.as_deref(), Some("alice"));

        let second = store
            .decide(post.id, Decision::Reject, "bob", Utc::now())
            .await
            .unwrap();
        assert_eq!(second, DecisionOutcome::AlreadyActioned(PostStatus::Approved));
        assert!(store.get(post.id).await.unwrap().unwrap().rejected_by.is_none());
    }

    #[tokio::test]
    async fn test_transition_guard() {
        let store = InMemoryPostStore::new();
        let post = sample_post();
        store.insert(&post).await.unwrap();

        let outcome = store
            .transition(
                post.id,
                &[PostStatus::Approved],
                PostTransition::to(PostStatus::Posted).with_external_ref("123"),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::Conflict(PostStatus::Pending));

        let missing = store
            .transition(
                PostId::new(),
                &[PostStatus::Pending],
                PostTransition::to(PostStatus::FailedApprovalSend),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(missing, TransitionOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = InMemoryPostStore::new();
        let post = sample_post();
        store.insert(&post).await.unwrap();
        assert!(store.insert(&post).await.is_err());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(PostStatus::FailedApprovalSend.as_str(), "failed_approval_send");
        assert_eq!(
            "failed_post".parse::<PostStatus>().unwrap(),
            PostStatus::FailedPost
        );
        assert!(PostStatus::Posted.is_approval_class());
        assert!(!PostStatus::Rejected.is_approval_class());
    }
}
