//! Postgres post store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ErrorCode, HeraldError, Result};
use crate::posts::{
    Decision, DecisionOutcome, Post, PostId, PostStatus, PostStore, PostTransition, Provenance,
    TransitionOutcome,
};

const POST_COLUMNS: &str = "id, message, platform, status, external_ref, approved_by, rejected_by, \
                            approved_at, delivery_metadata, provider, model, prompt, raw_output, \
                            created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct PostRow {
    id: Uuid,
    message: String,
    platform: String,
    status: String,
    external_ref: Option<String>,
    approved_by: Option<String>,
    rejected_by: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    delivery_metadata: Option<serde_json::Value>,
    provider: String,
    model: String,
    prompt: String,
    raw_output: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PostRow> for Post {
    type Error = HeraldError;

    fn try_from(row: PostRow) -> Result<Self> {
        Ok(Post {
            id: PostId(row.id),
            message: row.message,
            platform: row.platform,
            status: row.status.parse()?,
            external_ref: row.external_ref,
            approved_by: row.approved_by,
            rejected_by: row.rejected_by,
            approved_at: row.approved_at,
            delivery_metadata: row.delivery_metadata,
            provenance: Provenance {
                provider: row.provider,
                model: row.model,
                prompt: row.prompt,
                raw_output: row.raw_output,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Posts in the `posts` table.
#[derive(Debug, Clone)]
pub struct PgPostStore {
    pool: PgPool,
}

impl PgPostStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn write_post<'e, E>(executor: E, post: &Post) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            UPDATE posts
            SET status = $2, external_ref = $3, approved_by = $4, rejected_by = $5,
                approved_at = $6, delivery_metadata = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(post.id.0)
        .bind(post.status.as_str())
        .bind(&post.external_ref)
        .bind(&post.approved_by)
        .bind(&post.rejected_by)
        .bind(post.approved_at)
        .bind(&post.delivery_metadata)
        .bind(post.updated_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Row-locked read inside `tx`.
    async fn lock_post(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: PostId,
    ) -> Result<Option<Post>> {
        let sql = format!("SELECT {} FROM posts WHERE id = $1 FOR UPDATE", POST_COLUMNS);
        sqlx::query_as::<_, PostRow>(&sql)
            .bind(id.0)
            .fetch_optional(&mut **tx)
            .await?
            .map(Post::try_from)
            .transpose()
    }
}

#[async_trait]
impl PostStore for PgPostStore {
    async fn insert(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts (id, message, platform, status, external_ref, approved_by,
                               rejected_by, approved_at, delivery_metadata, provider, model,
                               prompt, raw_output, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(post.id.0)
        .bind(&post.message)
        .bind(&post.platform)
        .bind(post.status.as_str())
        .bind(&post.external_ref)
        .bind(&post.approved_by)
        .bind(&post.rejected_by)
        .bind(post.approved_at)
        .bind(&post.delivery_metadata)
        .bind(&post.provenance.provider)
        .bind(&post.provenance.model)
        .bind(&post.provenance.prompt)
        .bind(&post.provenance.raw_output)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: PostId) -> Result<Option<Post>> {
        let sql = format!("SELECT {} FROM posts WHERE id = $1", POST_COLUMNS);
        sqlx::query_as::<_, PostRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .map(Post::try_from)
            .transpose()
    }

    async fn decide(
        &self,
        id: PostId,
        decision: Decision,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<DecisionOutcome> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            HeraldError::with_internal(
                ErrorCode::DatabaseTransactionFailed,
                "A database error occurred",
                e.to_string(),
            )
            .with_source(e)
        })?;

        let Some(mut post) = Self::lock_post(&mut tx, id).await? else {
            tx.rollback().await?;
            return Ok(DecisionOutcome::NotFound);
        };
        if post.status != PostStatus::Pending {
            tx.rollback().await?;
            return Ok(DecisionOutcome::AlreadyActioned(post.status));
        }

        post.apply_decision(decision, actor, at);
        Self::write_post(&mut *tx, &post).await?;
        tx.commit().await?;

        Ok(DecisionOutcome::Applied(post))
    }

    async fn transition(
        &self,
        id: PostId,
        allowed_from: &[PostStatus],
        change: PostTransition,
        at: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;

        let Some(mut post) = Self::lock_post(&mut tx, id).await? else {
            tx.rollback().await?;
            return Ok(TransitionOutcome::NotFound);
        };
        if !allowed_from.contains(&post.status) {
            tx.rollback().await?;
            return Ok(TransitionOutcome::Conflict(post.status));
        }

        post.apply_transition(&change, at);
        Self::write_post(&mut *tx, &post).await?;
        tx.commit().await?;

        Ok(TransitionOutcome::Applied(post))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}
