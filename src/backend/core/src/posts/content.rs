//! Generation flow: prompt in, pending post plus approval job out.

use std::sync::Arc;

use super::store::{Post, PostStore, Provenance};
use crate::breaker::CircuitBreaker;
use crate::clock::SharedClock;
use crate::error::{HeraldError, Result};
use crate::jobs::{EnqueueOptions, JobPayload, JobQueue};
use crate::providers::ContentGenerator;

/// Longest prompt accepted, in characters.
pub const MAX_PROMPT_CHARS: usize = 4000;

#[derive(Clone)]
pub struct ContentService {
    generator: Arc<dyn ContentGenerator>,
    breaker: Arc<CircuitBreaker>,
    store: Arc<dyn PostStore>,
    queue: JobQueue,
    clock: SharedClock,
    default_platform: String,
}

impl std::fmt::Debug for ContentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentService")
            .field("breaker", &self.breaker.name())
            .field("default_platform", &self.default_platform)
            .finish_non_exhaustive()
    }
}

impl ContentService {
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        breaker: Arc<CircuitBreaker>,
        store: Arc<dyn PostStore>,
        queue: JobQueue,
        clock: SharedClock,
        default_platform: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            breaker,
            store,
            queue,
            clock,
            default_platform: default_platform.into(),
        }
    }

    /// Generate a post and queue its approval request.
    ///
    /// Any generator failure, including an open circuit, surfaces as
    /// `GenerationUnavailable` with the same user-facing message.
    pub async fn generate(&self, prompt: &str, platform: Option<&str>) -> Result<Post> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(HeraldError::validation("prompt must not be empty"));
        }
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(HeraldError::validation(format!(
                "prompt must be at most {} characters",
                MAX_PROMPT_CHARS
            )));
        }
        let platform = platform
            .map(str::trim)
            .unwrap_or(self.default_platform.as_str());
        if platform.is_empty() {
            return Err(HeraldError::validation("platform must not be empty"));
        }

        let generator = Arc::clone(&self.generator);
        let generation = self
            .breaker
            .execute(|| async move { generator.generate(prompt).await })
            .await
            .map_err(|e| {
                let detail = e.to_string();
                tracing::warn!(breaker = %self.breaker.name(), error = %detail, "Generation failed");
                HeraldError::generation_unavailable(detail)
            })?;

        let post = Post::new(
            generation.content,
            platform,
            Provenance {
                provider: generation.provider,
                model: generation.model,
                prompt: prompt.to_string(),
                raw_output: generation.raw_output,
            },
            self.clock.now(),
        );
        self.store.insert(&post).await?;

        let payload = JobPayload::send_approval_request(post.id, post.message.clone(), platform);
        let job_id = self.queue.enqueue(&payload, EnqueueOptions::default()).await?;

        tracing::info!(
            post_id = %post.id,
            job_id = %job_id,
            platform = %platform,
            model = %post.provenance.model,
            "Post generated, approval requested"
        );
        Ok(post)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::clock::SystemClock;
    use crate::error::{ErrorCode, GENERATION_UNAVAILABLE_MESSAGE};
    use crate::jobs::{JobStatus, SEND_APPROVAL_REQUEST};
    use crate::posts::{InMemoryPostStore, PostStatus};
    use crate::providers::Generation;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl ContentGenerator for Echo {
        async fn generate(&self, prompt: &str) -> Result<Generation> {
            Ok(Generation {
                content: format!("post about {}", prompt),
                provider: "echo".into(),
                model: "echo-1".into(),
                raw_output: serde_json::json!({"prompt": prompt}),
            })
        }
    }

    struct Broken;

    #[async_trait]
    impl ContentGenerator for Broken {
        async fn generate(&self, _prompt: &str) -> Result<Generation> {
            Err(HeraldError::internal("socket closed"))
        }
    }

    fn service(generator: Arc<dyn ContentGenerator>) -> (ContentService, JobQueue) {
        let queue = JobQueue::in_memory();
        let service = ContentService::new(
            generator,
            Arc::new(CircuitBreaker::new(BreakerConfig::new("generator").with_failure_threshold(1))),
            Arc::new(InMemoryPostStore::new()),
            queue.clone(),
            Arc::new(SystemClock),
            "twitter",
        );
        (service, queue)
    }

    #[tokio::test]
    async fn test_generate_creates_pending_post_and_job() {
        let (service, queue) = service(Arc::new(Echo));
        let post = service.generate("rust 2.0", None).await.unwrap();

        assert_eq!(post.status, PostStatus::Pending);
        assert_eq!(post.platform, "twitter");
        assert_eq!(post.provenance.prompt, "rust 2.0");

        let job = queue.dequeue_next().await.unwrap().unwrap();
        assert_eq!(job.job_type, SEND_APPROVAL_REQUEST);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.decode_payload().unwrap().post_id(), post.id);
    }

    #[tokio::test]
    async fn test_validation() {
        let (service, _) = service(Arc::new(Echo));

        let err = service.generate("   ", None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);

        let long = "a".repeat(MAX_PROMPT_CHARS + 1);
        assert!(service.generate(&long, None).await.is_err());

        let err = service.generate("ok", Some(" ")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_failures_and_open_circuit_share_message() {
        let (service, queue) = service(Arc::new(Broken));

        let first = service.generate("x", None).await.unwrap_err();
        assert_eq!(first.user_message(), GENERATION_UNAVAILABLE_MESSAGE);

        // Breaker is open now.
        let second = service.generate("x", None).await.unwrap_err();
        assert_eq!(second.code(), ErrorCode::GenerationUnavailable);
        assert_eq!(second.user_message(), GENERATION_UNAVAILABLE_MESSAGE);

        assert_eq!(queue.stats_by_status().await.unwrap().total(), 0);
    }
}
