//! External collaborators.
//!
//! The core only sees three narrow traits. Each reqwest implementation turns
//! transport and provider failures into a [`HeraldError`](crate::error::HeraldError)
//! before returning.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::posts::PostId;

pub mod llm;
pub mod slack;
pub mod twitter;

pub use llm::OpenAiGenerator;
pub use slack::SlackNotifier;
pub use twitter::TwitterPublisher;

/// Text produced by a generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub content: String,
    pub provider: String,
    pub model: String,
    /// The provider's response body, kept for provenance
    pub raw_output: serde_json::Value,
}

/// Proof an approval request was delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub metadata: serde_json::Value,
}

/// Proof a post went live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub external_ref: String,
}

/// Writes post text from a prompt.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Generation>;
}

/// Delivers an approval request to a human.
#[async_trait]
pub trait ApprovalNotifier: Send + Sync {
    async fn send(&self, post_id: PostId, content: &str, platform: &str) -> Result<Delivery>;
}

/// Publishes approved text to the platform.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, content: &str) -> Result<Publication>;
}

/// Build a reqwest client with the provider's timeout.
pub(crate) fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("herald/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Read an error body for logging, with secrets scrubbed and length capped.
pub(crate) async fn error_body(response: reqwest::Response) -> String {
    const MAX_LEN: usize = 500;
    let text = response.text().await.unwrap_or_default();
    let mut redacted = crate::telemetry::redact(&text);
    if redacted.len() > MAX_LEN {
        let mut cut = MAX_LEN;
        while !redacted.is_char_boundary(cut) {
            cut -= 1;
        }
        redacted.truncate(cut);
    }
    redacted
}
