//! Publishing through the Twitter v2 `POST /2/tweets` endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{error_body, http_client, Publication, Publisher};
use crate::config::PublisherConfig;
use crate::error::{ErrorCode, HeraldError, Result};

#[derive(Debug, Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
}

#[derive(Debug, Clone)]
pub struct TwitterPublisher {
    client: reqwest::Client,
    config: PublisherConfig,
}

impl TwitterPublisher {
    pub fn new(config: PublisherConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout)?,
            config,
        })
    }
}

#[async_trait]
impl Publisher for TwitterPublisher {
    async fn publish(&self, content: &str) -> Result<Publication> {
        let token = self.config.bearer_token.as_deref().ok_or_else(|| {
            HeraldError::new(
                ErrorCode::MissingConfiguration,
                "providers.publisher.bearer_token is not configured",
            )
        })?;

        let url = format!("{}/2/tweets", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "text": content }))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let mut err = HeraldError::new(ErrorCode::RateLimited, "Publishing platform rate limit hit");
            if let Some(secs) = retry_after {
                err = err.with_retry_after(secs);
            }
            return Err(err);
        }
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(HeraldError::with_internal(
                ErrorCode::PublishFailed,
                "Publishing failed",
                format!("platform returned {}: {}", status, body),
            ));
        }

        let tweet: TweetResponse = response.json().await.map_err(|e| {
            HeraldError::with_internal(
                ErrorCode::PublishFailed,
                "Publishing platform returned an unexpected response",
                e.to_string(),
            )
        })?;

        Ok(Publication {
            external_ref: tweet.data.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn publisher(url: String) -> TwitterPublisher {
        TwitterPublisher::new(PublisherConfig {
            base_url: url,
            bearer_token: Some("token-1".into()),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_publish_returns_tweet_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/tweets"))
            .and(header("authorization", "Bearer token-1"))
            .and(body_json(json!({"text": "hello world"})))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"data": {"id": "1789", "text": "hello world"}})),
            )
            .mount(&server)
            .await;

        let publication = publisher(server.uri()).publish("hello world").await.unwrap();
        assert_eq!(publication.external_ref, "1789");
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "90"))
            .mount(&server)
            .await;

        let err = publisher(server.uri()).publish("x").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RateLimited);
        assert_eq!(err.details().retry_after_secs, Some(90));
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = publisher(server.uri()).publish("x").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PublishFailed);
        assert!(err.is_retryable());
    }
}
