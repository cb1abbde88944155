//! Approval requests over a Slack incoming webhook.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::{error_body, http_client, ApprovalNotifier, Delivery};
use crate::config::NotifierConfig;
use crate::error::{ErrorCode, HeraldError, Result};
use crate::posts::PostId;

/// Posts a message with approve/reject links to a webhook.
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    config: NotifierConfig,
}

impl SlackNotifier {
    pub fn new(config: NotifierConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout)?,
            config,
        })
    }

    fn message(&self, post_id: PostId, content: &str, platform: &str) -> serde_json::Value {
        let base = self.config.approval_base_url.trim_end_matches('/');
        let approve = format!("{}/api/v1/posts/{}/approve", base, post_id);
        let reject = format!("{}/api/v1/posts/{}/reject", base, post_id);

        json!({
            "text": format!("New {} post awaiting approval", platform),
            "blocks": [
                {
                    "type": "section",
                    "text": {"type": "mrkdwn", "text": format!("*New {} post awaiting approval*\n>{}", platform, content)}
                },
                {
                    "type": "context",
                    "elements": [{"type": "mrkdwn", "text": format!("post `{}`", post_id)}]
                },
                {
                    "type": "actions",
                    "elements": [
                        {"type": "button", "style": "primary", "text": {"type": "plain_text", "text": "Approve"}, "url": approve, "value": post_id.to_string()},
                        {"type": "button", "style": "danger", "text": {"type": "plain_text", "text": "Reject"}, "url": reject, "value": post_id.to_string()}
                    ]
                }
            ]
        })
    }
}

#[async_trait]
impl ApprovalNotifier for SlackNotifier {
    async fn send(&self, post_id: PostId, content: &str, platform: &str) -> Result<Delivery> {
        let webhook_url = self.config.webhook_url.as_deref().ok_or_else(|| {
            HeraldError::new(
                ErrorCode::MissingConfiguration,
                "providers.notifier.webhook_url is not configured",
            )
        })?;

        let response = self
            .client
            .post(webhook_url)
            .json(&self.message(post_id, content, platform))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(HeraldError::with_internal(
                ErrorCode::ApprovalDeliveryFailed,
                "Approval request could not be delivered",
                format!("webhook returned {}: {}", status, body),
            ));
        }

        Ok(Delivery {
            metadata: json!({
                "channel": "slack",
                "platform": platform,
                "http_status": status.as_u16(),
                "delivered_at": Utc::now(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: String) -> NotifierConfig {
        NotifierConfig {
            webhook_url: Some(format!("{}/hook", url)),
            approval_base_url: "https://herald.example".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_includes_links() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({"text": "New twitter post awaiting approval"})))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new(config(server.uri())).unwrap();
        let post_id = PostId::new();
        let delivery = notifier.send(post_id, "hello", "twitter").await.unwrap();

        assert_eq!(delivery.metadata["channel"], "slack");
        assert_eq!(delivery.metadata["http_status"], 200);

        let body = notifier.message(post_id, "hello", "twitter");
        let approve_url = body["blocks"][2]["elements"][0]["url"].as_str().unwrap();
        assert_eq!(
            approve_url,
            format!("https://herald.example/api/v1/posts/{}/approve", post_id)
        );
    }

    #[tokio::test]
    async fn test_webhook_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no_service"))
            .mount(&server)
            .await;

        let notifier = SlackNotifier::new(config(server.uri())).unwrap();
        let err = notifier.send(PostId::new(), "x", "twitter").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ApprovalDeliveryFailed);
        assert!(err.is_retryable());
    }
}
