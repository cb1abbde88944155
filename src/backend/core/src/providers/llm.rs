//! OpenAI-compatible chat completions generator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{error_body, http_client, ContentGenerator, Generation};
use crate::config::GeneratorConfig;
use crate::error::{HeraldError, Result};

const PROVIDER: &str = "openai";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Generator backed by `POST {base_url}/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiGenerator {
    client: reqwest::Client,
    config: GeneratorConfig,
}

impl OpenAiGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout)?,
            config,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<Generation> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| HeraldError::generation_unavailable("generator api_key is not configured"))?;

        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &self.config.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| HeraldError::generation_unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            tracing::warn!(provider = PROVIDER, status = status.as_u16(), body = %body, "Generator returned an error");
            return Err(HeraldError::generation_unavailable(format!(
                "{} returned {}: {}",
                PROVIDER, status, body
            )));
        }

        let raw_output: serde_json::Value = response
            .json()
            .await
            .map_err(|e| HeraldError::generation_unavailable(e.to_string()))?;
        let parsed: ChatResponse = serde_json::from_value(raw_output.clone())
            .map_err(|e| HeraldError::generation_unavailable(format!("unexpected response shape: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| HeraldError::generation_unavailable("response contained no content"))?;

        Ok(Generation {
            content,
            provider: PROVIDER.to_string(),
            model: parsed.model.unwrap_or_else(|| self.config.model.clone()),
            raw_output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, GENERATION_UNAVAILABLE_MESSAGE};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String) -> GeneratorConfig {
        GeneratorConfig {
            base_url,
            api_key: Some("sk-test".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_generate_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-4o-mini-2024",
                "choices": [{"message": {"role": "assistant", "content": "  Ship it!  "}}]
            })))
            .mount(&server)
            .await;

        let generator = OpenAiGenerator::new(config(server.uri())).unwrap();
        let generation = generator.generate("announce the release").await.unwrap();

        assert_eq!(generation.content, "Ship it!");
        assert_eq!(generation.provider, "openai");
        assert_eq!(generation.model, "gpt-4o-mini-2024");
        assert!(generation.raw_output["choices"].is_array());
    }

    #[tokio::test]
    async fn test_provider_error_is_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model overloaded"))
            .mount(&server)
            .await;

        let generator = OpenAiGenerator::new(config(server.uri())).unwrap();
        let err = generator.generate("x").await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::GenerationUnavailable);
        assert_eq!(err.user_message(), GENERATION_UNAVAILABLE_MESSAGE);
        assert!(err.internal_message().unwrap().contains("overloaded"));
    }

    #[tokio::test]
    async fn test_empty_content_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"choices": [{"message": {"content": ""}}]})),
            )
            .mount(&server)
            .await;

        let generator = OpenAiGenerator::new(config(server.uri())).unwrap();
        assert!(generator.generate("x").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let generator = OpenAiGenerator::new(GeneratorConfig::default()).unwrap();
        let err = generator.generate("x").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::GenerationUnavailable);
    }
}
