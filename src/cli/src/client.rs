//! HTTP client for the Herald API.

use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Envelope returned by every Herald endpoint except `/health` and `/metrics`.
#[derive(Debug, serde::Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub error_code: Option<String>,
}

/// An error reported by the server in its envelope.
#[derive(Debug, thiserror::Error)]
#[error("{message} ({}, HTTP {})", .code.as_deref().unwrap_or("no code"), .status.as_u16())]
pub struct ApiError {
    pub status: reqwest::StatusCode,
    pub message: String,
    pub code: Option<String>,
}

pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.request(Method::GET, path), path).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send(self.request(Method::POST, path).json(body), path)
            .await
    }

    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.request(Method::POST, path), path).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.request(Method::DELETE, path), path).await
    }

    /// GET a bare JSON document. `/health` answers 503 with a body when a
    /// store is down, so non-2xx responses are returned rather than raised.
    pub async fn get_raw(&self, path: &str) -> Result<(reqwest::StatusCode, serde_json::Value)> {
        let url = self.url(path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        let status = resp.status();
        let body = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))?;
        Ok((status, body))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path))
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder, path: &str) -> Result<T> {
        let url = self.url(path);
        let resp = builder
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        let envelope: ApiResponse<T> = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => anyhow::bail!("API error ({}): {}", status, text),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to parse response from {}", url))
            }
        };

        if envelope.success && status.is_success() {
            envelope
                .data
                .ok_or_else(|| anyhow::anyhow!("API returned success but no data"))
        } else {
            Err(ApiError {
                status,
                message: envelope.error.unwrap_or_else(|| "Unknown error".into()),
                code: envelope.error_code,
            }
            .into())
        }
    }
}
