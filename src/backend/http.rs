use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use super::CompletionBackend;
use crate::completion_types::{CompletionRequest, CompletionResponse};
use crate::error::BridgeError;
use crate::text::truncate_for_display;

const MAX_ERROR_BODY_LEN: usize = 300;

/// OpenAI-compatible `POST /v1/chat/completions` endpoint.
pub struct HttpBackend {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(url: String, token: Option<String>, timeout: Duration) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpBackend {
            http,
            url,
            token,
            timeout,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[async_trait]
impl CompletionBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, BridgeError> {
        info!("Forwarding to completion backend: {}", self.url);
        let mut req = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(request);
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                BridgeError::Timeout(self.timeout)
            } else {
                BridgeError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 405 {
                warn!(
                    "Backend returned 405 for {}: the URL should point at the chat completions path (e.g. /v1/chat/completions) with no trailing slash",
                    self.url
                );
            }
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(BridgeError::BackendStatus {
                status: status.as_u16(),
                body: truncate_for_display(&detail, MAX_ERROR_BODY_LEN),
            });
        }

        let text = response.text().await?;
        serde_json::from_str::<CompletionResponse>(&text).map_err(|e| {
            BridgeError::Backend(format!(
                "Failed to parse backend response: {e} (body: {})",
                truncate_for_display(&text, MAX_ERROR_BODY_LEN)
            ))
        })
    }
}
