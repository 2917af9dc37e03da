//! Request/response chat path used while the channel is down.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{
    config::ClientConfig,
    error::{Result, SimError},
    protocol::ChatRequest,
};

const STREAMING_STATUS: &str = "streaming";

/// Body returned by the chat endpoint.
///
/// `status == "streaming"` means the reply will arrive over the channel; otherwise the reply
/// text is in `content` or `response`, or the failure in `error`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FallbackResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl FallbackResponse {
    pub fn is_streaming(&self) -> bool {
        self.status.as_deref() == Some(STREAMING_STATUS)
    }

    /// The reply text, if the response carries one.
    pub fn text(&self) -> Option<&str> {
        [self.content.as_deref(), self.response.as_deref()]
            .into_iter()
            .flatten()
            .find(|text| !text.is_empty())
    }
}

/// A single-shot chat backend.
#[async_trait]
pub trait ChatFallback: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<FallbackResponse>;
}

/// [`ChatFallback`] that POSTs the request as JSON.
#[derive(Debug, Clone)]
pub struct HttpChatFallback {
    client: reqwest::Client,
    url: String,
}

impl HttpChatFallback {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.fallback_url.clone())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ChatFallback for HttpChatFallback {
    async fn send(&self, request: &ChatRequest) -> Result<FallbackResponse> {
        debug!(session_id = %request.session_id, url = %self.url, "chat fallback request");

        let response = self.client.post(&self.url).json(request).send().await.map_err(|e| {
            error!(session_id = %request.session_id, error = %e, "chat fallback request failed");
            SimError::Http(e)
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            // Error bodies usually still carry the `error` field.
            let detail = serde_json::from_str::<FallbackResponse>(&body)
                .ok()
                .and_then(|parsed| parsed.error)
                .unwrap_or(body);
            error!(session_id = %request.session_id, %status, "chat fallback error");
            return Err(SimError::Fallback(format!("server returned {status}: {detail}")));
        }

        Ok(response.json::<FallbackResponse>().await?)
    }
}
