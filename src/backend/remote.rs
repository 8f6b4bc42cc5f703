//! Remote provider backend speaking the OpenAI chat-completion wire shape.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use super::{BackendResult, CompletionParams, FinishReason, InferenceBackend, TokenUsage};
use crate::types::Message;
use crate::{Error, ErrorContext, Result};

pub struct RemoteProviderBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl RemoteProviderBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| {
                Error::backend_unavailable(
                    format!("failed to build HTTP client: {}", e),
                    false,
                    ErrorContext::new().with_source("remote_backend"),
                )
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn transient(status: u16) -> bool {
        status == 429 || (500..=599).contains(&status)
    }
}

#[async_trait]
impl InferenceBackend for RemoteProviderBackend {
    async fn complete(
        &self,
        messages: &[Message],
        params: &CompletionParams,
    ) -> Result<BackendResult> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "top_p": params.top_p,
        });

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let start = std::time::Instant::now();
        let resp = req.send().await.map_err(|e| {
            Error::backend_unavailable(
                format!("provider unreachable: {}", e),
                true,
                ErrorContext::new()
                    .with_details(url.clone())
                    .with_source("remote_backend"),
            )
        })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::backend_unavailable(
                format!("provider returned HTTP {}: {}", status, text),
                Self::transient(status),
                ErrorContext::new()
                    .with_details(url)
                    .with_source("remote_backend"),
            ));
        }

        let wire: WireResponse = resp.json().await.map_err(|e| {
            Error::backend_unavailable(
                format!("provider returned malformed JSON: {}", e),
                false,
                ErrorContext::new().with_source("remote_backend"),
            )
        })?;

        let choice = wire.choices.into_iter().next().ok_or_else(|| {
            Error::backend_unavailable(
                "provider returned no choices",
                false,
                ErrorContext::new().with_source("remote_backend"),
            )
        })?;

        info!(
            model = self.model.as_str(),
            http_status = status,
            duration_ms = start.elapsed().as_millis() as u64,
            "remote completion finished"
        );

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("length") => FinishReason::Length,
            _ => FinishReason::Stop,
        };
        let usage = wire
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(BackendResult {
            content: choice.message.content.unwrap_or_default(),
            finish_reason,
            usage,
            draft_acceptance: None,
        })
    }

    fn name(&self) -> &str {
        &self.model
    }
}
