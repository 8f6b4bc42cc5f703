//! OpenAI-compatible entry point.
//!
//! Accepts `/v1/chat/completions`-shaped requests, validates and converts
//! them into typed messages, runs the pipeline, and shapes the result back
//! into the familiar response envelope. The HTTP listener itself is owned by
//! the embedding process; this module is the transport-agnostic core.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::{CompletionParams, InferenceBackend, TokenUsage};
use crate::config::{GatewayConfig, StageKind};
use crate::interceptor::{Enricher, Interceptor, RagAugmenter, Recorder, Retriever, Summarizer};
use crate::pipeline::Pipeline;
use crate::store::ConversationStore;
use crate::types::{Message, MessageRole};
use crate::{Error, ErrorContext, Result};

/// Inbound chat completion request, wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<WireMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Accepted for wire compatibility; this core answers non-streaming only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

/// One message as it appears on the wire; the role is an open string until
/// validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: WireMessage,
    pub finish_reason: String,
}

/// Transport-agnostic gateway core: one instance serves many requests.
pub struct Gateway {
    pipeline: Pipeline,
    defaults: crate::config::SamplingDefaults,
    model_name: String,
}

impl Gateway {
    pub fn builder(config: GatewayConfig, backend: Arc<dyn InferenceBackend>) -> GatewayBuilder {
        GatewayBuilder {
            config,
            backend,
            helper: None,
            store: None,
            retriever: None,
        }
    }

    /// Handle one chat completion request.
    pub async fn handle(&self, request: ChatCompletionRequest) -> Result<ChatCompletionResponse> {
        let request_id = format!("chatcmpl-{}", Uuid::new_v4());
        if request.stream == Some(true) {
            return Err(Error::invalid_request(
                "streaming responses are not supported",
                ErrorContext::new().with_field_path("stream"),
            ));
        }
        let messages = convert_messages(&request.messages)?;
        let params = self.params_for(&request);

        info!(
            request_id,
            messages = messages.len(),
            max_tokens = params.max_tokens,
            "chat completion accepted"
        );
        let result = self.pipeline.execute(&request_id, messages, params).await?;

        Ok(ChatCompletionResponse {
            id: request_id,
            object: "chat.completion".to_string(),
            created: unix_seconds(),
            model: request.model.unwrap_or_else(|| self.model_name.clone()),
            choices: vec![Choice {
                index: 0,
                message: WireMessage {
                    role: MessageRole::Assistant.as_str().to_string(),
                    content: result.content,
                },
                finish_reason: result.finish_reason.as_str().to_string(),
            }],
            usage: result.usage,
        })
    }

    fn params_for(&self, request: &ChatCompletionRequest) -> CompletionParams {
        CompletionParams {
            max_tokens: request.max_tokens.unwrap_or(self.defaults.max_tokens),
            temperature: request.temperature.unwrap_or(self.defaults.temperature),
            top_p: request.top_p.unwrap_or(self.defaults.top_p),
        }
    }
}

/// Assembles the interceptor chain in configured order. Stages whose
/// dependency was not supplied are skipped with a warning rather than
/// failing startup.
pub struct GatewayBuilder {
    config: GatewayConfig,
    backend: Arc<dyn InferenceBackend>,
    helper: Option<Arc<dyn InferenceBackend>>,
    store: Option<Arc<ConversationStore>>,
    retriever: Option<Arc<dyn Retriever>>,
}

impl GatewayBuilder {
    /// Smaller/faster model used by the enricher and summarizer stages.
    /// Defaults to the main backend when unset.
    pub fn helper(mut self, helper: Arc<dyn InferenceBackend>) -> Self {
        self.helper = Some(helper);
        self
    }

    pub fn store(mut self, store: Arc<ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn build(self) -> Gateway {
        let helper = self.helper.unwrap_or_else(|| self.backend.clone());
        let helper_params = CompletionParams::from_defaults(&self.config.sampling);
        let pipeline_cfg = &self.config.pipeline;

        let mut stages: Vec<Arc<dyn Interceptor>> = Vec::new();
        for kind in &pipeline_cfg.stages {
            match kind {
                StageKind::Recorder => match &self.store {
                    Some(store) => stages.push(Arc::new(Recorder::new(store.clone()))),
                    None => warn!(stage = "recorder", "no conversation store supplied, skipping"),
                },
                StageKind::Enricher => {
                    stages.push(Arc::new(Enricher::new(helper.clone(), helper_params)));
                }
                StageKind::Summarizer => {
                    stages.push(Arc::new(Summarizer::new(
                        helper.clone(),
                        helper_params,
                        pipeline_cfg.summarize_threshold_tokens,
                        pipeline_cfg.summarize_keep_recent,
                    )));
                }
                StageKind::RagAugmenter => match &self.retriever {
                    Some(retriever) => stages.push(Arc::new(RagAugmenter::new(
                        retriever.clone(),
                        pipeline_cfg.rag_top_k,
                    ))),
                    None => warn!(stage = "rag_augmenter", "no retriever supplied, skipping"),
                },
            }
        }

        let model_name = self
            .config
            .model
            .model_path
            .rsplit('/')
            .next()
            .unwrap_or(self.config.model.model_path.as_str())
            .to_string();
        Gateway {
            pipeline: Pipeline::new(stages, self.backend, pipeline_cfg),
            defaults: self.config.sampling.clone(),
            model_name,
        }
    }
}

fn convert_messages(wire: &[WireMessage]) -> Result<Vec<Message>> {
    wire.iter()
        .enumerate()
        .map(|(i, m)| {
            let role = MessageRole::parse(&m.role).ok_or_else(|| {
                Error::invalid_request(
                    format!("unknown message role '{}'", m.role),
                    ErrorContext::new().with_field_path(format!("messages[{}].role", i)),
                )
            })?;
            Ok(Message {
                role,
                content: m.content.clone(),
            })
        })
        .collect()
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
