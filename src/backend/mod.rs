//! Inference backend capability and its variants.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`local`] | Gate over a loaded in-process model runtime |
//! | [`speculative`] | Draft/main speculative decoding session |
//! | [`remote`] | OpenAI-compatible remote provider |

pub mod local;
pub mod remote;
pub mod speculative;

pub use local::{LocalModelBackend, ModelRuntime, RuntimeCompletion, TokenId};
pub use remote::RemoteProviderBackend;
pub use speculative::SpeculativeSession;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::Message;
use crate::Result;

/// Sampling parameters for one completion call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl CompletionParams {
    pub fn from_defaults(defaults: &crate::config::SamplingDefaults) -> Self {
        Self {
            max_tokens: defaults.max_tokens,
            temperature: defaults.temperature,
            top_p: defaults.top_p,
        }
    }
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self::from_defaults(&crate::config::SamplingDefaults::default())
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Stop,
    Length,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Result of one backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendResult {
    pub content: String,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
    /// accepted/proposed draft tokens; present only when speculative decoding
    /// actually ran.
    pub draft_acceptance: Option<f32>,
}

/// A local or remote model call.
///
/// `complete` may block for the full generation; callers cancel by dropping
/// the future (the orchestrator wraps it in a timeout). Transient failures
/// map to [`crate::Error::BackendUnavailable`] with `retryable: true`.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn complete(&self, messages: &[Message], params: &CompletionParams)
        -> Result<BackendResult>;

    /// Short identifier used in logs and response metadata.
    fn name(&self) -> &str;
}
