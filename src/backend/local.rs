//! Local model backend: a concurrency gate over a loaded model runtime.
//!
//! The inference runtime itself (llama.cpp or similar) is external; the core
//! talks to it through [`ModelRuntime`]. A loaded model is a bounded shared
//! resource: unless the runtime decodes concurrently, at most one generation
//! occupies it at a time, enforced by a semaphore.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{BackendResult, CompletionParams, FinishReason, InferenceBackend, TokenUsage};
use crate::types::Message;
use crate::{Error, ErrorContext, Result};

/// Token identifier within a runtime's vocabulary.
pub type TokenId = u32;

/// Completion returned by the raw runtime.
#[derive(Debug, Clone)]
pub struct RuntimeCompletion {
    pub content: String,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
}

/// Capability surface of a loaded model instance.
///
/// `propose`/`verify` exist for speculative decoding and must be
/// deterministic (greedy): `verify` evaluates `prefix` plus all candidates in
/// one batched pass and returns the runtime's own pick for every candidate
/// position plus one bonus position, i.e. `candidates.len() + 1` tokens.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    async fn chat(
        &self,
        messages: &[Message],
        params: &CompletionParams,
    ) -> Result<RuntimeCompletion>;

    async fn tokenize(&self, text: &str) -> Result<Vec<TokenId>>;

    async fn detokenize(&self, tokens: &[TokenId]) -> Result<String>;

    /// Greedily propose up to `n` continuation tokens for `prefix`.
    async fn propose(&self, prefix: &[TokenId], n: usize) -> Result<Vec<TokenId>>;

    /// Batched greedy verification; see trait docs for the return contract.
    async fn verify(&self, prefix: &[TokenId], candidates: &[TokenId]) -> Result<Vec<TokenId>>;

    fn eos_token(&self) -> TokenId;
}

/// Render a chat transcript into the flat prompt the token-level speculative
/// path operates on.
pub(crate) fn render_prompt(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        out.push_str(message.role.as_str());
        out.push_str(": ");
        out.push_str(&message.content);
        out.push('\n');
    }
    out.push_str("assistant: ");
    out
}

/// Inference backend over an in-process model, with optional speculative
/// decoding when a draft runtime is configured.
pub struct LocalModelBackend {
    name: String,
    main: Arc<dyn ModelRuntime>,
    draft: Option<Arc<dyn ModelRuntime>>,
    gate: Arc<Semaphore>,
    /// Draft tokens proposed per speculative batch.
    draft_window: usize,
}

impl LocalModelBackend {
    pub fn new(name: impl Into<String>, main: Arc<dyn ModelRuntime>) -> Self {
        Self {
            name: name.into(),
            main,
            draft: None,
            gate: Arc::new(Semaphore::new(1)),
            draft_window: 8,
        }
    }

    /// Attach a draft runtime; speculative decoding is an optimization, never
    /// a correctness dependency.
    pub fn with_draft(mut self, draft: Arc<dyn ModelRuntime>) -> Self {
        self.draft = Some(draft);
        self
    }

    pub fn with_draft_window(mut self, window: usize) -> Self {
        self.draft_window = window.max(1);
        self
    }

    /// Allow `n` concurrent generations if the runtime decodes concurrently.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.gate = Arc::new(Semaphore::new(n.max(1)));
        self
    }
}

#[async_trait]
impl InferenceBackend for LocalModelBackend {
    async fn complete(
        &self,
        messages: &[Message],
        params: &CompletionParams,
    ) -> Result<BackendResult> {
        let _permit = self.gate.acquire().await.map_err(|_| {
            Error::backend_unavailable(
                "local model gate closed",
                false,
                ErrorContext::new().with_source("local_backend"),
            )
        })?;

        if let Some(draft) = &self.draft {
            let session = super::speculative::SpeculativeSession::new(
                self.main.clone(),
                draft.clone(),
                self.draft_window,
            );
            match session.run(messages, params).await {
                Ok(result) => {
                    debug!(
                        backend = self.name.as_str(),
                        acceptance = result.draft_acceptance.unwrap_or(0.0),
                        "speculative generation completed"
                    );
                    return Ok(result);
                }
                Err(e) => {
                    // Degraded-performance event, not an error: the main
                    // model alone still produces a correct answer.
                    warn!(
                        backend = self.name.as_str(),
                        error = %e,
                        "draft model failed, falling back to main-only generation"
                    );
                }
            }
        }

        let completion = self.main.chat(messages, params).await?;
        Ok(BackendResult {
            content: completion.content,
            finish_reason: completion.finish_reason,
            usage: completion.usage,
            draft_acceptance: None,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
