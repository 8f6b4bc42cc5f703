//! Draft/main speculative decoding through the local backend's public surface.

use async_trait::async_trait;
use std::sync::Arc;

use promptgate::backend::{
    CompletionParams, FinishReason, InferenceBackend, LocalModelBackend, ModelRuntime,
    RuntimeCompletion, TokenId, TokenUsage,
};
use promptgate::types::Message;
use promptgate::{Error, ErrorContext, Result};

const EOS: TokenId = 0;
const TARGET: [TokenId; 5] = [10, 11, 12, 13, 14];

fn detok(tokens: &[TokenId]) -> String {
    tokens
        .iter()
        .map(|t| format!("t{}", t))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Greedy runtime that always continues toward `TARGET` then emits EOS.
struct TargetRuntime {
    prompt_len: usize,
}

impl TargetRuntime {
    fn pick(&self, position: usize) -> TokenId {
        TARGET.get(position).copied().unwrap_or(EOS)
    }
}

#[async_trait]
impl ModelRuntime for TargetRuntime {
    async fn chat(
        &self,
        _messages: &[Message],
        _params: &CompletionParams,
    ) -> Result<RuntimeCompletion> {
        Ok(RuntimeCompletion {
            content: detok(&TARGET),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage {
                prompt_tokens: self.prompt_len as u32,
                completion_tokens: TARGET.len() as u32 + 1,
                total_tokens: self.prompt_len as u32 + TARGET.len() as u32 + 1,
            },
        })
    }

    async fn tokenize(&self, _text: &str) -> Result<Vec<TokenId>> {
        Ok((900..900 + self.prompt_len as TokenId).collect())
    }

    async fn detokenize(&self, tokens: &[TokenId]) -> Result<String> {
        Ok(detok(tokens))
    }

    async fn propose(&self, prefix: &[TokenId], n: usize) -> Result<Vec<TokenId>> {
        let generated = prefix.len() - self.prompt_len;
        Ok((0..n).map(|i| self.pick(generated + i)).collect())
    }

    async fn verify(&self, prefix: &[TokenId], candidates: &[TokenId]) -> Result<Vec<TokenId>> {
        let generated = prefix.len() - self.prompt_len;
        Ok((0..=candidates.len())
            .map(|i| self.pick(generated + i))
            .collect())
    }

    fn eos_token(&self) -> TokenId {
        EOS
    }
}

/// Draft that disagrees with the target at one position.
struct WobblyDraft {
    prompt_len: usize,
    wrong_at: usize,
}

#[async_trait]
impl ModelRuntime for WobblyDraft {
    async fn chat(
        &self,
        _messages: &[Message],
        _params: &CompletionParams,
    ) -> Result<RuntimeCompletion> {
        Err(Error::backend_unavailable(
            "draft runtime has no chat path",
            false,
            ErrorContext::new(),
        ))
    }

    async fn tokenize(&self, _text: &str) -> Result<Vec<TokenId>> {
        Ok((900..900 + self.prompt_len as TokenId).collect())
    }

    async fn detokenize(&self, tokens: &[TokenId]) -> Result<String> {
        Ok(detok(tokens))
    }

    async fn propose(&self, prefix: &[TokenId], n: usize) -> Result<Vec<TokenId>> {
        let generated = prefix.len() - self.prompt_len;
        Ok((0..n)
            .map(|i| {
                let position = generated + i;
                if position == self.wrong_at {
                    99
                } else {
                    TARGET.get(position).copied().unwrap_or(EOS)
                }
            })
            .collect())
    }

    async fn verify(&self, _prefix: &[TokenId], _candidates: &[TokenId]) -> Result<Vec<TokenId>> {
        Err(Error::backend_unavailable(
            "draft runtime never verifies",
            false,
            ErrorContext::new(),
        ))
    }

    fn eos_token(&self) -> TokenId {
        EOS
    }
}

/// Draft whose proposals always fail.
struct DeadDraft;

#[async_trait]
impl ModelRuntime for DeadDraft {
    async fn chat(
        &self,
        _messages: &[Message],
        _params: &CompletionParams,
    ) -> Result<RuntimeCompletion> {
        Err(Error::backend_unavailable("dead", false, ErrorContext::new()))
    }

    async fn tokenize(&self, _text: &str) -> Result<Vec<TokenId>> {
        Err(Error::backend_unavailable("dead", false, ErrorContext::new()))
    }

    async fn detokenize(&self, _tokens: &[TokenId]) -> Result<String> {
        Err(Error::backend_unavailable("dead", false, ErrorContext::new()))
    }

    async fn propose(&self, _prefix: &[TokenId], _n: usize) -> Result<Vec<TokenId>> {
        Err(Error::backend_unavailable("dead", false, ErrorContext::new()))
    }

    async fn verify(&self, _prefix: &[TokenId], _candidates: &[TokenId]) -> Result<Vec<TokenId>> {
        Err(Error::backend_unavailable("dead", false, ErrorContext::new()))
    }

    fn eos_token(&self) -> TokenId {
        EOS
    }
}

#[tokio::test]
async fn speculative_output_matches_main_only_output() {
    let main = Arc::new(TargetRuntime { prompt_len: 3 });
    let plain = LocalModelBackend::new("plain", main.clone());
    let speculative = LocalModelBackend::new("spec", main)
        .with_draft(Arc::new(WobblyDraft { prompt_len: 3, wrong_at: 2 }));

    let messages = vec![Message::user("go")];
    let params = CompletionParams::default();

    let baseline = plain.complete(&messages, &params).await.unwrap();
    let accelerated = speculative.complete(&messages, &params).await.unwrap();

    assert_eq!(accelerated.content, baseline.content);
    assert_eq!(accelerated.finish_reason, FinishReason::Stop);

    // The draft disagreed once, so acceptance is strictly between 0 and 1.
    let acceptance = accelerated.draft_acceptance.unwrap();
    assert!(acceptance > 0.0 && acceptance < 1.0);
}

#[tokio::test]
async fn fully_agreeing_draft_reports_full_acceptance() {
    let main = Arc::new(TargetRuntime { prompt_len: 3 });
    // A second target runtime is a perfect draft. The window matches the
    // reply length so the final EOS arrives as the bonus token.
    let backend = LocalModelBackend::new("spec", main)
        .with_draft(Arc::new(TargetRuntime { prompt_len: 3 }))
        .with_draft_window(TARGET.len());

    let result = backend
        .complete(&[Message::user("go")], &CompletionParams::default())
        .await
        .unwrap();

    assert_eq!(result.content, detok(&TARGET));
    assert!((result.draft_acceptance.unwrap() - 1.0).abs() < f32::EPSILON);
}

#[tokio::test]
async fn dead_draft_falls_back_to_main_only() {
    let main = Arc::new(TargetRuntime { prompt_len: 3 });
    let backend = LocalModelBackend::new("spec", main).with_draft(Arc::new(DeadDraft));

    let result = backend
        .complete(&[Message::user("go")], &CompletionParams::default())
        .await
        .unwrap();

    // Fallback answers through the main model alone.
    assert_eq!(result.content, detok(&TARGET));
    assert!(result.draft_acceptance.is_none());
}
