//! Speculative decoding session pairing a draft model with a main model.
//!
//! The draft proposes a short run of candidate tokens; the main model
//! verifies them in one batched evaluation. The first disagreement becomes
//! the correction point: all earlier draft tokens are accepted, the main
//! model's token is appended, and proposing resumes from the new state. A
//! fully accepted batch additionally yields the main model's bonus token, so
//! the output is token-identical to main-only greedy decoding; only latency
//! changes.

use std::sync::Arc;
use tracing::trace;

use super::local::{render_prompt, ModelRuntime, TokenId};
use super::{BackendResult, CompletionParams, FinishReason, TokenUsage};
use crate::types::Message;
use crate::Result;

/// Ephemeral draft/main pairing for one inference call.
pub struct SpeculativeSession {
    main: Arc<dyn ModelRuntime>,
    draft: Arc<dyn ModelRuntime>,
    window: usize,
}

impl SpeculativeSession {
    pub fn new(main: Arc<dyn ModelRuntime>, draft: Arc<dyn ModelRuntime>, window: usize) -> Self {
        Self {
            main,
            draft,
            window: window.max(1),
        }
    }

    pub async fn run(
        &self,
        messages: &[Message],
        params: &CompletionParams,
    ) -> Result<BackendResult> {
        let prompt = render_prompt(messages);
        let mut state = self.main.tokenize(&prompt).await?;
        let prompt_tokens = state.len() as u32;
        let eos = self.main.eos_token();
        let max_tokens = params.max_tokens as usize;

        let mut content_tokens: Vec<TokenId> = Vec::new();
        let mut generated = 0usize;
        let mut proposed = 0usize;
        let mut accepted = 0usize;
        let mut finish = FinishReason::Length;

        'decode: while generated < max_tokens {
            let want = self.window.min(max_tokens - generated);
            let candidates = self.draft.propose(&state, want).await?;
            proposed += candidates.len();

            // One batched pass over prefix + candidates; the extra position is
            // the bonus token when every candidate is accepted.
            let verified = self.main.verify(&state, &candidates).await?;

            let mut batch_done = false;
            for (i, main_pick) in verified.iter().copied().enumerate() {
                let agreed = candidates.get(i) == Some(&main_pick);
                if agreed {
                    accepted += 1;
                }
                state.push(main_pick);
                generated += 1;
                if main_pick == eos {
                    finish = FinishReason::Stop;
                    break 'decode;
                }
                content_tokens.push(main_pick);
                if generated >= max_tokens {
                    break 'decode;
                }
                if !agreed {
                    // Correction point: discard the rest of the draft batch
                    // and resume proposing from the corrected state.
                    batch_done = true;
                    break;
                }
            }
            if !batch_done {
                trace!(batch = verified.len(), "full draft batch accepted");
            }
        }

        let content = self.main.detokenize(&content_tokens).await?;
        let acceptance = if proposed > 0 {
            Some(accepted as f32 / proposed as f32)
        } else {
            None
        };

        Ok(BackendResult {
            content,
            finish_reason: finish,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens: generated as u32,
                total_tokens: prompt_tokens + generated as u32,
            },
            draft_acceptance: acceptance,
        })
    }
}
