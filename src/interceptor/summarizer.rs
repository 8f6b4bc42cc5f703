//! Context-window summarization stage.
//!
//! When the estimated token length of the working messages crosses the
//! configured threshold, the oldest segment is replaced with one synthesized
//! summary message. The most recent N turns are always kept verbatim; in
//! particular the latest turn is never compressed, no matter how aggressive
//! the threshold is.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Interceptor, InterceptorContext, Phase};
use crate::backend::{CompletionParams, InferenceBackend};
use crate::tokens::{CharacterEstimator, TokenEstimator};
use crate::types::Message;
use crate::Result;

const SUMMARY_TEMPLATE: &str = "Summarize the following conversation so far in a \
few sentences, preserving every fact, constraint and open question a later \
reply would need. Respond with only the summary.\n\n{transcript}";

pub struct Summarizer {
    helper: Arc<dyn InferenceBackend>,
    params: CompletionParams,
    estimator: Box<dyn TokenEstimator>,
    threshold_tokens: usize,
    keep_recent: usize,
}

impl Summarizer {
    pub fn new(
        helper: Arc<dyn InferenceBackend>,
        params: CompletionParams,
        threshold_tokens: usize,
        keep_recent: usize,
    ) -> Self {
        Self {
            helper,
            params,
            estimator: Box::new(CharacterEstimator::new()),
            threshold_tokens,
            // The most recent turn is never compressed.
            keep_recent: keep_recent.max(1),
        }
    }

    pub fn with_estimator(mut self, estimator: Box<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    fn transcript(messages: &[Message]) -> String {
        let mut out = String::new();
        for m in messages {
            out.push_str(m.role.as_str());
            out.push_str(": ");
            out.push_str(&m.content);
            out.push('\n');
        }
        out
    }
}

#[async_trait]
impl Interceptor for Summarizer {
    fn name(&self) -> &'static str {
        "summarizer"
    }

    async fn process(&self, ctx: &mut InterceptorContext, phase: Phase) -> Result<()> {
        if phase != Phase::Pre {
            return Ok(());
        }

        let estimated = self.estimator.count_messages(&ctx.working_messages);
        if estimated <= self.threshold_tokens || ctx.working_messages.len() <= self.keep_recent {
            return Ok(());
        }

        let split = ctx.working_messages.len() - self.keep_recent;
        let prefix = &ctx.working_messages[..split];
        let prompt = SUMMARY_TEMPLATE.replace("{transcript}", &Self::transcript(prefix));

        let summary = match self
            .helper
            .complete(&[Message::user(prompt)], &self.params)
            .await
        {
            Ok(result) if !result.content.trim().is_empty() => result.content,
            Ok(_) => {
                debug!(stage = self.name(), "empty summary, passing through");
                return Ok(());
            }
            Err(e) => {
                warn!(stage = self.name(), error = %e, "summary call failed, passing through");
                return Ok(());
            }
        };

        debug!(
            stage = self.name(),
            estimated_tokens = estimated,
            compressed_turns = split,
            "replaced history prefix with summary"
        );
        let mut rewritten = Vec::with_capacity(self.keep_recent + 1);
        rewritten.push(Message::system(format!(
            "Summary of the earlier conversation: {}",
            summary.trim()
        )));
        rewritten.extend_from_slice(&ctx.working_messages[split..]);
        ctx.working_messages = rewritten;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendResult, FinishReason, TokenUsage};
    use crate::{Error, ErrorContext};

    struct FixedBackend {
        reply: Option<String>,
    }

    #[async_trait]
    impl InferenceBackend for FixedBackend {
        async fn complete(
            &self,
            _messages: &[Message],
            _params: &CompletionParams,
        ) -> Result<BackendResult> {
            match &self.reply {
                Some(content) => Ok(BackendResult {
                    content: content.clone(),
                    finish_reason: FinishReason::Stop,
                    usage: TokenUsage::default(),
                    draft_acceptance: None,
                }),
                None => Err(Error::backend_unavailable(
                    "helper down",
                    true,
                    ErrorContext::new(),
                )),
            }
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn long_history(turns: usize) -> Vec<Message> {
        (0..turns)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question {} {}", i, "x".repeat(200)))
                } else {
                    Message::assistant(format!("answer {} {}", i, "y".repeat(200)))
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn compresses_prefix_and_keeps_recent_turns_verbatim() {
        let helper = Arc::new(FixedBackend {
            reply: Some("they discussed many things".into()),
        });
        let summarizer = Summarizer::new(helper, CompletionParams::default(), 50, 2);

        let history = long_history(8);
        let mut ctx = InterceptorContext::new(history.clone());
        summarizer.process(&mut ctx, Phase::Pre).await.unwrap();

        assert_eq!(ctx.working_messages.len(), 3);
        assert!(ctx.working_messages[0]
            .content
            .starts_with("Summary of the earlier conversation:"));
        assert_eq!(ctx.working_messages[1], history[6]);
        assert_eq!(ctx.working_messages[2], history[7]);
    }

    #[tokio::test]
    async fn below_threshold_is_a_no_op() {
        let helper = Arc::new(FixedBackend {
            reply: Some("unused".into()),
        });
        let summarizer = Summarizer::new(helper, CompletionParams::default(), 10_000, 2);

        let mut ctx = InterceptorContext::new(long_history(4));
        summarizer.process(&mut ctx, Phase::Pre).await.unwrap();
        assert_eq!(ctx.working_messages, ctx.original_messages);
    }

    #[tokio::test]
    async fn most_recent_turn_survives_even_with_zero_keep() {
        let helper = Arc::new(FixedBackend {
            reply: Some("summary".into()),
        });
        // keep_recent 0 is clamped to 1.
        let summarizer = Summarizer::new(helper, CompletionParams::default(), 10, 0);

        let history = long_history(5);
        let mut ctx = InterceptorContext::new(history.clone());
        summarizer.process(&mut ctx, Phase::Pre).await.unwrap();

        assert_eq!(ctx.working_messages.last(), history.last());
    }

    #[tokio::test]
    async fn failing_helper_passes_history_through() {
        let helper = Arc::new(FixedBackend { reply: None });
        let summarizer = Summarizer::new(helper, CompletionParams::default(), 10, 2);

        let mut ctx = InterceptorContext::new(long_history(6));
        summarizer.process(&mut ctx, Phase::Pre).await.unwrap();
        assert_eq!(ctx.working_messages, ctx.original_messages);
    }
}
