//! Dedup-aware conversation logging stage.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::{Interceptor, InterceptorContext, Phase, META_SEQUENCE_ID};
use crate::hash::MessageHash;
use crate::store::ConversationStore;
use crate::types::Message;
use crate::Result;

/// Logs inbound messages during the pre phase and the outbound result during
/// the post phase. Store failures never block the user-facing call: they are
/// logged and swallowed here.
pub struct Recorder {
    store: Arc<ConversationStore>,
}

impl Recorder {
    pub fn new(store: Arc<ConversationStore>) -> Self {
        Self { store }
    }

    async fn record_inbound(&self, ctx: &mut InterceptorContext) -> Result<()> {
        let hashes: Vec<MessageHash> = ctx
            .working_messages
            .iter()
            .map(MessageHash::of_message)
            .collect();

        let sequence = self.store.sequence_for(&hashes).await?;
        let linked = self.store.linked_len(sequence).await?;
        for message in ctx.working_messages.iter().skip(linked) {
            self.store.append(sequence, message).await?;
        }

        ctx.sequence = Some(sequence);
        ctx.metadata.insert(
            META_SEQUENCE_ID.to_string(),
            serde_json::Value::String(sequence.to_string()),
        );
        Ok(())
    }

    async fn record_outbound(&self, ctx: &InterceptorContext) -> Result<()> {
        let Some(sequence) = ctx.sequence else {
            // Pre-phase recording already failed; nothing to link onto.
            return Ok(());
        };

        if let Some(response) = &ctx.response {
            self.store
                .append(sequence, &Message::assistant(&response.content))
                .await?;
        } else if let Some(failure) = &ctx.failure {
            // An outbound failure is itself part of the conversation record.
            self.store
                .append(sequence, &Message::tool(format!("backend failure: {}", failure)))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Interceptor for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    async fn process(&self, ctx: &mut InterceptorContext, phase: Phase) -> Result<()> {
        let outcome = match phase {
            Phase::Pre => self.record_inbound(ctx).await,
            Phase::Post => self.record_outbound(ctx).await,
        };
        if let Err(e) = outcome {
            // Non-blocking failure policy: the pipeline proceeds without the log.
            warn!(stage = self.name(), error = %e, "conversation store write failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendResult, FinishReason, TokenUsage};
    use crate::store::MemoryAppendStore;

    fn recorder() -> (Recorder, Arc<MemoryAppendStore>, Arc<ConversationStore>) {
        let mem = Arc::new(MemoryAppendStore::new());
        let store = Arc::new(ConversationStore::new(mem.clone()));
        (Recorder::new(store.clone()), mem, store)
    }

    #[tokio::test]
    async fn pre_phase_resolves_sequence_and_links_turns() {
        let (recorder, mem, _) = recorder();
        let mut ctx = InterceptorContext::new(vec![Message::user("Hi")]);

        recorder.process(&mut ctx, Phase::Pre).await.unwrap();

        assert!(ctx.sequence.is_some());
        assert!(ctx.sequence_id_meta().is_some());
        assert_eq!(mem.turn_count().await, 1);
    }

    #[tokio::test]
    async fn repeated_request_shares_the_stored_turn() {
        let (recorder, mem, _) = recorder();

        let mut first = InterceptorContext::new(vec![Message::user("Hi")]);
        recorder.process(&mut first, Phase::Pre).await.unwrap();
        let mut second = InterceptorContext::new(vec![Message::user("Hi")]);
        recorder.process(&mut second, Phase::Pre).await.unwrap();

        // Identical hash list resolves to the same sequence; nothing new is
        // stored or linked.
        assert_eq!(first.sequence, second.sequence);
        assert_eq!(mem.turn_count().await, 1);
        assert_eq!(mem.link_count().await, 1);
    }

    #[tokio::test]
    async fn post_phase_appends_assistant_reply() {
        let (recorder, _, store) = recorder();
        let mut ctx = InterceptorContext::new(vec![Message::user("Hi")]);
        recorder.process(&mut ctx, Phase::Pre).await.unwrap();

        ctx.response = Some(BackendResult {
            content: "Hello there".into(),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::default(),
            draft_acceptance: None,
        });
        recorder.process(&mut ctx, Phase::Post).await.unwrap();

        let history = store.history(ctx.sequence.unwrap()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "Hello there");
    }

    #[tokio::test]
    async fn post_phase_records_backend_failure_as_tool_turn() {
        let (recorder, _, store) = recorder();
        let mut ctx = InterceptorContext::new(vec![Message::user("Hi")]);
        recorder.process(&mut ctx, Phase::Pre).await.unwrap();

        ctx.failure = Some("provider returned HTTP 500".into());
        recorder.process(&mut ctx, Phase::Post).await.unwrap();

        let history = store.history(ctx.sequence.unwrap()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, crate::types::MessageRole::Tool);
        assert!(history[1].content.contains("provider returned HTTP 500"));
    }
}
