//! Retrieval augmentation stage.
//!
//! The index implementation is external; this stage only owns the query
//! boundary and the injection of retrieved passages as a context message.
//! An unavailable or failing retriever is non-fatal: the stage becomes a
//! no-op.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Interceptor, InterceptorContext, Phase};
use crate::types::{Message, MessageRole};
use crate::Result;

/// One retrieved passage, ranked best-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passage {
    pub source: String,
    pub text: String,
}

/// Externally-owned retrieval capability.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<Passage>>;
}

pub struct RagAugmenter {
    retriever: Arc<dyn Retriever>,
    top_k: usize,
}

impl RagAugmenter {
    pub fn new(retriever: Arc<dyn Retriever>, top_k: usize) -> Self {
        Self { retriever, top_k }
    }

    fn context_message(passages: &[Passage]) -> Message {
        let mut body = String::from(
            "Relevant reference passages retrieved for this request; use them \
             where applicable and ignore them where they do not apply:\n",
        );
        for passage in passages {
            body.push_str("- [");
            body.push_str(&passage.source);
            body.push_str("] ");
            body.push_str(&passage.text);
            body.push('\n');
        }
        Message::system(body)
    }
}

#[async_trait]
impl Interceptor for RagAugmenter {
    fn name(&self) -> &'static str {
        "rag_augmenter"
    }

    async fn process(&self, ctx: &mut InterceptorContext, phase: Phase) -> Result<()> {
        if phase != Phase::Pre {
            return Ok(());
        }
        let Some(latest) = ctx
            .working_messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
        else {
            return Ok(());
        };

        let passages = match self.retriever.query(&latest.content, self.top_k).await {
            Ok(passages) => passages,
            Err(e) => {
                warn!(stage = self.name(), error = %e, "retrieval unavailable, skipping augmentation");
                return Ok(());
            }
        };
        if passages.is_empty() {
            return Ok(());
        }

        debug!(stage = self.name(), passages = passages.len(), "injected retrieval context");
        ctx.working_messages
            .insert(0, Self::context_message(&passages));
        Ok(())
    }
}
