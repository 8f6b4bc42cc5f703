//! Interceptor chain: pipeline stages that observe or rewrite one
//! request/response pair.
//!
//! Stages execute strictly in configured order, each receiving the output of
//! the previous one. A stage may read any metadata key but only writes keys
//! it owns; unknown keys pass through unchanged. The concrete stages form a
//! closed set assembled into an explicit ordered list at startup; there is
//! no runtime string-based dispatch.

pub mod enricher;
pub mod rag;
pub mod recorder;
pub mod summarizer;

pub use enricher::Enricher;
pub use rag::{Passage, RagAugmenter, Retriever};
pub use recorder::Recorder;
pub use summarizer::Summarizer;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::backend::BackendResult;
use crate::types::Message;
use crate::Result;

/// Which side of the backend call a stage is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Post,
}

/// Metadata key the recorder writes the resolved sequence id under.
pub const META_SEQUENCE_ID: &str = "sequence_id";

/// Mutable envelope carried through one request's pipeline traversal.
///
/// Exclusively owned by the task processing the request; never shared across
/// concurrent requests, so no locking is involved.
#[derive(Debug, Clone)]
pub struct InterceptorContext {
    /// Inbound messages, untouched. Stages that degrade fall back to these.
    pub original_messages: Vec<Message>,
    /// Messages as rewritten so far; what the backend will actually see.
    pub working_messages: Vec<Message>,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Resolved by the recorder during the pre phase.
    pub sequence: Option<crate::store::SequenceId>,
    /// Overrides the orchestrator's default backend when set.
    pub backend_selection: Option<String>,
    /// Populated before the post phase on success.
    pub response: Option<BackendResult>,
    /// Populated before the post phase when the backend call failed; the
    /// outbound failure is itself recorded.
    pub failure: Option<String>,
}

impl InterceptorContext {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            original_messages: messages.clone(),
            working_messages: messages,
            metadata: HashMap::new(),
            sequence: None,
            backend_selection: None,
            response: None,
            failure: None,
        }
    }

    pub fn sequence_id_meta(&self) -> Option<&str> {
        self.metadata.get(META_SEQUENCE_ID).and_then(|v| v.as_str())
    }
}

/// A pipeline stage.
///
/// Degradable stages (enricher, summarizer, RAG) handle their own failures
/// and leave the context untouched rather than erroring; the orchestrator
/// additionally swallows [`crate::Error::InterceptorDegraded`] and
/// [`crate::Error::Storage`] as a second line of defense.
#[async_trait]
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, ctx: &mut InterceptorContext, phase: Phase) -> Result<()>;
}

