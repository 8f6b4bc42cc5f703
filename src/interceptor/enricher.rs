//! Prompt enrichment stage.
//!
//! Three helper-model calls per request: elaborate the user's request into a
//! refined prompt, classify the refined prompt into a domain and an ideal
//! expert persona, then synthesize a persona system message that is prepended
//! to the working messages before the real backend call. Every step degrades
//! gracefully: if any sub-call fails or extracts nothing, the original
//! messages pass through unmodified.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Interceptor, InterceptorContext, Phase};
use crate::backend::{CompletionParams, InferenceBackend};
use crate::types::{Message, MessageRole};
use crate::Result;

const ELABORATION_TEMPLATE: &str = r#"<prompt>
  <task>Reflect upon and enrich the sample prompt below. Keep your intermediate
  reasoning inside <think> tags; place the final enriched prompt inside
  <refined_prompt> tags.</task>
  <instruction>
    <step>Understand the central question or request and the user's goal.</step>
    <step>Reflect on underlying assumptions, ambiguities and missing context.</step>
    <step>Brainstorm related concepts that naturally extend the request.</step>
    <step>Pinpoint where more detail, scope or format guidance would help.</step>
    <step>Formulate elaborations and follow-up questions that resolve them.</step>
  </instruction>
  <hallucination_warning>Do not invent information; enrich the prompt, do not
  answer it.</hallucination_warning>
  <refined_prompt></refined_prompt>
</prompt>

BELOW IS THE SAMPLE PROMPT:

{user_request}
"#;

const CLASSIFICATION_TEMPLATE: &str = r#"<prompt>
  <task>Analyze the sample prompt and determine the best approach for
  answering it. Return your analysis inside <reflection_points> tags.</task>
  <chain_of_thought>
    <step>Determine the primary domain of the sample prompt.</step>
    <step>Identify the single best-qualified type of expert, one who could
    teach an advanced course on the subject, with justification.</step>
    <step>List the specific kinds of information that expert would need.</step>
  </chain_of_thought>
  <reflection_points>
    <domain></domain>
    <ideal_expert></ideal_expert>
    <needed_information></needed_information>
  </reflection_points>
</prompt>

BELOW IS THE SAMPLE PROMPT:

{context}
"#;

const PERSONA_TEMPLATE: &str = r#"<persona>
  {expert_persona}
</persona>
<objective>Provide a comprehensive, accurate explanation demonstrating a
strong understanding of the fundamental principles involved.</objective>
<accuracy_emphasis>It is critical that the information you provide is accurate
and based on verifiable knowledge. If you are uncertain about any aspect,
state the uncertainty explicitly rather than fabricating details.</accuracy_emphasis>
<format_preference>Structure the explanation in clear paragraphs, using bullet
points where they help.</format_preference>"#;

/// Extract the content between the last `<tag>` and its matching `</tag>`.
///
/// Mirrors the tolerant scanning the helper models are prompted for: a
/// missing opening tag yields `None`, a missing closing tag yields everything
/// after the opening one.
pub(crate) fn extract_tagged(text: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = text.rfind(&open)? + open.len();
    let rest = &text[start..];
    let extracted = match rest.find(&close) {
        Some(end) => &rest[..end],
        None => rest,
    };
    Some(extracted.trim().to_string())
}

/// Enrichment stage backed by a (typically smaller/faster) helper backend.
pub struct Enricher {
    helper: Arc<dyn InferenceBackend>,
    params: CompletionParams,
}

impl Enricher {
    pub fn new(helper: Arc<dyn InferenceBackend>, params: CompletionParams) -> Self {
        Self { helper, params }
    }

    async fn helper_call(&self, prompt: String) -> Result<String> {
        let result = self
            .helper
            .complete(&[Message::user(prompt)], &self.params)
            .await?;
        Ok(result.content)
    }

    /// Stage (a): elaborate the latest user request into a refined prompt.
    async fn elaborate(&self, latest: &str) -> Result<Option<String>> {
        let prompt = ELABORATION_TEMPLATE.replace("{user_request}", latest);
        let response = self.helper_call(prompt).await?;
        // No opening tag at all: the model answered in the clear, use it as-is.
        let refined = extract_tagged(&response, "refined_prompt")
            .unwrap_or_else(|| response.trim().to_string());
        Ok((!refined.is_empty()).then_some(refined))
    }

    /// Stage (b): classify the enriched request into domain + ideal expert.
    async fn classify(&self, enriched: &str) -> Result<Option<(Option<String>, String)>> {
        let prompt = CLASSIFICATION_TEMPLATE.replace("{context}", enriched);
        let response = self.helper_call(prompt).await?;
        let Some(block) = extract_tagged(&response, "reflection_points") else {
            return Ok(None);
        };
        let Some(expert) = extract_tagged(&block, "ideal_expert") else {
            return Ok(None);
        };
        if expert.is_empty() {
            return Ok(None);
        }
        let domain = extract_tagged(&block, "domain").filter(|d| !d.is_empty());
        Ok(Some((domain, expert)))
    }
}

#[async_trait]
impl Interceptor for Enricher {
    fn name(&self) -> &'static str {
        "enricher"
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
            .cloned()
        else {
            return Ok(());
        };

        let enriched = match self.elaborate(&latest.content).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                debug!(stage = self.name(), "no enriched content generated, passing through");
                return Ok(());
            }
            Err(e) => {
                warn!(stage = self.name(), error = %e, "elaboration call failed, passing through");
                return Ok(());
            }
        };

        let (domain, expert) = match self.classify(&enriched).await {
            Ok(Some(parts)) => parts,
            Ok(None) => {
                debug!(stage = self.name(), "no expert persona generated, passing through");
                return Ok(());
            }
            Err(e) => {
                warn!(stage = self.name(), error = %e, "classification call failed, passing through");
                return Ok(());
            }
        };

        // Stage (c): all sub-calls succeeded, mutate the context in one go.
        if let Some(last) = ctx
            .working_messages
            .iter_mut()
            .rev()
            .find(|m| m.role == MessageRole::User)
        {
            last.content = enriched;
        }
        let persona = PERSONA_TEMPLATE.replace("{expert_persona}", &expert);
        ctx.working_messages.insert(0, Message::system(persona));
        if let Some(domain) = domain {
            ctx.metadata
                .insert("enricher.domain".to_string(), serde_json::Value::String(domain));
        }
        Ok(())
    }
}
