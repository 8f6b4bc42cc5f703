//! 请求处理流水线：状态机驱动的请求编排引擎。
//!
//! # Request Orchestration Layer
//!
//! One request traverses an explicit state machine:
//!
//! ```text
//! Received → PreProcessing → BackendCall → PostProcessing → Completed
//!     │            │              │
//!     └────────────┴──────────────┴──────────────→ Failed
//! ```
//!
//! Every transition is traced. Degradable stage failures (interceptor and
//! storage errors) are logged and swallowed during pre processing; a
//! `BackendUnavailable` result is retried with exponential backoff; and the
//! post phase runs after every backend call, success or failure, so the
//! recorder always sees the outcome.

mod retry;

pub use retry::{ResiliencePolicy, RetryPolicy};

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{BackendResult, CompletionParams, InferenceBackend};
use crate::config::PipelineConfig;
use crate::interceptor::{Interceptor, InterceptorContext, Phase};
use crate::types::Message;
use crate::{Error, ErrorContext, Result};

/// Lifecycle of one request inside the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    PreProcessing,
    BackendCall,
    PostProcessing,
    Completed,
    Failed,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Received => "received",
            RequestState::PreProcessing => "pre_processing",
            RequestState::BackendCall => "backend_call",
            RequestState::PostProcessing => "post_processing",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrates one request through the interceptor chain and the backend.
pub struct Pipeline {
    stages: Vec<Arc<dyn Interceptor>>,
    backend: Arc<dyn InferenceBackend>,
    /// Named alternates selectable by a pre-phase stage through
    /// [`InterceptorContext::backend_selection`].
    alternates: HashMap<String, Arc<dyn InferenceBackend>>,
    policy: RetryPolicy,
    timeout: std::time::Duration,
}

impl Pipeline {
    pub fn new(
        stages: Vec<Arc<dyn Interceptor>>,
        backend: Arc<dyn InferenceBackend>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            stages,
            backend,
            alternates: HashMap::new(),
            policy: RetryPolicy::new(config.retry),
            timeout: config.request_timeout(),
        }
    }

    pub fn with_alternate(
        mut self,
        name: impl Into<String>,
        backend: Arc<dyn InferenceBackend>,
    ) -> Self {
        self.alternates.insert(name.into(), backend);
        self
    }

    fn transition(&self, request_id: &str, state: RequestState) {
        debug!(request_id, state = %state, "pipeline transition");
    }

    /// Run one request end to end.
    ///
    /// The timeout budget covers pre processing and the backend call with all
    /// its retries. Post processing runs outside the budget so the recorder
    /// observes the outcome even when the budget is exhausted.
    pub async fn execute(
        &self,
        request_id: &str,
        messages: Vec<Message>,
        params: CompletionParams,
    ) -> Result<BackendResult> {
        self.transition(request_id, RequestState::Received);
        if messages.is_empty() {
            self.transition(request_id, RequestState::Failed);
            return Err(Error::invalid_request(
                "request contains no messages",
                ErrorContext::new().with_field_path("messages"),
            ));
        }
        let mut ctx = InterceptorContext::new(messages);

        let outcome = match tokio::time::timeout(
            self.timeout,
            self.run_until_backend(request_id, &mut ctx, &params),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::backend_unavailable(
                format!("request exceeded its {}ms budget", self.timeout.as_millis()),
                false,
                ErrorContext::new().with_source("pipeline"),
            )),
        };

        let error = match outcome {
            Ok(result) => {
                ctx.response = Some(result);
                None
            }
            Err(e) => {
                ctx.failure = Some(e.to_string());
                Some(e)
            }
        };

        // Post phase is unconditional so the outbound result (or the failure)
        // always reaches the recorder.
        self.transition(request_id, RequestState::PostProcessing);
        for stage in &self.stages {
            if let Err(e) = stage.process(&mut ctx, Phase::Post).await {
                self.tolerate(request_id, stage.name(), Phase::Post, e)?;
            }
        }

        match error {
            None => {
                self.transition(request_id, RequestState::Completed);
                ctx.response.ok_or_else(|| {
                    Error::backend_unavailable(
                        "response lost during post processing",
                        false,
                        ErrorContext::new().with_source("pipeline"),
                    )
                })
            }
            Some(e) => {
                self.transition(request_id, RequestState::Failed);
                Err(e)
            }
        }
    }

    async fn run_until_backend(
        &self,
        request_id: &str,
        ctx: &mut InterceptorContext,
        params: &CompletionParams,
    ) -> Result<BackendResult> {
        self.transition(request_id, RequestState::PreProcessing);
        for stage in &self.stages {
            if let Err(e) = stage.process(ctx, Phase::Pre).await {
                self.tolerate(request_id, stage.name(), Phase::Pre, e)?;
            }
        }

        self.transition(request_id, RequestState::BackendCall);
        let backend = match &ctx.backend_selection {
            Some(name) => self.alternates.get(name).unwrap_or(&self.backend),
            None => &self.backend,
        };

        let mut attempt = 0u32;
        loop {
            match backend.complete(&ctx.working_messages, params).await {
                Ok(result) => {
                    info!(
                        request_id,
                        backend = backend.name(),
                        attempt,
                        finish_reason = result.finish_reason.as_str(),
                        "backend call succeeded"
                    );
                    return Ok(result);
                }
                Err(e) => match self.policy.should_retry(attempt, &e).await {
                    Some(delay) => {
                        warn!(
                            request_id,
                            backend = backend.name(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "backend call failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(e),
                },
            }
        }
    }

    /// Degradable errors never fail the request; anything else does.
    fn tolerate(
        &self,
        request_id: &str,
        stage: &str,
        phase: Phase,
        error: Error,
    ) -> Result<()> {
        match error {
            Error::InterceptorDegraded { .. } | Error::Storage { .. } => {
                warn!(request_id, stage, ?phase, error = %error, "stage degraded, continuing");
                Ok(())
            }
            other => Err(other),
        }
    }
}
