//! Structured configuration consumed by the gateway core.
//!
//! The file/YAML loading itself is owned by the embedding process; this
//! module only defines the shape, the defaults, and a convenience
//! [`GatewayConfig::from_yaml`] for hosts that hand us raw YAML text.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Error, ErrorContext, Result};

/// Top-level configuration object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Main model served by the local backend.
    pub model: ModelConfig,
    /// Optional draft model enabling speculative decoding.
    #[serde(default)]
    pub draft_model: Option<ModelConfig>,
    #[serde(default)]
    pub sampling: SamplingDefaults,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl GatewayConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| {
            Error::invalid_request(
                format!("failed to parse gateway configuration: {}", e),
                ErrorContext::new().with_source("config"),
            )
        })
    }
}

/// Parameters for one loaded model instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_path: String,
    /// Context window size in tokens (llama.cpp `n_ctx`).
    #[serde(default = "default_context_size")]
    pub context_size: u32,
    /// Number of layers offloaded to the GPU (llama.cpp `n_gpu_layers`).
    #[serde(default)]
    pub gpu_layer_offload: u32,
}

fn default_context_size() -> u32 {
    4096
}

/// Sampling defaults applied when the inbound request does not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingDefaults {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

fn default_max_tokens() -> u32 {
    32768
}
fn default_temperature() -> f32 {
    0.6
}
fn default_top_p() -> f32 {
    0.95
}

impl Default for SamplingDefaults {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
        }
    }
}

/// Interceptor chain order and per-stage thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Stages executed in order during the pre phase. The recorder always
    /// also runs in the post phase.
    #[serde(default = "default_stages")]
    pub stages: Vec<StageKind>,
    /// History size (estimated tokens) beyond which the summarizer compresses
    /// the conversation prefix.
    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold_tokens: usize,
    /// Number of most recent turns the summarizer keeps verbatim.
    #[serde(default = "default_summarize_keep_recent")]
    pub summarize_keep_recent: usize,
    /// Passages requested from the retrieval capability per call.
    #[serde(default = "default_rag_top_k")]
    pub rag_top_k: usize,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Budget for the whole pipeline traversal, including the backend call.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_stages() -> Vec<StageKind> {
    vec![
        StageKind::Recorder,
        StageKind::Enricher,
        StageKind::Summarizer,
        StageKind::RagAugmenter,
    ]
}
fn default_summarize_threshold() -> usize {
    3072
}
fn default_summarize_keep_recent() -> usize {
    4
}
fn default_rag_top_k() -> usize {
    3
}
fn default_request_timeout_ms() -> u64 {
    120_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: default_stages(),
            summarize_threshold_tokens: default_summarize_threshold(),
            summarize_keep_recent: default_summarize_keep_recent(),
            rag_top_k: default_rag_top_k(),
            retry: RetryConfig::default(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Closed set of configurable stages; assembled into an explicit ordered list
/// at startup, never dispatched by name at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Recorder,
    Enricher,
    Summarizer,
    RagAugmenter,
}

/// Backoff knobs for `BackendUnavailable` retries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u32,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u32,
}

fn default_max_retries() -> u32 {
    2
}
fn default_min_delay_ms() -> u32 {
    200
}
fn default_max_delay_ms() -> u32 {
    5_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}
