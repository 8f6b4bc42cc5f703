//! promptgate：OpenAI 兼容的本地推理网关核心。
//!
//! # PromptGate
//!
//! Transport-agnostic core of an OpenAI-compatible inference gateway. One
//! request enters through the [`gateway`] module, traverses an ordered
//! interceptor chain (conversation recording, prompt enrichment, history
//! summarization, retrieval augmentation), is answered by a local or remote
//! [`backend`], and leaves as a familiar chat completion envelope.
//!
//! ## Module Map
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`gateway`] | OpenAI-shaped request/response entry point |
//! | [`pipeline`] | State machine orchestrating one request |
//! | [`interceptor`] | Pre/post stages that observe or rewrite a request |
//! | [`backend`] | Local, remote and speculative inference backends |
//! | [`store`] | Dedup-aware append-only conversation log |
//! | [`hash`] | Content-addressed message hashing |
//! | [`tokens`] | Heuristic token estimation |
//! | [`config`] | Configuration shapes and defaults |
//! | [`error`] | Error taxonomy and context |
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use promptgate::config::GatewayConfig;
//! use promptgate::gateway::{ChatCompletionRequest, Gateway, WireMessage};
//! use promptgate::store::{ConversationStore, MemoryAppendStore};
//!
//! # async fn run(backend: Arc<dyn promptgate::backend::InferenceBackend>) -> promptgate::Result<()> {
//! let config = GatewayConfig::from_yaml("model:\n  model_path: /models/main.gguf\n")?;
//! let store = Arc::new(ConversationStore::new(Arc::new(MemoryAppendStore::new())));
//! let gateway = Gateway::builder(config, backend).store(store).build();
//!
//! let response = gateway
//!     .handle(ChatCompletionRequest {
//!         messages: vec![WireMessage { role: "user".into(), content: "hello".into() }],
//!         model: None,
//!         max_tokens: None,
//!         temperature: None,
//!         top_p: None,
//!         stream: None,
//!     })
//!     .await?;
//! println!("{}", response.choices[0].message.content);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod hash;
pub mod interceptor;
pub mod pipeline;
pub mod store;
pub mod tokens;
pub mod types;

pub use error::{Error, ErrorContext};

/// Install the default tracing subscriber. Respects `RUST_LOG`; defaults to
/// `info`. Idempotent, so library consumers and tests may both call it.
pub fn init_tracing() {
    static INIT: once_cell::sync::OnceCell<()> = once_cell::sync::OnceCell::new();
    INIT.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

pub use backend::{BackendResult, CompletionParams, FinishReason, InferenceBackend, TokenUsage};
pub use gateway::{ChatCompletionRequest, ChatCompletionResponse, Gateway};
pub use hash::MessageHash;
pub use store::{ConversationStore, MemoryAppendStore, SequenceId};
pub use types::{Message, MessageRole};
