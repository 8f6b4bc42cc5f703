//! End-to-end flows through the gateway core with a stubbed backend.

use async_trait::async_trait;
use std::sync::Arc;

use promptgate::backend::{BackendResult, CompletionParams, FinishReason, InferenceBackend, TokenUsage};
use promptgate::config::GatewayConfig;
use promptgate::gateway::{ChatCompletionRequest, Gateway, WireMessage};
use promptgate::hash::MessageHash;
use promptgate::store::{AppendStore, ConversationStore, MemoryAppendStore, SequenceId, TurnRecord};
use promptgate::types::{Message, MessageRole};
use promptgate::{Error, ErrorContext, Result};

struct StaticBackend {
    reply: &'static str,
}

#[async_trait]
impl InferenceBackend for StaticBackend {
    async fn complete(
        &self,
        _messages: &[Message],
        _params: &CompletionParams,
    ) -> Result<BackendResult> {
        Ok(BackendResult {
            content: self.reply.to_string(),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage {
                prompt_tokens: 4,
                completion_tokens: 2,
                total_tokens: 6,
            },
            draft_acceptance: None,
        })
    }

    fn name(&self) -> &str {
        "static"
    }
}

struct DownBackend;

#[async_trait]
impl InferenceBackend for DownBackend {
    async fn complete(
        &self,
        _messages: &[Message],
        _params: &CompletionParams,
    ) -> Result<BackendResult> {
        Err(Error::backend_unavailable(
            "provider melted",
            false,
            ErrorContext::new(),
        ))
    }

    fn name(&self) -> &str {
        "down"
    }
}

/// Store whose every operation fails, for exercising the non-blocking
/// recording policy.
struct BrokenStore;

#[async_trait]
impl AppendStore for BrokenStore {
    async fn put_turn(
        &self,
        _hash: MessageHash,
        _role: MessageRole,
        _content: &str,
        _first_seen_ms: u64,
    ) -> Result<bool> {
        Err(Error::storage("disk gone", ErrorContext::new()))
    }

    async fn get_turn(&self, _hash: MessageHash) -> Result<Option<TurnRecord>> {
        Err(Error::storage("disk gone", ErrorContext::new()))
    }

    async fn put_link(
        &self,
        _sequence: SequenceId,
        _ordinal: u32,
        _hash: MessageHash,
    ) -> Result<()> {
        Err(Error::storage("disk gone", ErrorContext::new()))
    }

    async fn links(&self, _sequence: SequenceId) -> Result<Vec<MessageHash>> {
        Err(Error::storage("disk gone", ErrorContext::new()))
    }

    async fn sequence_ids(&self) -> Result<Vec<SequenceId>> {
        Err(Error::storage("disk gone", ErrorContext::new()))
    }
}

fn recorder_only_config() -> GatewayConfig {
    GatewayConfig::from_yaml(
        "model:\n  model_path: /models/main.gguf\npipeline:\n  stages: [recorder]\n",
    )
    .unwrap()
}

fn user_request(content: &str) -> ChatCompletionRequest {
    ChatCompletionRequest {
        messages: vec![WireMessage {
            role: "user".into(),
            content: content.into(),
        }],
        model: None,
        max_tokens: None,
        temperature: None,
        top_p: None,
        stream: None,
    }
}

#[tokio::test]
async fn single_request_is_answered_and_recorded() {
    let mem = Arc::new(MemoryAppendStore::new());
    let store = Arc::new(ConversationStore::new(mem.clone()));
    let gateway = Gateway::builder(recorder_only_config(), Arc::new(StaticBackend { reply: "hi!" }))
        .store(store)
        .build();

    let response = gateway.handle(user_request("hello")).await.unwrap();

    assert!(response.id.starts_with("chatcmpl-"));
    assert_eq!(response.choices[0].message.content, "hi!");
    assert_eq!(response.choices[0].finish_reason, "stop");

    // Inbound user turn plus outbound assistant turn.
    assert_eq!(mem.turn_count().await, 2);
    assert_eq!(mem.link_count().await, 2);
}

#[tokio::test]
async fn repeated_request_stores_content_once_but_links_twice() {
    let mem = Arc::new(MemoryAppendStore::new());
    let store = Arc::new(ConversationStore::new(mem.clone()));
    let gateway = Gateway::builder(recorder_only_config(), Arc::new(StaticBackend { reply: "hi!" }))
        .store(store)
        .build();

    gateway.handle(user_request("hello")).await.unwrap();
    gateway.handle(user_request("hello")).await.unwrap();

    // Two requests, two conversation paths, but only two distinct content
    // rows (the shared user turn and the shared assistant reply). The second
    // path references the same rows through its own links.
    assert_eq!(mem.turn_count().await, 2);
    assert_eq!(mem.link_count().await, 4);
}

#[tokio::test]
async fn multi_turn_request_continues_the_same_sequence() {
    let mem = Arc::new(MemoryAppendStore::new());
    let store = Arc::new(ConversationStore::new(mem.clone()));
    let gateway = Gateway::builder(recorder_only_config(), Arc::new(StaticBackend { reply: "a1" }))
        .store(store)
        .build();

    gateway.handle(user_request("u1")).await.unwrap();

    // Client sends the full transcript back plus a new turn.
    let followup = ChatCompletionRequest {
        messages: vec![
            WireMessage { role: "user".into(), content: "u1".into() },
            WireMessage { role: "assistant".into(), content: "a1".into() },
            WireMessage { role: "user".into(), content: "u2".into() },
        ],
        model: None,
        max_tokens: None,
        temperature: None,
        top_p: None,
        stream: None,
    };
    gateway.handle(followup).await.unwrap();

    // u1, a1, u2 and the second a1 reply deduplicates onto the first.
    assert_eq!(mem.turn_count().await, 3);
    // One conversation path: u1 a1 u2 a1.
    assert_eq!(mem.link_count().await, 4);
}

#[tokio::test]
async fn broken_store_never_blocks_the_response() {
    let store = Arc::new(ConversationStore::new(Arc::new(BrokenStore)));
    let gateway = Gateway::builder(recorder_only_config(), Arc::new(StaticBackend { reply: "hi!" }))
        .store(store)
        .build();

    let response = gateway.handle(user_request("hello")).await.unwrap();
    assert_eq!(response.choices[0].message.content, "hi!");
}

#[tokio::test]
async fn backend_failure_is_linked_into_the_conversation() {
    let mem = Arc::new(MemoryAppendStore::new());
    let store = Arc::new(ConversationStore::new(mem.clone()));
    let gateway = Gateway::builder(recorder_only_config(), Arc::new(DownBackend))
        .store(store.clone())
        .build();

    let err = gateway.handle(user_request("hello")).await.unwrap_err();
    assert!(matches!(err, Error::BackendUnavailable { .. }));

    // The outbound failure is itself part of the record: the user turn plus
    // a tool-role failure marker on the same sequence.
    let sequences = mem.sequence_ids().await.unwrap();
    assert_eq!(sequences.len(), 1);
    let history = store.history(sequences[0]).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "hello");
    assert_eq!(history[1].role, MessageRole::Tool);
    assert!(history[1].content.contains("provider melted"));
}

#[tokio::test]
async fn unknown_role_is_rejected_before_any_processing() {
    let mem = Arc::new(MemoryAppendStore::new());
    let store = Arc::new(ConversationStore::new(mem.clone()));
    let gateway = Gateway::builder(recorder_only_config(), Arc::new(StaticBackend { reply: "hi!" }))
        .store(store)
        .build();

    let request = ChatCompletionRequest {
        messages: vec![WireMessage {
            role: "oracle".into(),
            content: "tell me".into(),
        }],
        model: None,
        max_tokens: None,
        temperature: None,
        top_p: None,
        stream: None,
    };
    let err = gateway.handle(request).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest { .. }));
    assert_eq!(mem.turn_count().await, 0);
}
