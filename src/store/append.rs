//! Boundary to the underlying keyed append engine.
//!
//! The SQL engine itself is external; the core only requires an append-only
//! keyspace keyed by [`MessageHash`] plus a (sequence, ordinal) linkage table.
//! [`MemoryAppendStore`] is the in-process reference implementation used by
//! tests and single-node deployments without persistence.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::hash::MessageHash;
use crate::store::SequenceId;
use crate::types::MessageRole;
use crate::Result;

/// One row of the content table. Never updated or deleted once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRecord {
    pub role: MessageRole,
    pub content: String,
    pub first_seen_ms: u64,
}

/// Append-only keyed store the conversation log is built on.
///
/// Implementations must never rewrite an existing turn row; `put_turn` for a
/// hash that is already present is a no-op returning `false`.
#[async_trait]
pub trait AppendStore: Send + Sync {
    /// Insert a content row if the hash is absent. Returns `true` when the
    /// row was newly written.
    async fn put_turn(
        &self,
        hash: MessageHash,
        role: MessageRole,
        content: &str,
        first_seen_ms: u64,
    ) -> Result<bool>;

    async fn get_turn(&self, hash: MessageHash) -> Result<Option<TurnRecord>>;

    /// Record that `sequence` references `hash` at position `ordinal`.
    async fn put_link(&self, sequence: SequenceId, ordinal: u32, hash: MessageHash) -> Result<()>;

    /// Ordinal-ordered hash list for one sequence. Empty for unknown ids.
    async fn links(&self, sequence: SequenceId) -> Result<Vec<MessageHash>>;

    /// All sequence ids with at least one link.
    async fn sequence_ids(&self) -> Result<Vec<SequenceId>>;
}

#[derive(Default)]
struct MemoryInner {
    turns: HashMap<MessageHash, TurnRecord>,
    links: HashMap<SequenceId, Vec<MessageHash>>,
}

/// In-memory reference implementation of [`AppendStore`].
#[derive(Default)]
pub struct MemoryAppendStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryAppendStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct content rows (test observability).
    pub async fn turn_count(&self) -> usize {
        self.inner.read().await.turns.len()
    }

    /// Number of linkage rows across all sequences (test observability).
    pub async fn link_count(&self) -> usize {
        self.inner.read().await.links.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl AppendStore for MemoryAppendStore {
    async fn put_turn(
        &self,
        hash: MessageHash,
        role: MessageRole,
        content: &str,
        first_seen_ms: u64,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.turns.contains_key(&hash) {
            return Ok(false);
        }
        inner.turns.insert(
            hash,
            TurnRecord {
                role,
                content: content.to_string(),
                first_seen_ms,
            },
        );
        Ok(true)
    }

    async fn get_turn(&self, hash: MessageHash) -> Result<Option<TurnRecord>> {
        Ok(self.inner.read().await.turns.get(&hash).cloned())
    }

    async fn put_link(&self, sequence: SequenceId, ordinal: u32, hash: MessageHash) -> Result<()> {
        let mut inner = self.inner.write().await;
        let links = inner.links.entry(sequence).or_default();
        // Links arrive in ordinal order under the per-sequence append lock.
        debug_assert_eq!(links.len() as u32, ordinal);
        links.push(hash);
        Ok(())
    }

    async fn links(&self, sequence: SequenceId) -> Result<Vec<MessageHash>> {
        Ok(self
            .inner
            .read()
            .await
            .links
            .get(&sequence)
            .cloned()
            .unwrap_or_default())
    }

    async fn sequence_ids(&self) -> Result<Vec<SequenceId>> {
        Ok(self.inner.read().await.links.keys().copied().collect())
    }
}
