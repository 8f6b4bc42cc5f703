//! Dedup-aware, append-only conversation log.
//!
//! Each distinct (role, content) pair is stored exactly once, keyed by its
//! [`MessageHash`]; conversations are ordered lists of hashes ("sequences").
//! Two conversations sharing a prefix share the stored turns by reference, so
//! storage grows with distinct content rather than with distinct
//! conversations. Sequences are append-only branches: divergence creates a
//! new sequence, it never edits an existing one.

pub mod append;

pub use append::{AppendStore, MemoryAppendStore, TurnRecord};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::hash::MessageHash;
use crate::types::Message;
use crate::Result;

/// Identifier of one conversation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceId(Uuid);

impl SequenceId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SequenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One persisted conversation turn, reconstructed from the content row plus
/// its (sequence, ordinal) linkage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTurn {
    pub hash: MessageHash,
    pub role: crate::types::MessageRole,
    pub content: String,
    pub first_seen_ms: u64,
    pub sequence_id: SequenceId,
    pub ordinal: u32,
}

/// Conversation log over an [`AppendStore`].
///
/// Appends within one sequence are serialized by a per-sequence lock so
/// ordinals stay dense; different sequences append independently.
pub struct ConversationStore {
    store: Arc<dyn AppendStore>,
    /// Serializes sequence resolution/creation so concurrent requests with the
    /// same prefix converge on one sequence.
    resolve_lock: Mutex<()>,
    seq_locks: Mutex<HashMap<SequenceId, Arc<Mutex<()>>>>,
}

impl ConversationStore {
    pub fn new(store: Arc<dyn AppendStore>) -> Self {
        Self {
            store,
            resolve_lock: Mutex::new(()),
            seq_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn seq_lock(&self, sequence: SequenceId) -> Arc<Mutex<()>> {
        let mut locks = self.seq_locks.lock().await;
        locks.entry(sequence).or_default().clone()
    }

    /// Drop the map entry once no other append holds the lock, so the map is
    /// bounded by in-flight appends rather than by sequences ever seen.
    async fn release_seq_lock(&self, sequence: SequenceId, lock: Arc<Mutex<()>>) {
        let mut locks = self.seq_locks.lock().await;
        if let Some(entry) = locks.get(&sequence) {
            // Two strong references mean ours plus the map's; any concurrent
            // appender would hold a third.
            if Arc::ptr_eq(entry, &lock) && Arc::strong_count(entry) == 2 {
                locks.remove(&sequence);
            }
        }
    }

    /// Sequences with an append in flight (test observability).
    pub async fn inflight_appends(&self) -> usize {
        self.seq_locks.lock().await.len()
    }

    /// Resolve the sequence a hash list belongs to.
    ///
    /// A request continues an existing sequence when that sequence's hash
    /// list is a prefix of (or equal to) the request's; the longest such
    /// match wins. Anything else (divergence at position `k`, or a request
    /// shorter than every sequence it overlaps) is a new conversation path:
    /// a fresh sequence is created whose first `k` links reference the turns
    /// it shares with the closest existing sequence, never copying content.
    pub async fn sequence_for(&self, hashes: &[MessageHash]) -> Result<SequenceId> {
        let _guard = self.resolve_lock.lock().await;

        let mut best_continuation: Option<(usize, SequenceId)> = None;
        let mut best_shared_prefix: usize = 0;

        for id in self.store.sequence_ids().await? {
            let links = self.store.links(id).await?;
            let common = shared_prefix_len(&links, hashes);
            if common == links.len() && links.len() <= hashes.len() {
                // The request extends (or exactly matches) this sequence.
                if best_continuation.map(|(n, _)| common > n).unwrap_or(true) {
                    best_continuation = Some((common, id));
                }
            }
            best_shared_prefix = best_shared_prefix.max(common.min(hashes.len()));
        }

        if let Some((_, id)) = best_continuation {
            return Ok(id);
        }

        // Branch (or brand new) path: a fresh sequence referencing the shared
        // prefix turns by hash. Content rows already exist for them.
        let id = SequenceId::new();
        for (ordinal, hash) in hashes.iter().take(best_shared_prefix).enumerate() {
            self.store.put_link(id, ordinal as u32, *hash).await?;
        }
        Ok(id)
    }

    /// Append one message to a sequence.
    ///
    /// If a turn with the same hash exists anywhere in the store only the
    /// (sequence, ordinal) linkage is written; stored content is never
    /// rewritten.
    pub async fn append(&self, sequence: SequenceId, message: &Message) -> Result<StoredTurn> {
        let lock = self.seq_lock(sequence).await;
        let result = self.append_locked(sequence, message, &lock).await;
        self.release_seq_lock(sequence, lock).await;
        result
    }

    async fn append_locked(
        &self,
        sequence: SequenceId,
        message: &Message,
        lock: &Mutex<()>,
    ) -> Result<StoredTurn> {
        let _guard = lock.lock().await;

        let hash = MessageHash::of_message(message);
        let now = now_millis();
        let ordinal = self.store.links(sequence).await?.len() as u32;

        let inserted = self
            .store
            .put_turn(hash, message.role, &message.content, now)
            .await?;
        self.store.put_link(sequence, ordinal, hash).await?;

        let record = if inserted {
            TurnRecord {
                role: message.role,
                content: message.content.clone(),
                first_seen_ms: now,
            }
        } else {
            // Deduplicated: return the existing content row.
            self.store.get_turn(hash).await?.ok_or_else(|| {
                crate::Error::storage(
                    "turn row vanished between put and get",
                    crate::ErrorContext::new()
                        .with_details(hash.to_hex())
                        .with_source("conversation_store"),
                )
            })?
        };

        Ok(StoredTurn {
            hash,
            role: record.role,
            content: record.content,
            first_seen_ms: record.first_seen_ms,
            sequence_id: sequence,
            ordinal,
        })
    }

    /// Number of turns already linked into a sequence.
    pub async fn linked_len(&self, sequence: SequenceId) -> Result<usize> {
        Ok(self.store.links(sequence).await?.len())
    }

    /// Reconstruct the full conversation in ordinal order. Read-only.
    pub async fn history(&self, sequence: SequenceId) -> Result<Vec<StoredTurn>> {
        let links = self.store.links(sequence).await?;
        let records =
            futures::future::try_join_all(links.iter().map(|hash| self.store.get_turn(*hash)))
                .await?;
        links
            .into_iter()
            .zip(records)
            .enumerate()
            .map(|(ordinal, (hash, record))| {
                let record = record.ok_or_else(|| {
                    crate::Error::storage(
                        "sequence links a turn that is missing from the content table",
                        crate::ErrorContext::new()
                            .with_details(hash.to_hex())
                            .with_source("conversation_store"),
                    )
                })?;
                Ok(StoredTurn {
                    hash,
                    role: record.role,
                    content: record.content,
                    first_seen_ms: record.first_seen_ms,
                    sequence_id: sequence,
                    ordinal: ordinal as u32,
                })
            })
            .collect()
    }
}

fn shared_prefix_len(a: &[MessageHash], b: &[MessageHash]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
