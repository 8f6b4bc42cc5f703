//! Deterministic message identity hashing.
//!
//! Every distinct (role, content) pair maps to exactly one [`MessageHash`];
//! the store keys all deduplication on it. There is no collision-recovery
//! path: a SHA-256 collision would silently deduplicate two different
//! messages, which is an accepted risk at this digest width.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::message::{Message, MessageRole};

/// Content hash identifying one chat message.
///
/// Stable across process restarts: no random seeding, no per-run salt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageHash([u8; 32]);

impl MessageHash {
    /// Hash a (role, content) pair. Pure function, no side effects.
    ///
    /// The role tag and a NUL separator are folded into the digest so that
    /// e.g. ("user", "x") and ("system", "x") never collide.
    pub fn of(role: MessageRole, content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(role.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(content.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn of_message(message: &Message) -> Self {
        Self::of(message.role, &message.content)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form, used as the storage key.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl std::fmt::Display for MessageHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
