//! Token estimation used for the summarization trigger.
//!
//! The gateway never needs exact token counts, only a stable estimate to
//! decide when history is worth compressing, so a character-ratio heuristic
//! is enough here.

use crate::types::Message;

pub trait TokenEstimator: Send + Sync {
    fn count(&self, text: &str) -> usize;

    /// Estimate a whole message list, including a small per-message overhead
    /// for role framing.
    fn count_messages(&self, messages: &[Message]) -> usize {
        let mut total = 0;
        for message in messages {
            total += self.count(&message.content);
        }
        total + messages.len() * 3
    }
}

/// Default estimator: ~4 characters per token.
#[derive(Debug, Clone)]
pub struct CharacterEstimator {
    chars_per_token: f64,
}

impl CharacterEstimator {
    pub fn new() -> Self {
        Self::with_ratio(4.0)
    }

    pub fn with_ratio(r: f64) -> Self {
        Self { chars_per_token: r }
    }
}

impl Default for CharacterEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator for CharacterEstimator {
    fn count(&self, text: &str) -> usize {
        (text.len() as f64 / self.chars_per_token).ceil() as usize
    }
}
