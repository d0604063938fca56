//! Cache entry types.
//!
//! One [`CacheEntry`] exists per (assessment, control) pair. It holds the most
//! recent completed answer and a short FIFO history of question/answer turns.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Composite cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub assessment_id: String,
    pub control_id: String,
}

impl CacheKey {
    pub fn new(assessment_id: impl Into<String>, control_id: impl Into<String>) -> Self {
        Self {
            assessment_id: assessment_id.into(),
            control_id: control_id.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.assessment_id, self.control_id)
    }
}

/// A completed answer as it was persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub content: String,

    #[serde(default)]
    pub metadata: serde_json::Value,

    /// When the answer was stored
    pub timestamp: DateTime<Utc>,
}

impl CachedAnswer {
    /// Whether the answer is still inside its validity window at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.timestamp < ttl
    }
}

/// One recorded question/answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_answer: Option<CachedAnswer>,

    /// Oldest first
    #[serde(default)]
    pub conversation_history: VecDeque<ConversationTurn>,

    /// Last write to this entry. Does not affect expiry.
    pub last_accessed: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            latest_answer: None,
            conversation_history: VecDeque::new(),
            last_accessed: now,
        }
    }

    /// The latest answer, unless it has outlived `ttl`.
    pub fn fresh_answer(&self, now: DateTime<Utc>, ttl: Duration) -> Option<&CachedAnswer> {
        self.latest_answer
            .as_ref()
            .filter(|answer| answer.is_fresh(now, ttl))
    }

    /// Append a turn, dropping the oldest ones beyond `max_history`.
    ///
    /// Returns how many turns were evicted.
    pub fn push_turn(&mut self, turn: ConversationTurn, max_history: usize) -> usize {
        self.conversation_history.push_back(turn);
        let mut evicted = 0;
        while self.conversation_history.len() > max_history {
            self.conversation_history.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn is_empty(&self) -> bool {
        self.latest_answer.is_none() && self.conversation_history.is_empty()
    }
}
