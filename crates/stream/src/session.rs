//! Session state as observed by callers.

use answerflow_core::request::RequestId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One question/answer exchange, from start to terminal state.
///
/// `accumulated_text` is what the caller displays. `final_text` and
/// `metadata` are only set on completion and are what gets cached; the two
/// texts may differ if the service rewrote its answer at the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingSession {
    pub request_id: RequestId,
    pub accumulated_text: String,
    pub fragment_count: u64,
    pub phase: Phase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StreamingSession {
    /// A freshly started session: active, with no text yet.
    pub fn active(request_id: RequestId) -> Self {
        Self {
            request_id,
            accumulated_text: String::new(),
            fragment_count: 0,
            phase: Phase::Active,
            final_text: None,
            metadata: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// The text and metadata to persist, if the session completed.
    pub fn completion(&self) -> Option<(&str, &serde_json::Value)> {
        match (self.phase, &self.final_text, &self.metadata) {
            (Phase::Completed, Some(text), Some(metadata)) => Some((text.as_str(), metadata)),
            _ => None,
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}
