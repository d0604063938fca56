//! Error types for the AnswerFlow domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all AnswerFlow operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Transport errors ---
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // --- Cache errors ---
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    // --- Stream consumer errors ---
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures reported by (or while opening) a chunked exchange.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Answering service unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed transport event: {0}")]
    Protocol(String),
}

/// Failures of the response cache's backing storage.
///
/// A missing or expired key is never an error; only an unusable store is.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Stored cache document is corrupted: {0}")]
    Corrupted(String),
}

/// Failures observed through a session handle.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    #[error("Session {request_id} was superseded before it finished")]
    Superseded { request_id: String },

    #[error("Stream task aborted: {0}")]
    Aborted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_displays_correctly() {
        let err = Error::Transport(TransportError::Unavailable("recording has no events".into()));
        assert!(err.to_string().contains("unavailable"));
        assert!(err.to_string().contains("recording has no events"));
    }

    #[test]
    fn stream_error_names_the_session() {
        let err = Error::Stream(StreamError::Superseded {
            request_id: "req-42".into(),
        });
        assert!(err.to_string().contains("req-42"));
        assert!(err.to_string().contains("superseded"));
    }

    #[test]
    fn cache_error_converts_into_top_level() {
        let err: Error = CacheError::Storage("quota exceeded".into()).into();
        assert!(matches!(err, Error::Cache(CacheError::Storage(_))));
    }
}
