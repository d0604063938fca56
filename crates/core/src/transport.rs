//! ChunkTransport trait: the abstraction over the answering service.
//!
//! A transport opens one logical request and delivers an ordered sequence of
//! [`TransportEvent::Fragment`]s followed by exactly one terminal event
//! ([`TransportEvent::Completed`] or [`TransportEvent::Error`]).
//!
//! The consumer hands the transport a [`CancelSignal`]; the matching
//! [`CancellationHandle`] stays with the session and fires at most once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::TransportError;
use crate::request::AnswerRequest;

/// One event delivered by a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    /// Plain text delta.
    Fragment { text: String },

    /// The answer is complete.
    Completed {
        full_text: String,
        #[serde(default)]
        metadata: serde_json::Value,
    },

    /// The exchange failed.
    Error { message: String },
}

impl TransportEvent {
    pub fn fragment(text: impl Into<String>) -> Self {
        Self::Fragment { text: text.into() }
    }

    pub fn completed(full_text: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self::Completed {
            full_text: full_text.into(),
            metadata,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Fragment { .. })
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fragment { .. } => "fragment",
            Self::Completed { .. } => "completed",
            Self::Error { .. } => "error",
        }
    }
}

/// The core ChunkTransport trait.
///
/// Implementations own the network exchange. They must stop sending once the
/// signal fires, but a final event may still race the signal; the consumer
/// discards it.
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// A human-readable name for this transport (e.g., "http", "scripted").
    fn name(&self) -> &str;

    /// Open an exchange and return the receiving end of its event channel.
    async fn open(
        &self,
        request: AnswerRequest,
        cancel: CancelSignal,
    ) -> std::result::Result<mpsc::Receiver<TransportEvent>, TransportError>;
}

/// Session-owned token that asks the transport to stop early.
///
/// The signal is sent at most once. Invalidating the handle drops it without
/// sending, which is what happens when a session finishes on its own.
#[derive(Debug)]
pub struct CancellationHandle {
    sender: Option<oneshot::Sender<()>>,
}

impl CancellationHandle {
    /// Create a handle and the signal the transport listens on.
    pub fn new() -> (Self, CancelSignal) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Some(sender),
            },
            CancelSignal {
                receiver,
                state: SignalState::Waiting,
            },
        )
    }

    /// Send the abort signal. Returns `true` only the first time.
    pub fn cancel(&mut self) -> bool {
        match self.sender.take() {
            // The transport may already have hung up; the request still counts as sent.
            Some(sender) => {
                let _ = sender.send(());
                true
            }
            None => false,
        }
    }

    /// Drop the handle's ability to signal without signalling.
    pub fn invalidate(&mut self) {
        self.sender = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalState {
    Waiting,
    Fired,
    Closed,
}

/// Transport-side half of a [`CancellationHandle`].
#[derive(Debug)]
pub struct CancelSignal {
    receiver: oneshot::Receiver<()>,
    state: SignalState,
}

impl CancelSignal {
    /// Check if cancellation was requested (non-blocking).
    pub fn is_cancelled(&mut self) -> bool {
        if self.state == SignalState::Waiting {
            match self.receiver.try_recv() {
                Ok(()) => self.state = SignalState::Fired,
                Err(oneshot::error::TryRecvError::Closed) => self.state = SignalState::Closed,
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
        }
        self.state == SignalState::Fired
    }

    /// Wait for cancellation.
    ///
    /// Never resolves if the handle was invalidated without firing.
    pub async fn cancelled(&mut self) {
        if self.state == SignalState::Waiting {
            match (&mut self.receiver).await {
                Ok(()) => self.state = SignalState::Fired,
                Err(_) => self.state = SignalState::Closed,
            }
        }
        if self.state != SignalState::Fired {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn event_serialization_uses_type_tag() {
        let json = serde_json::to_string(&TransportEvent::fragment("Hel")).unwrap();
        assert!(json.contains(r#""type":"fragment""#));
        assert!(json.contains(r#""text":"Hel""#));

        let done: TransportEvent = serde_json::from_str(
            r#"{"type":"completed","full_text":"Hello","metadata":{"confidence":0.9}}"#,
        )
        .unwrap();
        assert!(done.is_terminal());
        assert_eq!(done.kind(), "completed");
    }

    #[test]
    fn completed_metadata_is_optional_on_the_wire() {
        let done: TransportEvent =
            serde_json::from_str(r#"{"type":"completed","full_text":"x"}"#).unwrap();
        assert_eq!(done, TransportEvent::completed("x", serde_json::Value::Null));
    }

    #[test]
    fn cancel_fires_once() {
        let (mut handle, mut signal) = CancellationHandle::new();
        assert!(!signal.is_cancelled());
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(signal.is_cancelled());
        assert!(signal.is_cancelled());
    }

    #[test]
    fn invalidated_handle_never_signals() {
        let (mut handle, mut signal) = CancellationHandle::new();
        handle.invalidate();
        assert!(!handle.cancel());
        assert!(!signal.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_signal() {
        let (mut handle, mut signal) = CancellationHandle::new();
        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
            signal.is_cancelled()
        });
        handle.cancel();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn cancelled_stays_pending_when_invalidated() {
        let (mut handle, mut signal) = CancellationHandle::new();
        handle.invalidate();
        let outcome =
            tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(outcome.is_err());
    }
}
