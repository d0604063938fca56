//! Session events, one per fragment or state transition.
//!
//! The consumer publishes these on a broadcast [`EventBus`] so UI listeners
//! can react to individual fragments instead of polling snapshots.
//!
//! - `started`   a new session became active
//! - `fragment`  text was appended
//! - `completed` the answer is final
//! - `failed`    the exchange failed; partial text is kept
//! - `cancelled` the user stopped the exchange
//! - `reset`     the session was discarded

use answerflow_core::request::RequestId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Session this event belongs to
    pub request_id: RequestId,
    /// Event timestamp (Unix ms)
    pub timestamp: i64,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventKind {
    Started { question: String },

    Fragment { text: String, fragment_count: u64 },

    Completed {
        full_text: String,
        metadata: serde_json::Value,
    },

    Failed { error: String, partial_text: String },

    Cancelled { partial_text: String },

    Reset,
}

impl SessionEvent {
    pub fn new(request_id: &RequestId, kind: SessionEventKind) -> Self {
        Self {
            request_id: request_id.clone(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            kind,
        }
    }

    /// Event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            SessionEventKind::Started { .. } => "started",
            SessionEventKind::Fragment { .. } => "fragment",
            SessionEventKind::Completed { .. } => "completed",
            SessionEventKind::Failed { .. } => "failed",
            SessionEventKind::Cancelled { .. } => "cancelled",
            SessionEventKind::Reset => "reset",
        }
    }
}

/// A broadcast-based bus for session events.
///
/// Slow subscribers lose the oldest events rather than blocking the consumer.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<SessionEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SessionEvent>> {
        self.sender.subscribe()
    }

    /// Subscribe as a stream, skipping over lag gaps.
    pub fn stream(&self) -> impl futures::Stream<Item = Arc<SessionEvent>> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|event| event.ok())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let id = RequestId::new();

        bus.publish(SessionEvent::new(
            &id,
            SessionEventKind::Fragment {
                text: "Hel".into(),
                fragment_count: 1,
            },
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.request_id, id);
        assert_eq!(event.event_type(), "fragment");
    }

    #[test]
    fn no_subscribers_doesnt_panic() {
        let bus = EventBus::new(4);
        bus.publish(SessionEvent::new(&RequestId::new(), SessionEventKind::Reset));
    }

    #[tokio::test]
    async fn stream_yields_published_events() {
        let bus = EventBus::new(4);
        let mut events = Box::pin(bus.stream());
        bus.publish(SessionEvent::new(&RequestId::new(), SessionEventKind::Reset));
        let event = events.next().await.unwrap();
        assert_eq!(event.event_type(), "reset");
    }

    #[test]
    fn event_serialization() {
        let event = SessionEvent::new(
            &RequestId::new(),
            SessionEventKind::Cancelled {
                partial_text: "Hel".into(),
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"cancelled""#));
        assert!(json.contains(r#""partial_text":"Hel""#));
    }
}
