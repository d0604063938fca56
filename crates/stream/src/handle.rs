//! Caller-side view of a session.

use answerflow_core::error::StreamError;
use answerflow_core::request::RequestId;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::session::{Phase, StreamingSession};

/// Observes one session.
///
/// Every read is a snapshot; the session keeps moving underneath. Once the
/// consumer moves on to another session (or is reset), the handle is closed
/// and keeps reporting the last state it saw.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    request_id: RequestId,
    updates: watch::Receiver<StreamingSession>,
}

impl SessionHandle {
    pub(crate) fn new(request_id: RequestId, updates: watch::Receiver<StreamingSession>) -> Self {
        Self {
            request_id,
            updates,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> StreamingSession {
        self.updates.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.updates.borrow().phase
    }

    /// Whether the consumer has dropped this session.
    pub fn is_closed(&self) -> bool {
        self.updates.has_changed().is_err()
    }

    /// Wait for the next change and return the new snapshot.
    pub async fn changed(&mut self) -> Result<StreamingSession, StreamError> {
        if self.updates.changed().await.is_err() {
            return Err(self.superseded());
        }
        Ok(self.updates.borrow_and_update().clone())
    }

    /// Wait until the session reaches a terminal phase.
    ///
    /// Fails only if the session was discarded while still active.
    pub async fn wait_terminal(&mut self) -> Result<StreamingSession, StreamError> {
        loop {
            {
                let session = self.updates.borrow_and_update();
                if session.phase.is_terminal() {
                    return Ok(session.clone());
                }
            }
            if self.updates.changed().await.is_err() {
                let session = self.updates.borrow();
                if session.phase.is_terminal() {
                    return Ok(session.clone());
                }
                return Err(self.superseded());
            }
        }
    }

    /// Every snapshot from now on, starting with the current one.
    pub fn updates(&self) -> WatchStream<StreamingSession> {
        WatchStream::new(self.updates.clone())
    }

    fn superseded(&self) -> StreamError {
        StreamError::Superseded {
            request_id: self.request_id.to_string(),
        }
    }
}
