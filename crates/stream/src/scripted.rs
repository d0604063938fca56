//! A transport that replays a fixed script of events.
//!
//! Used by tests and by the CLI's `ask --events <file>` replay mode, where
//! the script is a recorded exchange in NDJSON form (one [`TransportEvent`]
//! per line).

use answerflow_core::error::TransportError;
use answerflow_core::request::AnswerRequest;
use answerflow_core::transport::{CancelSignal, ChunkTransport, TransportEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Replays the same events on every `open`.
pub struct ScriptedTransport {
    script: Vec<TransportEvent>,
    delay: Option<Duration>,
    buffer: usize,
    opened: AtomicUsize,
    cancelled: Arc<AtomicUsize>,
    last_request: Mutex<Option<AnswerRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<TransportEvent>) -> Self {
        Self {
            script,
            delay: None,
            buffer: 64,
            opened: AtomicUsize::new(0),
            cancelled: Arc::new(AtomicUsize::new(0)),
            last_request: Mutex::new(None),
        }
    }

    /// Parse a recorded exchange, one JSON event per line. Blank lines are skipped.
    pub fn from_ndjson(input: &str) -> Result<Self, TransportError> {
        let script = input
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str::<TransportEvent>(line)
                    .map_err(|e| TransportError::Protocol(format!("line {}: {e}", n + 1)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(script))
    }

    /// Pause before each event, like a real service generating tokens.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn script(&self) -> &[TransportEvent] {
        &self.script
    }

    /// How many exchanges were opened.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }

    /// How many exchanges stopped because they were cancelled.
    pub fn cancellations(&self) -> usize {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn last_request(&self) -> Option<AnswerRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ChunkTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(
        &self,
        request: AnswerRequest,
        mut cancel: CancelSignal,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        self.opened.fetch_add(1, Ordering::Relaxed);
        *self.last_request.lock().unwrap_or_else(|e| e.into_inner()) = Some(request);
        if self.script.is_empty() {
            return Err(TransportError::Unavailable("recording has no events".into()));
        }

        let (tx, rx) = mpsc::channel(self.buffer);
        let script = self.script.clone();
        let delay = self.delay;
        let cancelled = self.cancelled.clone();

        tokio::spawn(async move {
            for event in script {
                if let Some(delay) = delay {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            cancelled.fetch_add(1, Ordering::Relaxed);
                            debug!("Scripted exchange cancelled");
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                } else if cancel.is_cancelled() {
                    cancelled.fetch_add(1, Ordering::Relaxed);
                    return;
                }

                if tx.send(event).await.is_err() {
                    // Consumer stopped listening
                    return;
                }
            }
        });

        Ok(rx)
    }
}
