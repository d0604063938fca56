//! The stream consumer state machine.
//!
//! Transport events are applied through [`StreamConsumer::on_fragment`],
//! [`StreamConsumer::complete`] and [`StreamConsumer::fail`]. Each takes the
//! id of the session the event belongs to, so an event from an exchange the
//! consumer has already moved past is rejected rather than bleeding into
//! the current session. Rejected events are counted as anomalies.
//!
//! [`StreamConsumer::start`] wires all of this to a [`ChunkTransport`]: it
//! begins a session, opens the exchange on a background task and pumps the
//! transport's events into the consumer in delivery order.

use answerflow_core::request::{AnswerRequest, RequestId};
use answerflow_core::transport::{CancelSignal, CancellationHandle, ChunkTransport, TransportEvent};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::event::{EventBus, SessionEvent, SessionEventKind};
use crate::handle::SessionHandle;
use crate::session::{Phase, StreamingSession};

/// Outcome of feeding an event or command to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The session changed.
    Applied,
    /// Nothing changed.
    Discarded,
}

struct ActiveSession {
    updates: watch::Sender<StreamingSession>,
    cancel: CancellationHandle,
}

impl ActiveSession {
    fn id_and_phase(&self) -> (RequestId, Phase) {
        let session = self.updates.borrow();
        (session.request_id.clone(), session.phase)
    }
}

struct Inner {
    transport: Arc<dyn ChunkTransport>,
    current: Mutex<Option<ActiveSession>>,
    events: EventBus,
    anomalies: AtomicU64,
}

/// Owns at most one session at a time.
///
/// Cloning is cheap and every clone drives the same session.
#[derive(Clone)]
pub struct StreamConsumer {
    inner: Arc<Inner>,
}

impl StreamConsumer {
    pub fn new(transport: Arc<dyn ChunkTransport>) -> Self {
        Self::with_event_capacity(transport, 256)
    }

    pub fn with_event_capacity(transport: Arc<dyn ChunkTransport>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                current: Mutex::new(None),
                events: EventBus::new(capacity),
                anomalies: AtomicU64::new(0),
            }),
        }
    }

    pub fn transport_name(&self) -> &str {
        self.inner.transport.name()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Start a session and drive it from the transport in the background.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(&self, request: AnswerRequest) -> SessionHandle {
        let (handle, signal) = self.begin(&request);
        let consumer = self.clone();
        let request_id = handle.request_id().clone();
        tokio::spawn(async move { consumer.pump(request_id, request, signal).await });
        handle
    }

    /// Start a session without opening a transport exchange.
    ///
    /// Whoever holds the returned signal owns the exchange and is expected
    /// to feed its events back through the event methods.
    pub fn begin(&self, request: &AnswerRequest) -> (SessionHandle, CancelSignal) {
        let request_id = RequestId::new();
        let (cancel, signal) = CancellationHandle::new();
        let (updates, receiver) = watch::channel(StreamingSession::active(request_id.clone()));

        let mut current = self.lock();
        if let Some(previous) = current.take() {
            Self::retire(previous, "superseded");
        }
        *current = Some(ActiveSession { updates, cancel });
        self.inner.events.publish(SessionEvent::new(
            &request_id,
            SessionEventKind::Started {
                question: request.question.clone(),
            },
        ));
        drop(current);

        debug!(
            request_id = %request_id,
            transport = self.inner.transport.name(),
            language = %request.language,
            "Session started"
        );
        (SessionHandle::new(request_id, receiver), signal)
    }

    /// Stop the active session. Only an active session can be cancelled;
    /// calling this again (or on a finished session) changes nothing.
    pub fn cancel(&self) -> Transition {
        self.cancel_where(|_| true)
    }

    /// Like [`cancel`](Self::cancel), but only if `request_id` is still the
    /// current session. A session started since then is left alone.
    pub fn cancel_session(&self, request_id: &RequestId) -> Transition {
        self.cancel_where(|current| current == request_id)
    }

    fn cancel_where(&self, matches: impl FnOnce(&RequestId) -> bool) -> Transition {
        let mut current = self.lock();
        let Some(active) = current.as_mut() else {
            return Transition::Discarded;
        };
        let (request_id, phase) = active.id_and_phase();
        if phase != Phase::Active || !matches(&request_id) {
            return Transition::Discarded;
        }

        let mut partial_text = String::new();
        active.updates.send_modify(|session| {
            session.phase = Phase::Cancelled;
            session.finished_at = Some(Utc::now());
            partial_text = session.accumulated_text.clone();
        });
        let signalled = active.cancel.cancel();
        self.inner.events.publish(SessionEvent::new(
            &request_id,
            SessionEventKind::Cancelled { partial_text },
        ));

        info!(request_id = %request_id, signalled, "Session cancelled");
        Transition::Applied
    }

    /// Discard the current session, whatever its phase, and return to idle.
    pub fn reset(&self) {
        let mut current = self.lock();
        if let Some(previous) = current.take() {
            let (request_id, _) = previous.id_and_phase();
            Self::retire(previous, "reset");
            self.inner
                .events
                .publish(SessionEvent::new(&request_id, SessionEventKind::Reset));
            debug!(request_id = %request_id, "Session reset");
        }
    }

    // ── Transport events ─────────────────────────────────────────────────

    /// Append a fragment to the session's text.
    pub fn on_fragment(&self, request_id: &RequestId, text: &str) -> Transition {
        self.transition(request_id, "fragment", |active| {
            let mut fragment_count = 0;
            active.updates.send_modify(|session| {
                session.accumulated_text.push_str(text);
                session.fragment_count += 1;
                fragment_count = session.fragment_count;
            });
            SessionEventKind::Fragment {
                text: text.to_string(),
                fragment_count,
            }
        })
    }

    /// Finish the session successfully.
    ///
    /// `final_text` and `metadata` are kept for persistence; the accumulated
    /// text stays what the caller displays.
    pub fn complete(
        &self,
        request_id: &RequestId,
        final_text: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Transition {
        let final_text = final_text.into();
        self.transition(request_id, "completion", |active| {
            active.cancel.invalidate();
            let mut summary = (0, false);
            active.updates.send_modify(|session| {
                session.phase = Phase::Completed;
                session.final_text = Some(final_text.clone());
                session.metadata = Some(metadata.clone());
                session.finished_at = Some(Utc::now());
                summary = (session.fragment_count, session.accumulated_text != final_text);
            });
            let (fragments, rewritten) = summary;
            info!(
                request_id = %request_id,
                fragments,
                bytes = final_text.len(),
                rewritten,
                "Session completed"
            );
            SessionEventKind::Completed {
                full_text: final_text,
                metadata,
            }
        })
    }

    /// Finish the session with an error. Partial text is kept.
    pub fn fail(&self, request_id: &RequestId, error: impl Into<String>) -> Transition {
        let error = error.into();
        self.transition(request_id, "failure", |active| {
            active.cancel.invalidate();
            let mut partial_text = String::new();
            active.updates.send_modify(|session| {
                session.phase = Phase::Failed;
                session.error = Some(error.clone());
                session.finished_at = Some(Utc::now());
                partial_text = session.accumulated_text.clone();
            });
            warn!(request_id = %request_id, error = %error, "Session failed");
            SessionEventKind::Failed {
                error,
                partial_text,
            }
        })
    }

    /// Route a transport event to the matching method.
    pub fn apply(&self, request_id: &RequestId, event: TransportEvent) -> Transition {
        match event {
            TransportEvent::Fragment { text } => self.on_fragment(request_id, &text),
            TransportEvent::Completed {
                full_text,
                metadata,
            } => self.complete(request_id, full_text, metadata),
            TransportEvent::Error { message } => self.fail(request_id, message),
        }
    }

    // ── Observation ──────────────────────────────────────────────────────

    /// Phase of the current session, `Idle` if there is none.
    pub fn phase(&self) -> Phase {
        self.lock()
            .as_ref()
            .map(|active| active.updates.borrow().phase)
            .unwrap_or(Phase::Idle)
    }

    /// Snapshot of the current session.
    pub fn current(&self) -> Option<StreamingSession> {
        self.lock()
            .as_ref()
            .map(|active| active.updates.borrow().clone())
    }

    /// Events discarded because they arrived outside an active session.
    pub fn anomalies(&self) -> u64 {
        self.inner.anomalies.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SessionEvent>> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` if `request_id` names the current, still active session.
    fn transition(
        &self,
        request_id: &RequestId,
        what: &'static str,
        change: impl FnOnce(&mut ActiveSession) -> SessionEventKind,
    ) -> Transition {
        let mut current = self.lock();
        let active = match current.as_mut() {
            Some(active) => active,
            None => return self.discard(request_id, what, None),
        };
        let (current_id, phase) = active.id_and_phase();
        if current_id != *request_id {
            return self.discard(request_id, what, None);
        }
        if phase != Phase::Active {
            return self.discard(request_id, what, Some(phase));
        }

        let kind = change(active);
        self.inner
            .events
            .publish(SessionEvent::new(request_id, kind));
        Transition::Applied
    }

    fn discard(&self, request_id: &RequestId, what: &'static str, phase: Option<Phase>) -> Transition {
        let anomalies = self.inner.anomalies.fetch_add(1, Ordering::Relaxed) + 1;
        match phase {
            Some(Phase::Cancelled) => {
                debug!(request_id = %request_id, event = what, "Dropped event after cancellation");
            }
            Some(phase) => {
                warn!(
                    request_id = %request_id,
                    event = what,
                    phase = %phase,
                    anomalies,
                    "Discarded event for a finished session"
                );
            }
            None => {
                debug!(request_id = %request_id, event = what, anomalies, "Dropped event for a stale session");
            }
        }
        Transition::Discarded
    }

    /// Let go of a session. Dropping its sender closes every handle on it;
    /// an exchange that is still running is told to stop.
    fn retire(mut previous: ActiveSession, reason: &'static str) {
        let (request_id, phase) = previous.id_and_phase();
        if phase == Phase::Active && previous.cancel.cancel() {
            debug!(request_id = %request_id, reason, "Signalled transport to stop");
        }
    }

    async fn pump(self, request_id: RequestId, request: AnswerRequest, signal: CancelSignal) {
        let mut events = match self.inner.transport.open(request, signal).await {
            Ok(events) => events,
            Err(e) => {
                self.fail(&request_id, e.to_string());
                return;
            }
        };

        while let Some(event) = events.recv().await {
            let terminal = event.is_terminal();
            if self.apply(&request_id, event) == Transition::Discarded || terminal {
                // Dropping the receiver tells the transport nobody is listening.
                return;
            }
        }

        // A transport that hangs up after being cancelled or superseded is
        // behaving correctly.
        if self.is_active(&request_id) {
            self.fail(&request_id, "transport closed without a terminal event");
        }
    }

    fn is_active(&self, request_id: &RequestId) -> bool {
        self.lock().as_ref().is_some_and(|active| {
            let (current_id, phase) = active.id_and_phase();
            current_id == *request_id && phase == Phase::Active
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedTransport;
    use answerflow_core::error::TransportError;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn request() -> AnswerRequest {
        AnswerRequest::new("Is MFA enforced?", "org-1").for_control("asm-1", "AC-2")
    }

    fn idle_consumer() -> StreamConsumer {
        StreamConsumer::new(Arc::new(ScriptedTransport::new(vec![])))
    }

    /// A transport the test feeds by hand.
    #[derive(Default)]
    struct ManualTransport {
        sender: Mutex<Option<mpsc::Sender<TransportEvent>>>,
        signal: Mutex<Option<CancelSignal>>,
    }

    impl ManualTransport {
        fn sender(&self) -> mpsc::Sender<TransportEvent> {
            self.sender.lock().unwrap().clone().expect("transport not opened")
        }

        fn was_cancelled(&self) -> bool {
            self.signal
                .lock()
                .unwrap()
                .as_mut()
                .is_some_and(|signal| signal.is_cancelled())
        }

        /// Drop the transport's side of the channel.
        fn hang_up(&self) {
            self.sender.lock().unwrap().take();
        }
    }

    #[async_trait]
    impl ChunkTransport for ManualTransport {
        fn name(&self) -> &str {
            "manual"
        }

        async fn open(
            &self,
            _request: AnswerRequest,
            cancel: CancelSignal,
        ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
            let (tx, rx) = mpsc::channel(16);
            *self.sender.lock().unwrap() = Some(tx);
            *self.signal.lock().unwrap() = Some(cancel);
            Ok(rx)
        }
    }

    struct UnreachableTransport;

    #[async_trait]
    impl ChunkTransport for UnreachableTransport {
        fn name(&self) -> &str {
            "unreachable"
        }

        async fn open(
            &self,
            _request: AnswerRequest,
            _cancel: CancelSignal,
        ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
            Err(TransportError::Unavailable("connection refused".into()))
        }
    }

    async fn opened(transport: &ManualTransport) -> mpsc::Sender<TransportEvent> {
        for _ in 0..100 {
            if let Some(tx) = transport.sender.lock().unwrap().clone() {
                return tx;
            }
            tokio::task::yield_now().await;
        }
        transport.sender()
    }

    // ── State machine ──

    #[test]
    fn consumer_starts_idle() {
        let consumer = idle_consumer();
        assert_eq!(consumer.phase(), Phase::Idle);
        assert!(consumer.current().is_none());
    }

    #[test]
    fn first_observable_state_is_active_and_empty() {
        let consumer = idle_consumer();
        let (handle, _signal) = consumer.begin(&request());
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.phase, Phase::Active);
        assert!(snapshot.accumulated_text.is_empty());
        assert_eq!(snapshot.fragment_count, 0);
        assert_eq!(consumer.phase(), Phase::Active);
    }

    #[test]
    fn fragments_accumulate_in_delivery_order() {
        let consumer = idle_consumer();
        let (handle, _signal) = consumer.begin(&request());
        let id = handle.request_id().clone();
        let fragments = ["The ", "control ", "is ", "", "met."];
        for fragment in fragments {
            assert_eq!(consumer.on_fragment(&id, fragment), Transition::Applied);
        }
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.accumulated_text, fragments.concat());
        assert_eq!(snapshot.fragment_count, fragments.len() as u64);
        assert_eq!(snapshot.phase, Phase::Active);
    }

    #[test]
    fn completion_keeps_accumulated_text_for_display() {
        let consumer = idle_consumer();
        let (handle, _signal) = consumer.begin(&request());
        let id = handle.request_id().clone();

        consumer.on_fragment(&id, "Hel");
        consumer.on_fragment(&id, "lo ");
        assert_eq!(handle.snapshot().accumulated_text, "Hello ");

        assert_eq!(
            consumer.complete(&id, "Hello world", json!({"confidence": 0.9})),
            Transition::Applied
        );
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.phase, Phase::Completed);
        assert_eq!(snapshot.accumulated_text, "Hello ");
        let (text, metadata) = snapshot.completion().unwrap();
        assert_eq!(text, "Hello world");
        assert_eq!(metadata["confidence"], 0.9);
        assert!(snapshot.finished_at.is_some());
    }

    #[test]
    fn nothing_changes_after_a_terminal_event() {
        for finish in ["complete", "fail", "cancel"] {
            let consumer = idle_consumer();
            let (handle, _signal) = consumer.begin(&request());
            let id = handle.request_id().clone();
            consumer.on_fragment(&id, "partial");

            match finish {
                "complete" => consumer.complete(&id, "partial", json!({})),
                "fail" => consumer.fail(&id, "backend error"),
                _ => consumer.cancel(),
            };
            let before = handle.snapshot();

            assert_eq!(consumer.on_fragment(&id, "late"), Transition::Discarded);
            assert_eq!(consumer.complete(&id, "late", json!({})), Transition::Discarded);
            assert_eq!(consumer.fail(&id, "late"), Transition::Discarded);

            let after = handle.snapshot();
            assert_eq!(after, before, "state changed after {finish}");
            assert_eq!(consumer.anomalies(), 3);
        }
    }

    #[test]
    fn failure_keeps_partial_text_and_error() {
        let consumer = idle_consumer();
        let (handle, _signal) = consumer.begin(&request());
        let id = handle.request_id().clone();
        consumer.on_fragment(&id, "Accordi");
        consumer.fail(&id, "503 from answering service");

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.phase, Phase::Failed);
        assert_eq!(snapshot.accumulated_text, "Accordi");
        assert_eq!(snapshot.error.as_deref(), Some("503 from answering service"));
        assert!(snapshot.completion().is_none());
    }

    #[test]
    fn cancel_twice_equals_cancel_once() {
        let consumer = idle_consumer();
        let (handle, mut signal) = consumer.begin(&request());
        let id = handle.request_id().clone();
        consumer.on_fragment(&id, "Hel");

        assert_eq!(consumer.cancel(), Transition::Applied);
        let once = handle.snapshot();
        assert_eq!(consumer.cancel(), Transition::Discarded);
        assert_eq!(handle.snapshot(), once);

        assert_eq!(once.phase, Phase::Cancelled);
        assert!(signal.is_cancelled());
        assert!(once.error.is_none());
        // Cancelling is a command, not an anomaly
        assert_eq!(consumer.anomalies(), 0);
    }

    #[test]
    fn fragment_after_cancel_is_dropped() {
        let consumer = idle_consumer();
        let (handle, _signal) = consumer.begin(&request());
        let id = handle.request_id().clone();

        consumer.on_fragment(&id, "one");
        consumer.cancel();
        assert_eq!(consumer.on_fragment(&id, "two"), Transition::Discarded);

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.phase, Phase::Cancelled);
        assert_eq!(snapshot.accumulated_text, "one");
        assert_eq!(snapshot.fragment_count, 1);
    }

    #[test]
    fn completion_racing_cancel_is_discarded() {
        let consumer = idle_consumer();
        let (handle, _signal) = consumer.begin(&request());
        let id = handle.request_id().clone();
        consumer.cancel();

        assert_eq!(consumer.complete(&id, "too late", json!({})), Transition::Discarded);
        assert!(handle.snapshot().completion().is_none());
    }

    #[test]
    fn cancel_does_nothing_when_finished_or_idle() {
        let consumer = idle_consumer();
        assert_eq!(consumer.cancel(), Transition::Discarded);

        let (handle, mut signal) = consumer.begin(&request());
        consumer.complete(handle.request_id(), "done", json!({}));
        assert_eq!(consumer.cancel(), Transition::Discarded);
        assert_eq!(handle.phase(), Phase::Completed);
        assert!(!signal.is_cancelled());
    }

    #[test]
    fn reset_returns_to_idle_and_closes_handle() {
        let consumer = idle_consumer();
        let (handle, mut signal) = consumer.begin(&request());
        consumer.on_fragment(handle.request_id(), "abc");

        consumer.reset();
        assert_eq!(consumer.phase(), Phase::Idle);
        assert!(handle.is_closed());
        // The running exchange is told to stop
        assert!(signal.is_cancelled());
        // The last seen state stays readable
        assert_eq!(handle.snapshot().accumulated_text, "abc");

        // Always safe
        consumer.reset();
        assert_eq!(consumer.phase(), Phase::Idle);
    }

    #[test]
    fn new_session_supersedes_the_previous_one() {
        let consumer = idle_consumer();
        let (old, mut old_signal) = consumer.begin(&request());
        let old_id = old.request_id().clone();
        consumer.on_fragment(&old_id, "old ");

        let (new, _new_signal) = consumer.begin(&request());
        assert_ne!(new.request_id(), &old_id);
        assert!(old.is_closed());
        assert!(old_signal.is_cancelled());

        // Late events from the old exchange never reach the new session
        assert_eq!(consumer.on_fragment(&old_id, "stale"), Transition::Discarded);
        assert_eq!(old.snapshot().accumulated_text, "old ");
        assert!(new.snapshot().accumulated_text.is_empty());
        assert_eq!(consumer.anomalies(), 1);
    }

    #[test]
    fn events_are_published_per_transition() {
        let consumer = idle_consumer();
        let mut rx = consumer.subscribe();
        let (handle, _signal) = consumer.begin(&request());
        let id = handle.request_id().clone();
        consumer.on_fragment(&id, "Hel");
        consumer.on_fragment(&id, "lo");
        consumer.complete(&id, "Hello", json!({}));
        consumer.on_fragment(&id, "ignored");

        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.request_id, id);
            types.push(event.event_type());
        }
        assert_eq!(types, ["started", "fragment", "fragment", "completed"]);
    }

    // ── Driven by a transport ──

    #[tokio::test]
    async fn start_drives_session_to_completion() {
        let transport = ScriptedTransport::new(vec![
            TransportEvent::fragment("Hel"),
            TransportEvent::fragment("lo "),
            TransportEvent::completed("Hello world", json!({"confidence": 0.9})),
        ]);
        let consumer = StreamConsumer::new(Arc::new(transport));
        let mut handle = consumer.start(request());

        let session = handle.wait_terminal().await.unwrap();
        assert_eq!(session.phase, Phase::Completed);
        assert_eq!(session.accumulated_text, "Hello ");
        assert_eq!(session.fragment_count, 2);
        assert_eq!(session.final_text.as_deref(), Some("Hello world"));
    }

    #[tokio::test]
    async fn transport_error_event_fails_the_session() {
        let transport = ScriptedTransport::new(vec![
            TransportEvent::fragment("Par"),
            TransportEvent::error("model overloaded"),
        ]);
        let consumer = StreamConsumer::new(Arc::new(transport));
        let session = consumer.start(request()).wait_terminal().await.unwrap();
        assert_eq!(session.phase, Phase::Failed);
        assert_eq!(session.accumulated_text, "Par");
        assert_eq!(session.error.as_deref(), Some("model overloaded"));
    }

    #[tokio::test]
    async fn open_failure_fails_the_session() {
        let consumer = StreamConsumer::new(Arc::new(UnreachableTransport));
        let session = consumer.start(request()).wait_terminal().await.unwrap();
        assert_eq!(session.phase, Phase::Failed);
        assert!(session.error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn channel_closing_early_fails_the_session() {
        let transport = ScriptedTransport::new(vec![TransportEvent::fragment("cut")]);
        let consumer = StreamConsumer::new(Arc::new(transport));
        let session = consumer.start(request()).wait_terminal().await.unwrap();
        assert_eq!(session.phase, Phase::Failed);
        assert_eq!(session.accumulated_text, "cut");
    }

    #[tokio::test]
    async fn cancel_mid_flight_signals_transport_and_drops_late_events() {
        let transport = Arc::new(ManualTransport::default());
        let consumer = StreamConsumer::new(transport.clone());
        let mut handle = consumer.start(request());
        let tx = opened(&transport).await;

        tx.send(TransportEvent::fragment("one")).await.unwrap();
        let session = handle.changed().await.unwrap();
        assert_eq!(session.accumulated_text, "one");

        consumer.cancel();
        assert!(transport.was_cancelled());

        // The transport races a final event after the signal
        let _ = tx.send(TransportEvent::fragment("two")).await;
        let _ = tx.send(TransportEvent::completed("one two", json!({}))).await;
        tokio::task::yield_now().await;

        let session = handle.wait_terminal().await.unwrap();
        assert_eq!(session.phase, Phase::Cancelled);
        assert_eq!(session.accumulated_text, "one");
        assert!(session.completion().is_none());
    }

    #[tokio::test]
    async fn hang_up_after_cancel_is_not_an_anomaly() {
        let transport = Arc::new(ManualTransport::default());
        let consumer = StreamConsumer::new(transport.clone());
        let handle = consumer.start(request());
        let tx = opened(&transport).await;

        consumer.cancel();
        drop(tx);
        transport.hang_up();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(handle.phase(), Phase::Cancelled);
        assert!(handle.snapshot().error.is_none());
        assert_eq!(consumer.anomalies(), 0);
    }

    #[test]
    fn cancel_session_ignores_a_superseded_id() {
        let consumer = idle_consumer();
        let (old, _old_signal) = consumer.begin(&request());
        let (current, mut signal) = consumer.begin(&request());

        assert_eq!(consumer.cancel_session(old.request_id()), Transition::Discarded);
        assert_eq!(consumer.phase(), Phase::Active);
        assert!(!signal.is_cancelled());

        assert_eq!(consumer.cancel_session(current.request_id()), Transition::Applied);
        assert_eq!(consumer.phase(), Phase::Cancelled);
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn superseded_handle_reports_superseded() {
        let transport = Arc::new(ManualTransport::default());
        let consumer = StreamConsumer::new(transport.clone());
        let (mut old, _signal) = consumer.begin(&request());
        let waiter = tokio::spawn(async move { old.wait_terminal().await });

        tokio::task::yield_now().await;
        let _new = consumer.begin(&request());
        assert!(waiter.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn handle_updates_stream_yields_snapshots() {
        use tokio_stream::StreamExt;

        let consumer = idle_consumer();
        let (handle, _signal) = consumer.begin(&request());
        let mut updates = handle.updates();
        let first = updates.next().await.unwrap();
        assert_eq!(first.phase, Phase::Active);

        consumer.on_fragment(handle.request_id(), "x");
        let next = updates.next().await.unwrap();
        assert_eq!(next.accumulated_text, "x");
    }
}
