//! The answer pipeline: cache in front, stream consumer behind.
//!
//! For a question scoped to an (assessment, control) pair the pipeline:
//!
//! 1. **Checks the cache**: a fresh answer is returned without any network
//!    activity
//! 2. **Starts a stream** otherwise, handing the caller a live handle
//! 3. **Records the result**: once the session completes, its final text and
//!    metadata are cached and the exchange is appended to the conversation
//!
//! Failed and cancelled sessions are never cached. Storage failures are
//! logged and otherwise ignored, so a broken cache never blocks generation.

use answerflow_cache::{
    CachePolicy, CachedAnswer, FileStore, InMemoryStore, NoopStore, ResponseCache, SystemClock,
};
use answerflow_config::{AppConfig, CacheConfig};
use answerflow_core::error::{CacheError, StreamError};
use answerflow_core::request::AnswerRequest;
use answerflow_core::store::KeyValueStore;
use answerflow_core::transport::ChunkTransport;
use answerflow_stream::{SessionHandle, StreamConsumer, StreamingSession, Transition};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What [`Pipeline::ask`] produced.
pub enum Answer {
    /// A fresh cached answer; nothing was generated.
    Cached(CachedAnswer),
    /// A generation in progress.
    Live(PendingAnswer),
}

/// Final result of a question.
#[derive(Debug, Clone)]
pub enum Outcome {
    Cached(CachedAnswer),
    Session(StreamingSession),
}

impl Answer {
    /// Wait for the answer to settle.
    pub async fn settle(self) -> Result<Outcome, StreamError> {
        match self {
            Self::Cached(answer) => Ok(Outcome::Cached(answer)),
            Self::Live(pending) => pending.settled().await.map(Outcome::Session),
        }
    }
}

/// A streaming answer plus the task that will cache it.
pub struct PendingAnswer {
    handle: SessionHandle,
    recorder: JoinHandle<Result<StreamingSession, StreamError>>,
}

impl PendingAnswer {
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Wait until the session is terminal and its result has been recorded.
    pub async fn settled(self) -> Result<StreamingSession, StreamError> {
        self.recorder
            .await
            .map_err(|e| StreamError::Aborted(e.to_string()))?
    }
}

/// Cache-aware front for a [`StreamConsumer`].
pub struct Pipeline {
    consumer: StreamConsumer,
    cache: Arc<ResponseCache>,
}

impl Pipeline {
    pub fn new(consumer: StreamConsumer, cache: Arc<ResponseCache>) -> Self {
        Self { consumer, cache }
    }

    /// Build a pipeline from configuration, restoring any persisted cache.
    pub async fn from_config(config: &AppConfig, transport: Arc<dyn ChunkTransport>) -> Self {
        let consumer = StreamConsumer::with_event_capacity(transport, config.stream.event_buffer);
        let cache = ResponseCache::restore_or_empty(
            build_store(&config.cache),
            Arc::new(SystemClock),
            cache_policy(&config.cache),
        )
        .await;
        Self::new(consumer, Arc::new(cache))
    }

    pub fn consumer(&self) -> &StreamConsumer {
        &self.consumer
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Answer from the cache if possible, otherwise start generating.
    pub async fn ask(&self, request: AnswerRequest) -> Answer {
        if let Some((assessment_id, control_id)) = request.cache_scope()
            && let Some(answer) = self.cache.get(assessment_id, control_id).await
        {
            debug!(
                assessment = assessment_id,
                control = control_id,
                "Serving cached answer"
            );
            return Answer::Cached(answer);
        }
        Answer::Live(self.generate(request))
    }

    /// Start generating, ignoring any cached answer. The result replaces it.
    pub fn generate(&self, request: AnswerRequest) -> PendingAnswer {
        let generation = self.cache.generation();
        let handle = self.consumer.start(request.clone());
        let recorder = tokio::spawn(record(
            self.cache.clone(),
            generation,
            request,
            handle.clone(),
        ));
        PendingAnswer { handle, recorder }
    }

    /// Like [`ask`](Self::ask), but cancels the stream if it has not
    /// finished within `deadline`.
    pub async fn ask_with_deadline(
        &self,
        request: AnswerRequest,
        deadline: Duration,
    ) -> Result<Outcome, StreamError> {
        let pending = match self.ask(request).await {
            Answer::Cached(answer) => return Ok(Outcome::Cached(answer)),
            Answer::Live(pending) => pending,
        };

        let mut watcher = pending.handle().clone();
        if tokio::time::timeout(deadline, watcher.wait_terminal()).await.is_err() {
            info!(
                request_id = %pending.handle().request_id(),
                deadline_ms = deadline.as_millis() as u64,
                "Deadline passed, cancelling"
            );
            self.consumer.cancel_session(pending.handle().request_id());
        }
        pending.settled().await.map(Outcome::Session)
    }

    /// Stop the active stream.
    pub fn cancel(&self) -> Transition {
        self.consumer.cancel()
    }

    /// Logout teardown: drop the active session, then clear the cache and
    /// its backing storage. Sessions started before the logout can no longer
    /// write to the cache, even if they already completed.
    pub async fn logout(&self) -> Result<(), CacheError> {
        self.consumer.reset();
        self.cache.teardown().await
    }
}

/// Wait for a session to finish and cache it if it completed, unless the
/// cache was torn down in the meantime.
async fn record(
    cache: Arc<ResponseCache>,
    generation: u64,
    request: AnswerRequest,
    mut handle: SessionHandle,
) -> Result<StreamingSession, StreamError> {
    let session = handle.wait_terminal().await?;

    let Some((assessment_id, control_id)) = request.cache_scope() else {
        return Ok(session);
    };
    let Some((text, metadata)) = session.completion() else {
        debug!(
            request_id = %session.request_id,
            phase = %session.phase,
            "Session not cached"
        );
        return Ok(session);
    };

    match cache
        .record_completion(
            generation,
            assessment_id,
            control_id,
            request.question.as_str(),
            text,
            metadata.clone(),
        )
        .await
    {
        Ok(true) => {}
        Ok(false) => debug!(request_id = %session.request_id, "Cache was torn down, answer dropped"),
        Err(e) => warn!(assessment = assessment_id, control = control_id, "Failed to persist answer: {e}"),
    }

    Ok(session)
}

/// The backing store named by `cache.backend`.
pub fn build_store(config: &CacheConfig) -> Arc<dyn KeyValueStore> {
    match config.backend.as_str() {
        "memory" => Arc::new(InMemoryStore::new()),
        "file" => Arc::new(FileStore::new(config.file_path())),
        _ => Arc::new(NoopStore),
    }
}

pub fn cache_policy(config: &CacheConfig) -> CachePolicy {
    CachePolicy {
        ttl: i64::try_from(config.ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX),
        max_history: config.max_history,
        storage_key: config.storage_key.clone(),
    }
}
