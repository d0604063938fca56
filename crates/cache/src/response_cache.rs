//! The response cache.
//!
//! Maps (assessment, control) to the latest completed answer plus a short
//! conversation history. Answers expire lazily: readers treat an answer older
//! than the TTL as absent, but nothing is deleted until an explicit eviction,
//! [`ResponseCache::purge_expired`], or [`ResponseCache::teardown`].
//!
//! The whole cache is persisted as one JSON document under
//! [`CachePolicy::storage_key`] after every mutation. Reads are served from
//! memory and never touch the store.

use answerflow_core::error::CacheError;
use answerflow_core::store::KeyValueStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::entry::{CacheEntry, CacheKey, CachedAnswer, ConversationTurn};
use crate::in_memory::InMemoryStore;

const DOCUMENT_VERSION: u32 = 1;

/// Expiry and size limits.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// How long a stored answer stays valid
    pub ttl: Duration,

    /// Conversation turns kept per key
    pub max_history: usize,

    /// Key the cache document is persisted under
    pub storage_key: String,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(2),
            max_history: 10,
            storage_key: "ai-response-cache".into(),
        }
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub fresh_answers: usize,
    pub expired_answers: usize,
    pub conversation_turns: usize,
}

#[derive(Serialize)]
struct PersistedCacheRef<'a> {
    version: u32,
    entries: Vec<PersistedEntryRef<'a>>,
}

#[derive(Serialize)]
struct PersistedEntryRef<'a> {
    #[serde(flatten)]
    key: &'a CacheKey,
    #[serde(flatten)]
    entry: &'a CacheEntry,
}

#[derive(Deserialize)]
struct PersistedCache {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    entries: Vec<PersistedEntry>,
}

#[derive(Deserialize)]
struct PersistedEntry {
    #[serde(flatten)]
    key: CacheKey,
    #[serde(flatten)]
    entry: CacheEntry,
}

/// Session-scoped store of completed answers.
///
/// Construct one per authenticated session and share it behind an `Arc`.
/// Call [`teardown`](Self::teardown) on logout.
///
/// Every teardown starts a new generation. Writers that captured a
/// generation before the teardown are refused by
/// [`record_completion`](Self::record_completion).
pub struct ResponseCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    generation: AtomicU64,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    policy: CachePolicy,
}

impl ResponseCache {
    /// Create an empty cache. The store is written to but not read.
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, policy: CachePolicy) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            store,
            clock,
            policy,
        }
    }

    /// An empty cache over an in-memory store with the default policy.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(SystemClock),
            CachePolicy::default(),
        )
    }

    /// Create a cache and load whatever the store holds under the storage key.
    pub async fn restore(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        policy: CachePolicy,
    ) -> Result<Self, CacheError> {
        let cache = Self::new(store, clock, policy);
        let Some(document) = cache.store.get(&cache.policy.storage_key).await? else {
            debug!(store = cache.store.name(), "No persisted cache found");
            return Ok(cache);
        };

        let persisted: PersistedCache = serde_json::from_value(document)
            .map_err(|e| CacheError::Corrupted(e.to_string()))?;
        if persisted.version > DOCUMENT_VERSION {
            return Err(CacheError::Corrupted(format!(
                "unsupported cache document version {}",
                persisted.version
            )));
        }

        let restored: HashMap<_, _> = persisted
            .entries
            .into_iter()
            .map(|p| (p.key, p.entry))
            .collect();
        info!(
            store = cache.store.name(),
            entries = restored.len(),
            "Restored response cache"
        );
        *cache.entries.write().await = restored;
        Ok(cache)
    }

    /// Like [`restore`](Self::restore), but an unusable store yields an empty
    /// cache instead of an error so answer generation is never blocked.
    pub async fn restore_or_empty(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        policy: CachePolicy,
    ) -> Self {
        match Self::restore(store.clone(), clock.clone(), policy.clone()).await {
            Ok(cache) => cache,
            Err(e) => {
                warn!(store = store.name(), error = %e, "Response cache restore failed, starting empty");
                Self::new(store, clock, policy)
            }
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Current session generation. Changes on every teardown.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// The cached answer for a key, if present and not expired.
    pub async fn get(&self, assessment_id: &str, control_id: &str) -> Option<CachedAnswer> {
        let key = CacheKey::new(assessment_id, control_id);
        let now = self.clock.now();
        self.entries
            .read()
            .await
            .get(&key)
            .and_then(|entry| entry.fresh_answer(now, self.policy.ttl))
            .cloned()
    }

    /// The raw entry for a key, including an expired answer.
    pub async fn entry(&self, assessment_id: &str, control_id: &str) -> Option<CacheEntry> {
        let key = CacheKey::new(assessment_id, control_id);
        self.entries.read().await.get(&key).cloned()
    }

    /// Store a completed answer, replacing the previous one.
    pub async fn put(
        &self,
        assessment_id: &str,
        control_id: &str,
        content: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Result<CachedAnswer, CacheError> {
        let key = CacheKey::new(assessment_id, control_id);
        let now = self.clock.now();
        let answer = CachedAnswer {
            content: content.into(),
            metadata,
            timestamp: now,
        };

        let mut entries = self.entries.write().await;
        store_answer(&mut entries, key, answer.clone(), now);
        self.persist(&entries).await?;
        Ok(answer)
    }

    /// Record a question/answer turn for a key.
    pub async fn append_conversation(
        &self,
        assessment_id: &str,
        control_id: &str,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) -> Result<(), CacheError> {
        let key = CacheKey::new(assessment_id, control_id);
        let now = self.clock.now();
        let turn = ConversationTurn {
            question: question.into(),
            answer: answer.into(),
            timestamp: now,
        };

        let mut entries = self.entries.write().await;
        store_turn(&mut entries, key, turn, now, self.policy.max_history);
        self.persist(&entries).await
    }

    /// Store a completed answer and its conversation turn in one step, but
    /// only if no teardown has happened since `generation` was read.
    ///
    /// Returns `Ok(false)` when the write was refused.
    pub async fn record_completion(
        &self,
        generation: u64,
        assessment_id: &str,
        control_id: &str,
        question: impl Into<String>,
        answer: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().await;
        // Teardown bumps the generation while holding the write lock.
        if self.generation() != generation {
            debug!(
                assessment = assessment_id,
                control = control_id,
                generation,
                "Refused answer from a previous session"
            );
            return Ok(false);
        }

        let key = CacheKey::new(assessment_id, control_id);
        let now = self.clock.now();
        let answer = answer.into();
        let turn = ConversationTurn {
            question: question.into(),
            answer: answer.clone(),
            timestamp: now,
        };
        let cached = CachedAnswer {
            content: answer,
            metadata,
            timestamp: now,
        };
        store_answer(&mut entries, key.clone(), cached, now);
        store_turn(&mut entries, key, turn, now, self.policy.max_history);

        self.persist(&entries).await?;
        Ok(true)
    }

    /// Conversation history for a key, oldest first.
    pub async fn list_conversation(
        &self,
        assessment_id: &str,
        control_id: &str,
    ) -> Vec<ConversationTurn> {
        let key = CacheKey::new(assessment_id, control_id);
        self.entries
            .read()
            .await
            .get(&key)
            .map(|entry| entry.conversation_history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every cached key, sorted.
    pub async fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<_> = self.entries.read().await.keys().cloned().collect();
        keys.sort_by(|a, b| {
            (&a.assessment_id, &a.control_id).cmp(&(&b.assessment_id, &b.control_id))
        });
        keys
    }

    /// Remove one key. Returns whether it existed.
    pub async fn evict_key(&self, assessment_id: &str, control_id: &str) -> Result<bool, CacheError> {
        let key = CacheKey::new(assessment_id, control_id);
        let mut entries = self.entries.write().await;
        if entries.remove(&key).is_none() {
            return Ok(false);
        }
        debug!(key = %key, "Evicted cache entry");
        self.persist(&entries).await?;
        Ok(true)
    }

    /// Remove every key of an assessment. Returns how many were removed.
    pub async fn evict_assessment(&self, assessment_id: &str) -> Result<usize, CacheError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| key.assessment_id != assessment_id);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(assessment = assessment_id, removed, "Evicted assessment from cache");
            self.persist(&entries).await?;
        }
        Ok(removed)
    }

    /// Remove everything. Safe on an empty cache.
    pub async fn evict_all(&self) -> Result<usize, CacheError> {
        let mut entries = self.entries.write().await;
        let removed = entries.len();
        entries.clear();
        if removed > 0 {
            debug!(removed, "Cleared response cache");
            self.persist(&entries).await?;
        }
        Ok(removed)
    }

    /// Drop expired answers now. Entries left with no answer and no history
    /// are removed. Returns the number of answers dropped.
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let mut purged = 0;
        for entry in entries.values_mut() {
            if entry
                .latest_answer
                .as_ref()
                .is_some_and(|answer| !answer.is_fresh(now, self.policy.ttl))
            {
                entry.latest_answer = None;
                purged += 1;
            }
        }
        entries.retain(|_, entry| !entry.is_empty());
        if purged > 0 {
            debug!(purged, "Purged expired answers");
            self.persist(&entries).await?;
        }
        Ok(purged)
    }

    pub async fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        let mut stats = CacheStats {
            entries: entries.len(),
            ..CacheStats::default()
        };
        for entry in entries.values() {
            if let Some(answer) = &entry.latest_answer {
                if answer.is_fresh(now, self.policy.ttl) {
                    stats.fresh_answers += 1;
                } else {
                    stats.expired_answers += 1;
                }
            }
            stats.conversation_turns += entry.conversation_history.len();
        }
        stats
    }

    /// Logout hook: clear everything, start a new generation and remove the
    /// backing storage entry.
    ///
    /// If the entry cannot be removed it is overwritten with an empty
    /// document, so a later [`restore`](Self::restore) never brings the old
    /// session back. The removal error is still returned.
    pub async fn teardown(&self) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        let removed = entries.len();
        entries.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);

        if let Err(e) = self.store.remove(&self.policy.storage_key).await {
            warn!(store = self.store.name(), error = %e, "Failed to remove cache document, blanking it");
            if let Err(blank) = self.persist(&entries).await {
                warn!(store = self.store.name(), error = %blank, "Failed to blank cache document");
            }
            return Err(e);
        }
        info!(removed, store = self.store.name(), "Response cache torn down");
        Ok(())
    }

    async fn persist(&self, entries: &HashMap<CacheKey, CacheEntry>) -> Result<(), CacheError> {
        let document = PersistedCacheRef {
            version: DOCUMENT_VERSION,
            entries: entries
                .iter()
                .map(|(key, entry)| PersistedEntryRef { key, entry })
                .collect(),
        };
        let value = serde_json::to_value(&document)
            .map_err(|e| CacheError::Storage(format!("Failed to serialize cache: {e}")))?;
        self.store.set(&self.policy.storage_key, value).await
    }
}

fn store_answer(
    entries: &mut HashMap<CacheKey, CacheEntry>,
    key: CacheKey,
    answer: CachedAnswer,
    now: DateTime<Utc>,
) {
    debug!(key = %key, bytes = answer.content.len(), "Cached answer");
    let entry = entries.entry(key).or_insert_with(|| CacheEntry::new(now));
    entry.latest_answer = Some(answer);
    entry.last_accessed = now;
}

fn store_turn(
    entries: &mut HashMap<CacheKey, CacheEntry>,
    key: CacheKey,
    turn: ConversationTurn,
    now: DateTime<Utc>,
    max_history: usize,
) {
    let entry = entries
        .entry(key.clone())
        .or_insert_with(|| CacheEntry::new(now));
    let evicted = entry.push_turn(turn, max_history);
    entry.last_accessed = now;
    debug!(
        key = %key,
        turns = entry.conversation_history.len(),
        evicted,
        "Recorded conversation turn"
    );
}
