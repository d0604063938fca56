//! Response cache and its storage backends for AnswerFlow.

pub mod clock;
pub mod entry;
pub mod file_backend;
pub mod in_memory;
pub mod noop;
pub mod response_cache;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{CacheEntry, CacheKey, CachedAnswer, ConversationTurn};
pub use file_backend::FileStore;
pub use in_memory::InMemoryStore;
pub use noop::NoopStore;
pub use response_cache::{CachePolicy, CacheStats, ResponseCache};
