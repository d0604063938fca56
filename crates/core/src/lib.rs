//! # AnswerFlow Core
//!
//! Domain types, traits, and error definitions for the AnswerFlow AI response
//! pipeline. Every collaborator that lives outside the pipeline (the chunked
//! transport, the cache's backing storage) is defined here as a trait so the
//! stream consumer and the response cache can be exercised against in-memory
//! fakes.
//!
//! ## Layout
//!
//! - [`request`]: the question sent to the answering service
//! - [`transport`]: the chunked exchange contract and its cancellation token
//! - [`store`]: the string-keyed JSON storage the cache persists into
//! - [`error`]: per-context error types

pub mod error;
pub mod request;
pub mod store;
pub mod transport;

// Re-export key types at crate root for ergonomics
pub use error::{CacheError, Error, Result, StreamError, TransportError};
pub use request::{AnswerRequest, Language, RequestId};
pub use store::KeyValueStore;
pub use transport::{CancelSignal, CancellationHandle, ChunkTransport, TransportEvent};
