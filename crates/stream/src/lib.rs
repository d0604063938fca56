//! The stream consumer. Turns a chunked exchange into an observable session.
//!
//! A [`StreamConsumer`] owns at most one session at a time and walks it
//! through a small state machine:
//!
//! ```text
//! Idle ──start──▶ Active ──▶ Completed | Failed | Cancelled ──reset/start──▶ Idle
//! ```
//!
//! Callers observe a session through its [`SessionHandle`] (latest snapshot,
//! change notifications) or through the consumer's [`EventBus`] (one event
//! per transition or fragment). Events that arrive outside an active session
//! are discarded and counted, never applied.

pub mod consumer;
pub mod event;
pub mod handle;
pub mod scripted;
pub mod session;

pub use consumer::{StreamConsumer, Transition};
pub use event::{EventBus, SessionEvent, SessionEventKind};
pub use handle::SessionHandle;
pub use scripted::ScriptedTransport;
pub use session::{Phase, StreamingSession};
