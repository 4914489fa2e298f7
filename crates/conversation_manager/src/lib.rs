//! conversation_manager - orchestration of one chat request/response cycle.
//!
//! Sits between the HTTP surface and the store: resolves the branching
//! semantics of each action (submit, edit, regenerate), drives the generation
//! collaborator, and keeps live listeners fed through an in-process stream
//! registry. Persistence side effects always run to completion server-side,
//! whether or not the original client is still connected.

pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod streams;

pub use engine::{EngineError, EngineEvent, GenerationEngine, GenerationRequest};
pub use error::ChatError;
pub use lifecycle::{ChatAction, ChatManager, ChatTurnReceipt, ChatTurnRequest, IncomingMessage};
pub use streams::{StreamEvent, StreamRegistry, StreamStatus, StreamSubscription};
