//! web_service - HTTP surface for the branching chat system.
//!
//! Thin glue over `conversation_store` and `conversation_manager`:
//! conversation CRUD, the chat turn endpoint, branch switching, and the SSE
//! event stream for live listeners.

pub mod controllers;
pub mod dto;
pub mod engine;
pub mod error;
pub mod server;

pub use error::AppError;
pub use server::{app_config, run, AppState};
