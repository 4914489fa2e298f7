//! chat_core - Core types for the branching chat system
//!
//! This crate provides the foundational types used across all chat-related crates:
//! - `message` - message records, roles, and typed content parts
//! - `conversation` - conversation records, status, and provider routing preferences

pub mod conversation;
pub mod message;

// Re-export commonly used types
pub use conversation::{
    Conversation, ConversationStatus, ProviderPreferences, RoutingMode, SiblingInfo, DEFAULT_TITLE,
};
pub use message::{ContentPart, Message, Role, ToolState};
