//! conversation_store - durable branching message store
//!
//! Conversations own a tree of messages linked by `parent_id`; editing or
//! regenerating a message appends a sibling instead of mutating anything.
//! Each conversation records an `active_leaf_id` marking the branch tip the
//! user currently sees, and the store can reconstruct that root-to-leaf path
//! or relocate the leaf when the user switches branches.

pub mod error;
pub mod store;
pub mod tree;

pub use error::{StoreError, StoreResult};
pub use store::{
    ConversationStore, ConversationUpdate, NewConversation, NewMessage, SqliteConversationStore,
};
pub use tree::MessageTree;
