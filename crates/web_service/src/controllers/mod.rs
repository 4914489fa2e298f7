//! Controllers, one module per domain:
//! - `conversations_controller` - conversation CRUD and branch navigation
//! - `chat_controller` - chat turns and the live event stream

pub mod chat_controller;
pub mod conversations_controller;
