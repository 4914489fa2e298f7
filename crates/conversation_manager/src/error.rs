use thiserror::Error;

use conversation_store::StoreError;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Rejected before any store operation was attempted.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Store-level errors bubble unmodified to the caller.
    #[error(transparent)]
    Store(#[from] StoreError),
}
