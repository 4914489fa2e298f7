//! The seam to the generation collaborator.
//!
//! The engine receives the active path ending at the anchor user message and
//! produces assistant output incrementally: events flow through an mpsc
//! channel while the call resolves to the final consolidated part list. The
//! lifecycle manager owns all persistence; the engine never writes.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use chat_core::{ContentPart, Message, ProviderPreferences};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("generation failed: {0}")]
    Failed(String),
}

/// One generation cycle's input. The assistant message id is assigned by the
/// lifecycle manager before the cycle starts, so every incremental save point
/// upserts the same row.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub conversation_id: String,
    pub assistant_message_id: String,
    pub model: Option<String>,
    pub provider_preferences: Option<ProviderPreferences>,
    /// Root-to-anchor history; the anchor user message is last.
    pub history: Vec<Message>,
}

/// Incremental signals emitted during a generation cycle.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    TextDelta {
        text: String,
    },
    ToolCall {
        tool_name: String,
        tool_call_id: String,
        input: serde_json::Value,
    },
    /// A tool finished; the result is attached to the matching pending tool
    /// part in the store.
    ToolResult {
        tool_call_id: String,
        output: serde_json::Value,
    },
    /// Step boundary: the consolidated parts produced so far, persisted as a
    /// progressive save of the assistant message.
    StepFinished {
        parts: Vec<ContentPart>,
    },
}

#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Run one generation cycle. Emits [`EngineEvent`]s while running and
    /// resolves to the final ordered content parts of the assistant message.
    async fn generate(
        &self,
        request: GenerationRequest,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<Vec<ContentPart>, EngineError>;
}
