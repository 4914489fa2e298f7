//! Stand-in generation collaborator for local runs.
//!
//! The real engine (model routing, tools, token streaming) is an external
//! system mounted behind [`GenerationEngine`]; this one just echoes the user
//! so the server is usable end-to-end without it.

use async_trait::async_trait;
use tokio::sync::mpsc;

use chat_core::{ContentPart, Role};
use conversation_manager::{EngineError, EngineEvent, GenerationEngine, GenerationRequest};

pub struct EchoEngine;

#[async_trait]
impl GenerationEngine for EchoEngine {
    async fn generate(
        &self,
        request: GenerationRequest,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<Vec<ContentPart>, EngineError> {
        let prompt = request
            .history
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.text_content())
            .unwrap_or_default();

        let reply = if prompt.is_empty() {
            "I received an empty message.".to_string()
        } else {
            format!("Echo: {prompt}")
        };

        let _ = events
            .send(EngineEvent::TextDelta {
                text: reply.clone(),
            })
            .await;

        Ok(vec![ContentPart::text(reply)])
    }
}
