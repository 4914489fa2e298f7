//! The per-request state machine: one `handle_turn` call per chat request.
//!
//! Chooses the branching semantics for the action (submit appends under the
//! active leaf, edit appends a sibling under the caller-supplied parent,
//! regenerate re-anchors on the existing user message), then spawns the
//! generation cycle. The spawned cycle owns every remaining persistence side
//! effect, so a client disconnect never truncates what gets saved.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use chat_core::{ContentPart, Message, ProviderPreferences};
use conversation_store::{
    ConversationStore, MessageTree, NewConversation, NewMessage, StoreError,
};

use crate::engine::{EngineEvent, GenerationEngine, GenerationRequest};
use crate::error::ChatError;
use crate::streams::{StreamEvent, StreamRegistry};

/// What triggered a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatAction {
    Submit,
    Edit,
    Regenerate,
}

/// The user message carried by a turn. Clients may supply the id.
#[derive(Debug, Clone, Default)]
pub struct IncomingMessage {
    pub id: Option<String>,
    pub parts: Vec<ContentPart>,
}

impl IncomingMessage {
    fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatTurnRequest {
    pub conversation_id: String,
    pub message: IncomingMessage,
    pub model: Option<String>,
    pub provider_preferences: Option<ProviderPreferences>,
    /// Branching anchor. Meaning depends on the action; see `handle_turn`.
    pub parent_id: Option<String>,
    pub action: Option<ChatAction>,
}

/// Returned as soon as the turn is accepted; generation continues in the
/// background task held by `generation`.
#[derive(Debug)]
pub struct ChatTurnReceipt {
    pub conversation_id: String,
    pub user_message_id: Option<String>,
    pub assistant_message_id: String,
    pub is_new_conversation: bool,
    pub generation: JoinHandle<()>,
}

pub struct ChatManager {
    store: Arc<dyn ConversationStore>,
    engine: Arc<dyn GenerationEngine>,
    streams: Arc<StreamRegistry>,
}

impl ChatManager {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        engine: Arc<dyn GenerationEngine>,
        streams: Arc<StreamRegistry>,
    ) -> Self {
        Self {
            store,
            engine,
            streams,
        }
    }

    pub fn streams(&self) -> &Arc<StreamRegistry> {
        &self.streams
    }

    /// Run one chat turn: persist the user side of the exchange, then spawn
    /// the generation cycle and return. Store errors up to the spawn point
    /// bubble to the caller; everything after lands in the conversation
    /// status instead.
    pub async fn handle_turn(&self, request: ChatTurnRequest) -> Result<ChatTurnReceipt, ChatError> {
        if request.conversation_id.trim().is_empty() {
            return Err(ChatError::InvalidRequest(
                "conversation id is required".into(),
            ));
        }

        let action = resolve_action(&request);
        let conversation_id = request.conversation_id.clone();

        let model = match &request.model {
            Some(model) => Some(model.clone()),
            None => self.store.default_model().await?,
        };

        let (conversation, is_new) = self
            .store
            .ensure_conversation(NewConversation {
                id: conversation_id.clone(),
                title: None,
                model: model.clone(),
                provider_preferences: request.provider_preferences.clone(),
            })
            .await?;

        tracing::info!(
            conversation_id = %conversation_id,
            action = ?action,
            is_new = is_new,
            parent_id = ?request.parent_id,
            "chat turn accepted"
        );

        // Resolve the anchor the assistant response will be parented to.
        let (user_message_id, anchor_id) = match action {
            ChatAction::Submit => {
                // No explicit parent means "continue where the user is".
                let parent_id = request
                    .parent_id
                    .clone()
                    .or_else(|| conversation.active_leaf_id.clone());
                let message = self
                    .store
                    .append_user_message(
                        &conversation_id,
                        NewMessage {
                            id: request.message.id.clone(),
                            parts: request.message.parts.clone(),
                            parent_id,
                        },
                    )
                    .await?;
                (Some(message.id.clone()), message.id)
            }
            ChatAction::Edit => {
                // The caller supplies the node before the edited message; the
                // original message and its descendants stay as an inactive
                // branch.
                let message = self
                    .store
                    .append_user_message(
                        &conversation_id,
                        NewMessage {
                            id: request.message.id.clone(),
                            parts: request.message.parts.clone(),
                            parent_id: request.parent_id.clone(),
                        },
                    )
                    .await?;
                (Some(message.id.clone()), message.id)
            }
            ChatAction::Regenerate => {
                // No new user message: the supplied parent *is* the existing
                // user message the new assistant sibling hangs under.
                let anchor_id = request.parent_id.clone().ok_or_else(|| {
                    ChatError::InvalidRequest("regenerate requires a parent id".into())
                })?;
                if self
                    .store
                    .get_message(&conversation_id, &anchor_id)
                    .await?
                    .is_none()
                {
                    return Err(ChatError::Store(StoreError::MessageNotFound(anchor_id)));
                }
                (None, anchor_id)
            }
        };

        if user_message_id.is_some() && conversation.has_placeholder_title() {
            let title = derive_title(&request.message.text());
            if !title.is_empty() {
                self.store
                    .set_title_if_placeholder(&conversation_id, &title)
                    .await?;
            }
        }

        if is_new {
            if let Some(model) = model.as_deref() {
                let provider = request
                    .provider_preferences
                    .as_ref()
                    .map(ProviderPreferences::provider_label)
                    .unwrap_or("auto");
                self.store.record_last_used(model, provider).await?;
            }
        }

        self.store
            .set_status(&conversation_id, chat_core::ConversationStatus::Streaming)
            .await?;

        // Stable id assigned before the cycle starts, so every incremental
        // save point upserts the same row.
        let assistant_message_id = uuid::Uuid::new_v4().to_string();

        let history = self.load_history(&conversation_id, &anchor_id).await?;
        let generation_request = GenerationRequest {
            conversation_id: conversation_id.clone(),
            assistant_message_id: assistant_message_id.clone(),
            model,
            provider_preferences: request.provider_preferences.clone(),
            history,
        };

        self.streams.register(&conversation_id);

        let generation = tokio::spawn(run_generation(
            Arc::clone(&self.store),
            Arc::clone(&self.engine),
            Arc::clone(&self.streams),
            generation_request,
            anchor_id,
        ));

        Ok(ChatTurnReceipt {
            conversation_id,
            user_message_id,
            assistant_message_id,
            is_new_conversation: is_new,
            generation,
        })
    }

    /// Relocate the active leaf to the deepest continuation of the selected
    /// message's subtree.
    pub async fn switch_branch(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<String, ChatError> {
        Ok(self.store.switch_branch(conversation_id, message_id).await?)
    }

    /// The root-to-anchor history handed to the generation engine, assembled
    /// through the in-memory tree rather than per-row parent queries.
    async fn load_history(
        &self,
        conversation_id: &str,
        anchor_id: &str,
    ) -> Result<Vec<Message>, ChatError> {
        let messages = self.store.get_all_messages(conversation_id).await?;
        let tree = MessageTree::build(messages, Some(anchor_id.to_string()));
        Ok(tree.active_path().into_iter().cloned().collect())
    }
}

/// Explicit action when given; otherwise submit, except for the defensive
/// case of an empty user message with a parent id, which can only sensibly
/// mean regenerate.
fn resolve_action(request: &ChatTurnRequest) -> ChatAction {
    if let Some(action) = request.action {
        return action;
    }
    if request.parent_id.is_some() && request.message.text().trim().is_empty() {
        return ChatAction::Regenerate;
    }
    ChatAction::Submit
}

/// First 50 characters of the first user message, with an ellipsis when
/// truncated.
fn derive_title(text: &str) -> String {
    let trimmed = text.trim();
    let mut title: String = trimmed.chars().take(50).collect();
    if trimmed.chars().count() > 50 {
        title.push_str("...");
    }
    title
}

/// The generation cycle. Runs detached from the originating request: every
/// persistence side effect here completes (or fails into the conversation
/// status) regardless of client connectivity.
async fn run_generation(
    store: Arc<dyn ConversationStore>,
    engine: Arc<dyn GenerationEngine>,
    streams: Arc<StreamRegistry>,
    request: GenerationRequest,
    anchor_id: String,
) {
    let conversation_id = request.conversation_id.clone();
    let assistant_message_id = request.assistant_message_id.clone();

    let (tx, mut rx) = mpsc::channel::<EngineEvent>(64);

    let consumer = tokio::spawn({
        let store = Arc::clone(&store);
        let streams = Arc::clone(&streams);
        let conversation_id = conversation_id.clone();
        let assistant_message_id = assistant_message_id.clone();
        let anchor_id = anchor_id.clone();
        async move {
            while let Some(event) = rx.recv().await {
                match event {
                    EngineEvent::TextDelta { text } => {
                        streams.broadcast(
                            &conversation_id,
                            StreamEvent::TextDelta { content: text },
                        );
                    }
                    EngineEvent::ToolCall {
                        tool_name,
                        tool_call_id,
                        input,
                    } => {
                        streams.broadcast(
                            &conversation_id,
                            StreamEvent::ToolCall {
                                tool_name,
                                tool_call_id,
                                input,
                            },
                        );
                    }
                    EngineEvent::ToolResult {
                        tool_call_id,
                        output,
                    } => {
                        match store
                            .attach_tool_result(&conversation_id, &tool_call_id, output.clone())
                            .await
                        {
                            Ok(true) => {}
                            Ok(false) => {
                                tracing::warn!(
                                    conversation_id = %conversation_id,
                                    tool_call_id = %tool_call_id,
                                    "tool result had no pending call to attach to"
                                );
                            }
                            Err(error) => {
                                tracing::error!(
                                    conversation_id = %conversation_id,
                                    tool_call_id = %tool_call_id,
                                    error = %error,
                                    "failed to attach tool result"
                                );
                            }
                        }
                        streams.broadcast(
                            &conversation_id,
                            StreamEvent::ToolResult {
                                tool_call_id,
                                output,
                            },
                        );
                    }
                    EngineEvent::StepFinished { parts } => {
                        // Progressive save: the same row is rewritten at each
                        // step boundary.
                        if let Err(error) = store
                            .upsert_assistant_message(
                                &conversation_id,
                                &assistant_message_id,
                                parts,
                                Some(anchor_id.clone()),
                            )
                            .await
                        {
                            tracing::error!(
                                conversation_id = %conversation_id,
                                message_id = %assistant_message_id,
                                error = %error,
                                "failed to persist generation step"
                            );
                        }
                    }
                }
            }
        }
    });

    let result = engine.generate(request, tx).await;
    // The engine dropped its sender; drain whatever is still queued.
    if let Err(error) = consumer.await {
        tracing::error!(
            conversation_id = %conversation_id,
            error = %error,
            "event consumer task failed"
        );
    }

    match result {
        Ok(parts) => {
            let saved = async {
                store
                    .upsert_assistant_message(
                        &conversation_id,
                        &assistant_message_id,
                        parts,
                        Some(anchor_id.clone()),
                    )
                    .await?;
                store
                    .set_active_leaf(&conversation_id, &assistant_message_id)
                    .await?;
                store
                    .set_status(&conversation_id, chat_core::ConversationStatus::Idle)
                    .await
            }
            .await;

            match saved {
                Ok(()) => {
                    streams.complete(&conversation_id);
                    tracing::info!(
                        conversation_id = %conversation_id,
                        message_id = %assistant_message_id,
                        "generation cycle completed"
                    );
                }
                Err(error) => {
                    tracing::error!(
                        conversation_id = %conversation_id,
                        error = %error,
                        "failed to persist completed generation"
                    );
                    fail_conversation(&store, &streams, &conversation_id, "persistence failed")
                        .await;
                }
            }
        }
        Err(error) => {
            tracing::error!(
                conversation_id = %conversation_id,
                error = %error,
                "generation failed"
            );
            fail_conversation(&store, &streams, &conversation_id, &error.to_string()).await;
        }
    }
}

async fn fail_conversation(
    store: &Arc<dyn ConversationStore>,
    streams: &Arc<StreamRegistry>,
    conversation_id: &str,
    message: &str,
) {
    if let Err(error) = store
        .set_status(conversation_id, chat_core::ConversationStatus::Error)
        .await
    {
        tracing::error!(
            conversation_id = %conversation_id,
            error = %error,
            "failed to record error status"
        );
    }
    streams.error(conversation_id, message);
}
