//! Wire-format DTOs. The HTTP surface speaks camelCase JSON; conversions
//! from the domain types live here so controllers stay thin.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chat_core::{
    ContentPart, Conversation, ConversationStatus, Message, ProviderPreferences, Role,
};
use conversation_manager::ChatAction;

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDTO {
    pub id: String,
    pub title: String,
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_preferences: Option<ProviderPreferences>,
    pub status: ConversationStatus,
    pub pinned: bool,
    pub active_leaf_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Conversation> for ConversationDTO {
    fn from(conversation: Conversation) -> Self {
        Self {
            id: conversation.id,
            title: conversation.title,
            model: conversation.model,
            provider_preferences: conversation.provider_preferences,
            status: conversation.status,
            pinned: conversation.pinned,
            active_leaf_id: conversation.active_leaf_id,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MessageDTO {
    pub id: String,
    pub role: Role,
    pub parts: Vec<ContentPart>,
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Message> for MessageDTO {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            role: message.role,
            parts: message.parts,
            parent_id: message.parent_id,
            created_at: message.created_at,
            updated_at: message.updated_at,
        }
    }
}

/// Full conversation fetch: the flat list for tree building plus the
/// precomputed active path, so the client renders without a second round
/// trip.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetailDTO {
    #[serde(flatten)]
    pub conversation: ConversationDTO,
    pub messages: Vec<MessageDTO>,
    pub active_path: Vec<MessageDTO>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    /// Client-supplied id; minted server-side when absent.
    pub id: Option<String>,
    pub title: Option<String>,
    pub model: Option<String>,
    pub provider_preferences: Option<ProviderPreferences>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConversationRequest {
    pub title: Option<String>,
    pub model: Option<String>,
    pub provider_preferences: Option<ProviderPreferences>,
    pub pinned: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessageDTO {
    pub id: Option<String>,
    #[serde(default)]
    pub parts: Vec<ContentPart>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub conversation_id: String,
    #[serde(default)]
    pub message: IncomingMessageDTO,
    pub model: Option<String>,
    pub provider_preferences: Option<ProviderPreferences>,
    pub parent_id: Option<String>,
    pub action: Option<ChatAction>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChatAcceptedResponse {
    pub conversation_id: String,
    pub user_message_id: Option<String>,
    pub assistant_message_id: String,
    pub is_new_conversation: bool,
    pub stream_url: String,
    pub status: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SwitchBranchRequest {
    pub message_id: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SwitchBranchResponse {
    pub success: bool,
    pub active_leaf_id: String,
}
