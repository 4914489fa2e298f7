//! Conversation CRUD and branch navigation.

use actix_web::{
    delete, get, post, put,
    web::{self, Data, Json, Path},
    HttpResponse,
};
use log::info;

use conversation_store::{ConversationUpdate, NewConversation};

use crate::dto::{
    ConversationDTO, ConversationDetailDTO, CreateConversationRequest, MessageDTO,
    SwitchBranchRequest, SwitchBranchResponse, UpdateConversationRequest,
};
use crate::error::{AppError, Result};
use crate::server::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(create_conversation)
        .service(list_conversations)
        .service(get_conversation)
        .service(update_conversation)
        .service(delete_conversation)
        .service(get_conversation_messages)
        .service(switch_branch);
}

/// Explicit conversation creation. Lazy creation on first message goes
/// through the chat endpoint instead; colliding ids are a conflict here.
#[post("/conversations")]
pub async fn create_conversation(
    app_state: Data<AppState>,
    req: Json<CreateConversationRequest>,
) -> Result<HttpResponse> {
    let req = req.into_inner();
    let conversation = app_state
        .store
        .create_conversation(NewConversation {
            id: req.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            title: req.title,
            model: req.model,
            provider_preferences: req.provider_preferences,
        })
        .await?;

    info!("Created conversation {}", conversation.id);
    Ok(HttpResponse::Created().json(ConversationDTO::from(conversation)))
}

#[get("/conversations")]
pub async fn list_conversations(app_state: Data<AppState>) -> Result<HttpResponse> {
    let conversations = app_state.store.list_conversations().await?;
    let dtos: Vec<ConversationDTO> = conversations.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(dtos))
}

/// Full fetch: the conversation, every message (for client-side tree
/// building), and the precomputed active path.
#[get("/conversations/{id}")]
pub async fn get_conversation(
    app_state: Data<AppState>,
    path: Path<String>,
) -> Result<HttpResponse> {
    let conversation_id = path.into_inner();

    let conversation = app_state
        .store
        .get_conversation(&conversation_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("conversation not found: {conversation_id}")))?;
    let messages = app_state.store.get_all_messages(&conversation_id).await?;
    let active_path = app_state.store.get_active_path(&conversation_id).await?;

    Ok(HttpResponse::Ok().json(ConversationDetailDTO {
        conversation: conversation.into(),
        messages: messages.into_iter().map(MessageDTO::from).collect(),
        active_path: active_path.into_iter().map(MessageDTO::from).collect(),
    }))
}

#[put("/conversations/{id}")]
pub async fn update_conversation(
    app_state: Data<AppState>,
    path: Path<String>,
    req: Json<UpdateConversationRequest>,
) -> Result<HttpResponse> {
    let conversation_id = path.into_inner();
    let req = req.into_inner();

    let update = ConversationUpdate {
        title: req.title,
        model: req.model,
        provider_preferences: req.provider_preferences,
        pinned: req.pinned,
    };
    if update.is_empty() {
        return Err(AppError::BadRequest("no fields to update".into()));
    }

    let conversation = app_state
        .store
        .update_conversation(&conversation_id, update)
        .await?;

    Ok(HttpResponse::Ok().json(ConversationDTO::from(conversation)))
}

#[delete("/conversations/{id}")]
pub async fn delete_conversation(
    app_state: Data<AppState>,
    path: Path<String>,
) -> Result<HttpResponse> {
    let conversation_id = path.into_inner();
    app_state.store.delete_conversation(&conversation_id).await?;

    info!("Deleted conversation {conversation_id}");
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true })))
}

#[get("/conversations/{id}/messages")]
pub async fn get_conversation_messages(
    app_state: Data<AppState>,
    path: Path<String>,
) -> Result<HttpResponse> {
    let conversation_id = path.into_inner();
    let messages = app_state.store.get_all_messages(&conversation_id).await?;
    let dtos: Vec<MessageDTO> = messages.into_iter().map(Into::into).collect();
    Ok(HttpResponse::Ok().json(dtos))
}

/// Repoint the active leaf to the deepest continuation of the selected
/// message's subtree, so the whole branch is shown after the switch.
#[post("/conversations/{id}/switch-branch")]
pub async fn switch_branch(
    app_state: Data<AppState>,
    path: Path<String>,
    req: Json<SwitchBranchRequest>,
) -> Result<HttpResponse> {
    let conversation_id = path.into_inner();
    let active_leaf_id = app_state
        .manager
        .switch_branch(&conversation_id, &req.message_id)
        .await?;

    Ok(HttpResponse::Ok().json(SwitchBranchResponse {
        success: true,
        active_leaf_id,
    }))
}
