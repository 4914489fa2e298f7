//! Chat turns and the live event stream.

use std::time::Duration;

use actix_web::{
    get, post,
    web::{self, Data, Json, Path},
    HttpResponse,
};
use actix_web_lab::{sse, util::InfallibleStream};
use log::info;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;

use conversation_manager::{ChatTurnRequest, IncomingMessage, StreamEvent, StreamStatus};

use crate::dto::{ChatAcceptedResponse, ChatRequest};
use crate::error::{AppError, Result};
use crate::server::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const KEEP_ALIVE: Duration = Duration::from_secs(15);

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(post_chat).service(stream_chat_events);
}

/// Accept one chat turn and start its generation cycle. The response returns
/// immediately; output is observed on the stream endpoint (or by refetching
/// the conversation once its status leaves `streaming`).
#[post("/chat")]
pub async fn post_chat(
    app_state: Data<AppState>,
    req: Json<ChatRequest>,
) -> Result<HttpResponse> {
    let req = req.into_inner();

    let receipt = app_state
        .manager
        .handle_turn(ChatTurnRequest {
            conversation_id: req.conversation_id,
            message: IncomingMessage {
                id: req.message.id,
                parts: req.message.parts,
            },
            model: req.model,
            provider_preferences: req.provider_preferences,
            parent_id: req.parent_id,
            action: req.action,
        })
        .await?;

    info!(
        "Chat turn accepted for {} (assistant message {})",
        receipt.conversation_id, receipt.assistant_message_id
    );

    // The generation task is detached on purpose: it must outlive this
    // request, and even the client.
    let stream_url = format!("/api/chat/stream/{}", receipt.conversation_id);
    Ok(HttpResponse::Created().json(ChatAcceptedResponse {
        conversation_id: receipt.conversation_id,
        user_message_id: receipt.user_message_id,
        assistant_message_id: receipt.assistant_message_id,
        is_new_conversation: receipt.is_new_conversation,
        stream_url,
        status: "streaming".to_string(),
    }))
}

/// SSE stream of generation events for a conversation. Late joiners get the
/// buffered replay first; the stream ends after a terminal event.
#[get("/chat/stream/{conversation_id}")]
pub async fn stream_chat_events(
    app_state: Data<AppState>,
    path: Path<String>,
) -> Result<sse::Sse<InfallibleStream<ReceiverStream<sse::Event>>>> {
    let conversation_id = path.into_inner();

    let subscription = app_state
        .manager
        .streams()
        .subscribe(&conversation_id)
        .ok_or_else(|| {
            AppError::NotFound(format!("no active stream for conversation {conversation_id}"))
        })?;

    let (tx, rx) = mpsc::channel::<sse::Event>(32);

    tokio::spawn(async move {
        for event in &subscription.replay {
            if !forward(&tx, event).await {
                return;
            }
        }

        // Finished streams carried their terminal event in the replay.
        if subscription.status != StreamStatus::Streaming {
            return;
        }

        let mut live = subscription.live;
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                result = live.recv() => match result {
                    Ok(event) => {
                        let terminal =
                            matches!(event, StreamEvent::Complete | StreamEvent::Error { .. });
                        if !forward(&tx, &event).await || terminal {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            conversation_id = %conversation_id,
                            skipped = skipped,
                            "SSE subscriber lagged behind the broadcast"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = heartbeat.tick() => {
                    if tx.send(sse::Event::Comment("heartbeat".into())).await.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::debug!(conversation_id = %conversation_id, "SSE stream closed");
    });

    Ok(sse::Sse::from_infallible_receiver(rx).with_keep_alive(KEEP_ALIVE))
}

async fn forward(tx: &mpsc::Sender<sse::Event>, event: &StreamEvent) -> bool {
    match sse::Data::new_json(event) {
        Ok(data) => tx.send(sse::Event::Data(data)).await.is_ok(),
        Err(error) => {
            tracing::error!(error = %error, "failed to serialize stream event");
            true
        }
    }
}
