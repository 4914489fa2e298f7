//! HTTP-level tests over the full stack: real store, echo engine, actix
//! service built exactly like the production server.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{test, web, App};
use tempfile::tempdir;

use web_service::engine::EchoEngine;
use web_service::server::{app_config, build_state, AppState};

async fn test_state(dir: &tempfile::TempDir) -> web::Data<AppState> {
    let state = build_state(dir.path().to_path_buf(), Arc::new(EchoEngine))
        .await
        .expect("build state");
    web::Data::new(state)
}

macro_rules! test_app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data($state.clone())
                .configure(app_config),
        )
        .await
    };
}

#[actix_web::test]
async fn conversation_crud_round_trip() {
    let dir = tempdir().expect("temp dir");
    let state = test_state(&dir).await;
    let app = test_app!(state);

    // Create with a client-supplied id.
    let req = test::TestRequest::post()
        .uri("/api/conversations")
        .set_json(serde_json::json!({ "id": "conv-1", "title": "My chat" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    // Duplicate explicit creation conflicts.
    let req = test::TestRequest::post()
        .uri("/api/conversations")
        .set_json(serde_json::json!({ "id": "conv-1" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);

    // Fetch returns the record with empty message lists.
    let req = test::TestRequest::get()
        .uri("/api/conversations/conv-1")
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["title"], "My chat");
    assert_eq!(body["status"], "idle");
    assert_eq!(body["messages"].as_array().unwrap().len(), 0);
    assert_eq!(body["activePath"].as_array().unwrap().len(), 0);

    // Update pinned; an empty update is rejected.
    let req = test::TestRequest::put()
        .uri("/api/conversations/conv-1")
        .set_json(serde_json::json!({ "pinned": true }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["pinned"], true);

    let req = test::TestRequest::put()
        .uri("/api/conversations/conv-1")
        .set_json(serde_json::json!({}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // Delete, then the conversation is gone.
    let req = test::TestRequest::delete()
        .uri("/api/conversations/conv-1")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let req = test::TestRequest::get()
        .uri("/api/conversations/conv-1")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn missing_conversation_is_client_error() {
    let dir = tempdir().expect("temp dir");
    let state = test_state(&dir).await;
    let app = test_app!(state);

    let req = test::TestRequest::get()
        .uri("/api/conversations/ghost")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    let req = test::TestRequest::delete()
        .uri("/api/conversations/ghost")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

/// Refetch until the generation cycle finished server-side.
macro_rules! wait_until_idle {
    ($app:expr, $conversation_id:expr) => {{
        let mut detail = serde_json::Value::Null;
        for _ in 0..100 {
            let req = test::TestRequest::get()
                .uri(&format!("/api/conversations/{}", $conversation_id))
                .to_request();
            let body: serde_json::Value = test::call_and_read_body_json(&$app, req).await;
            if body["status"] == "idle" || body["status"] == "error" {
                detail = body;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(
            !detail.is_null(),
            "conversation never left streaming status"
        );
        detail
    }};
}

#[actix_web::test]
async fn chat_turn_creates_lazily_and_persists_the_exchange() {
    let dir = tempdir().expect("temp dir");
    let state = test_state(&dir).await;
    let app = test_app!(state);

    let req = test::TestRequest::post()
        .uri("/api/chat")
        .set_json(serde_json::json!({
            "conversationId": "conv-lazy",
            "message": { "parts": [{ "type": "text", "text": "hello server" }] }
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let accepted: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(accepted["isNewConversation"], true);
    assert_eq!(accepted["status"], "streaming");
    assert_eq!(
        accepted["streamUrl"],
        "/api/chat/stream/conv-lazy".to_string()
    );

    let detail = wait_until_idle!(app, "conv-lazy");
    assert_eq!(detail["status"], "idle");
    assert_eq!(detail["title"], "hello server");

    let messages = detail["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    let active_path = detail["activePath"].as_array().unwrap();
    assert_eq!(active_path.len(), 2);
    assert_eq!(active_path[1]["role"], "assistant");
    assert_eq!(
        active_path[1]["parts"][0]["text"],
        "Echo: hello server".to_string()
    );
    assert_eq!(detail["activeLeafId"], active_path[1]["id"]);
}

#[actix_web::test]
async fn regenerate_turn_branches_and_switch_moves_the_leaf() {
    let dir = tempdir().expect("temp dir");
    let state = test_state(&dir).await;
    let app = test_app!(state);

    let req = test::TestRequest::post()
        .uri("/api/chat")
        .set_json(serde_json::json!({
            "conversationId": "conv-b",
            "message": { "parts": [{ "type": "text", "text": "hi" }] }
        }))
        .to_request();
    let accepted: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let user_id = accepted["userMessageId"].as_str().unwrap().to_string();
    let first_assistant = accepted["assistantMessageId"]
        .as_str()
        .unwrap()
        .to_string();
    wait_until_idle!(app, "conv-b");

    // Regenerate against the existing user message.
    let req = test::TestRequest::post()
        .uri("/api/chat")
        .set_json(serde_json::json!({
            "conversationId": "conv-b",
            "message": { "parts": [] },
            "parentId": user_id,
            "action": "regenerate"
        }))
        .to_request();
    let regen: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert!(regen["userMessageId"].is_null());
    let detail = wait_until_idle!(app, "conv-b");

    // Three messages, two of them assistant siblings; the leaf moved to the
    // regenerated answer.
    assert_eq!(detail["messages"].as_array().unwrap().len(), 3);
    assert_eq!(detail["activeLeafId"], regen["assistantMessageId"]);

    // Switching back to the first assistant message restores the old branch.
    let req = test::TestRequest::post()
        .uri("/api/conversations/conv-b/switch-branch")
        .set_json(serde_json::json!({ "messageId": first_assistant }))
        .to_request();
    let switched: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(switched["success"], true);
    assert_eq!(switched["activeLeafId"], first_assistant);

    // An unknown message is a client error.
    let req = test::TestRequest::post()
        .uri("/api/conversations/conv-b/switch-branch")
        .set_json(serde_json::json!({ "messageId": "no-such-message" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn stream_replays_events_for_late_joiners() {
    let dir = tempdir().expect("temp dir");
    let state = test_state(&dir).await;
    let app = test_app!(state);

    // No stream registered yet.
    let req = test::TestRequest::get()
        .uri("/api/chat/stream/conv-s")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    let req = test::TestRequest::post()
        .uri("/api/chat")
        .set_json(serde_json::json!({
            "conversationId": "conv-s",
            "message": { "parts": [{ "type": "text", "text": "stream me" }] }
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    wait_until_idle!(app, "conv-s");

    // Joining after completion still yields the buffered events, then the
    // stream closes on its terminal event.
    let req = test::TestRequest::get()
        .uri("/api/chat/stream/conv-s")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body = test::read_body(resp).await;
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("text-delta"));
    assert!(text.contains("Echo: stream me"));
    assert!(text.contains("complete"));
}
