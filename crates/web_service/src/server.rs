use std::path::PathBuf;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use log::info;

use conversation_manager::{ChatManager, GenerationEngine, StreamRegistry};
use conversation_store::{ConversationStore, SqliteConversationStore};

use crate::controllers::{chat_controller, conversations_controller};
use crate::engine::EchoEngine;

pub struct AppState {
    pub store: Arc<dyn ConversationStore>,
    pub manager: Arc<ChatManager>,
}

const DEFAULT_WORKER_COUNT: usize = 10;
const STREAM_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

pub fn app_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .configure(conversations_controller::config)
            .configure(chat_controller::config),
    );
}

/// Build the shared application state: store, stream registry (with its
/// sweeper), and the lifecycle manager wired to the given engine.
pub async fn build_state(
    data_dir: PathBuf,
    engine: Arc<dyn GenerationEngine>,
) -> anyhow::Result<AppState> {
    let store = Arc::new(SqliteConversationStore::new(data_dir.join("chat.db")));
    store.init().await?;

    let streams = Arc::new(StreamRegistry::new());
    {
        // Periodic cleanup of finished streams past their replay TTL.
        let streams = Arc::clone(&streams);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STREAM_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                streams.prune_finished(conversation_manager::streams::STREAM_TTL);
            }
        });
    }

    let manager = Arc::new(ChatManager::new(
        store.clone() as Arc<dyn ConversationStore>,
        engine,
        streams,
    ));

    Ok(AppState {
        store: store as Arc<dyn ConversationStore>,
        manager,
    })
}

pub async fn run(data_dir: PathBuf, port: u16) -> anyhow::Result<()> {
    info!("Starting chat server (data dir: {})", data_dir.display());

    let state = web::Data::new(build_state(data_dir, Arc::new(EchoEngine)).await?);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Cors::permissive())
            .configure(app_config)
    })
    .workers(DEFAULT_WORKER_COUNT)
    .bind(format!("127.0.0.1:{port}"))?
    .run();

    info!("Listening on http://127.0.0.1:{port}");
    server.await?;
    Ok(())
}
