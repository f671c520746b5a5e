use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::adapters::{enhanced, live, webhook};
use crate::config::{Config, StorageBackend};
use crate::desk::DeskService;
use crate::engine::ConversationEngine;
use crate::http;
use crate::outbound::{LogMessenger, Messenger, WhatsAppCloudMessenger};
use crate::realtime::Realtime;
use crate::store::{ConversationStore, DeskRepository, MemoryStore, PgStore};
use crate::types::AppState;

/// Wires the engine, desk and live registry over one pair of stores, so every
/// adapter sees the same conversations.
pub fn build_state(
    config: Config,
    conversations: Arc<dyn ConversationStore>,
    repo: Arc<dyn DeskRepository>,
    messenger: Arc<dyn Messenger>,
) -> Arc<AppState> {
    let realtime = Arc::new(Realtime::new());
    let engine = Arc::new(ConversationEngine::new(
        conversations.clone(),
        repo.clone(),
        config.template_form.clone(),
    ));
    let desk = DeskService::new(
        repo.clone(),
        engine.clone(),
        messenger.clone(),
        realtime.clone(),
    );
    Arc::new(AppState {
        config,
        conversations,
        repo,
        engine,
        messenger,
        realtime,
        desk,
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(http::health))
        .route("/webhook", get(webhook::verify).post(webhook::receive))
        .route(
            "/webhook/enhanced",
            get(enhanced::verify).post(enhanced::receive),
        )
        .route("/api/tickets", get(http::list_tickets))
        .route("/api/tickets/{ticket_id}", get(http::get_ticket))
        .route(
            "/api/tickets/{ticket_id}/messages",
            get(http::get_messages).post(http::post_message),
        )
        .route(
            "/api/tickets/{ticket_id}/assignee",
            patch(http::patch_assignee),
        )
        .route("/api/tickets/{ticket_id}/status", patch(http::patch_status))
        .route("/api/tickets/{ticket_id}/close", post(http::close_ticket))
        .route("/api/escalations", get(http::escalations))
        .route("/api/conversations/{phone}", get(http::get_conversation))
        .route(
            "/api/agents",
            get(http::list_agents).post(http::create_agent),
        )
        .route("/ws", get(live::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn messenger_for(config: &Config) -> Arc<dyn Messenger> {
    if config.whatsapp.can_send() {
        Arc::new(WhatsAppCloudMessenger::new(&config.whatsapp))
    } else {
        warn!("whatsapp credentials missing, outbound messages will only be logged");
        Arc::new(LogMessenger)
    }
}

pub async fn run() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let port = config.port;
    let messenger = messenger_for(&config);

    let state = match config.storage {
        StorageBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&config.database_url)
                .await
                .expect("failed to connect to postgres (set DATABASE_URL or POSTGRES_* env vars)");
            let store = Arc::new(PgStore::new(pool));
            store
                .migrate()
                .await
                .expect("failed to run sqlx migrations");
            build_state(config, store.clone(), store, messenger)
        }
        StorageBackend::Memory => {
            warn!("using in-memory storage, data is lost on restart");
            let store = Arc::new(MemoryStore::new());
            build_state(config, store.clone(), store, messenger)
        }
    };

    let app = router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");

    info!(%addr, "ticket desk server listening");
    axum::serve(listener, app)
        .await
        .expect("server runtime failure");
}
