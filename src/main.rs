//! Study Coach - streaming study assistant API
//!
//! Runs chat conversations against Gemini and streams replies to the client
//! fragment by fragment, next to a few single-shot study tools (summaries,
//! flashcards, study plans).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod auth;
mod config;
mod conversation;
mod core;
mod providers;
mod routes;

use auth::AuthState;
use config::Config;
use core::{ChatRegistry, SessionManager, StudyTools};
use providers::{Gateway, GeminiProvider};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub chats: Arc<ChatRegistry>,
    pub study: Arc<StudyTools>,
    pub auth: Arc<RwLock<AuthState>>,
}

impl AppState {
    pub fn new(config: Config, gateway: Arc<dyn Gateway>) -> Self {
        let manager = SessionManager::new(gateway.clone());
        let chats = Arc::new(ChatRegistry::new(manager, config.chat_settings()));
        let study = Arc::new(StudyTools::new(gateway, config.coach.limits.clone()));

        Self {
            config,
            chats,
            study,
            auth: Arc::new(RwLock::new(AuthState::default())),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "study_coach=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    if config.gemini_api_key.is_none() {
        tracing::warn!(
            "No Gemini API key set ({}); chat and study tools will fail",
            config.coach.llm.api_key_env
        );
    }

    let gateway: Arc<dyn Gateway> = Arc::new(GeminiProvider::new(config.gemini())?);
    tracing::info!(model = gateway.model(), "Using Gemini model");

    let state = AppState::new(config, gateway);

    tracing::info!("📚 {} running at http://{}", state.config.coach.client.name, addr);

    let app = Router::new()
        .merge(routes::router(state.clone()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
