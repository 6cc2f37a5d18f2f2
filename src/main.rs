mod api;
mod audio;
mod auth;
mod config;
mod database;
mod errors;
mod generation;
mod lifecycle;
mod llm_providers;
mod logging;
mod models;
mod partial_json;
mod record_service;
mod streaming;

use anyhow::Result;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::{
    api::{create_router, AppState},
    audio::{AudioService, OpenAiSpeech},
    auth::AuthService,
    config::Config,
    database::Database,
    generation::GenerationService,
    lifecycle::LifecycleCoordinator,
    llm_providers::LlmProviderFactory,
    record_service::RecordService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Logging comes up before config so the configuration summary and any
    // validation warnings are captured. The guard must outlive the server or
    // file logging stops flushing.
    let log_directory = std::env::var("LOG_DIRECTORY").unwrap_or_else(|_| "logs".to_string());
    let _guard = logging::init_logging(&log_directory)?;

    let config = Config::from_env()?;
    config.validate()?;

    info!("Starting Lezano server...");

    let db = Database::new(&config.database.url).await?;
    info!("Database initialized successfully");

    let provider = LlmProviderFactory::create_provider(
        config.llm.provider,
        config.llm.api_key.clone(),
        config.llm.base_url.clone(),
        config.llm.model.clone(),
    );
    info!(
        provider = provider.provider_name(),
        model = provider.model_name(),
        "Initialized LLM provider"
    );

    let records = RecordService::new(db);
    let lifecycle = LifecycleCoordinator::new(records.clone(), GenerationService::new(provider));
    let audio = AudioService::OpenAi(OpenAiSpeech::new(
        config.llm.api_key.clone(),
        config.llm.base_url.clone(),
    ));
    let auth = AuthService::new(&config.auth.secret, config.auth.turnstile_secret.clone());

    let state = AppState {
        records,
        lifecycle,
        audio,
        auth,
    };

    let app = create_router(state).layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
