mod auth;
mod config;
mod db;
mod error;
mod models;
mod questions;
mod routes;
mod store;
mod websocket;

use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use questions::{QuestionSource, TriviaApiClient};
use store::LobbyStore;
use websocket::gateway::Gateway;

/// How often the sweep task reclaims lobbies whose TTL ran out
pub const LOBBY_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Application state shared across all handlers
pub struct AppState {
    pub config: Config,
    pub db: PgPool,
    /// Live lobby records, the canonical game state
    pub lobbies: LobbyStore,
    /// Per-lobby pub/sub groups and question deadline timers
    pub gateway: Arc<Gateway>,
    pub questions: Arc<dyn QuestionSource>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trivia_duel_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting trivia duel server...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Connect to database
    let db = db::create_pool(&config.database.url, config.database.max_connections).await?;
    tracing::info!("Connected to database");

    // Run migrations
    sqlx::migrate!("./migrations").run(&db).await?;
    tracing::info!("Database migrations completed");

    // Shared HTTP client for the trivia provider
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let questions: Arc<dyn QuestionSource> =
        Arc::new(TriviaApiClient::new(http_client, &config.trivia));

    // Create application state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        lobbies: LobbyStore::new(),
        gateway: Arc::new(Gateway::new()),
        questions,
    });

    // Spawn background task to reclaim abandoned lobbies
    let sweep_state = state.clone();
    tokio::spawn(async move {
        lobby_expiry_task(sweep_state).await;
    });

    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        // WebSocket endpoint, one connection per player per game
        .route(
            "/ws/trivia/lobbies/{name}",
            get(websocket::handle_websocket),
        )
        .with_state(state.clone())
        // Lobby admission API
        .merge(routes::create_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("WebSocket endpoint: ws://{}/ws/trivia/lobbies/{{name}}", addr);
    tracing::info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Background task that deletes lobbies whose creator never connected
/// before the TTL ran out
async fn lobby_expiry_task(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(LOBBY_SWEEP_INTERVAL);

    loop {
        interval.tick().await;

        for name in state.lobbies.purge_expired() {
            tracing::info!("Removed expired lobby {} (TTL ran out)", name);
        }
    }
}
