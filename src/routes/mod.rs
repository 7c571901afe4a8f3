pub mod health;
pub mod lobbies;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::AppState;

pub fn create_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/api/trivia/lobbies/",
            get(lobbies::list_lobbies).post(lobbies::create_lobby),
        )
        .route(
            "/api/trivia/lobbies/{name}/join/",
            post(lobbies::join_lobby),
        )
        .with_state(state)
}
