use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    auth::{self, AuthenticatedUser},
    error::ApiError,
    models::Lobby,
    AppState,
};

/// Lobby names are slugs, same limit as the persistence layer
const LOBBY_NAME_MAX_LENGTH: usize = 100;

#[derive(Debug, Deserialize)]
pub struct CreateLobbyRequest {
    pub name: String,
    #[serde(default)]
    pub ranked: bool,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct LobbyListEntry {
    pub name: String,
    pub ranked: bool,
    pub player_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct ListLobbiesQuery {
    pub ranked: Option<bool>,
}

/// Create a lobby with a self-destruct TTL and hand the creator a join
/// token. Occupancy is only claimed when the websocket attaches.
pub async fn create_lobby(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateLobbyRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), ApiError> {
    if !is_valid_lobby_name(&payload.name) {
        return Err(ApiError::Validation(
            "Enter a valid slug consisting of letters, numbers, underscores or hyphens".to_string(),
        ));
    }

    let _guard = state.lobbies.lock(&payload.name).await;
    if state.lobbies.contains(&payload.name) {
        return Err(ApiError::Validation(
            "Lobby with the given name already exists".to_string(),
        ));
    }

    state
        .lobbies
        .save(Lobby::new(payload.name.clone(), payload.ranked));
    state.lobbies.expire(
        &payload.name,
        Duration::from_secs(state.config.game.lobby_expire_seconds),
    );

    let token = auth::generate_lobby_token(
        user.user_id,
        &user.username,
        &payload.name,
        &state.config.security.secret_key,
    )
    .map_err(|err| ApiError::Internal(err.into()))?;

    tracing::info!("lobby {} created by {}", payload.name, user.username);
    Ok((StatusCode::CREATED, Json(TokenResponse { token })))
}

/// List live lobbies, optionally filtered by ranked flag
pub async fn list_lobbies(
    State(state): State<Arc<AppState>>,
    _user: AuthenticatedUser,
    Query(query): Query<ListLobbiesQuery>,
) -> Json<Vec<LobbyListEntry>> {
    let lobbies = state
        .lobbies
        .list(query.ranked)
        .into_iter()
        .map(|lobby| LobbyListEntry {
            player_count: lobby.player_count(),
            name: lobby.name,
            ranked: lobby.ranked,
        })
        .collect();

    Json(lobbies)
}

/// Mint a join token for an existing lobby. No state is mutated here;
/// the seat is claimed when the socket attaches.
pub async fn join_lobby(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(name): Path<String>,
) -> Result<Json<TokenResponse>, ApiError> {
    let _guard = state.lobbies.lock(&name).await;
    let lobby = state.lobbies.get(&name).ok_or(ApiError::NotFound)?;

    if lobby.player_count() >= 2 {
        return Err(ApiError::Validation("Lobby is full".to_string()));
    }
    if lobby.users.contains_key(&user.user_id) {
        return Err(ApiError::Validation(
            "Already joined the lobby".to_string(),
        ));
    }

    let token = auth::generate_lobby_token(
        user.user_id,
        &user.username,
        &name,
        &state.config.security.secret_key,
    )
    .map_err(|err| ApiError::Internal(err.into()))?;

    Ok(Json(TokenResponse { token }))
}

fn is_valid_lobby_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= LOBBY_NAME_MAX_LENGTH
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_lobby_names() {
        assert!(is_valid_lobby_name("duel-1"));
        assert!(is_valid_lobby_name("RANKED_lobby_42"));
        assert!(is_valid_lobby_name(&"a".repeat(100)));
    }

    #[test]
    fn test_invalid_lobby_names() {
        assert!(!is_valid_lobby_name(""));
        assert!(!is_valid_lobby_name("has spaces"));
        assert!(!is_valid_lobby_name("sneaky/../path"));
        assert!(!is_valid_lobby_name("naïve"));
        assert!(!is_valid_lobby_name(&"a".repeat(101)));
    }
}
