use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GameType {
    Ranked,
    Normal,
    /// Solo practice game, persisted with a single UserGame row
    Training,
}

/// Outcome of a finished game from one player's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Win,
    Loss,
    Draw,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Game {
    pub game_id: Uuid,
    pub game_type: GameType,
    pub created_at: DateTime<Utc>,
}

/// Join record linking a Game to a User, with the rank the user held at
/// game end.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserGame {
    pub id: i32,
    pub game_id: Uuid,
    pub user_id: i64,
    pub opponent_id: Option<i64>,
    pub status: GameStatus,
    pub rank: i32,
}
