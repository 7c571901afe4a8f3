use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Rank assigned to freshly registered users
pub const USER_STARTING_RANK: i32 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: i64,
    /// Unique username, also shown to the opponent in game
    pub username: String,
    /// Opaque credential, written by the registration service
    #[serde(skip_serializing)]
    pub password: String,
    /// Ladder rank, adjusted only by ranked games, never below zero
    pub rank: i32,
    pub created_at: DateTime<Utc>,
}
