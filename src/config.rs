use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;

use crate::models::Difficulty;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub trivia: TriviaConfig,
    pub game: GameConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// HS256 key for both session bearers and lobby join tokens
    pub secret_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriviaConfig {
    pub api_url: String,
    pub token_url: String,
    /// Questions fetched per batch
    pub question_amount: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameConfig {
    /// TTL of an empty, just-created lobby
    pub lobby_expire_seconds: u64,
    /// Overall game wall-clock limit
    pub max_duration_seconds: u64,
    /// Magnitude of the rank delta applied after a ranked game
    pub rank_gain: i32,
    pub question_durations: QuestionDurations,
    pub question_damage: QuestionDamage,
}

/// Per-question answer window in seconds, keyed by difficulty
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct QuestionDurations {
    pub easy: u64,
    pub medium: u64,
    pub hard: u64,
}

impl QuestionDurations {
    pub fn for_difficulty(&self, difficulty: Difficulty) -> u64 {
        match difficulty {
            Difficulty::Easy => self.easy,
            Difficulty::Medium => self.medium,
            Difficulty::Hard => self.hard,
        }
    }
}

/// HP subtracted for a wrong answer, keyed by difficulty
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct QuestionDamage {
    pub easy: i32,
    pub medium: i32,
    pub hard: i32,
}

impl QuestionDamage {
    pub fn for_difficulty(&self, difficulty: Difficulty) -> i32 {
        match difficulty {
            Difficulty::Easy => self.easy,
            Difficulty::Medium => self.medium,
            Difficulty::Hard => self.hard,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} must be a number")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10)?,
        };

        let server = ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 8000)?,
        };

        let security = SecurityConfig {
            secret_key: env::var("SECRET_KEY").context("SECRET_KEY must be set")?,
        };

        let trivia = TriviaConfig {
            api_url: env::var("TRIVIA_API_URL")
                .unwrap_or_else(|_| "https://opentdb.com/api.php".to_string()),
            token_url: env::var("TRIVIA_API_TOKEN_URL")
                .unwrap_or_else(|_| "https://opentdb.com/api_token.php?command=request".to_string()),
            question_amount: env_or("TRIVIA_API_QUESTION_AMOUNT", 10)?,
        };

        let game = GameConfig {
            lobby_expire_seconds: env_or("LOBBY_EXPIRE_SECONDS", 60)?,
            max_duration_seconds: env_or("GAME_MAX_DURATION_SECONDS", 300)?,
            rank_gain: env_or("GAME_RANK_GAIN", 20)?,
            question_durations: QuestionDurations {
                easy: env_or("QUESTION_MAX_DURATION_EASY", 10)?,
                medium: env_or("QUESTION_MAX_DURATION_MEDIUM", 15)?,
                hard: env_or("QUESTION_MAX_DURATION_HARD", 20)?,
            },
            question_damage: QuestionDamage {
                easy: env_or("QUESTION_DAMAGE_EASY", 10)?,
                medium: env_or("QUESTION_DAMAGE_MEDIUM", 20)?,
                hard: env_or("QUESTION_DAMAGE_HARD", 30)?,
            },
        };

        Ok(Config {
            database,
            server,
            security,
            trivia,
            game,
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
