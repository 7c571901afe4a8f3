use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::question::CorrectAnswer;

pub type UserId = i64;

/// Health every player starts a game with
pub const STARTING_HP: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyState {
    Waiting,
    InProgress,
    Finished,
}

/// Per-player slice of live lobby state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerData {
    pub name: String,
    pub hp: i32,
}

/// Live record of one two-player game, from lobby creation to completion.
/// The lobby store keeps the canonical copy; every mutation is a
/// read-modify-write under the per-lobby lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lobby {
    /// Primary key, a unique slug chosen by the creator
    pub name: String,
    pub ranked: bool,
    pub state: LobbyState,
    /// Admitted players keyed by user id; never more than two
    pub users: HashMap<UserId, PlayerData>,
    /// Players that have confirmed readiness; the game starts at two
    pub ready_count: u8,
    /// Session token of the trivia provider, set at game start
    pub trivia_token: Option<String>,
    /// Correct answers for the current question batch, in question order
    pub correct_answers: Vec<CorrectAnswer>,
    /// Index into `correct_answers` of the question being played
    pub current_question_count: usize,
    /// How many players have answered the current question (0 or 1)
    pub current_answer_count: u8,
    pub game_start_time: Option<DateTime<Utc>>,
    pub question_start_time: Option<DateTime<Utc>>,
}

impl Lobby {
    pub fn new(name: impl Into<String>, ranked: bool) -> Self {
        Self {
            name: name.into(),
            ranked,
            state: LobbyState::Waiting,
            users: HashMap::new(),
            ready_count: 0,
            trivia_token: None,
            correct_answers: Vec::new(),
            current_question_count: 0,
            current_answer_count: 0,
            game_start_time: None,
            question_start_time: None,
        }
    }

    pub fn player_count(&self) -> usize {
        self.users.len()
    }

    /// Id of the other player in the lobby, if there is one
    pub fn opponent_of(&self, user_id: UserId) -> Option<UserId> {
        self.users.keys().find(|id| **id != user_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_lobby_is_waiting_and_empty() {
        let lobby = Lobby::new("duel-1", true);
        assert_eq!(lobby.state, LobbyState::Waiting);
        assert_eq!(lobby.player_count(), 0);
        assert_eq!(lobby.ready_count, 0);
        assert!(lobby.correct_answers.is_empty());
    }

    #[test]
    fn test_opponent_of() {
        let mut lobby = Lobby::new("duel-2", false);
        lobby.users.insert(
            1,
            PlayerData {
                name: "alice".into(),
                hp: STARTING_HP,
            },
        );
        lobby.users.insert(
            2,
            PlayerData {
                name: "bob".into(),
                hp: STARTING_HP,
            },
        );

        assert_eq!(lobby.opponent_of(1), Some(2));
        assert_eq!(lobby.opponent_of(2), Some(1));
        assert_eq!(Lobby::new("empty", false).opponent_of(1), None);
    }
}
