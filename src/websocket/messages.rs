use serde::{Deserialize, Serialize};

use crate::models::{FormattedQuestion, GameStatus};

/// Messages sent from client to server. Anything that fails to parse into
/// one of these is a protocol violation and gets dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// The player is ready to start; the game begins on the second one
    #[serde(rename = "game.ready")]
    GameReady,
    #[serde(rename = "question.answered")]
    QuestionAnswered { answer: String },
    /// One-shot request to eliminate two wrong answers
    #[serde(rename = "fifty.request")]
    FiftyRequest { answers: Vec<String> },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "game.prepare")]
    GamePrepare,
    #[serde(rename = "game.start")]
    GameStart { opponent: String, duration: u64 },
    #[serde(rename = "question.data")]
    QuestionData { questions: Vec<FormattedQuestion> },
    #[serde(rename = "question.next")]
    QuestionNext,
    /// Sent to the player who answered; includes the correct answer
    #[serde(rename = "question.result")]
    QuestionResult {
        correctly: bool,
        correct_answer: String,
        damage: i32,
    },
    /// Sent to the opponent of the player who answered
    #[serde(rename = "opponent.answered")]
    OpponentAnswered { correctly: bool, damage: i32 },
    #[serde(rename = "fifty.response")]
    FiftyResponse { incorrect_answers: Vec<String> },
    #[serde(rename = "game.end")]
    GameEnd { status: GameStatus, rank_gain: i32 },
}
