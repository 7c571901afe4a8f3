use serde::{Deserialize, Serialize};

/// Difficulty tiers used by the trivia provider. Per-question timeouts and
/// damage are both keyed by difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Boolean,
    Multiple,
}

/// A question as sent to clients: decoded, shuffled, with the per-question
/// timeout attached. The correct answer is never part of this payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedQuestion {
    pub category: String,
    pub question: String,
    pub answers: Vec<String>,
    pub difficulty: Difficulty,
    /// Seconds the client has to answer this question
    pub duration: u64,
    #[serde(rename = "type")]
    pub kind: QuestionType,
}

/// Server-side record of the correct answer for one question of the
/// current batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectAnswer {
    pub answer: String,
    pub difficulty: Difficulty,
}
