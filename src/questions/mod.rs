use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::TriviaConfig;
use crate::models::{Difficulty, QuestionType};

pub mod format;

/// A question exactly as the external provider returns it: HTML-escaped,
/// with the correct answer still attached.
#[derive(Debug, Clone, Deserialize)]
pub struct TriviaQuestion {
    pub category: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    pub difficulty: Difficulty,
    pub question: String,
    pub correct_answer: String,
    pub incorrect_answers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QuestionsResponse {
    response_code: i32,
    results: Vec<TriviaQuestion>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    response_code: i32,
    token: String,
}

#[derive(Debug, Error)]
pub enum QuestionSourceError {
    #[error("trivia provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("trivia provider returned response code {0}")]
    Provider(i32),
}

/// Upstream source of question batches. The session token threads through
/// successive batch fetches so one game never sees the same question
/// twice.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    async fn get_token(&self) -> Result<String, QuestionSourceError>;
    async fn get_questions(&self, token: &str) -> Result<Vec<TriviaQuestion>, QuestionSourceError>;
}

/// Client for the Open Trivia DB style HTTP API
pub struct TriviaApiClient {
    http: reqwest::Client,
    api_url: String,
    token_url: String,
    question_amount: usize,
}

impl TriviaApiClient {
    pub fn new(http: reqwest::Client, config: &TriviaConfig) -> Self {
        Self {
            http,
            api_url: config.api_url.clone(),
            token_url: config.token_url.clone(),
            question_amount: config.question_amount,
        }
    }
}

#[async_trait]
impl QuestionSource for TriviaApiClient {
    async fn get_token(&self) -> Result<String, QuestionSourceError> {
        let response: TokenResponse = self
            .http
            .get(&self.token_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.response_code != 0 {
            return Err(QuestionSourceError::Provider(response.response_code));
        }
        Ok(response.token)
    }

    async fn get_questions(&self, token: &str) -> Result<Vec<TriviaQuestion>, QuestionSourceError> {
        let response: QuestionsResponse = self
            .http
            .get(&self.api_url)
            .query(&[
                ("amount", self.question_amount.to_string().as_str()),
                ("token", token),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.response_code != 0 {
            return Err(QuestionSourceError::Provider(response.response_code));
        }
        Ok(response.results)
    }
}
