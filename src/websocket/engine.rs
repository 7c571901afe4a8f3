use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::auth;
use crate::db;
use crate::models::{
    GameStatus, GameType, Lobby, LobbyState, PlayerData, User, UserId, STARTING_HP,
};
use crate::questions::format::format_questions;
use crate::questions::QuestionSourceError;
use crate::websocket::gateway::{LobbyEvent, PlayerResult};
use crate::AppState;

/// Errors that end the current game. Everything recoverable is handled
/// in place; callers close the socket on these.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Upstream(#[from] QuestionSourceError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Connection-local flags for one admitted socket. The canonical game
/// state lives in the lobby store; these only guard against repeated
/// messages from the same socket.
#[derive(Debug)]
pub struct ConnectionContext {
    pub lobby_name: String,
    pub user_id: UserId,
    pub ready_sent: bool,
    pub question_answered: bool,
    pub fifty_used: bool,
}

impl ConnectionContext {
    pub fn new(lobby_name: String, user_id: UserId) -> Self {
        Self {
            lobby_name,
            user_id,
            ready_sent: false,
            question_answered: false,
            fifty_used: false,
        }
    }
}

/// Validate a websocket connect attempt and claim a seat in the lobby.
///
/// Order of checks: lobby exists, lobby has room, token verifies, token
/// is for this lobby, user not already seated. The first admitted player
/// clears the lobby's TTL; the second triggers `game.prepare`.
pub async fn admit_player(
    state: &Arc<AppState>,
    lobby_name: &str,
    token: &str,
) -> Result<(UserId, mpsc::Receiver<LobbyEvent>), StatusCode> {
    let _guard = state.lobbies.lock(lobby_name).await;

    let Some(mut lobby) = state.lobbies.get(lobby_name) else {
        return Err(StatusCode::NOT_FOUND);
    };
    if lobby.users.len() > 1 {
        return Err(StatusCode::FORBIDDEN);
    }

    let claims = auth::decode_lobby_token(token, &state.config.security.secret_key)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    if claims.lobby_name != lobby_name {
        return Err(StatusCode::FORBIDDEN);
    }
    let user_id: UserId = claims.sub.parse().map_err(|_| StatusCode::UNAUTHORIZED)?;
    if lobby.users.contains_key(&user_id) {
        return Err(StatusCode::FORBIDDEN);
    }

    lobby.users.insert(
        user_id,
        PlayerData {
            name: claims.username,
            hp: STARTING_HP,
        },
    );
    let events = state.gateway.subscribe(lobby_name, user_id);

    if lobby.users.len() == 1 {
        // first player in: the lobby now lives for the whole game
        state.lobbies.persist(lobby_name);
    } else {
        state.gateway.broadcast(lobby_name, LobbyEvent::Prepare).await;
    }
    state.lobbies.save(lobby);

    Ok((user_id, events))
}

/// Count one readiness confirmation; the second one starts the game:
/// fetch a provider session token, broadcast `game.start`, then the first
/// question batch and `question.next`.
pub async fn handle_game_ready(
    state: &Arc<AppState>,
    ctx: &mut ConnectionContext,
) -> Result<(), EngineError> {
    if ctx.ready_sent {
        return Ok(());
    }

    let _guard = state.lobbies.lock(&ctx.lobby_name).await;
    let Some(mut lobby) = state.lobbies.get(&ctx.lobby_name) else {
        return Ok(());
    };
    if lobby.users.len() != 2 || lobby.ready_count >= 2 {
        return Ok(());
    }

    lobby.ready_count += 1;
    ctx.ready_sent = true;

    if lobby.ready_count == 1 {
        state.lobbies.save(lobby);
        return Ok(());
    }

    let trivia_token = match state.questions.get_token().await {
        Ok(token) => token,
        Err(err) => {
            abort_game(state, lobby).await;
            return Err(err.into());
        }
    };
    lobby.trivia_token = Some(trivia_token.clone());
    lobby.state = LobbyState::InProgress;
    lobby.game_start_time = Some(Utc::now());

    state
        .gateway
        .broadcast(
            &ctx.lobby_name,
            LobbyEvent::Start {
                opponents: opponent_names(&lobby),
                duration: state.config.game.max_duration_seconds,
            },
        )
        .await;

    let raw = match state.questions.get_questions(&trivia_token).await {
        Ok(questions) => questions,
        Err(err) => {
            abort_game(state, lobby).await;
            return Err(err.into());
        }
    };
    let (questions, correct_answers) =
        format_questions(raw, &state.config.game.question_durations);
    lobby.correct_answers = correct_answers;
    state
        .gateway
        .broadcast(&ctx.lobby_name, LobbyEvent::QuestionData { questions })
        .await;

    let started_at = Utc::now();
    lobby.question_start_time = Some(started_at);
    state.lobbies.save(lobby.clone());
    state
        .gateway
        .broadcast(&ctx.lobby_name, LobbyEvent::QuestionNext)
        .await;
    schedule_deadline(state, &lobby, started_at);

    Ok(())
}

/// Score one answer for this socket. `scheduled_for` is set when the
/// answer was synthesized by the question deadline timer; it carries the
/// question start time the timer was armed with so stale timers are
/// discarded.
pub async fn handle_question_answered(
    state: &Arc<AppState>,
    ctx: &mut ConnectionContext,
    answer: &str,
    scheduled_for: Option<DateTime<Utc>>,
) -> Result<(), EngineError> {
    if ctx.question_answered {
        return Ok(());
    }

    let _guard = state.lobbies.lock(&ctx.lobby_name).await;
    let Some(mut lobby) = state.lobbies.get(&ctx.lobby_name) else {
        return Ok(());
    };
    if lobby.state != LobbyState::InProgress {
        return Ok(());
    }
    let Some(question_started) = lobby.question_start_time else {
        return Ok(());
    };
    if scheduled_for.is_some_and(|scheduled| scheduled != question_started) {
        return Ok(());
    }
    let Some(correct) = lobby
        .correct_answers
        .get(lobby.current_question_count)
        .cloned()
    else {
        return Ok(());
    };

    ctx.question_answered = true;

    let now = Utc::now();
    let answer_window = chrono::Duration::seconds(
        state
            .config
            .game
            .question_durations
            .for_difficulty(correct.difficulty) as i64,
    );
    let (correctly, damage) = if answer == correct.answer && now <= question_started + answer_window
    {
        (true, 0)
    } else {
        let damage = state
            .config
            .game
            .question_damage
            .for_difficulty(correct.difficulty);
        if let Some(player) = lobby.users.get_mut(&ctx.user_id) {
            player.hp = (player.hp - damage).max(0);
        }
        (false, damage)
    };

    state
        .gateway
        .broadcast(
            &ctx.lobby_name,
            LobbyEvent::UserAnswered {
                user_id: ctx.user_id,
                correctly,
                correct_answer: correct.answer,
                damage,
            },
        )
        .await;

    // question answered for the first time, wait for the peer
    if lobby.current_answer_count == 0 {
        lobby.current_answer_count = 1;
        state.lobbies.save(lobby);
        return Ok(());
    }

    // otherwise, both players have answered the question

    let game_deadline = lobby.game_start_time.map(|start| {
        start + chrono::Duration::seconds(state.config.game.max_duration_seconds as i64)
    });
    let clock_expired = game_deadline.is_some_and(|deadline| now > deadline);
    if lobby.users.values().any(|player| player.hp <= 0) || clock_expired {
        let players: Vec<(UserId, i32)> =
            lobby.users.iter().map(|(id, data)| (*id, data.hp)).collect();
        if let [first, second] = players[..] {
            let statuses = determine_status_by_hp(first, second);
            return end_game(state, lobby, statuses).await;
        }
        return Ok(());
    }

    // current set of questions has been exhausted, obtain new ones
    if lobby.current_question_count == state.config.trivia.question_amount - 1 {
        lobby.current_question_count = 0;

        let token = lobby.trivia_token.clone().unwrap_or_default();
        let raw = match state.questions.get_questions(&token).await {
            Ok(questions) => questions,
            Err(err) => {
                abort_game(state, lobby).await;
                return Err(err.into());
            }
        };
        let (questions, correct_answers) =
            format_questions(raw, &state.config.game.question_durations);
        lobby.correct_answers = correct_answers;
        state
            .gateway
            .broadcast(&ctx.lobby_name, LobbyEvent::QuestionData { questions })
            .await;
    } else {
        lobby.current_question_count += 1;
    }

    lobby.current_answer_count = 0;
    let started_at = Utc::now();
    lobby.question_start_time = Some(started_at);
    state.lobbies.save(lobby.clone());
    state
        .gateway
        .broadcast(&ctx.lobby_name, LobbyEvent::QuestionNext)
        .await;
    schedule_deadline(state, &lobby, started_at);

    Ok(())
}

/// One-shot fifty-fifty: pick two of the three wrong answers and return
/// them to the requesting socket only. Invalid requests still burn the
/// one shot and are otherwise dropped.
pub async fn handle_fifty_request(
    state: &Arc<AppState>,
    ctx: &mut ConnectionContext,
    answers: &[String],
) {
    if ctx.fifty_used {
        return;
    }
    ctx.fifty_used = true;

    let _guard = state.lobbies.lock(&ctx.lobby_name).await;
    let Some(lobby) = state.lobbies.get(&ctx.lobby_name) else {
        return;
    };
    if lobby.state != LobbyState::InProgress {
        return;
    }
    let Some(correct) = lobby.correct_answers.get(lobby.current_question_count) else {
        return;
    };
    // boolean questions have nothing to halve
    if correct.answer == "True" || correct.answer == "False" {
        return;
    }
    let Some(incorrect_answers) = pick_incorrect_answers(answers, &correct.answer) else {
        return;
    };

    state
        .gateway
        .send_to(
            &ctx.lobby_name,
            ctx.user_id,
            LobbyEvent::FiftyResponse { incorrect_answers },
        )
        .await;
}

/// Socket closed. The last occupant deletes the lobby; a drop while the
/// game is in progress forfeits it.
pub async fn handle_disconnect(state: &Arc<AppState>, ctx: &ConnectionContext) {
    let _guard = state.lobbies.lock(&ctx.lobby_name).await;

    let Some(lobby) = state.lobbies.get(&ctx.lobby_name) else {
        state.gateway.unsubscribe(&ctx.lobby_name, ctx.user_id);
        return;
    };

    if lobby.users.len() == 1 {
        state.lobbies.delete(&ctx.lobby_name);
        state.gateway.unsubscribe(&ctx.lobby_name, ctx.user_id);
        return;
    }

    state.gateway.unsubscribe(&ctx.lobby_name, ctx.user_id);

    if lobby.state == LobbyState::InProgress {
        if let Some(opponent_id) = lobby.opponent_of(ctx.user_id) {
            let statuses = HashMap::from([
                (ctx.user_id, GameStatus::Loss),
                (opponent_id, GameStatus::Win),
            ]);
            if let Err(err) = end_game(state, lobby, statuses).await {
                tracing::error!(
                    "failed to resolve forfeited game in lobby {}: {err}",
                    ctx.lobby_name
                );
            }
        }
    }

    if let Some(mut lobby) = state.lobbies.get(&ctx.lobby_name) {
        lobby.users.remove(&ctx.user_id);
        state.lobbies.save(lobby);
    }
}

/// Resolve a finished game: persist the FINISHED state, apply rank deltas
/// for ranked lobbies, write the Game/UserGame rows in one transaction
/// and fan out `game.end`.
pub async fn end_game(
    state: &Arc<AppState>,
    mut lobby: Lobby,
    statuses: HashMap<UserId, GameStatus>,
) -> Result<(), EngineError> {
    lobby.state = LobbyState::Finished;
    state.lobbies.save(lobby.clone());
    state.gateway.cancel_question_deadline(&lobby.name);

    match persist_game_result(state, &lobby, &statuses).await {
        Ok(results) => {
            state
                .gateway
                .broadcast(&lobby.name, LobbyEvent::GameEnd { results })
                .await;
            Ok(())
        }
        Err(err) => {
            state.gateway.broadcast(&lobby.name, LobbyEvent::Fatal).await;
            Err(err)
        }
    }
}

async fn persist_game_result(
    state: &Arc<AppState>,
    lobby: &Lobby,
    statuses: &HashMap<UserId, GameStatus>,
) -> Result<HashMap<UserId, PlayerResult>, EngineError> {
    let user_ids: Vec<UserId> = statuses.keys().copied().collect();
    let users = db::queries::get_users_by_ids(&state.db, &user_ids).await?;

    let mut results = HashMap::new();
    let mut rows: Vec<(User, GameStatus)> = Vec::with_capacity(users.len());
    for mut user in users {
        let Some(&status) = statuses.get(&user.user_id) else {
            continue;
        };
        let rank_gain = rank_gain_for(status, state.config.game.rank_gain);
        if lobby.ranked {
            user.rank = (user.rank + rank_gain).max(0);
        }
        results.insert(user.user_id, PlayerResult { status, rank_gain });
        rows.push((user, status));
    }

    let game_type = if lobby.ranked {
        GameType::Ranked
    } else {
        GameType::Normal
    };
    if let [(user1, status1), (user2, status2)] = &rows[..] {
        db::queries::save_multiplayer_game(
            &state.db,
            game_type,
            lobby.ranked,
            user1,
            *status1,
            user2,
            *status2,
        )
        .await?;
    }

    Ok(results)
}

/// The game cannot continue. Mark the lobby finished so the closing
/// sockets do not forfeit-resolve it, and tell both sockets to shut down.
async fn abort_game(state: &Arc<AppState>, mut lobby: Lobby) {
    lobby.state = LobbyState::Finished;
    let name = lobby.name.clone();
    state.lobbies.save(lobby);
    state.gateway.cancel_question_deadline(&name);
    state.gateway.broadcast(&name, LobbyEvent::Fatal).await;
}

fn schedule_deadline(state: &Arc<AppState>, lobby: &Lobby, started_at: DateTime<Utc>) {
    let Some(correct) = lobby.correct_answers.get(lobby.current_question_count) else {
        return;
    };
    let seconds = state
        .config
        .game
        .question_durations
        .for_difficulty(correct.difficulty);
    state.gateway.schedule_question_deadline(
        &lobby.name,
        Duration::from_secs(seconds),
        started_at,
    );
}

/// Opponent name per recipient, for the `game.start` broadcast
fn opponent_names(lobby: &Lobby) -> HashMap<UserId, String> {
    lobby
        .users
        .keys()
        .map(|&user_id| {
            let name = lobby
                .opponent_of(user_id)
                .and_then(|opponent_id| lobby.users.get(&opponent_id))
                .map(|player| player.name.clone())
                .unwrap_or_default();
            (user_id, name)
        })
        .collect()
}

/// Win/loss/draw for both players based on remaining hp
pub fn determine_status_by_hp(
    user1: (UserId, i32),
    user2: (UserId, i32),
) -> HashMap<UserId, GameStatus> {
    let (user1_id, user1_hp) = user1;
    let (user2_id, user2_hp) = user2;

    let (user1_status, user2_status) = match user1_hp.cmp(&user2_hp) {
        std::cmp::Ordering::Equal => (GameStatus::Draw, GameStatus::Draw),
        std::cmp::Ordering::Greater => (GameStatus::Win, GameStatus::Loss),
        std::cmp::Ordering::Less => (GameStatus::Loss, GameStatus::Win),
    };

    HashMap::from([(user1_id, user1_status), (user2_id, user2_status)])
}

pub fn rank_gain_for(status: GameStatus, rank_gain: i32) -> i32 {
    match status {
        GameStatus::Win => rank_gain,
        GameStatus::Loss => -rank_gain,
        GameStatus::Draw => 0,
    }
}

/// Validate a fifty-fifty payload and sample two of the three wrong
/// answers. Returns None if the four answers do not contain the correct
/// one exactly once.
pub fn pick_incorrect_answers(answers: &[String], correct_answer: &str) -> Option<Vec<String>> {
    if answers.len() != 4 {
        return None;
    }
    let incorrect: Vec<&String> = answers
        .iter()
        .filter(|answer| *answer != correct_answer)
        .collect();
    if incorrect.len() != 3 {
        return None;
    }
    Some(
        incorrect
            .choose_multiple(&mut rand::rng(), 2)
            .map(|answer| (*answer).clone())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Config, DatabaseConfig, GameConfig, QuestionDamage, QuestionDurations, SecurityConfig,
        ServerConfig, TriviaConfig,
    };
    use crate::models::{Difficulty, QuestionType};
    use crate::questions::{QuestionSource, TriviaQuestion};
    use crate::store::LobbyStore;
    use crate::websocket::gateway::Gateway;
    use async_trait::async_trait;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECRET: &str = "engine-test-secret";
    const LOBBY: &str = "duel";

    struct FixtureSource {
        questions: Vec<TriviaQuestion>,
        calls: AtomicUsize,
    }

    impl FixtureSource {
        fn new(questions: Vec<TriviaQuestion>) -> Arc<Self> {
            Arc::new(Self {
                questions,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl QuestionSource for FixtureSource {
        async fn get_token(&self) -> Result<String, QuestionSourceError> {
            Ok("FAKE_TOKEN".to_string())
        }

        async fn get_questions(
            &self,
            _token: &str,
        ) -> Result<Vec<TriviaQuestion>, QuestionSourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.questions.clone())
        }
    }

    fn boolean_question() -> TriviaQuestion {
        TriviaQuestion {
            category: "General Knowledge".to_string(),
            kind: QuestionType::Boolean,
            difficulty: Difficulty::Easy,
            question: "Is water wet?".to_string(),
            correct_answer: "True".to_string(),
            incorrect_answers: vec!["False".to_string()],
        }
    }

    fn multiple_question() -> TriviaQuestion {
        TriviaQuestion {
            category: "Science".to_string(),
            kind: QuestionType::Multiple,
            difficulty: Difficulty::Easy,
            question: "Which answer is A?".to_string(),
            correct_answer: "A".to_string(),
            incorrect_answers: vec!["B".to_string(), "C".to_string(), "D".to_string()],
        }
    }

    fn test_state(source: Arc<dyn QuestionSource>, question_amount: usize) -> Arc<AppState> {
        let config = Config {
            database: DatabaseConfig {
                url: "postgres://localhost/unused".to_string(),
                max_connections: 1,
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            security: SecurityConfig {
                secret_key: SECRET.to_string(),
            },
            trivia: TriviaConfig {
                api_url: String::new(),
                token_url: String::new(),
                question_amount,
            },
            game: GameConfig {
                lobby_expire_seconds: 60,
                max_duration_seconds: 300,
                rank_gain: 20,
                question_durations: QuestionDurations {
                    easy: 10,
                    medium: 15,
                    hard: 20,
                },
                question_damage: QuestionDamage {
                    easy: 10,
                    medium: 20,
                    hard: 30,
                },
            },
        };
        // never connected in these tests; terminal paths fail fast instead
        let db = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(100))
            .connect_lazy("postgres://localhost/unused")
            .unwrap();

        Arc::new(AppState {
            config,
            db,
            lobbies: LobbyStore::new(),
            gateway: Arc::new(Gateway::new()),
            questions: source,
        })
    }

    async fn admit_two(
        state: &Arc<AppState>,
    ) -> (
        ConnectionContext,
        mpsc::Receiver<LobbyEvent>,
        ConnectionContext,
        mpsc::Receiver<LobbyEvent>,
    ) {
        state.lobbies.save(Lobby::new(LOBBY, true));
        let token1 = auth::generate_lobby_token(1, "alice", LOBBY, SECRET).unwrap();
        let token2 = auth::generate_lobby_token(2, "bob", LOBBY, SECRET).unwrap();

        let (id1, rx1) = admit_player(state, LOBBY, &token1).await.unwrap();
        let (id2, rx2) = admit_player(state, LOBBY, &token2).await.unwrap();

        (
            ConnectionContext::new(LOBBY.to_string(), id1),
            rx1,
            ConnectionContext::new(LOBBY.to_string(), id2),
            rx2,
        )
    }

    /// Admit both players, ready up, and drain the opening event sequence
    async fn start_duel(
        state: &Arc<AppState>,
    ) -> (
        ConnectionContext,
        mpsc::Receiver<LobbyEvent>,
        ConnectionContext,
        mpsc::Receiver<LobbyEvent>,
    ) {
        let (mut ctx1, mut rx1, mut ctx2, mut rx2) = admit_two(state).await;
        handle_game_ready(state, &mut ctx1).await.unwrap();
        handle_game_ready(state, &mut ctx2).await.unwrap();

        for rx in [&mut rx1, &mut rx2] {
            assert!(matches!(rx.recv().await, Some(LobbyEvent::Prepare)));
            assert!(matches!(rx.recv().await, Some(LobbyEvent::Start { .. })));
            assert!(matches!(rx.recv().await, Some(LobbyEvent::QuestionData { .. })));
            assert!(matches!(rx.recv().await, Some(LobbyEvent::QuestionNext)));
        }

        (ctx1, rx1, ctx2, rx2)
    }

    #[tokio::test]
    async fn test_second_admission_broadcasts_prepare() {
        let state = test_state(FixtureSource::new(vec![boolean_question()]), 1);
        let (_ctx1, mut rx1, _ctx2, mut rx2) = admit_two(&state).await;

        assert!(matches!(rx1.recv().await, Some(LobbyEvent::Prepare)));
        assert!(matches!(rx2.recv().await, Some(LobbyEvent::Prepare)));

        let lobby = state.lobbies.get(LOBBY).unwrap();
        assert_eq!(lobby.users[&1].hp, STARTING_HP);
        assert_eq!(lobby.users[&2].name, "bob");
    }

    #[tokio::test]
    async fn test_admission_rejects_unknown_lobby() {
        let state = test_state(FixtureSource::new(vec![]), 1);
        let token = auth::generate_lobby_token(1, "alice", "nowhere", SECRET).unwrap();

        let result = admit_player(&state, "nowhere", &token).await;
        assert_eq!(result.err(), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_admission_rejects_third_player() {
        let state = test_state(FixtureSource::new(vec![boolean_question()]), 1);
        let (_ctx1, _rx1, _ctx2, _rx2) = admit_two(&state).await;

        let token = auth::generate_lobby_token(3, "carol", LOBBY, SECRET).unwrap();
        let result = admit_player(&state, LOBBY, &token).await;
        assert_eq!(result.err(), Some(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn test_admission_rejects_token_for_other_lobby() {
        let state = test_state(FixtureSource::new(vec![]), 1);
        state.lobbies.save(Lobby::new(LOBBY, false));

        let token = auth::generate_lobby_token(1, "alice", "other-lobby", SECRET).unwrap();
        let result = admit_player(&state, LOBBY, &token).await;
        assert_eq!(result.err(), Some(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn test_admission_rejects_already_seated_user() {
        let state = test_state(FixtureSource::new(vec![]), 1);
        state.lobbies.save(Lobby::new(LOBBY, false));

        let token = auth::generate_lobby_token(1, "alice", LOBBY, SECRET).unwrap();
        admit_player(&state, LOBBY, &token).await.unwrap();

        let again = auth::generate_lobby_token(1, "alice", LOBBY, SECRET).unwrap();
        let result = admit_player(&state, LOBBY, &again).await;
        assert_eq!(result.err(), Some(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn test_game_starts_when_both_players_ready() {
        let state = test_state(FixtureSource::new(vec![boolean_question()]), 1);
        let (mut ctx1, mut rx1, mut ctx2, _rx2) = admit_two(&state).await;

        handle_game_ready(&state, &mut ctx1).await.unwrap();
        assert_eq!(state.lobbies.get(LOBBY).unwrap().state, LobbyState::Waiting);

        handle_game_ready(&state, &mut ctx2).await.unwrap();

        assert!(matches!(rx1.recv().await, Some(LobbyEvent::Prepare)));
        match rx1.recv().await {
            Some(LobbyEvent::Start {
                opponents,
                duration,
            }) => {
                assert_eq!(opponents[&1], "bob");
                assert_eq!(opponents[&2], "alice");
                assert_eq!(duration, 300);
            }
            other => panic!("expected game start, got {other:?}"),
        }
        match rx1.recv().await {
            Some(LobbyEvent::QuestionData { questions }) => assert_eq!(questions.len(), 1),
            other => panic!("expected question data, got {other:?}"),
        }
        assert!(matches!(rx1.recv().await, Some(LobbyEvent::QuestionNext)));

        let lobby = state.lobbies.get(LOBBY).unwrap();
        assert_eq!(lobby.state, LobbyState::InProgress);
        assert_eq!(lobby.ready_count, 2);
        assert_eq!(lobby.trivia_token.as_deref(), Some("FAKE_TOKEN"));
        assert_eq!(lobby.correct_answers.len(), 1);
        assert!(lobby.game_start_time.is_some());
        assert!(lobby.question_start_time.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_ready_counts_once() {
        let state = test_state(FixtureSource::new(vec![boolean_question()]), 1);
        let (mut ctx1, _rx1, _ctx2, _rx2) = admit_two(&state).await;

        handle_game_ready(&state, &mut ctx1).await.unwrap();
        handle_game_ready(&state, &mut ctx1).await.unwrap();

        assert_eq!(state.lobbies.get(LOBBY).unwrap().ready_count, 1);
    }

    #[tokio::test]
    async fn test_wrong_answer_applies_difficulty_damage() {
        let questions = vec![boolean_question(), boolean_question(), boolean_question()];
        let state = test_state(FixtureSource::new(questions), 3);
        let (mut ctx1, mut rx1, _ctx2, _rx2) = start_duel(&state).await;

        handle_question_answered(&state, &mut ctx1, "False", None)
            .await
            .unwrap();

        match rx1.recv().await {
            Some(LobbyEvent::UserAnswered {
                user_id,
                correctly,
                correct_answer,
                damage,
            }) => {
                assert_eq!(user_id, 1);
                assert!(!correctly);
                assert_eq!(correct_answer, "True");
                assert_eq!(damage, 10);
            }
            other => panic!("expected user answered, got {other:?}"),
        }

        let lobby = state.lobbies.get(LOBBY).unwrap();
        assert_eq!(lobby.users[&1].hp, 90);
        assert_eq!(lobby.current_answer_count, 1);
        assert_eq!(lobby.current_question_count, 0);
    }

    #[tokio::test]
    async fn test_both_answers_advance_to_next_question() {
        let questions = vec![boolean_question(), boolean_question(), boolean_question()];
        let state = test_state(FixtureSource::new(questions), 3);
        let (mut ctx1, mut rx1, mut ctx2, _rx2) = start_duel(&state).await;

        handle_question_answered(&state, &mut ctx1, "True", None)
            .await
            .unwrap();
        handle_question_answered(&state, &mut ctx2, "True", None)
            .await
            .unwrap();

        match rx1.recv().await {
            Some(LobbyEvent::UserAnswered {
                correctly, damage, ..
            }) => {
                assert!(correctly);
                assert_eq!(damage, 0);
            }
            other => panic!("expected user answered, got {other:?}"),
        }
        assert!(matches!(rx1.recv().await, Some(LobbyEvent::UserAnswered { .. })));
        assert!(matches!(rx1.recv().await, Some(LobbyEvent::QuestionNext)));

        let lobby = state.lobbies.get(LOBBY).unwrap();
        assert_eq!(lobby.current_question_count, 1);
        assert_eq!(lobby.current_answer_count, 0);
        assert_eq!(lobby.users[&1].hp, 100);
        assert_eq!(lobby.users[&2].hp, 100);
    }

    #[tokio::test]
    async fn test_second_answer_from_same_socket_ignored() {
        let questions = vec![boolean_question(), boolean_question(), boolean_question()];
        let state = test_state(FixtureSource::new(questions), 3);
        let (mut ctx1, mut rx1, _ctx2, _rx2) = start_duel(&state).await;

        handle_question_answered(&state, &mut ctx1, "True", None)
            .await
            .unwrap();
        handle_question_answered(&state, &mut ctx1, "False", None)
            .await
            .unwrap();

        assert!(matches!(rx1.recv().await, Some(LobbyEvent::UserAnswered { .. })));
        assert!(rx1.try_recv().is_err());
        assert_eq!(state.lobbies.get(LOBBY).unwrap().current_answer_count, 1);
    }

    #[tokio::test]
    async fn test_batch_exhaustion_fetches_new_questions() {
        let source = FixtureSource::new(vec![boolean_question()]);
        let state = test_state(source.clone(), 1);
        let (mut ctx1, mut rx1, mut ctx2, _rx2) = start_duel(&state).await;

        handle_question_answered(&state, &mut ctx1, "True", None)
            .await
            .unwrap();
        handle_question_answered(&state, &mut ctx2, "True", None)
            .await
            .unwrap();

        assert!(matches!(rx1.recv().await, Some(LobbyEvent::UserAnswered { .. })));
        assert!(matches!(rx1.recv().await, Some(LobbyEvent::UserAnswered { .. })));
        assert!(matches!(rx1.recv().await, Some(LobbyEvent::QuestionData { .. })));
        assert!(matches!(rx1.recv().await, Some(LobbyEvent::QuestionNext)));

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(state.lobbies.get(LOBBY).unwrap().current_question_count, 0);
    }

    #[tokio::test]
    async fn test_stale_deadline_is_discarded() {
        let questions = vec![boolean_question(), boolean_question(), boolean_question()];
        let state = test_state(FixtureSource::new(questions), 3);
        let (mut ctx1, mut rx1, _ctx2, _rx2) = start_duel(&state).await;

        let stale = Utc::now() - chrono::Duration::seconds(60);
        handle_question_answered(&state, &mut ctx1, "", Some(stale))
            .await
            .unwrap();

        assert!(!ctx1.question_answered);
        assert!(rx1.try_recv().is_err());
        assert_eq!(state.lobbies.get(LOBBY).unwrap().users[&1].hp, 100);
    }

    #[tokio::test]
    async fn test_deadline_synthesizes_wrong_answer() {
        let questions = vec![boolean_question(), boolean_question(), boolean_question()];
        let state = test_state(FixtureSource::new(questions), 3);
        let (mut ctx1, mut rx1, _ctx2, _rx2) = start_duel(&state).await;

        let started_at = state.lobbies.get(LOBBY).unwrap().question_start_time.unwrap();
        handle_question_answered(&state, &mut ctx1, "", Some(started_at))
            .await
            .unwrap();

        assert!(ctx1.question_answered);
        match rx1.recv().await {
            Some(LobbyEvent::UserAnswered {
                correctly, damage, ..
            }) => {
                assert!(!correctly);
                assert_eq!(damage, 10);
            }
            other => panic!("expected user answered, got {other:?}"),
        }
        assert_eq!(state.lobbies.get(LOBBY).unwrap().users[&1].hp, 90);
    }

    #[tokio::test]
    async fn test_fifty_request_returns_two_wrong_answers() {
        let questions = vec![multiple_question(), multiple_question(), multiple_question()];
        let state = test_state(FixtureSource::new(questions), 3);
        let (mut ctx1, mut rx1, _ctx2, mut rx2) = start_duel(&state).await;

        let answers = vec![
            "A".to_string(),
            "B".to_string(),
            "C".to_string(),
            "D".to_string(),
        ];
        handle_fifty_request(&state, &mut ctx1, &answers).await;

        match rx1.recv().await {
            Some(LobbyEvent::FiftyResponse { incorrect_answers }) => {
                assert_eq!(incorrect_answers.len(), 2);
                for answer in &incorrect_answers {
                    assert!(["B", "C", "D"].contains(&answer.as_str()));
                }
                assert_ne!(incorrect_answers[0], incorrect_answers[1]);
            }
            other => panic!("expected fifty response, got {other:?}"),
        }
        // the opponent never sees it
        assert!(rx2.try_recv().is_err());

        // the shot is spent
        handle_fifty_request(&state, &mut ctx1, &answers).await;
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fifty_request_rejected_for_boolean_question() {
        let questions = vec![boolean_question(), boolean_question(), boolean_question()];
        let state = test_state(FixtureSource::new(questions), 3);
        let (mut ctx1, mut rx1, _ctx2, _rx2) = start_duel(&state).await;

        let answers = vec![
            "True".to_string(),
            "False".to_string(),
            "Maybe".to_string(),
            "Perhaps".to_string(),
        ];
        handle_fifty_request(&state, &mut ctx1, &answers).await;

        assert!(rx1.try_recv().is_err());
        assert!(ctx1.fifty_used);
    }

    #[tokio::test]
    async fn test_disconnect_of_sole_player_deletes_lobby() {
        let state = test_state(FixtureSource::new(vec![]), 1);
        state.lobbies.save(Lobby::new(LOBBY, false));
        let token = auth::generate_lobby_token(1, "alice", LOBBY, SECRET).unwrap();
        let (user_id, _rx) = admit_player(&state, LOBBY, &token).await.unwrap();

        let ctx = ConnectionContext::new(LOBBY.to_string(), user_id);
        handle_disconnect(&state, &ctx).await;

        assert!(state.lobbies.get(LOBBY).is_none());
    }

    #[tokio::test]
    async fn test_disconnect_before_start_keeps_peer_seated() {
        let state = test_state(FixtureSource::new(vec![]), 1);
        let (ctx1, _rx1, _ctx2, _rx2) = admit_two(&state).await;

        handle_disconnect(&state, &ctx1).await;

        let lobby = state.lobbies.get(LOBBY).unwrap();
        assert_eq!(lobby.state, LobbyState::Waiting);
        assert_eq!(lobby.player_count(), 1);
        assert!(lobby.users.contains_key(&2));
    }

    #[tokio::test]
    async fn test_store_failure_at_game_end_broadcasts_fatal() {
        let questions = vec![boolean_question(), boolean_question(), boolean_question()];
        let state = test_state(FixtureSource::new(questions), 3);
        let (mut ctx1, mut rx1, mut ctx2, _rx2) = start_duel(&state).await;

        // drain player one to the terminal condition
        let mut lobby = state.lobbies.get(LOBBY).unwrap();
        lobby.users.get_mut(&1).unwrap().hp = 10;
        state.lobbies.save(lobby);

        handle_question_answered(&state, &mut ctx1, "False", None)
            .await
            .unwrap();
        // the relational store is unreachable in these tests, so resolving
        // the game fails and both sockets are told to shut down
        let result = handle_question_answered(&state, &mut ctx2, "False", None).await;
        assert!(matches!(result, Err(EngineError::Database(_))));

        assert!(matches!(rx1.recv().await, Some(LobbyEvent::UserAnswered { .. })));
        assert!(matches!(rx1.recv().await, Some(LobbyEvent::UserAnswered { .. })));
        assert!(matches!(rx1.recv().await, Some(LobbyEvent::Fatal)));
        assert_eq!(state.lobbies.get(LOBBY).unwrap().state, LobbyState::Finished);
    }

    #[test]
    fn test_status_by_hp_draw() {
        let statuses = determine_status_by_hp((1, 0), (2, 0));
        assert_eq!(statuses[&1], GameStatus::Draw);
        assert_eq!(statuses[&2], GameStatus::Draw);
    }

    #[test]
    fn test_status_by_hp_higher_wins() {
        let statuses = determine_status_by_hp((1, 70), (2, 0));
        assert_eq!(statuses[&1], GameStatus::Win);
        assert_eq!(statuses[&2], GameStatus::Loss);

        let statuses = determine_status_by_hp((1, 20), (2, 90));
        assert_eq!(statuses[&1], GameStatus::Loss);
        assert_eq!(statuses[&2], GameStatus::Win);
    }

    #[test]
    fn test_rank_gain_by_status() {
        assert_eq!(rank_gain_for(GameStatus::Win, 20), 20);
        assert_eq!(rank_gain_for(GameStatus::Loss, 20), -20);
        assert_eq!(rank_gain_for(GameStatus::Draw, 20), 0);
    }

    #[test]
    fn test_pick_incorrect_answers_validates_payload() {
        let correct = "A";
        let valid = vec![
            "A".to_string(),
            "B".to_string(),
            "C".to_string(),
            "D".to_string(),
        ];
        let picked = pick_incorrect_answers(&valid, correct).unwrap();
        assert_eq!(picked.len(), 2);
        for answer in &picked {
            assert!(["B", "C", "D"].contains(&answer.as_str()));
        }

        // wrong arity
        assert!(pick_incorrect_answers(&valid[..3].to_vec(), correct).is_none());
        // correct answer absent
        let missing = vec![
            "B".to_string(),
            "C".to_string(),
            "D".to_string(),
            "E".to_string(),
        ];
        assert!(pick_incorrect_answers(&missing, correct).is_none());
        // correct answer duplicated
        let duplicated = vec![
            "A".to_string(),
            "A".to_string(),
            "B".to_string(),
            "C".to_string(),
        ];
        assert!(pick_incorrect_answers(&duplicated, correct).is_none());
    }
}
