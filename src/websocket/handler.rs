use std::ops::ControlFlow;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        Path, RawQuery, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use tokio::sync::mpsc;

use crate::{
    models::UserId,
    websocket::{
        engine::{self, ConnectionContext},
        gateway::LobbyEvent,
        messages::{ClientMessage, ServerMessage},
    },
    AppState,
};

/// WebSocket upgrade handler for `/ws/trivia/lobbies/{name}`. The raw
/// query string is the join token; the handshake runs before the upgrade
/// so rejected connects never hold a socket.
pub async fn handle_websocket(
    Path(lobby_name): Path<String>,
    RawQuery(query): RawQuery,
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = query.unwrap_or_default();

    match engine::admit_player(&state, &lobby_name, &token).await {
        Ok((user_id, events)) => {
            tracing::info!("player {} joined lobby {}", user_id, lobby_name);
            ws.on_upgrade(move |socket| handle_socket(socket, state, lobby_name, user_id, events))
                .into_response()
        }
        Err(status) => {
            tracing::debug!("rejected connect to lobby {}: {}", lobby_name, status);
            status.into_response()
        }
    }
}

/// Drive one admitted socket: lobby events are drained before client
/// frames so every connection observes broadcasts in order.
async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    lobby_name: String,
    user_id: UserId,
    mut events: mpsc::Receiver<LobbyEvent>,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut ctx = ConnectionContext::new(lobby_name, user_id);

    loop {
        tokio::select! {
            biased;

            event = events.recv() => {
                let Some(event) = event else { break };
                if let ControlFlow::Break(()) =
                    process_lobby_event(&state, &mut ctx, event, &mut sender).await
                {
                    break;
                }
            }
            message = receiver.next() => {
                let Some(Ok(message)) = message else { break };
                match message {
                    Message::Text(text) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_message) => {
                                if let Err(err) =
                                    dispatch_client_message(&state, &mut ctx, client_message).await
                                {
                                    tracing::error!(
                                        "game-fatal error in lobby {}: {}",
                                        ctx.lobby_name,
                                        err
                                    );
                                    close_with_error(&mut sender).await;
                                    break;
                                }
                            }
                            // protocol violations are dropped silently
                            Err(err) => {
                                tracing::debug!("ignoring malformed client message: {}", err)
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    engine::handle_disconnect(&state, &ctx).await;
    tracing::info!(
        "websocket closed for player {} in lobby {}",
        ctx.user_id,
        ctx.lobby_name
    );
}

async fn dispatch_client_message(
    state: &Arc<AppState>,
    ctx: &mut ConnectionContext,
    message: ClientMessage,
) -> Result<(), engine::EngineError> {
    match message {
        ClientMessage::GameReady => engine::handle_game_ready(state, ctx).await,
        ClientMessage::QuestionAnswered { answer } => {
            engine::handle_question_answered(state, ctx, &answer, None).await
        }
        ClientMessage::FiftyRequest { answers } => {
            engine::handle_fifty_request(state, ctx, &answers).await;
            Ok(())
        }
    }
}

async fn process_lobby_event(
    state: &Arc<AppState>,
    ctx: &mut ConnectionContext,
    event: LobbyEvent,
    sender: &mut SplitSink<WebSocket, Message>,
) -> ControlFlow<()> {
    match &event {
        LobbyEvent::QuestionNext => {
            ctx.question_answered = false;
        }
        LobbyEvent::QuestionDeadline { started_at } => {
            // silent player: answer on their behalf with an empty string
            if !ctx.question_answered {
                if let Err(err) =
                    engine::handle_question_answered(state, ctx, "", Some(*started_at)).await
                {
                    tracing::error!("game-fatal error in lobby {}: {}", ctx.lobby_name, err);
                    close_with_error(sender).await;
                    return ControlFlow::Break(());
                }
            }
            return ControlFlow::Continue(());
        }
        LobbyEvent::Fatal => {
            close_with_error(sender).await;
            return ControlFlow::Break(());
        }
        _ => {}
    }

    if let Some(message) = project_event(&event, ctx.user_id) {
        if send_message(sender, &message).await.is_err() {
            return ControlFlow::Break(());
        }
    }

    if matches!(event, LobbyEvent::GameEnd { .. }) {
        let _ = sender.send(Message::Close(None)).await;
        return ControlFlow::Break(());
    }
    ControlFlow::Continue(())
}

/// Project a lobby broadcast into the message this recipient should see,
/// if any. Splits `user.answered` into `question.result` for the answerer
/// and `opponent.answered` (without the correct answer) for the peer, and
/// selects the recipient's own entry from `game.end`.
fn project_event(event: &LobbyEvent, user_id: UserId) -> Option<ServerMessage> {
    match event {
        LobbyEvent::Prepare => Some(ServerMessage::GamePrepare),
        LobbyEvent::Start {
            opponents,
            duration,
        } => Some(ServerMessage::GameStart {
            opponent: opponents.get(&user_id).cloned().unwrap_or_default(),
            duration: *duration,
        }),
        LobbyEvent::QuestionData { questions } => Some(ServerMessage::QuestionData {
            questions: questions.clone(),
        }),
        LobbyEvent::QuestionNext => Some(ServerMessage::QuestionNext),
        LobbyEvent::UserAnswered {
            user_id: answerer,
            correctly,
            correct_answer,
            damage,
        } => {
            if *answerer == user_id {
                Some(ServerMessage::QuestionResult {
                    correctly: *correctly,
                    correct_answer: correct_answer.clone(),
                    damage: *damage,
                })
            } else {
                Some(ServerMessage::OpponentAnswered {
                    correctly: *correctly,
                    damage: *damage,
                })
            }
        }
        LobbyEvent::FiftyResponse { incorrect_answers } => Some(ServerMessage::FiftyResponse {
            incorrect_answers: incorrect_answers.clone(),
        }),
        LobbyEvent::GameEnd { results } => {
            results.get(&user_id).map(|result| ServerMessage::GameEnd {
                status: result.status,
                rank_gain: result.rank_gain,
            })
        }
        LobbyEvent::QuestionDeadline { .. } | LobbyEvent::Fatal => None,
    }
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(err) => {
            tracing::error!("failed to serialize message: {}", err);
            Ok(())
        }
    }
}

async fn close_with_error(sender: &mut SplitSink<WebSocket, Message>) {
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: close_code::ERROR,
            reason: "internal error".into(),
        })))
        .await;
}
