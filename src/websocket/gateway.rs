use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::models::{FormattedQuestion, GameStatus, UserId};

/// Buffered events per subscriber; a game produces them far slower than a
/// live socket drains them.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// End-of-game outcome for one player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerResult {
    pub status: GameStatus,
    pub rank_gain: i32,
}

/// Event broadcast to every socket subscribed to one lobby. Each
/// connection projects these into the per-recipient wire messages.
#[derive(Debug, Clone)]
pub enum LobbyEvent {
    Prepare,
    Start {
        /// Opponent name per recipient user id
        opponents: HashMap<UserId, String>,
        duration: u64,
    },
    QuestionData {
        questions: Vec<FormattedQuestion>,
    },
    QuestionNext,
    UserAnswered {
        user_id: UserId,
        correctly: bool,
        correct_answer: String,
        damage: i32,
    },
    FiftyResponse {
        incorrect_answers: Vec<String>,
    },
    /// The per-question timer ran out; sockets that have not answered
    /// synthesize an empty answer. Never forwarded to clients.
    QuestionDeadline {
        started_at: DateTime<Utc>,
    },
    GameEnd {
        results: HashMap<UserId, PlayerResult>,
    },
    /// The game cannot continue (upstream or store failure); sockets
    /// close with a failure code.
    Fatal,
}

/// Per-lobby pub/sub groups plus the cancellable question deadline timer.
/// Events broadcast to a group reach each subscriber in broadcast order.
#[derive(Default)]
pub struct Gateway {
    groups: DashMap<String, Group>,
}

#[derive(Default)]
struct Group {
    subscribers: HashMap<UserId, mpsc::Sender<LobbyEvent>>,
    deadline: Option<AbortHandle>,
}

impl Gateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a socket to a lobby group, returning its event stream
    pub fn subscribe(&self, lobby_name: &str, user_id: UserId) -> mpsc::Receiver<LobbyEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.groups
            .entry(lobby_name.to_string())
            .or_default()
            .subscribers
            .insert(user_id, tx);
        rx
    }

    /// Detach a socket; the last one out drops the group and its timer
    pub fn unsubscribe(&self, lobby_name: &str, user_id: UserId) {
        if let Some(mut group) = self.groups.get_mut(lobby_name) {
            group.subscribers.remove(&user_id);
        }
        if let Some((_, group)) = self
            .groups
            .remove_if(lobby_name, |_, group| group.subscribers.is_empty())
        {
            if let Some(handle) = group.deadline {
                handle.abort();
            }
        }
    }

    /// Deliver an event to every subscriber of one lobby, in order
    pub async fn broadcast(&self, lobby_name: &str, event: LobbyEvent) {
        let senders: Vec<mpsc::Sender<LobbyEvent>> = match self.groups.get(lobby_name) {
            Some(group) => group.subscribers.values().cloned().collect(),
            None => return,
        };

        for sender in senders {
            let _ = sender.send(event.clone()).await;
        }
    }

    /// Deliver an event to a single subscriber
    pub async fn send_to(&self, lobby_name: &str, user_id: UserId, event: LobbyEvent) {
        let sender = self
            .groups
            .get(lobby_name)
            .and_then(|group| group.subscribers.get(&user_id).cloned());

        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    /// Arm the no-answer timer for the current question, replacing any
    /// timer still running for the previous one. The timer delivers to
    /// the subscribers present when it was armed; a seat that empties in
    /// the meantime just drops the event.
    pub fn schedule_question_deadline(
        &self,
        lobby_name: &str,
        delay: Duration,
        started_at: DateTime<Utc>,
    ) {
        let senders: Vec<mpsc::Sender<LobbyEvent>> = match self.groups.get(lobby_name) {
            Some(group) => group.subscribers.values().cloned().collect(),
            None => return,
        };

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for sender in senders {
                let _ = sender
                    .send(LobbyEvent::QuestionDeadline { started_at })
                    .await;
            }
        });

        match self.groups.get_mut(lobby_name) {
            Some(mut group) => {
                if let Some(previous) = group.deadline.replace(handle.abort_handle()) {
                    previous.abort();
                }
            }
            // group already gone, don't leak the timer
            None => handle.abort(),
        }
    }

    pub fn cancel_question_deadline(&self, lobby_name: &str) {
        if let Some(mut group) = self.groups.get_mut(lobby_name) {
            if let Some(handle) = group.deadline.take() {
                handle.abort();
            }
        }
    }
}
