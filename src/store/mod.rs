use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::models::Lobby;

/// In-memory key/value store of live lobby records, keyed by lobby name.
///
/// Entries optionally carry a TTL so abandoned lobbies self-destruct:
/// expiry is checked lazily on every read and a periodic sweep task calls
/// [`LobbyStore::purge_expired`] to reclaim entries nobody reads again.
///
/// Mutations follow a read-modify-write pattern ([`LobbyStore::get`] a
/// clone, mutate, [`LobbyStore::save`] it back). The two sockets of a
/// lobby serialize their read-modify-writes through the per-lobby mutex
/// returned by [`LobbyStore::lock`].
#[derive(Debug, Default)]
pub struct LobbyStore {
    entries: DashMap<String, Entry>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

#[derive(Debug)]
struct Entry {
    lobby: Lobby,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

impl LobbyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the single-writer lock for one lobby name. Held for the
    /// duration of each read-modify-write.
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(name.to_string())
            .or_default()
            .clone();
        mutex.lock_owned().await
    }

    /// Fetch a clone of the lobby record, treating expired entries as
    /// absent (and dropping them on the spot).
    pub fn get(&self, name: &str) -> Option<Lobby> {
        let expired = match self.entries.get(name) {
            Some(entry) if entry.is_expired() => true,
            Some(entry) => return Some(entry.lobby.clone()),
            None => return None,
        };
        if expired {
            self.delete(name);
        }
        None
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Write the record back, preserving any TTL already set on the entry
    pub fn save(&self, lobby: Lobby) {
        let expires_at = self
            .entries
            .get(&lobby.name)
            .and_then(|entry| entry.expires_at);
        self.entries
            .insert(lobby.name.clone(), Entry { lobby, expires_at });
    }

    /// Start the self-destruct clock for an entry
    pub fn expire(&self, name: &str, ttl: Duration) {
        if let Some(mut entry) = self.entries.get_mut(name) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
    }

    /// Clear the TTL so the entry lives for the rest of the game
    pub fn persist(&self, name: &str) {
        if let Some(mut entry) = self.entries.get_mut(name) {
            entry.expires_at = None;
        }
    }

    /// Remove the record. The lock entry is retained: a guard acquired
    /// before the delete must still exclude later acquirers of the same
    /// name, and one idle mutex per dead lobby name is cheap.
    pub fn delete(&self, name: &str) {
        self.entries.remove(name);
    }

    /// All live lobbies, optionally filtered by ranked flag
    pub fn list(&self, ranked: Option<bool>) -> Vec<Lobby> {
        self.entries
            .iter()
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.lobby.clone())
            .filter(|lobby| ranked.is_none_or(|flag| lobby.ranked == flag))
            .collect()
    }

    /// Drop every expired entry, returning the reclaimed names
    pub fn purge_expired(&self) -> Vec<String> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.is_expired())
            .map(|entry| entry.key().clone())
            .collect();

        for name in &expired {
            self.delete(name);
        }
        expired
    }
}
