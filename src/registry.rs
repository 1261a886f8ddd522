//! Session registry (spec §4.E): the two process-wide maps and the lock
//! ordering discipline that keeps them safe to touch from both the router
//! and the match engine.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::lobby::Lobby;

/// A lobby's persisted id, used as the map key.
pub type LobbyId = String;

/// `connection → lobby?` and `lobbyId → lobby`, each behind its own
/// exclusive lock. Lock ordering discipline (spec §4.E): when both are
/// needed, take the lobby map first, then the client map.
#[derive(Default)]
pub struct Registry {
    lobbies: Mutex<HashMap<LobbyId, Arc<Lobby>>>,
    clients: Mutex<HashMap<u64, Option<LobbyId>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session with no lobby association yet (on CONNECTION).
    pub async fn register_client(&self, session_id: u64) {
        self.clients.lock().await.insert(session_id, None);
    }

    pub async fn deregister_client(&self, session_id: u64) {
        self.clients.lock().await.remove(&session_id);
    }

    pub async fn bind(&self, session_id: u64, lobby_id: LobbyId) {
        self.clients.lock().await.insert(session_id, Some(lobby_id));
    }

    pub async fn unbind(&self, session_id: u64) {
        if let Some(slot) = self.clients.lock().await.get_mut(&session_id) {
            *slot = None;
        }
    }

    pub async fn current_lobby(&self, session_id: u64) -> Option<LobbyId> {
        self.clients.lock().await.get(&session_id).cloned().flatten()
    }

    pub async fn get_lobby(&self, id: &str) -> Option<Arc<Lobby>> {
        self.lobbies.lock().await.get(id).cloned()
    }

    pub async fn get_or_create_lobby<F>(&self, id: LobbyId, make: F) -> Arc<Lobby>
    where
        F: FnOnce() -> Lobby,
    {
        let mut lobbies = self.lobbies.lock().await;
        lobbies
            .entry(id)
            .or_insert_with(|| Arc::new(make()))
            .clone()
    }

    /// Removes a terminated lobby (spec §4.F post-match cleanup). Takes the
    /// lobby-map lock first, matching the documented ordering.
    pub async fn remove_lobby(&self, id: &str) {
        self.lobbies.lock().await.remove(id);
    }

    pub async fn list_lobby_ids(&self) -> Vec<LobbyId> {
        self.lobbies.lock().await.keys().cloned().collect()
    }
}
