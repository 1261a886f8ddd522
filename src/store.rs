//! Persistence port (spec §4.H, fleshed out by SPEC_FULL §4.K). The core
//! never depends on a concrete store, only on this trait.

use async_trait::async_trait;

use crate::error::AppResult;
use crate::protocol::{LobbyInfo, Outcome};

#[async_trait]
pub trait Store: Send + Sync {
    async fn load_participants(&self, logins: &[String]) -> AppResult<()>;
    async fn list_participants(&self) -> AppResult<Vec<String>>;

    async fn find_user(&self, login: &str) -> AppResult<bool>;

    async fn find_lobby_by_id(&self, id: &str) -> AppResult<Option<LobbyInfo>>;
    async fn find_lobby_by_pair(&self, a: &str, b: &str) -> AppResult<Option<LobbyInfo>>;
    async fn insert_lobby(&self, info: &LobbyInfo) -> AppResult<String>;
    async fn delete_lobby(&self, id: &str) -> AppResult<()>;
    async fn list_lobbies(&self) -> AppResult<Vec<LobbyInfo>>;

    async fn insert_result(&self, first_login: &str, second_login: &str, outcome: Outcome) -> AppResult<()>;
    async fn list_stats(&self) -> AppResult<Vec<(String, u32)>>;
}
