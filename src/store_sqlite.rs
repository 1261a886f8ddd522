//! Sqlite-backed implementation of [`Store`] (SPEC_FULL §4.K). Chosen over
//! the original MariaDB backend so the crate ships self-contained and
//! migration-free for tests and local runs; the `Store` contract is
//! otherwise identical to what the original's MariaDB adapter exposed.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::error::AppResult;
use crate::protocol::{LobbyInfo, Outcome};
use crate::store::Store;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(path: &str) -> AppResult<Self> {
        let url = format!("sqlite://{path}?mode=rwc");
        let pool = SqlitePool::connect(&url).await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (login TEXT PRIMARY KEY)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS lobbies (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                width               INTEGER NOT NULL,
                height              INTEGER NOT NULL,
                game_barrier_count  INTEGER NOT NULL,
                player_barrier_count INTEGER NOT NULL,
                name                TEXT NOT NULL UNIQUE,
                players_count       INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS results (
                first_login  TEXT NOT NULL,
                second_login TEXT NOT NULL,
                outcome      TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn load_participants(&self, logins: &[String]) -> AppResult<()> {
        for login in logins {
            sqlx::query("INSERT OR IGNORE INTO users (login) VALUES (?)")
                .bind(login)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn list_participants(&self) -> AppResult<Vec<String>> {
        let rows = sqlx::query("SELECT login FROM users ORDER BY login")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("login")).collect())
    }

    async fn find_user(&self, login: &str) -> AppResult<bool> {
        let row = sqlx::query("SELECT 1 FROM users WHERE login = ?")
            .bind(login)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn find_lobby_by_id(&self, id: &str) -> AppResult<Option<LobbyInfo>> {
        let id: i64 = id.parse().map_err(|_| {
            crate::error::AppError::Persistence(format!("invalid lobby id: {id}"))
        })?;
        let row = sqlx::query(
            "SELECT id, width, height, game_barrier_count, player_barrier_count, name, players_count
             FROM lobbies WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_lobby_info))
    }

    async fn find_lobby_by_pair(&self, a: &str, b: &str) -> AppResult<Option<LobbyInfo>> {
        let like_ab = format!("{a}_vs_{b}_%");
        let like_ba = format!("{b}_vs_{a}_%");
        let row = sqlx::query(
            "SELECT id, width, height, game_barrier_count, player_barrier_count, name, players_count
             FROM lobbies WHERE name LIKE ? OR name LIKE ? LIMIT 1",
        )
        .bind(like_ab)
        .bind(like_ba)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_lobby_info))
    }

    async fn insert_lobby(&self, info: &LobbyInfo) -> AppResult<String> {
        let result = sqlx::query(
            "INSERT INTO lobbies (width, height, game_barrier_count, player_barrier_count, name, players_count)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(info.width as i64)
        .bind(info.height as i64)
        .bind(info.game_barrier_count as i64)
        .bind(info.player_barrier_count as i64)
        .bind(&info.name)
        .bind(info.players_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid().to_string())
    }

    async fn delete_lobby(&self, id: &str) -> AppResult<()> {
        let id: i64 = id.parse().map_err(|_| {
            crate::error::AppError::Persistence(format!("invalid lobby id: {id}"))
        })?;
        sqlx::query("DELETE FROM lobbies WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_lobbies(&self) -> AppResult<Vec<LobbyInfo>> {
        let rows = sqlx::query(
            "SELECT id, width, height, game_barrier_count, player_barrier_count, name, players_count
             FROM lobbies ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_lobby_info).collect())
    }

    async fn insert_result(&self, first_login: &str, second_login: &str, outcome: Outcome) -> AppResult<()> {
        sqlx::query("INSERT INTO results (first_login, second_login, outcome) VALUES (?, ?, ?)")
            .bind(first_login)
            .bind(second_login)
            .bind(outcome.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Scoring view (spec §4.H): winner +3, loser 0, each side +1 for draw.
    async fn list_stats(&self) -> AppResult<Vec<(String, u32)>> {
        let rows = sqlx::query("SELECT first_login, second_login, outcome FROM results")
            .fetch_all(&self.pool)
            .await?;

        let mut points: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
        for row in rows {
            let first: String = row.get("first_login");
            let second: String = row.get("second_login");
            let outcome: String = row.get("outcome");
            match outcome.as_str() {
                "first-wins" => {
                    *points.entry(first).or_insert(0) += 3;
                    points.entry(second).or_insert(0);
                }
                "second-wins" => {
                    points.entry(first).or_insert(0);
                    *points.entry(second).or_insert(0) += 3;
                }
                "draw" => {
                    *points.entry(first).or_insert(0) += 1;
                    *points.entry(second).or_insert(0) += 1;
                }
                _ => {}
            }
        }

        let mut out: Vec<(String, u32)> = points.into_iter().collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(out)
    }
}

fn row_to_lobby_info(row: sqlx::sqlite::SqliteRow) -> LobbyInfo {
    LobbyInfo {
        id: Some(row.get::<i64, _>("id").to_string()),
        width: row.get::<i64, _>("width") as u8,
        height: row.get::<i64, _>("height") as u8,
        game_barrier_count: row.get::<i64, _>("game_barrier_count") as u8,
        player_barrier_count: row.get::<i64, _>("player_barrier_count") as u8,
        name: row.get("name"),
        players_count: row.get::<i64, _>("players_count") as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> SqliteStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = SqliteStore { pool };
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn find_user_reflects_loaded_participants() {
        let store = memory_store().await;
        store.load_participants(&["alice".to_string(), "bob".to_string()]).await.unwrap();
        assert!(store.find_user("alice").await.unwrap());
        assert!(!store.find_user("carol").await.unwrap());
    }

    #[tokio::test]
    async fn insert_find_and_delete_lobby_round_trips() {
        let store = memory_store().await;
        let info = LobbyInfo {
            id: None,
            width: 9,
            height: 9,
            game_barrier_count: 20,
            player_barrier_count: 10,
            name: LobbyInfo::pairing_name("alice", "bob", 1),
            players_count: 2,
        };
        let id = store.insert_lobby(&info).await.unwrap();

        let found = store.find_lobby_by_id(&id).await.unwrap().unwrap();
        assert_eq!(found.name, info.name);

        let found_by_pair = store.find_lobby_by_pair("alice", "bob").await.unwrap().unwrap();
        assert_eq!(found_by_pair.id.as_deref(), Some(id.as_str()));

        store.delete_lobby(&id).await.unwrap();
        assert!(store.find_lobby_by_id(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_stats_scores_win_loss_and_draw() {
        let store = memory_store().await;
        store.insert_result("alice", "bob", Outcome::FirstWins).await.unwrap();
        store.insert_result("carol", "alice", Outcome::Draw).await.unwrap();

        let stats: std::collections::HashMap<String, u32> = store.list_stats().await.unwrap().into_iter().collect();
        assert_eq!(stats["alice"], 3 + 1);
        assert_eq!(stats["bob"], 0);
        assert_eq!(stats["carol"], 1);
    }
}
