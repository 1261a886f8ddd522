//! Command router (spec §4.F): top-level dispatch of protocol verbs to the
//! registry and persistence operations. Installed as the bottom-of-stack
//! listener on every session (spec §4.A).

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::frame::{BoxFuture, Handler};
use crate::lobby::{JoinError, Lobby, MatchCompletion};
use crate::matchlog::{self, MatchLog};
use crate::protocol::{self, GetLobbyResponse, JoinLobbyResponse, LobbyId, LobbyInfo, LoginInfo, Message, Stats};
use crate::registry::Registry;
use crate::schedule::Schedule;
use crate::session::Session;
use crate::store::Store;

/// Everything the router needs to resolve a verb. Cloned (cheaply, via
/// `Arc`) into every connection's root listener closure.
pub struct RouterContext {
    pub registry: Arc<Registry>,
    pub store: Arc<dyn Store>,
    pub schedule: Arc<Schedule>,
    pub games_to_play: u32,
    pub turn_timeout: std::time::Duration,
    pub max_turns: u32,
    pub match_log_dir: String,
    pub match_log_template: String,
    result_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<(String, MatchCompletion)>>>,
    result_tx: mpsc::Sender<(String, MatchCompletion)>,
}

impl RouterContext {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn Store>,
        schedule: Arc<Schedule>,
        games_to_play: u32,
        turn_timeout: std::time::Duration,
        max_turns: u32,
        match_log_dir: String,
        match_log_template: String,
    ) -> Arc<Self> {
        let (result_tx, result_rx) = mpsc::channel(64);
        Arc::new(Self {
            registry,
            store,
            schedule,
            games_to_play,
            turn_timeout,
            max_turns,
            match_log_dir,
            match_log_template,
            result_rx: Arc::new(tokio::sync::Mutex::new(result_rx)),
            result_tx,
        })
    }

    /// Spawns the background task that performs post-match cleanup as
    /// match completions arrive (spec §4.F): persist the result, delete the
    /// lobby row, drop it from the active map, clear both sessions'
    /// registry entries, then release both read-gates — only once the
    /// registry is consistent again (spec §4.D: "the read-gates are
    /// released later by the registry cleanup step").
    pub fn spawn_cleanup_task(self: &Arc<Self>) {
        let ctx = self.clone();
        tokio::spawn(async move {
            loop {
                let received = { ctx.result_rx.lock().await.recv().await };
                let Some((lobby_id, completion)) = received else { break };
                let MatchCompletion { first, second, result, first_gate, second_gate } = completion;

                if let Err(e) = ctx.store.insert_result(&result.first_login, &result.second_login, result.outcome).await {
                    warn!(error = %e, "failed to persist match result");
                }
                if let Err(e) = ctx.store.delete_lobby(&lobby_id).await {
                    warn!(error = %e, "failed to delete lobby row");
                }
                ctx.registry.remove_lobby(&lobby_id).await;
                ctx.registry.unbind(first.id).await;
                ctx.registry.unbind(second.id).await;

                drop(first_gate);
                drop(second_gate);

                let log = MatchLog {
                    name: lobby_id.clone(),
                    comments: String::new(),
                    result: result.outcome.as_str().to_string(),
                    turns: 0,
                };
                if let Ok(template) = tokio::fs::read_to_string(&ctx.match_log_template).await {
                    let rendered = matchlog::render(&template, &log);
                    let path = format!("{}/{}.html", ctx.match_log_dir, lobby_id);
                    if let Err(e) = tokio::fs::write(&path, rendered).await {
                        warn!(error = %e, path, "failed to write match log");
                    }
                }
            }
        });
    }

    fn result_sender(&self) -> mpsc::Sender<(String, MatchCompletion)> {
        self.result_tx.clone()
    }
}

/// Builds the root listener handler installed on every freshly-accepted
/// session (spec §4.B `start()`).
pub fn root_handler(ctx: Arc<RouterContext>) -> Handler {
    Arc::new(move |payload: String, session: Arc<Session>| -> BoxFuture {
        let ctx = ctx.clone();
        Box::pin(async move {
            dispatch(&ctx, &payload, &session).await;
        })
    })
}

async fn dispatch(ctx: &Arc<RouterContext>, payload: &str, session: &Arc<Session>) {
    let Some((verb, body)) = protocol::parse_verb(payload) else {
        return; // malformed frame: silently ignored (spec §7b)
    };

    match verb.as_str() {
        "CONNECTION" => handle_connection(ctx, session, body).await,
        "SOCKET JOINLOBBY" => handle_join_lobby(ctx, session, body).await,
        "SOCKET LEAVELOBBY" => handle_leave_lobby(ctx, session).await,
        "GET LOBBY" => handle_get_lobby(ctx, session).await,
        "GET RANDOMLOBBY" => handle_random_lobby(session).await,
        "POST LOBBY" => handle_post_lobby(ctx, session, body).await,
        "GET STATS" => handle_get_stats(ctx, session).await,
        "DISCONNECT" => handle_disconnect(ctx, session).await,
        _ => {}
    }
}

async fn handle_connection(ctx: &Arc<RouterContext>, session: &Arc<Session>, body: Option<serde_json::Value>) {
    let Some(login) = body.and_then(|v| serde_json::from_value::<LoginInfo>(v).ok()) else {
        return;
    };
    match ctx.store.find_user(&login.login).await {
        Ok(true) => {
            session.set_login(login.login.clone()).await;
            ctx.registry.register_client(session.id).await;
            info!(session = session.id, login = login.login, "login succeeded");
        }
        Ok(false) | Err(_) => {
            reply(session, &Message::new("LOGIN FAILED")).await;
        }
    }
}

async fn handle_join_lobby(ctx: &Arc<RouterContext>, session: &Arc<Session>, body: Option<serde_json::Value>) {
    let Some(login) = session.login().await else {
        reply(session, &Message::new("LOGIN FIRST")).await;
        return;
    };

    let requested_id = body
        .and_then(|v| serde_json::from_value::<LobbyId>(v).ok())
        .and_then(|l| l.id);

    let info = match resolve_lobby_info(ctx, &login, requested_id).await {
        Some(info) => info,
        None => {
            reply(session, &JoinLobbyResponse { data: None, success: false }).await;
            return;
        }
    };
    let lobby_id = info.id.clone().unwrap_or_default();

    ctx.registry.bind(session.id, lobby_id.clone()).await;
    let lobby = ctx
        .registry
        .get_or_create_lobby(lobby_id.clone(), || {
            Lobby::with_limits(info.clone(), ctx.result_sender_bound(lobby_id.clone()), ctx.turn_timeout, ctx.max_turns)
        })
        .await;

    match lobby.add_player(session.clone()).await {
        Ok(pending) => {
            pending.commit();
            reply(session, &JoinLobbyResponse { data: Some(info), success: true }).await;
        }
        Err(JoinError::AlreadyStarted) => {
            ctx.registry.unbind(session.id).await;
            reply(session, &JoinLobbyResponse { data: None, success: false }).await;
        }
    }
}

async fn resolve_lobby_info(ctx: &Arc<RouterContext>, login: &str, requested_id: Option<String>) -> Option<LobbyInfo> {
    if let Some(id) = requested_id {
        return ctx.store.find_lobby_by_id(&id).await.ok().flatten();
    }
    let opponent = ctx.schedule.next_opponent(login).await?;
    ctx.store.find_lobby_by_pair(login, &opponent).await.ok().flatten()
}

async fn handle_leave_lobby(ctx: &Arc<RouterContext>, session: &Arc<Session>) {
    if let Some(lobby_id) = ctx.registry.current_lobby(session.id).await {
        if let Some(lobby) = ctx.registry.get_lobby(&lobby_id).await {
            if lobby.is_playing().await {
                return; // guard: lobby not playing (spec §4.F)
            }
        }
    }
    detach_from_waiting_lobby(ctx, session).await;
    reply(session, &Message::new("OK")).await;
}

/// Detaches `session` from whatever lobby it is waiting in, provided that
/// lobby has not started playing (spec §4.D `removePlayer` is itself a
/// no-op once `playing`, so this never races the match task).
async fn detach_from_waiting_lobby(ctx: &Arc<RouterContext>, session: &Arc<Session>) {
    if let Some(lobby_id) = ctx.registry.current_lobby(session.id).await {
        if let Some(lobby) = ctx.registry.get_lobby(&lobby_id).await {
            lobby.remove_player(session.id).await;
        }
        ctx.registry.unbind(session.id).await;
    }
}

async fn handle_get_lobby(ctx: &Arc<RouterContext>, session: &Arc<Session>) {
    let data = ctx.store.list_lobbies().await.unwrap_or_default();
    reply(session, &GetLobbyResponse { data, success: true }).await;
}

async fn handle_random_lobby(session: &Arc<Session>) {
    reply(session, &LobbyId { id: None }).await;
}

async fn handle_post_lobby(ctx: &Arc<RouterContext>, session: &Arc<Session>, body: Option<serde_json::Value>) {
    let Some(info) = body.and_then(|v| serde_json::from_value::<LobbyInfo>(v).ok()) else {
        return;
    };
    match ctx.store.insert_lobby(&info).await {
        Ok(id) => reply(session, &LobbyId { id: Some(id) }).await,
        Err(e) => warn!(error = %e, "failed to persist lobby"),
    }
}

async fn handle_get_stats(ctx: &Arc<RouterContext>, session: &Arc<Session>) {
    let stats: Vec<Stats> = ctx
        .store
        .list_stats()
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|(name, points)| Stats { name, points })
        .collect();
    reply(session, &stats).await;
}

async fn handle_disconnect(ctx: &Arc<RouterContext>, session: &Arc<Session>) {
    detach_from_waiting_lobby(ctx, session).await;
    ctx.registry.deregister_client(session.id).await;
    reply(session, &Message::new("BYE")).await;
    session.stop().await;
}

async fn reply<T: serde::Serialize>(session: &Arc<Session>, body: &T) {
    if let Ok(json) = serde_json::to_string(body) {
        let mut line = json;
        line.push('\n');
        session.send(line.as_bytes()).await;
    }
}

impl RouterContext {
    fn result_sender_bound(self: &Arc<Self>, lobby_id: String) -> mpsc::Sender<MatchCompletion> {
        let (tx, mut rx) = mpsc::channel(1);
        let forward_to = self.result_sender();
        tokio::spawn(async move {
            if let Some(completion) = rx.recv().await {
                let _ = forward_to.send((lobby_id, completion)).await;
            }
        });
        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as TokioMutex;

    use async_trait::async_trait;
    use crate::error::AppResult;
    use crate::protocol::Outcome;

    /// In-memory stand-in for the persistence adapter (spec §4.H), enough
    /// to drive the router's verb handlers without a real database.
    #[derive(Default)]
    struct MockStore {
        users: TokioMutex<Vec<String>>,
        lobbies: TokioMutex<HashMap<String, LobbyInfo>>,
        next_id: TokioMutex<u64>,
    }

    #[async_trait]
    impl Store for MockStore {
        async fn load_participants(&self, logins: &[String]) -> AppResult<()> {
            self.users.lock().await.extend(logins.iter().cloned());
            Ok(())
        }
        async fn list_participants(&self) -> AppResult<Vec<String>> {
            Ok(self.users.lock().await.clone())
        }
        async fn find_user(&self, login: &str) -> AppResult<bool> {
            Ok(self.users.lock().await.iter().any(|u| u == login))
        }
        async fn find_lobby_by_id(&self, id: &str) -> AppResult<Option<LobbyInfo>> {
            Ok(self.lobbies.lock().await.get(id).cloned())
        }
        async fn find_lobby_by_pair(&self, _a: &str, _b: &str) -> AppResult<Option<LobbyInfo>> {
            Ok(None)
        }
        async fn insert_lobby(&self, info: &LobbyInfo) -> AppResult<String> {
            let mut next_id = self.next_id.lock().await;
            *next_id += 1;
            let id = next_id.to_string();
            let mut info = info.clone();
            info.id = Some(id.clone());
            self.lobbies.lock().await.insert(id.clone(), info);
            Ok(id)
        }
        async fn delete_lobby(&self, id: &str) -> AppResult<()> {
            self.lobbies.lock().await.remove(id);
            Ok(())
        }
        async fn list_lobbies(&self) -> AppResult<Vec<LobbyInfo>> {
            Ok(self.lobbies.lock().await.values().cloned().collect())
        }
        async fn insert_result(&self, _first: &str, _second: &str, _outcome: Outcome) -> AppResult<()> {
            Ok(())
        }
        async fn list_stats(&self) -> AppResult<Vec<(String, u32)>> {
            Ok(Vec::new())
        }
    }

    async fn client_session() -> (Arc<Session>, tokio::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::net::TcpStream::connect(addr);
        let (accepted, client) = tokio::join!(listener.accept(), connect);
        let (server_stream, server_addr) = accepted.unwrap();
        let (_reader, writer) = server_stream.into_split();
        (Session::new(server_addr, writer), client.unwrap())
    }

    fn test_ctx(store: Arc<dyn Store>) -> Arc<RouterContext> {
        RouterContext::new(
            Arc::new(Registry::new()),
            store,
            Arc::new(Schedule::new(&["alice".to_string(), "bob".to_string()], 1)),
            1,
            std::time::Duration::from_secs(120),
            30,
            "logs".to_string(),
            "resources/log_template.html".to_string(),
        )
    }

    async fn read_line(client: &mut tokio::net::TcpStream) -> String {
        let mut buf = [0u8; 4096];
        let n = client.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).trim().to_string()
    }

    #[tokio::test]
    async fn connection_with_unknown_login_replies_login_failed() {
        let store: Arc<dyn Store> = Arc::new(MockStore::default());
        let ctx = test_ctx(store);
        let (session, mut client) = client_session().await;

        dispatch(&ctx, "CONNECTION {\"LOGIN\":\"ghost\"}", &session).await;

        let reply = read_line(&mut client).await;
        assert_eq!(reply, r#"{"MESSAGE":"LOGIN FAILED"}"#);
        assert_eq!(session.login().await, None);
    }

    #[tokio::test]
    async fn connection_with_known_login_sets_session_name() {
        let store = Arc::new(MockStore::default());
        store.load_participants(&["alice".to_string()]).await.unwrap();
        let ctx = test_ctx(store);
        let (session, _client) = client_session().await;

        dispatch(&ctx, "CONNECTION {\"LOGIN\":\"alice\"}", &session).await;

        assert_eq!(session.login().await, Some("alice".to_string()));
    }

    #[tokio::test]
    async fn join_lobby_before_login_is_rejected() {
        let store: Arc<dyn Store> = Arc::new(MockStore::default());
        let ctx = test_ctx(store);
        let (session, mut client) = client_session().await;

        dispatch(&ctx, "SOCKET JOINLOBBY {\"id\":\"1\"}", &session).await;

        let reply = read_line(&mut client).await;
        assert_eq!(reply, r#"{"MESSAGE":"LOGIN FIRST"}"#);
    }

    #[tokio::test]
    async fn join_lobby_with_unknown_id_reports_failure_and_clears_registry() {
        let store: Arc<dyn Store> = Arc::new(MockStore::default());
        let ctx = test_ctx(store);
        let (session, mut client) = client_session().await;
        session.set_login("alice".to_string()).await;

        dispatch(&ctx, "SOCKET JOINLOBBY {\"id\":\"missing\"}", &session).await;

        let reply = read_line(&mut client).await;
        assert_eq!(reply, r#"{"DATA":null,"SUCCESS":false}"#);
        assert_eq!(ctx.registry.current_lobby(session.id).await, None);
    }

    #[tokio::test]
    async fn post_lobby_then_get_lobby_lists_it() {
        let store: Arc<dyn Store> = Arc::new(MockStore::default());
        let ctx = test_ctx(store);
        let (session, mut client) = client_session().await;

        let body = r#"{"_id":null,"width":9,"height":9,"gameBarrierCount":20,"playerBarrierCount":10,"name":"alice_vs_bob_1","players_count":2}"#;
        dispatch(&ctx, &format!("POST LOBBY {body}"), &session).await;
        let post_reply = read_line(&mut client).await;
        assert!(post_reply.contains("\"id\":"));

        dispatch(&ctx, "GET LOBBY", &session).await;
        let list_reply = read_line(&mut client).await;
        assert!(list_reply.contains("alice_vs_bob_1"));
        assert!(list_reply.contains("\"SUCCESS\":true"));
    }

    #[tokio::test]
    async fn disconnect_replies_bye_and_stops_the_session() {
        let store: Arc<dyn Store> = Arc::new(MockStore::default());
        let ctx = test_ctx(store);
        let (session, mut client) = client_session().await;
        session.set_login("alice".to_string()).await;

        dispatch(&ctx, "DISCONNECT", &session).await;

        let reply = read_line(&mut client).await;
        assert_eq!(reply, r#"{"MESSAGE":"BYE"}"#);
        assert!(!session.is_active());
    }
}
