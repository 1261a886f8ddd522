//! Lobby / match engine (spec §4.D): two-phase join, turn arbitration,
//! per-turn timeout, endgame broadcast, result emission.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::board;
use crate::frame::{BoxFuture, Handler};
use crate::protocol::{EndGameInfo, Field, LobbyInfo, MatchResult, Outcome, ResultRecord, StartGameInfo};
use crate::session::Session;

const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_MAX_TURNS: u32 = 30;

/// Everything the post-match cleanup step needs (spec §4.F): the result
/// record to persist, both players' session handles so their registry
/// entries can be cleared, and both read-gates, held from the moment
/// `finish_match` sent ENDGAME until cleanup releases them once the
/// registry is consistent again (spec §4.D, §5 "read-gate contract").
pub struct MatchCompletion {
    pub first: Arc<Session>,
    pub second: Arc<Session>,
    pub result: ResultRecord,
    pub first_gate: OwnedMutexGuard<()>,
    pub second_gate: OwnedMutexGuard<()>,
}

/// Confirmation token returned by `add_player`'s first phase: the caller
/// must call [`PendingJoin::commit`] once it has durably updated the
/// registry, or [`PendingJoin::abort`] to roll back (spec §9's suggested
/// "reply channel carrying a confirmation token" realization of the
/// two-phase handshake).
pub struct PendingJoin {
    ack_tx: oneshot::Sender<bool>,
}

impl PendingJoin {
    pub fn commit(self) {
        let _ = self.ack_tx.send(true);
    }

    pub fn abort(self) {
        let _ = self.ack_tx.send(false);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    AlreadyStarted,
}

struct LobbyState {
    expecting_player: Option<Arc<Session>>,
    playing: bool,
}

/// A match slot (spec §3 "Lobby"). Materialised lazily on first `JOINLOBBY`
/// referencing its id, destroyed after the match result is written.
pub struct Lobby {
    pub info: LobbyInfo,
    state: Mutex<LobbyState>,
    turn_tx: mpsc::Sender<String>,
    turn_rx: Mutex<mpsc::Receiver<String>>,
    result_tx: mpsc::Sender<MatchCompletion>,
    timeout: Duration,
    max_turns: u32,
}

impl Lobby {
    pub fn new(info: LobbyInfo, result_tx: mpsc::Sender<MatchCompletion>) -> Self {
        Self::with_limits(info, result_tx, DEFAULT_TURN_TIMEOUT, DEFAULT_MAX_TURNS)
    }

    pub fn with_limits(
        info: LobbyInfo,
        result_tx: mpsc::Sender<MatchCompletion>,
        timeout: Duration,
        max_turns: u32,
    ) -> Self {
        let (turn_tx, turn_rx) = mpsc::channel(1);
        Self {
            info,
            state: Mutex::new(LobbyState { expecting_player: None, playing: false }),
            turn_tx,
            turn_rx: Mutex::new(turn_rx),
            result_tx,
            timeout,
            max_turns,
        }
    }

    pub async fn is_playing(&self) -> bool {
        self.state.lock().await.playing
    }

    /// Two-phase join (spec §4.D). Returns `Err(AlreadyStarted)` immediately
    /// if the lobby is already playing; otherwise returns a [`PendingJoin`]
    /// the caller must commit (after binding its registry entry) or abort.
    pub async fn add_player(
        self: &Arc<Self>,
        session: Arc<Session>,
    ) -> Result<PendingJoin, JoinError> {
        {
            let guard = self.state.lock().await;
            if guard.playing {
                return Err(JoinError::AlreadyStarted);
            }
        }

        // `expectingPlayer` is read and mutated only after the caller's ack
        // arrives (spec §4.D step 2): taking it eagerly here, before the
        // ack, would let a second concurrent joiner observe a vacated slot
        // that was never actually committed.
        let (ack_tx, ack_rx) = oneshot::channel();
        let lobby = self.clone();
        let newcomer = session.clone();
        tokio::spawn(async move {
            let Ok(committed) = ack_rx.await else { return };
            if !committed {
                return;
            }
            let mut guard = lobby.state.lock().await;
            if guard.playing {
                return;
            }
            match guard.expecting_player.take() {
                None => {
                    guard.expecting_player = Some(newcomer);
                }
                Some(first) => {
                    guard.playing = true;
                    drop(guard);
                    let lobby2 = lobby.clone();
                    tokio::spawn(async move {
                        lobby2.play_game(first, newcomer).await;
                    });
                }
            }
        });

        Ok(PendingJoin { ack_tx })
    }

    /// Detaches a waiting player without starting a match (spec §4.D
    /// `removePlayer`, §7 scenario 6). A no-op once the lobby is playing.
    pub async fn remove_player(&self, session_id: u64) {
        let mut guard = self.state.lock().await;
        if guard.playing {
            return;
        }
        if guard.expecting_player.as_ref().map(|s| s.id) == Some(session_id) {
            guard.expecting_player = None;
        }
    }

    /// Turn listener (spec §4.D): strips `STEP ` and forwards the rest onto
    /// the lobby's turn channel, blocking if the channel is already full.
    pub fn turn_listener(self: &Arc<Self>) -> Handler {
        let turn_tx = self.turn_tx.clone();
        Arc::new(move |payload: String, _session: Arc<Session>| -> BoxFuture {
            let turn_tx = turn_tx.clone();
            Box::pin(async move {
                if let Some(rest) = payload.strip_prefix("STEP ") {
                    let _ = turn_tx.send(rest.to_string()).await;
                }
            })
        })
    }

    async fn play_game(self: Arc<Self>, waiter: Arc<Session>, newcomer: Arc<Session>) {
        let mut rng = rand::thread_rng();
        // Coin-flip picks which of the two arrivals becomes `first`/`second`
        // (spec §4.D, `original_source` `lobbies.go` `startGame`): `first`
        // always starts on row 0 and always moves first, so the two roles
        // stay coupled instead of being assigned independently.
        let (first, second) = if rng.gen_bool(0.5) {
            (waiter.clone(), newcomer.clone())
        } else {
            (newcomer.clone(), waiter.clone())
        };
        // `first`/`second` name the goal-row roles fixed for the whole
        // match; `leader`/`follower` name who moves next and rotate.
        let first_login = first.login().await.unwrap_or_default();
        let second_login = second.login().await.unwrap_or_default();

        let turn_listener = self.turn_listener();
        first.push_listener(turn_listener.clone()).await;
        second.push_listener(turn_listener).await;

        let width = self.info.width;
        let height = self.info.height;
        let first_start: crate::protocol::Cell = [0, width / 2];
        let second_start: crate::protocol::Cell = [height - 1, width / 2];
        let field = board::generate(
            width,
            height,
            self.info.game_barrier_count,
            first_start,
            second_start,
            &mut rng,
        );

        info!(lobby = %self.info.name, "match started");

        let start_for_first = StartGameInfo {
            my_move: true,
            width: field.width,
            height: field.height,
            position: field.position,
            opponent_position: field.opponent_position,
            barriers: field.barriers.clone(),
        };
        let start_for_second = StartGameInfo {
            my_move: false,
            width: field.width,
            height: field.height,
            position: field.opponent_position,
            opponent_position: field.position,
            barriers: field.barriers.clone(),
        };
        send_frame(&first, "SOCKET STARTGAME", &start_for_first).await;
        send_frame(&second, "SOCKET STARTGAME", &start_for_second).await;

        let mut leader = first.clone();
        let mut follower = second.clone();
        let mut turn = 0u32;
        let mut current = field;

        let outcome = loop {
            let mut rx = self.turn_rx.lock().await;
            let received = tokio::select! {
                payload = rx.recv() => payload,
                _ = tokio::time::sleep(self.timeout) => {
                    warn!(lobby = %self.info.name, "turn timeout, follower wins by forfeit");
                    drop(rx);
                    break winner_is(&follower, &first, &second);
                }
            };
            drop(rx);

            let Some(payload) = received else {
                break winner_is(&follower, &first, &second);
            };

            let parsed: Option<Field> = serde_json::from_str(&payload).ok();
            let candidate = match parsed {
                Some(f) if f.in_bounds() => f,
                _ => {
                    warn!(lobby = %self.info.name, "malformed or out-of-bounds STEP, follower wins");
                    break winner_is(&follower, &first, &second);
                }
            };

            current = candidate;

            if let Some(outcome) = evaluate_end(&current, &leader, &first, &second, turn, self.max_turns) {
                break outcome;
            }

            let swapped = current.swapped();
            send_frame(&follower, "SOCKET STEP", &swapped).await;
            std::mem::swap(&mut leader, &mut follower);
            turn += 1;
        };

        let completion = self
            .finish_match(&first, &second, &current, outcome, &first_login, &second_login)
            .await;
        // The gates travel with `completion`; they are released only once
        // the cleanup step (spec §4.F) has made the registry consistent
        // again, not here (spec §4.D).
        let _ = self.result_tx.send(completion).await;
    }

    async fn finish_match(
        &self,
        first: &Arc<Session>,
        second: &Arc<Session>,
        field: &Field,
        outcome: Outcome,
        first_login: &str,
        second_login: &str,
    ) -> MatchCompletion {
        for session in [first, second] {
            let _ = session.pop_listener().await;
        }

        // Acquire both read-gates before ENDGAME so no inbound frame from
        // either client interleaves with the protocol transition (spec §5).
        // Held (not dropped here) until the registry cleanup step releases
        // them, per spec §4.D.
        let first_gate = first.acquire_read_gate().await;
        let second_gate = second.acquire_read_gate().await;

        let first_result = match outcome {
            Outcome::FirstWins => MatchResult::Win,
            Outcome::SecondWins => MatchResult::Lose,
            Outcome::Draw => MatchResult::Draw,
        };
        let second_result = match outcome {
            Outcome::FirstWins => MatchResult::Lose,
            Outcome::SecondWins => MatchResult::Win,
            Outcome::Draw => MatchResult::Draw,
        };

        send_frame(first, "SOCKET ENDGAME", &EndGameInfo {
            result: first_result,
            width: field.width,
            height: field.height,
            position: field.position,
            opponent_position: field.opponent_position,
            barriers: field.barriers.clone(),
        })
        .await;
        send_frame(second, "SOCKET ENDGAME", &EndGameInfo {
            result: second_result,
            width: field.width,
            height: field.height,
            position: field.opponent_position,
            opponent_position: field.position,
            barriers: field.barriers.clone(),
        })
        .await;

        info!(lobby = %self.info.name, outcome = outcome.as_str(), "match ended");

        MatchCompletion {
            first: first.clone(),
            second: second.clone(),
            result: ResultRecord {
                first_login: first_login.to_string(),
                second_login: second_login.to_string(),
                outcome,
            },
            first_gate,
            second_gate,
        }
    }
}

fn winner_is(winner: &Arc<Session>, first: &Arc<Session>, _second: &Arc<Session>) -> Outcome {
    if winner.id == first.id {
        Outcome::FirstWins
    } else {
        Outcome::SecondWins
    }
}

/// Evaluates end-of-game conditions from the mover's own perspective (the
/// payload just received is *the mover's* field, positions not yet
/// swapped): first wins at row `height-1`, second wins at row 0, a draw is
/// declared once `turn >= max_turns` (spec §4.D).
fn evaluate_end(
    field: &Field,
    mover: &Arc<Session>,
    first: &Arc<Session>,
    second: &Arc<Session>,
    turn: u32,
    max_turns: u32,
) -> Option<Outcome> {
    let goal_row = if mover.id == first.id { field.height - 1 } else { 0 };
    if field.position[0] == goal_row {
        return Some(winner_is(mover, first, second));
    }
    if turn >= max_turns {
        return Some(Outcome::Draw);
    }
    None
}

async fn send_frame<T: serde::Serialize>(session: &Arc<Session>, verb: &str, body: &T) {
    if let Ok(json) = serde_json::to_string(body) {
        let line = format!("{verb} {json}\n");
        session.send(line.as_bytes()).await;
    }
}
