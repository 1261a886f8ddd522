//! Wire types for the newline-delimited JSON protocol (spec §6).
//!
//! A barrier is `[[row,col],[row,col],[row,col],[row,col]]`: the first pair
//! names one blocked edge `(a,b)`, the second pair names the other `(c,d)`.

use serde::{Deserialize, Serialize};

pub type Cell = [u8; 2];
pub type Barrier = [Cell; 4];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginInfo {
    #[serde(rename = "LOGIN")]
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "MESSAGE")]
    pub message: String,
}

impl Message {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Immutable lobby descriptor (spec §3). `id` is `None` until persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LobbyInfo {
    #[serde(rename = "_id")]
    pub id: Option<String>,
    pub width: u8,
    pub height: u8,
    #[serde(rename = "gameBarrierCount")]
    pub game_barrier_count: u8,
    #[serde(rename = "playerBarrierCount")]
    pub player_barrier_count: u8,
    pub name: String,
    #[serde(rename = "players_count")]
    pub players_count: u8,
}

impl LobbyInfo {
    /// `name` encodes the pairing as `«loginA»_vs_«loginB»_«k»` (spec §3).
    pub fn pairing_name(login_a: &str, login_b: &str, k: u32) -> String {
        format!("{login_a}_vs_{login_b}_{k}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLobbyResponse {
    #[serde(rename = "DATA")]
    pub data: Vec<LobbyInfo>,
    #[serde(rename = "SUCCESS")]
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyId {
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinLobbyResponse {
    #[serde(rename = "DATA")]
    pub data: Option<LobbyInfo>,
    #[serde(rename = "SUCCESS")]
    pub success: bool,
}

/// Per-turn board state from one player's perspective (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Field {
    pub width: u8,
    pub height: u8,
    pub position: Cell,
    #[serde(rename = "opponentPosition")]
    pub opponent_position: Cell,
    pub barriers: Vec<Barrier>,
}

impl Field {
    /// The involution mentioned in spec §8: swap the two perspectives.
    pub fn swapped(&self) -> Field {
        Field {
            width: self.width,
            height: self.height,
            position: self.opponent_position,
            opponent_position: self.position,
            barriers: self.barriers.clone(),
        }
    }

    pub fn in_bounds(&self) -> bool {
        let in_grid =
            |c: Cell| c[0] < self.height && c[1] < self.width;
        in_grid(self.position) && in_grid(self.opponent_position)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartGameInfo {
    #[serde(rename = "move")]
    pub my_move: bool,
    pub width: u8,
    pub height: u8,
    pub position: Cell,
    #[serde(rename = "opponentPosition")]
    pub opponent_position: Cell,
    pub barriers: Vec<Barrier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchResult {
    Win,
    Lose,
    Draw,
}

impl std::fmt::Display for MatchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchResult::Win => write!(f, "win"),
            MatchResult::Lose => write!(f, "lose"),
            MatchResult::Draw => write!(f, "draw"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndGameInfo {
    pub result: MatchResult,
    pub width: u8,
    pub height: u8,
    pub position: Cell,
    #[serde(rename = "opponentPosition")]
    pub opponent_position: Cell,
    pub barriers: Vec<Barrier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub name: String,
    pub points: u32,
}

/// Outcome recorded exactly once per match (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    FirstWins,
    SecondWins,
    Draw,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::FirstWins => "first-wins",
            Outcome::SecondWins => "second-wins",
            Outcome::Draw => "draw",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub first_login: String,
    pub second_login: String,
    pub outcome: Outcome,
}

/// Extracts up to two substrings matching `[A-Z ]+[A-Z]` (verb) and
/// `{.+}` (JSON body) from a raw inbound line (spec §6).
pub fn parse_verb(line: &str) -> Option<(String, Option<serde_json::Value>)> {
    use std::sync::OnceLock;

    static VERB_RE: OnceLock<regex::Regex> = OnceLock::new();
    static BODY_RE: OnceLock<regex::Regex> = OnceLock::new();

    let verb_re = VERB_RE.get_or_init(|| regex::Regex::new(r"[A-Z ]+[A-Z]").unwrap());
    let body_re = BODY_RE.get_or_init(|| regex::Regex::new(r"\{.+\}").unwrap());

    let verb = verb_re.find(line)?.as_str().trim().to_string();
    let body = body_re
        .find(line)
        .and_then(|m| serde_json::from_str(m.as_str()).ok());
    Some((verb, body))
}
