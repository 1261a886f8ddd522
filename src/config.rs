use std::path::Path;

use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// On-disk JSON configuration (spec §6). `sqlite_path` and
/// `participants_file` are additions this crate needs that the original
/// MariaDB-backed server didn't: they default quietly so an unmodified
/// config file (matching the spec's documented shape) still loads.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(rename = "loginFromFile")]
    pub login_from_file: bool,

    #[serde(rename = "serverPort")]
    pub server_port: u16,

    #[serde(rename = "mariaAddress", default)]
    pub maria_address: String,

    #[serde(rename = "mariaPort", default)]
    pub maria_port: u16,

    #[serde(rename = "dbName", default)]
    pub db_name: String,

    #[serde(rename = "dbLogin", default)]
    pub db_login: String,

    #[serde(rename = "dbPassword", default)]
    pub db_password: String,

    #[serde(rename = "gamesToPlay")]
    pub games_to_play: u32,

    /// Per-turn deadline, in seconds (spec §4.D default 120).
    pub timeout: u64,

    pub max_turns: u32,

    /// Where the embedded store keeps its sqlite file. Not part of the
    /// original wire contract; defaults to an in-memory-adjacent file so a
    /// config written against spec §6 alone still loads.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    /// Newline-separated participant login file (spec §3).
    #[serde(default)]
    pub participants_file: Option<String>,

    /// Directory match-log HTML is written to (spec §4.M).
    #[serde(default = "default_log_dir")]
    pub match_log_dir: String,

    /// Path to the HTML match-log template (spec §6).
    #[serde(default = "default_log_template")]
    pub match_log_template: String,
}

fn default_sqlite_path() -> String {
    "walls.sqlite".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_template() -> String {
    "resources/log_template.html".to_string()
}

impl ServerConfig {
    pub fn load(path: &Path) -> AppResult<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("reading {}: {e}", path.display())))?;
        serde_json::from_str(&data)
            .map_err(|e| AppError::Config(format!("parsing {}: {e}", path.display())))
    }

    pub fn timeout_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout)
    }
}
