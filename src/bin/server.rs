use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use walls_server::admin::{self, AdminContext};
use walls_server::config::ServerConfig;
use walls_server::registry::Registry;
use walls_server::router::{root_handler, RouterContext};
use walls_server::schedule::Schedule;
use walls_server::session::Session;
use walls_server::store::Store;
use walls_server::store_sqlite::SqliteStore;

#[derive(Parser, Debug)]
#[command(
    name = "server",
    version,
    about = "Walls tournament server",
    long_about = "Accepts TCP clients, matches them into lobbies per a round-robin \
                  schedule, and arbitrates turn-based matches. See spec.md for the wire protocol."
)]
struct Args {
    /// Path to the JSON configuration file (spec §6).
    #[arg(short, long, default_value = "resources/config.json")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace); default is info.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Newline-separated participant login file, overriding the config's
    /// `participants_file` when given (spec §3).
    #[arg(long)]
    participants: Option<PathBuf>,
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match ServerConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration, aborting startup");
            std::process::exit(1);
        }
    };

    let store: Arc<dyn Store> = match SqliteStore::connect(&config.sqlite_path).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to open store, aborting startup");
            std::process::exit(1);
        }
    };

    let participants_path = args.participants.clone().or_else(|| config.participants_file.clone().map(PathBuf::from));
    let participants = match &participants_path {
        Some(path) => std::fs::read_to_string(path)
            .map(|data| data.lines().map(str::to_string).filter(|l| !l.is_empty()).collect::<Vec<_>>())
            .unwrap_or_default(),
        None => Vec::new(),
    };
    if !participants.is_empty() {
        if let Err(e) = store.load_participants(&participants).await {
            warn!(error = %e, "failed to load participants into store");
        }
    }
    let roster = store.list_participants().await.unwrap_or_default();

    let registry = Arc::new(Registry::new());
    let schedule = Arc::new(Schedule::new(&roster, config.games_to_play));

    let router_ctx = RouterContext::new(
        registry.clone(),
        store.clone(),
        schedule,
        config.games_to_play,
        config.timeout_duration(),
        config.max_turns,
        config.match_log_dir.clone(),
        config.match_log_template.clone(),
    );
    router_ctx.spawn_cleanup_task();

    let admin_store = store.clone();
    let admin_registry = registry.clone();
    let games_to_play = config.games_to_play;
    tokio::spawn(async move {
        admin::run(AdminContext { store: admin_store, registry: admin_registry, games_to_play }).await;
    });

    let bind_addr = format!("0.0.0.0:{}", config.server_port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, addr = bind_addr, "failed to bind listener, aborting startup");
            std::process::exit(1);
        }
    };
    info!(addr = bind_addr, "server listening");

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept error");
                continue;
            }
        };
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        let session = Session::new(addr, writer);
        info!(session = session.id, addr = %addr, "accepted connection");
        session.run(reader, root_handler(router_ctx.clone()));
    }
}
