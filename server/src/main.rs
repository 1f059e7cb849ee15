use clap::Parser;
use log::info;
use server::supervisor::{ServerConfig, Supervisor};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

/// Main-method of the application.
/// Parses command-line arguments, loads the map, and hands control to the
/// session supervisor.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Path to the map file
        #[clap(short, long)]
        map: PathBuf,
        /// Number of players required to start a session
        #[clap(short = 'n', long, default_value = "2")]
        players: usize,
        /// Seconds the lobby stays open before an incomplete session aborts
        #[clap(short = 't', long, default_value = "30")]
        lobby_timeout: u64,
    }

    let args = Args::parse();

    // Fatal-init: an unreadable or invalid map aborts startup.
    let map_text = std::fs::read_to_string(&args.map)?;
    info!("loaded map {}", args.map.display());

    let config = ServerConfig {
        player_count: args.players,
        lobby_timeout: Duration::from_secs(args.lobby_timeout),
        ..ServerConfig::default()
    };

    // Ctrl-C becomes an explicit termination request; the supervisor defers
    // it while a game is active.
    let (term_tx, term_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received; requesting termination");
            let _ = term_tx.send(true);
        }
    });

    let address = format!("{}:{}", args.host, args.port);
    let mut supervisor = Supervisor::bind(&address, map_text, config, term_rx).await?;

    supervisor.run().await?;
    info!("server stopped");
    Ok(())
}
