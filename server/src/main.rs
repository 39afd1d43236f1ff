use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use tokio::net::TcpListener;

use server::config::ServerConfig;
use server::persist::{self, SupabaseClient};
use server::server::Server;
use server::world::World;

/// Cybrelink dedicated game server.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server port to listen on
    #[clap(short, long, default_value_t = protocol::DEFAULT_PORT)]
    port: u16,

    /// Maximum concurrent players
    #[clap(short, long, default_value_t = 8)]
    max_players: usize,

    /// Persistence base URL (persistence disabled when omitted)
    #[clap(long)]
    url: Option<String>,

    /// Persistence anon key
    #[clap(long, default_value = "")]
    key: String,

    /// Game logic tick rate in Hz
    #[clap(long, default_value_t = protocol::TICK_RATE_HZ)]
    tick_rate: u32,

    /// Network send rate in Hz
    #[clap(long, default_value_t = protocol::NETWORK_TICK_RATE_HZ)]
    net_tick_rate: u32,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info cargo run");
    }

    let args = Args::parse();
    let config = ServerConfig {
        port: args.port,
        max_players: args.max_players,
        tick_rate_hz: args.tick_rate,
        network_tick_rate_hz: args.net_tick_rate,
        connection_timeout: Duration::from_millis(protocol::CONNECTION_TIMEOUT_MS),
        supabase_url: args.url,
        supabase_key: args.key,
        npc_count: 5,
    };

    info!(
        "starting Cybrelink dedicated server on port {} ({} Hz game / {} Hz network)",
        config.port, config.tick_rate_hz, config.network_tick_rate_hz
    );

    // The persistence client and the bulk load are blocking HTTP, so both
    // stay off the async workers.
    let (client, world) = match config.supabase_url.clone() {
        Some(url) => {
            let key = config.supabase_key.clone();
            let loaded = tokio::task::spawn_blocking(
                move || -> Result<(SupabaseClient, World), reqwest::Error> {
                    let client = SupabaseClient::new(&url, &key)?;
                    let world = persist::load_world(&client);
                    Ok((client, world))
                },
            )
            .await;
            match loaded {
                Ok(Ok((client, world))) => (Some(client), world),
                Ok(Err(e)) => {
                    error!("failed to build persistence client: {e}");
                    std::process::exit(1);
                }
                Err(e) => {
                    error!("world load failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        None => {
            warn!("persistence URL not configured, persistence disabled");
            (None, World::new())
        }
    };

    let listener = match TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind port {}: {e}", config.port);
            std::process::exit(1);
        }
    };

    let mut server = Server::new(config, world, client);
    if let Err(e) = server.run(listener).await {
        error!("server error: {e}");
        std::process::exit(1);
    }
}
