use clap::Parser;
use log::{error, info};
use server::game::{World, WorldConfig};
use server::network::{BoxError, Server};
use shared::{Level, MovementConfig};
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Authoritative coin-dash server")]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Physics ticks per second
    #[clap(short, long, default_value_t = shared::PHYSICS_TICK_RATE)]
    tick_rate: u32,
    /// Maximum number of connected players
    #[clap(short, long, default_value = "16")]
    max_clients: usize,
    /// Largest distance from which a pickup may be claimed
    #[clap(long, default_value = "1.5")]
    pickup_distance: f32,
    /// Seconds between two dives
    #[clap(long, default_value = "1.0")]
    dive_cooldown: f64,
    /// Seed for the wandering NPCs
    #[clap(long, default_value = "1")]
    npc_seed: u64,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    let args = Args::parse();
    if args.tick_rate == 0 {
        error!("Tick rate must be at least 1");
        return Err("tick rate must be at least 1".into());
    }

    let config = WorldConfig {
        movement: MovementConfig {
            dive_cooldown: args.dive_cooldown,
            ..MovementConfig::default()
        },
        max_pickup_distance: args.pickup_distance,
        npc_seed: args.npc_seed,
        ..WorldConfig::default()
    };
    let world = World::new(Level::arena(), config);

    let address = format!("{}:{}", args.host, args.port);
    let tick_duration = Duration::from_secs_f64(1.0 / args.tick_rate as f64);
    info!(
        "Starting server on {} at {} Hz for up to {} players",
        address, args.tick_rate, args.max_clients
    );

    let mut server = Server::with_world(&address, tick_duration, args.max_clients, world).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
