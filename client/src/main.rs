use clap::Parser;
use client::game::ClientConfig;
use client::input::ScriptedDevice;
use client::interpolation::InterpolationConfig;
use client::network::{BoxError, Client};
use log::{error, info};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless coin-dash client driven by a bot", long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Physics ticks per second, must match the server
    #[arg(short = 't', long, default_value_t = shared::PHYSICS_TICK_RATE)]
    tick_rate: u32,

    /// Render frames per second
    #[arg(short = 'r', long, default_value_t = shared::DEFAULT_RENDER_RATE)]
    render_rate: u32,

    /// Seconds remote actors are rendered behind the server clock
    #[arg(long, default_value = "0.1")]
    interpolation_delay: f64,

    /// Seed for the bot's input
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ClientConfig {
        interpolation: InterpolationConfig {
            delay: args.interpolation_delay,
            ..InterpolationConfig::default()
        },
        physics_dt: shared::physics_dt(args.tick_rate),
        ..ClientConfig::default()
    };
    if let Err(e) = config.interpolation.validate() {
        error!("Invalid interpolation settings: {}", e);
        return Err(e.into());
    }

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let device = Box::new(ScriptedDevice::new(args.seed));
    let mut client = Client::new(
        &args.server,
        args.fake_ping,
        config,
        args.render_rate,
        device,
    )
    .await?;

    tokio::select! {
        result = client.run(args.duration.map(Duration::from_secs)) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
