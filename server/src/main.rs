use clap::Parser;
use log::info;
use server::network::Server;
use server::simulation::ServerSimulation;
use shared::WorldConfig;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Authoritative space-combat simulation server")]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value_t = shared::TICK_RATE)]
    tick_rate: u32,

    /// Maximum number of concurrent clients
    #[arg(short, long, default_value = "16")]
    max_clients: usize,

    /// World seed for sector generation
    #[arg(long)]
    seed: Option<u64>,

    /// Edge length of one sector in world units
    #[arg(long)]
    sector_size: Option<f32>,

    /// Candidate objects per sector
    #[arg(long)]
    items_per_sector: Option<usize>,

    /// Seconds between sector refresh passes
    #[arg(long)]
    refresh_interval: Option<f32>,

    /// Hard cap of pooled instances per kind
    #[arg(long)]
    pool_cap: Option<usize>,
}

impl Args {
    fn world_config(&self) -> WorldConfig {
        let defaults = WorldConfig::default();
        WorldConfig {
            seed: self.seed.unwrap_or(defaults.seed),
            sector_size: self.sector_size.unwrap_or(defaults.sector_size),
            items_per_sector: self.items_per_sector.unwrap_or(defaults.items_per_sector),
            refresh_interval: self.refresh_interval.unwrap_or(defaults.refresh_interval),
            pool_cap: self.pool_cap,
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = args.world_config();
    let tick_rate = args.tick_rate.max(1);

    info!("Starting server...");
    info!(
        "Seed {:#x}, sector size {}, {} items per sector, tick rate {}Hz",
        config.seed, config.sector_size, config.items_per_sector, tick_rate
    );

    let address = format!("{}:{}", args.host, args.port);
    let simulation = ServerSimulation::with_defaults(config);
    let tick_duration = Duration::from_secs_f64(1.0 / tick_rate as f64);
    let mut server = Server::new(&address, tick_duration, args.max_clients, simulation).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
