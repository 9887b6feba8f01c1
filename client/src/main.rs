use clap::Parser;
use client::input::{IdleInput, InputSource, ScriptedInput};
use client::network::Client;
use client::session::ClientSession;
use log::info;
use shared::WorldConfig;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless client exercising prediction against a server")]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Local simulation steps per second
    #[arg(short, long, default_value_t = shared::TICK_RATE)]
    tick_rate: u32,

    /// Fly the built-in patrol script instead of idling
    #[arg(long)]
    scripted: bool,

    /// Disconnect after this many seconds
    #[arg(short, long)]
    duration: Option<f64>,
}

/// Converts `--duration` seconds, rejecting values no `Duration` can hold.
fn session_length(secs: Option<f64>) -> Result<Option<Duration>, String> {
    let Some(secs) = secs else {
        return Ok(None);
    };
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) if !duration.is_zero() => Ok(Some(duration)),
        _ => Err(format!("invalid --duration {}", secs)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let duration = session_length(args.duration)?;

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let input: Box<dyn InputSource> = if args.scripted {
        info!("Flying the patrol script");
        Box::new(ScriptedInput::patrol())
    } else {
        Box::new(IdleInput)
    };
    let session = ClientSession::with_defaults(WorldConfig::default());
    let mut client =
        Client::new(&args.server, args.fake_ping, args.tick_rate, session, input).await?;

    tokio::select! {
        result = client.run(duration) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down client...");
        }
    }

    Ok(())
}
