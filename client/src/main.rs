mod network;
mod sync;

use clap::Parser;
use log::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Simulation tick rate (frames per second)
    #[arg(short, long, default_value = "30")]
    tick_rate: u32,

    /// Generate a repeating walk input instead of waiting for local input
    #[arg(long)]
    walk: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);

    network::run(&args.server, args.tick_rate, args.walk).await?;

    Ok(())
}
