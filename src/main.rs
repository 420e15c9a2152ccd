use clap::Parser;
use tracing_subscriber::EnvFilter;

use dmc_robo_bridge::config::{Cli, Command};
use dmc_robo_bridge::{serial, teleop};

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Teleop(args) => teleop::run(args).await,
        Command::Serial(args) => serial::run(args).await,
    };

    if let Err(e) = result {
        eprintln!("Bridge error: {}", e);
        std::process::exit(1);
    }
}
