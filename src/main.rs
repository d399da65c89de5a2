//! Databoard - Real-Time Dashboard Data Broker
//!
//! CLI entry point for the databoard server.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod providers;
mod server;
mod transport;

/// Command-line options for the databoard server.
#[derive(Debug, Parser)]
#[command(name = "databoard", version, about = "Real-time dashboard data broker")]
struct Cli {
    /// Override the configured listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the configured listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "databoard=info,databoard_broker=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    server::run(cli.host, cli.port).await
}
