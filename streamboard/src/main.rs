mod server;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use streamboard_core::{load_config, logging};

use server::StreamboardServer;

/// Telemetry fan-out gateway: bridges one Redis pub/sub source to many
/// SSE/WebSocket dashboard clients, plus a producer/consumer relay.
#[derive(Debug, Parser)]
#[command(name = "streamboard", version)]
struct Args {
    /// Path to a YAML config file (default: STREAMBOARD_CONFIG_PATH or ./config.yaml)
    #[arg(long)]
    config: Option<String>,

    /// Override the gateway HTTP port
    #[arg(long, short = 'p')]
    port: Option<u16>,

    /// Override the relay port
    #[arg(long)]
    relay_port: Option<u16>,

    /// Restrict the relay to loopback connections only
    #[arg(long)]
    local: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration, then apply CLI overrides
    let mut config = load_config(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.http_port = port;
    }
    if let Some(port) = args.relay_port {
        config.relay.port = port;
    }
    if args.local {
        config.relay.local_only = true;
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Streamboard starting...");
    info!("Gateway address: {}", config.http_address());
    if config.relay.enabled {
        info!("Relay address: {}", config.relay_address());
    }

    // 3. Build and run the server
    let server = StreamboardServer::new(config);
    server.start().await
}
