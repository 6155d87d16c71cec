use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use vstation_relay::RelayConfig;

/// VStation relay - bridges browser WebSockets to the control bus
#[derive(Parser)]
#[command(name = "vstation-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(long, default_value = "/etc/vstation/relay.toml")]
    config: PathBuf,

    /// Listen address (overrides the config file)
    #[arg(long)]
    listen: Option<String>,

    /// Control bus socket path (overrides the config file)
    #[arg(long)]
    bus_socket: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = RelayConfig::load(&args.config)?;
    if let Some(listen) = args.listen {
        cfg.listen = listen;
    }
    if let Some(bus_socket) = args.bus_socket {
        cfg.bus.socket_path = bus_socket;
    }

    let addr: SocketAddr = cfg.listen.parse()?;
    info!(
        "Starting VStation relay v{} on {} (bus: {})",
        vstation_common::VERSION,
        addr,
        cfg.bus.socket_path.display()
    );

    vstation_relay::server::serve(addr, cfg).await
}
