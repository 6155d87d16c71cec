//! VStation CLI - Main Entry Point
//!
//! Operator client for a VStation relay: list machines, start them, attach
//! remote displays, and upload files to the transfer drive.

use clap::{Parser, Subcommand};

use vstation_cli::commands::{connect, machines, start, upload};
use vstation_cli::output;

/// VStation CLI - Remote machine console client
#[derive(Parser)]
#[command(name = "vstation")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available machines
    Machines(machines::MachinesArgs),

    /// Start a machine
    Start(start::StartArgs),

    /// Start a machine and attach its remote display
    Connect(connect::ConnectArgs),

    /// Upload a file to a machine's transfer drive
    Upload(upload::UploadArgs),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Machines(args) => machines::execute(args, cli.format).await?,
        Commands::Start(args) => start::execute(args).await?,
        Commands::Connect(args) => connect::execute(args, cli.format).await?,
        Commands::Upload(args) => upload::execute(args).await?,
        Commands::Version => {
            println!("VStation CLI v{}", vstation_common::VERSION);
            println!("Remote machine console client");
        }
    }

    Ok(())
}
