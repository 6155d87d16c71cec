//! Interactive connect: list machines, pick one, start it, and attach its
//! remote display.

use std::io::{BufRead, Write};

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing::warn;

use vstation_common::MachineDescriptor;

use crate::commands::StationArgs;
use crate::display::{DisplayEvents, DisplayManager, NullEngineFactory, ViewerFactory};
use crate::output::{print_error, print_item, OutputFormat};
use crate::session::{PresetSelector, Selector, SessionDriver, SessionState};

#[derive(Parser)]
pub struct ConnectArgs {
    /// Skip the interactive prompt and select this machine
    #[arg(long)]
    pub machine: Option<String>,

    /// Viewer command to launch with the display URL
    #[arg(long)]
    pub viewer: Option<String>,

    #[command(flatten)]
    pub station: StationArgs,
}

/// Terminal events sink: prompts for a display password when the engine
/// asks for one.
struct StdinEvents;

impl DisplayEvents for StdinEvents {
    fn connected(&mut self) {
        println!("{}", "Display connected.".green());
    }

    fn disconnected(&mut self, clean: bool) {
        if clean {
            println!("Display disconnected.");
        } else {
            print_error("Display connection lost unexpectedly");
        }
    }

    fn credentials_required(&mut self) -> Option<String> {
        print!("Display password: ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }

    fn desktop_name(&mut self, name: &str) {
        println!("Remote desktop: {}", name.cyan());
    }
}

/// Prompts on the terminal for a machine from the list.
struct StdinSelector;

impl Selector for StdinSelector {
    fn select(&mut self, machines: &[MachineDescriptor]) -> Option<String> {
        println!("{}", "Available machines:".bold());
        for (i, machine) in machines.iter().enumerate() {
            match &machine.description {
                Some(description) => {
                    println!("  {}. {} ({})", i + 1, machine.name.cyan(), description.dimmed())
                }
                None => println!("  {}. {}", i + 1, machine.name.cyan()),
            }
        }
        print!("Select a machine [1-{}]: ", machines.len());
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_err() {
            return None;
        }
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        // Accept either an index or a machine name.
        if let Ok(index) = line.parse::<usize>() {
            if index >= 1 && index <= machines.len() {
                return Some(machines[index - 1].name.clone());
            }
            warn!("Index {} out of range", index);
            return None;
        }
        Some(line.to_string())
    }
}

pub async fn execute(args: ConnectArgs, format: OutputFormat) -> Result<()> {
    let display = match &args.viewer {
        Some(command) => DisplayManager::new(Box::new(ViewerFactory::new(command.clone()))),
        None => DisplayManager::new(Box::new(NullEngineFactory)),
    }
    .with_events(Box::new(StdinEvents));

    let mut driver = SessionDriver::new(args.station.channel_options(), display);

    let mut selector: Box<dyn Selector> = match &args.machine {
        Some(name) => Box::new(PresetSelector(name.clone())),
        None => Box::new(StdinSelector),
    };

    driver
        .connect(&args.station.address, args.station.port, &mut *selector)
        .await?;

    match driver.state() {
        SessionState::DisplayActive { name, endpoint } => {
            let name = name.clone();
            let endpoint = endpoint.clone();
            if let Some(session) = driver.display().active() {
                println!(
                    "{} {} ({})",
                    "Connected to".bold(),
                    name.cyan(),
                    session.url().dimmed()
                );
            }
            print_item(&endpoint, format);
            if args.viewer.is_some() {
                println!("Press Ctrl-C to disconnect.");
                tokio::signal::ctrl_c().await?;
                driver.display().detach();
            }
            Ok(())
        }
        SessionState::Error { message } => {
            print_error(message);
            std::process::exit(1);
        }
        other => {
            // Selection abandoned at the prompt.
            tracing::debug!("Session ended in state {:?}", other);
            Ok(())
        }
    }
}
