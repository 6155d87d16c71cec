//! Start a machine without attaching a display.

use anyhow::Result;
use clap::Parser;

use vstation_common::Request;

use crate::commands::StationArgs;
use crate::output::print_success;

#[derive(Parser)]
pub struct StartArgs {
    /// Machine name
    pub name: String,

    #[command(flatten)]
    pub station: StationArgs,
}

pub async fn execute(args: StartArgs) -> Result<()> {
    let channel = args.station.open_channel().await?;

    channel
        .request(Request::Start {
            name: args.name.clone(),
        })
        .await?;

    print_success(&format!("Machine {} started", args.name));
    Ok(())
}
