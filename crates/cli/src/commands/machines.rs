//! List the machines available on the station.

use anyhow::{bail, Result};
use clap::Parser;

use vstation_common::{Request, ResponsePayload};

use crate::commands::StationArgs;
use crate::output::{print_list, OutputFormat};

#[derive(Parser)]
pub struct MachinesArgs {
    #[command(flatten)]
    pub station: StationArgs,
}

pub async fn execute(args: MachinesArgs, format: OutputFormat) -> Result<()> {
    let channel = args.station.open_channel().await?;

    match channel.request(Request::Machines).await? {
        ResponsePayload::Machines { machines } => {
            print_list(&machines, format);
            Ok(())
        }
        other => bail!("Unexpected machine list payload: {:?}", other),
    }
}
