//! Upload a file into a machine's transfer drive.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use vstation_common::{encode_contents, validate_upload_size, Request, ResponsePayload};

use crate::commands::StationArgs;
use crate::output::{print_success, print_warning};

#[derive(Parser)]
pub struct UploadArgs {
    /// Machine name
    pub name: String,

    /// File to upload
    pub file: PathBuf,

    /// Store under a different filename
    #[arg(long)]
    pub filename: Option<String>,

    #[command(flatten)]
    pub station: StationArgs,
}

pub async fn execute(args: UploadArgs) -> Result<()> {
    // Size is checked before any network traffic so an oversized file is
    // rejected without a round trip.
    let metadata = std::fs::metadata(&args.file)
        .with_context(|| format!("Cannot read {}", args.file.display()))?;
    validate_upload_size(metadata.len())?;

    let filename = match &args.filename {
        Some(name) => name.clone(),
        None => match args.file.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => bail!("{} has no filename component", args.file.display()),
        },
    };

    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("Cannot read {}", args.file.display()))?;

    let channel = args.station.open_channel().await?;
    let payload = channel
        .request(Request::Upload {
            name: args.name.clone(),
            filename: filename.clone(),
            contents: encode_contents(&bytes),
        })
        .await?;

    // The station may rename the file to avoid a collision.
    let stored = match payload {
        ResponsePayload::Upload { filename } => filename,
        _ => filename.clone(),
    };
    if stored != filename {
        print_warning(&format!("Renamed to avoid a collision: {}", stored));
    }
    print_success(&format!(
        "File successfully uploaded as {} in the FXF drive",
        stored
    ));
    Ok(())
}
